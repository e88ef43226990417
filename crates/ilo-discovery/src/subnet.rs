//! Subnet enumeration
//!
//! Derives the candidate address range from a base IP and a dotted-quad
//! subnet mask. The range is inclusive of the network and broadcast
//! addresses: management controllers are routinely parked on either end of
//! small subnets, so every address is a probe candidate.

use crate::{Error, Result};
use ipnet::Ipv4Net;
use std::net::Ipv4Addr;

/// The enumerated probe range of one IPv4 subnet.
///
/// Construction validates the configuration; every operation afterwards is
/// total. Instances are immutable and built once at boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetRange {
    net: Ipv4Net,
    /// First address of the range (`base & mask`), as an integer.
    start: u32,
    /// Last address of the range (`start | !mask`), as an integer.
    end: u32,
}

impl SubnetRange {
    /// Build a range from dotted-quad strings.
    ///
    /// Fails with [`Error::InvalidNetworkConfig`] when either quad is
    /// unparseable or the mask bits are not contiguous.
    pub fn new(base_ip: &str, subnet_mask: &str) -> Result<Self> {
        let base: Ipv4Addr = base_ip
            .parse()
            .map_err(|_| Error::InvalidNetworkConfig(format!("unparseable base IP '{base_ip}'")))?;
        let mask: Ipv4Addr = subnet_mask.parse().map_err(|_| {
            Error::InvalidNetworkConfig(format!("unparseable subnet mask '{subnet_mask}'"))
        })?;
        Self::from_parts(base, mask)
    }

    /// Build a range from already-parsed addresses.
    pub fn from_parts(base: Ipv4Addr, mask: Ipv4Addr) -> Result<Self> {
        let net = Ipv4Net::with_netmask(base, mask).map_err(|_| {
            Error::InvalidNetworkConfig(format!("non-contiguous subnet mask '{mask}'"))
        })?;

        Ok(Self {
            net,
            start: u32::from(net.network()),
            end: u32::from(net.broadcast()),
        })
    }

    /// Prefix length of the mask (24 for 255.255.255.0).
    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    /// Number of addresses in the range, `2^(32 - prefix)`.
    pub fn host_count(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// First address of the range.
    pub fn network_start(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.start)
    }

    /// Last address of the range.
    pub fn network_end(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.end)
    }

    /// Whether `addr` falls inside the range.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let value = u32::from(addr);
        value >= self.start && value <= self.end
    }

    /// The full candidate sequence in ascending numeric order.
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        (self.start..=self.end).map(Ipv4Addr::from).collect()
    }

    /// Address at a bitmap index, if the index is in range.
    pub fn address_at(&self, index: usize) -> Option<Ipv4Addr> {
        if index < self.host_count() {
            Some(Ipv4Addr::from(self.start + index as u32))
        } else {
            None
        }
    }

    /// Bitmap index of an address, if it belongs to the range.
    pub fn index_of(&self, addr: Ipv4Addr) -> Option<usize> {
        if self.contains(addr) {
            Some((u32::from(addr) - self.start) as usize)
        } else {
            None
        }
    }
}

impl std::fmt::Display for SubnetRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.net)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slash_24_enumeration() {
        let range = SubnetRange::new("10.1.0.17", "255.255.255.0").unwrap();

        assert_eq!(range.prefix_len(), 24);
        assert_eq!(range.host_count(), 256);
        assert_eq!(range.network_start(), Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(range.network_end(), Ipv4Addr::new(10, 1, 0, 255));

        let addresses = range.addresses();
        assert_eq!(addresses.len(), 256);
        assert_eq!(addresses[0], Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(addresses[255], Ipv4Addr::new(10, 1, 0, 255));

        // Strictly ascending, all distinct
        for window in addresses.windows(2) {
            assert!(u32::from(window[0]) < u32::from(window[1]));
        }
    }

    #[test]
    fn test_slash_30_enumeration() {
        let range = SubnetRange::new("10.0.0.0", "255.255.255.252").unwrap();
        let addresses = range.addresses();

        assert_eq!(addresses.len(), 4);
        assert_eq!(addresses[1], Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(addresses[3], Ipv4Addr::new(10, 0, 0, 3));
    }

    #[test]
    fn test_containment() {
        let range = SubnetRange::new("192.168.4.0", "255.255.255.0").unwrap();

        for addr in range.addresses() {
            assert!(range.contains(addr));
        }
        assert!(!range.contains(Ipv4Addr::new(192, 168, 5, 1)));
        assert!(!range.contains(Ipv4Addr::new(192, 168, 3, 255)));
    }

    #[test]
    fn test_index_roundtrip() {
        let range = SubnetRange::new("10.0.0.0", "255.255.255.240").unwrap();

        for (i, addr) in range.addresses().into_iter().enumerate() {
            assert_eq!(range.index_of(addr), Some(i));
            assert_eq!(range.address_at(i), Some(addr));
        }
        assert_eq!(range.address_at(16), None);
        assert_eq!(range.index_of(Ipv4Addr::new(10, 0, 0, 16)), None);
    }

    #[test]
    fn test_rejects_unparseable_base() {
        assert!(matches!(
            SubnetRange::new("10.0.0", "255.255.255.0"),
            Err(Error::InvalidNetworkConfig(_))
        ));
        assert!(matches!(
            SubnetRange::new("not-an-ip", "255.255.255.0"),
            Err(Error::InvalidNetworkConfig(_))
        ));
    }

    #[test]
    fn test_rejects_non_contiguous_mask() {
        assert!(matches!(
            SubnetRange::new("10.0.0.0", "255.0.255.0"),
            Err(Error::InvalidNetworkConfig(_))
        ));
        assert!(matches!(
            SubnetRange::new("10.0.0.0", "255.255.255.5"),
            Err(Error::InvalidNetworkConfig(_))
        ));
    }

    #[test]
    fn test_host_network_base_is_normalized() {
        // A base inside the subnet yields the same range as the network base.
        let a = SubnetRange::new("10.1.0.0", "255.255.255.0").unwrap();
        let b = SubnetRange::new("10.1.0.200", "255.255.255.0").unwrap();
        assert_eq!(a.network_start(), b.network_start());
        assert_eq!(a.network_end(), b.network_end());
    }

    #[test]
    fn test_single_address_range() {
        let range = SubnetRange::new("10.9.9.9", "255.255.255.255").unwrap();
        assert_eq!(range.host_count(), 1);
        assert_eq!(range.addresses(), vec![Ipv4Addr::new(10, 9, 9, 9)]);
    }
}
