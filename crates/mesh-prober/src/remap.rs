//! CIDR prefix remapping.
//!
//! When a workload crosses a translated cluster boundary, the peer cluster
//! reaches it through a different network prefix. Remapping keeps the host
//! bits of the original address and substitutes the prefix bits of the
//! CIDR the peer uses to route into the source cluster.

use std::net::Ipv4Addr;
use thiserror::Error;

/// Malformed input to the remapper.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid IPv4 address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid CIDR '{0}': expected <ipv4>/<prefix>")]
    InvalidCidr(String),

    #[error("Invalid prefix length in CIDR '{0}': must be between 0 and 32")]
    InvalidPrefixLength(String),
}

/// A parsed IPv4 CIDR block. The network address is stored already masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// Parse `a.b.c.d/L`. Host bits in the address part are ignored.
    pub fn parse(cidr: &str) -> Result<Self, AddressError> {
        let (address, prefix) = cidr
            .trim()
            .split_once('/')
            .ok_or_else(|| AddressError::InvalidCidr(cidr.to_string()))?;

        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| AddressError::InvalidCidr(cidr.to_string()))?;

        let prefix_len: u8 = prefix
            .parse()
            .map_err(|_| AddressError::InvalidPrefixLength(cidr.to_string()))?;
        if prefix_len > 32 {
            return Err(AddressError::InvalidPrefixLength(cidr.to_string()));
        }

        let network = Ipv4Addr::from(u32::from(address) & prefix_mask(prefix_len));
        Ok(Self {
            network,
            prefix_len,
        })
    }

    #[must_use]
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Replace the leading `prefix_len` bits of `address` with this block's
    /// network bits.
    #[must_use]
    pub fn remap(&self, address: Ipv4Addr) -> Ipv4Addr {
        let mask = prefix_mask(self.prefix_len);
        Ipv4Addr::from((u32::from(self.network) & mask) | (u32::from(address) & !mask))
    }
}

/// Netmask with the leading `prefix_len` bits set.
fn prefix_mask(prefix_len: u8) -> u32 {
    match prefix_len {
        0 => 0,
        len => u32::MAX << (32 - u32::from(len.min(32))),
    }
}

/// Address a peer cluster must target to reach `address`, given the CIDR
/// that peer uses for the address's cluster.
///
/// # Errors
///
/// Returns [`AddressError`] if either input is malformed. No default is ever
/// substituted.
pub fn remap_ip(address: &str, target_cidr: &str) -> Result<Ipv4Addr, AddressError> {
    let original: Ipv4Addr = address
        .trim()
        .parse()
        .map_err(|_| AddressError::InvalidAddress(address.to_string()))?;
    let cidr = Ipv4Cidr::parse(target_cidr)?;
    Ok(cidr.remap(original))
}
