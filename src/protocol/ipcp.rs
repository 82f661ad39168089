//! IPCP protocol - RFC 1332
//!
//! Internet Protocol Control Protocol option types for negotiating IPv4
//! parameters, plus the RFC 1877 name server extensions.

use super::options::ConfigOption;
use std::net::Ipv4Addr;

/// IPCP option types
pub mod options {
    /// IP-Addresses (deprecated, RFC 1172)
    pub const IP_ADDRESSES: u8 = 1;
    /// IP-Compression-Protocol
    pub const IP_COMPRESSION: u8 = 2;
    /// IP-Address
    pub const IP_ADDRESS: u8 = 3;
    /// Primary DNS Server Address (Microsoft extension)
    pub const PRIMARY_DNS: u8 = 129;
    /// Primary NBNS Server Address (Microsoft extension)
    pub const PRIMARY_NBNS: u8 = 130;
    /// Secondary DNS Server Address (Microsoft extension)
    pub const SECONDARY_DNS: u8 = 131;
    /// Secondary NBNS Server Address (Microsoft extension)
    pub const SECONDARY_NBNS: u8 = 132;

    /// Human readable option name for log lines
    pub fn name(opt_type: u8) -> &'static str {
        match opt_type {
            IP_ADDRESSES => "IP-Addresses",
            IP_COMPRESSION => "IP-Compression",
            IP_ADDRESS => "IP-Address",
            PRIMARY_DNS => "Primary-DNS",
            PRIMARY_NBNS => "Primary-NBNS",
            SECONDARY_DNS => "Secondary-DNS",
            SECONDARY_NBNS => "Secondary-NBNS",
            _ => "Unknown",
        }
    }
}

/// Extract an IPv4 address from an option value
pub fn option_ip(opt: &ConfigOption<'_>) -> Option<Ipv4Addr> {
    opt.as_u32().map(Ipv4Addr::from)
}
