//! LCP protocol - RFC 1661
//!
//! Link Control Protocol option types and option value helpers. Packet
//! framing is shared with the other control protocols, see
//! [`control`](super::control).

use super::options::ConfigOption;

/// Default Maximum-Receive-Unit
pub const DEFAULT_MRU: u16 = 1500;

/// Smallest MRU we accept from a peer
pub const MIN_MRU: u16 = 128;

/// Highest control code LCP handles (Time-Remaining, RFC 1570)
pub const MAX_CODE: u8 = super::control::codes::TIME_REMAINING;

/// LCP option types
pub mod options {
    /// Maximum-Receive-Unit
    pub const MRU: u8 = 1;
    /// Async-Control-Character-Map
    pub const ACCM: u8 = 2;
    /// Authentication-Protocol
    pub const AUTH_PROTOCOL: u8 = 3;
    /// Quality-Protocol
    pub const QUALITY_PROTOCOL: u8 = 4;
    /// Magic-Number
    pub const MAGIC_NUMBER: u8 = 5;
    /// Protocol-Field-Compression
    pub const PFC: u8 = 7;
    /// Address-and-Control-Field-Compression
    pub const ACFC: u8 = 8;

    /// Human readable option name for log lines
    pub fn name(opt_type: u8) -> &'static str {
        match opt_type {
            MRU => "MRU",
            ACCM => "ACCM",
            AUTH_PROTOCOL => "Auth-Protocol",
            QUALITY_PROTOCOL => "Quality-Protocol",
            MAGIC_NUMBER => "Magic-Number",
            PFC => "PFC",
            ACFC => "ACFC",
            _ => "Unknown",
        }
    }
}

/// Authentication protocol values for LCP option 3
pub mod auth {
    /// Password Authentication Protocol
    pub const PAP: u16 = 0xc023;
    /// Challenge Handshake Authentication Protocol
    pub const CHAP: u16 = 0xc223;
    /// CHAP algorithm: MD5
    pub const CHAP_MD5: u8 = 5;
    /// CHAP algorithm: MS-CHAP (RFC 2433)
    pub const CHAP_MSCHAP: u8 = 0x80;
    /// CHAP algorithm: MS-CHAPv2 (RFC 2759)
    pub const CHAP_MSCHAPV2: u8 = 0x81;
}

/// Get Authentication-Protocol option value as (protocol, algorithm)
pub fn auth_protocol(opt: &ConfigOption<'_>) -> Option<(u16, Option<u8>)> {
    let data = opt.data;
    if data.len() >= 2 {
        let proto = u16::from_be_bytes([data[0], data[1]]);
        let algorithm = if data.len() >= 3 { Some(data[2]) } else { None };
        Some((proto, algorithm))
    } else {
        None
    }
}

/// Build an Authentication-Protocol option value
pub fn auth_protocol_value(proto: u16, algorithm: Option<u8>) -> Vec<u8> {
    let mut data = proto.to_be_bytes().to_vec();
    if let Some(alg) = algorithm {
        data.push(alg);
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_protocol_chap() {
        let data = [0xc2, 0x23, 0x05];
        let opt = ConfigOption {
            opt_type: options::AUTH_PROTOCOL,
            data: &data,
        };
        assert_eq!(auth_protocol(&opt), Some((auth::CHAP, Some(auth::CHAP_MD5))));
    }

    #[test]
    fn test_auth_protocol_pap() {
        let data = [0xc0, 0x23];
        let opt = ConfigOption {
            opt_type: options::AUTH_PROTOCOL,
            data: &data,
        };
        assert_eq!(auth_protocol(&opt), Some((auth::PAP, None)));
    }

    #[test]
    fn test_auth_protocol_too_short() {
        let opt = ConfigOption {
            opt_type: options::AUTH_PROTOCOL,
            data: &[0xc0],
        };
        assert_eq!(auth_protocol(&opt), None);
    }

    #[test]
    fn test_auth_protocol_value() {
        assert_eq!(
            auth_protocol_value(auth::CHAP, Some(auth::CHAP_MSCHAPV2)),
            vec![0xc2, 0x23, 0x81]
        );
        assert_eq!(auth_protocol_value(auth::PAP, None), vec![0xc0, 0x23]);
    }
}
