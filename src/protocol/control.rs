//! Control packet header - RFC 1661 section 5
//!
//! Every PPP control protocol (LCP, IPCP, CHAP, PAP, ...) shares the same
//! four byte header: code, identifier and a big-endian length that counts
//! the header itself.

use crate::{Error, Result};

/// Control header size (code + identifier + length)
pub const CONTROL_HEADER_SIZE: usize = 4;

/// Control packet codes shared by LCP and the network control protocols
pub mod codes {
    /// Vendor-Specific (RFC 2153)
    pub const VENDOR: u8 = 0;
    /// Configure-Request
    pub const CONFIGURE_REQUEST: u8 = 1;
    /// Configure-Ack
    pub const CONFIGURE_ACK: u8 = 2;
    /// Configure-Nak
    pub const CONFIGURE_NAK: u8 = 3;
    /// Configure-Reject
    pub const CONFIGURE_REJECT: u8 = 4;
    /// Terminate-Request
    pub const TERMINATE_REQUEST: u8 = 5;
    /// Terminate-Ack
    pub const TERMINATE_ACK: u8 = 6;
    /// Code-Reject
    pub const CODE_REJECT: u8 = 7;
    /// Protocol-Reject
    pub const PROTOCOL_REJECT: u8 = 8;
    /// Echo-Request
    pub const ECHO_REQUEST: u8 = 9;
    /// Echo-Reply
    pub const ECHO_REPLY: u8 = 10;
    /// Discard-Request
    pub const DISCARD_REQUEST: u8 = 11;
    /// Identification (RFC 1570)
    pub const IDENTIFICATION: u8 = 12;
    /// Time-Remaining (RFC 1570)
    pub const TIME_REMAINING: u8 = 13;
    /// Reset-Request (CCP/ECP)
    pub const RESET_REQUEST: u8 = 14;
    /// Reset-Ack (CCP/ECP)
    pub const RESET_ACK: u8 = 15;

    /// Human readable code name for log lines
    pub fn name(code: u8) -> &'static str {
        match code {
            VENDOR => "Vendor",
            CONFIGURE_REQUEST => "Configure-Request",
            CONFIGURE_ACK => "Configure-Ack",
            CONFIGURE_NAK => "Configure-Nak",
            CONFIGURE_REJECT => "Configure-Reject",
            TERMINATE_REQUEST => "Terminate-Request",
            TERMINATE_ACK => "Terminate-Ack",
            CODE_REJECT => "Code-Reject",
            PROTOCOL_REJECT => "Protocol-Reject",
            ECHO_REQUEST => "Echo-Request",
            ECHO_REPLY => "Echo-Reply",
            DISCARD_REQUEST => "Discard-Request",
            IDENTIFICATION => "Identification",
            TIME_REMAINING => "Time-Remaining",
            RESET_REQUEST => "Reset-Request",
            RESET_ACK => "Reset-Ack",
            _ => "Unknown",
        }
    }
}

/// Parsed control packet (zero-copy reference)
///
/// Trailing bytes beyond the declared length (link padding) are not part of
/// the packet; `data()` and `as_bytes()` stop at the declared length.
#[derive(Debug)]
pub struct ControlPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> ControlPacket<'a> {
    /// Parse a control packet from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < CONTROL_HEADER_SIZE {
            return Err(Error::Parse("control packet too short".into()));
        }

        let packet = Self { buffer };

        let length = packet.length() as usize;
        if length < CONTROL_HEADER_SIZE {
            return Err(Error::Parse("control packet length too small".into()));
        }
        if buffer.len() < length {
            return Err(Error::Parse("control packet truncated".into()));
        }

        Ok(packet)
    }

    /// Code field
    pub fn code(&self) -> u8 {
        self.buffer[0]
    }

    /// Identifier field (for matching requests and responses)
    pub fn identifier(&self) -> u8 {
        self.buffer[1]
    }

    /// Length field (total packet length including header)
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Data following the header, up to the declared length
    pub fn data(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[CONTROL_HEADER_SIZE..len]
    }

    /// The packet bytes, without trailing padding
    pub fn as_bytes(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[..len]
    }
}

/// Builder for control packets
#[derive(Debug, Default)]
pub struct ControlBuilder {
    code: u8,
    identifier: u8,
    data: Vec<u8>,
}

impl ControlBuilder {
    /// Create a new control packet builder
    pub fn new(code: u8, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            data: Vec::new(),
        }
    }

    /// Set raw data (options, echo payload, rejected packet, ...)
    pub fn raw_data(mut self, data: &[u8]) -> Self {
        self.data = data.to_vec();
        self
    }

    /// Build the control packet
    pub fn build(self) -> Vec<u8> {
        let length = (CONTROL_HEADER_SIZE + self.data.len()) as u16;
        let mut packet = Vec::with_capacity(length as usize);

        packet.push(self.code);
        packet.push(self.identifier);
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(&self.data);

        packet
    }
}
