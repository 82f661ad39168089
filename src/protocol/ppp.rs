//! PPP protocol field - RFC 1661 section 2
//!
//! A PPP frame, once the transport has removed its own framing, is a
//! big-endian protocol number followed by the protocol payload.

use crate::{Error, Result};

/// PPP header size (protocol field only, no HDLC framing)
pub const PPP_HEADER_SIZE: usize = 2;

/// PPP protocol numbers
pub mod protocols {
    /// Internet Protocol version 4
    pub const IP: u16 = 0x0021;
    /// Internet Protocol Control Protocol
    pub const IPCP: u16 = 0x8021;
    /// Link Control Protocol
    pub const LCP: u16 = 0xc021;
    /// Password Authentication Protocol
    pub const PAP: u16 = 0xc023;
    /// Challenge Handshake Authentication Protocol
    pub const CHAP: u16 = 0xc223;

    /// Human readable protocol name for log lines
    pub fn name(proto: u16) -> &'static str {
        match proto {
            IP => "IP",
            IPCP => "IPCP",
            LCP => "LCP",
            PAP => "PAP",
            CHAP => "CHAP",
            _ => "Unknown",
        }
    }
}

/// Parsed PPP frame (zero-copy reference)
#[derive(Debug)]
pub struct PppFrame<'a> {
    buffer: &'a [u8],
}

impl<'a> PppFrame<'a> {
    /// Parse PPP frame from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < PPP_HEADER_SIZE {
            return Err(Error::Parse("PPP frame too short".into()));
        }
        Ok(Self { buffer })
    }

    /// Protocol field
    pub fn protocol(&self) -> u16 {
        u16::from_be_bytes([self.buffer[0], self.buffer[1]])
    }

    /// Payload (protocol-specific data)
    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[PPP_HEADER_SIZE..]
    }
}

/// Builder for PPP frames
#[derive(Debug, Default)]
pub struct PppBuilder {
    protocol: u16,
    payload: Vec<u8>,
}

impl PppBuilder {
    /// Create a new PPP frame builder
    pub fn new(protocol: u16) -> Self {
        Self {
            protocol,
            payload: Vec::new(),
        }
    }

    /// Set the payload
    pub fn payload(mut self, data: &[u8]) -> Self {
        self.payload = data.to_vec();
        self
    }

    /// Build the PPP frame
    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(PPP_HEADER_SIZE + self.payload.len());
        frame.extend_from_slice(&self.protocol.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}
