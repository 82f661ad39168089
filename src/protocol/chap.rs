//! CHAP protocol - RFC 1994
//!
//! Challenge Handshake Authentication Protocol packet format and the MD5
//! response. MS-CHAP value layouts live in [`mschap`](super::mschap).

use super::control::CONTROL_HEADER_SIZE;
use crate::{Error, Result};

/// CHAP header size (code + identifier + length)
pub const CHAP_HEADER_SIZE: usize = CONTROL_HEADER_SIZE;

/// MD5 response length
pub const MD5_RESPONSE_LEN: usize = 16;

/// CHAP packet codes
pub mod codes {
    /// Challenge from authenticator
    pub const CHALLENGE: u8 = 1;
    /// Response from peer
    pub const RESPONSE: u8 = 2;
    /// Authentication success
    pub const SUCCESS: u8 = 3;
    /// Authentication failure
    pub const FAILURE: u8 = 4;
}

/// CHAP algorithms (LCP Authentication-Protocol option, third octet)
pub mod algorithms {
    /// MD5 (most common)
    pub const MD5: u8 = 5;
    /// MS-CHAP
    pub const MSCHAP: u8 = 0x80;
    /// MS-CHAPv2
    pub const MSCHAPV2: u8 = 0x81;
}

/// Parsed CHAP packet (zero-copy reference)
#[derive(Debug)]
pub struct ChapPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> ChapPacket<'a> {
    /// Parse CHAP packet from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < CHAP_HEADER_SIZE {
            return Err(Error::Parse("CHAP packet too short".into()));
        }

        let packet = Self { buffer };

        let length = packet.length() as usize;
        if length < CHAP_HEADER_SIZE {
            return Err(Error::Parse("CHAP length too small".into()));
        }
        if buffer.len() < length {
            return Err(Error::Parse("CHAP packet truncated".into()));
        }

        Ok(packet)
    }

    /// Code field
    pub fn code(&self) -> u8 {
        self.buffer[0]
    }

    /// Identifier field
    pub fn identifier(&self) -> u8 {
        self.buffer[1]
    }

    /// Length field
    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.buffer[2], self.buffer[3]])
    }

    /// Data field
    pub fn data(&self) -> &'a [u8] {
        let len = self.length() as usize;
        &self.buffer[CHAP_HEADER_SIZE..len]
    }

    /// Split a Challenge/Response into (value, name)
    /// Format: Value-Size (1 byte) + Value + Name (rest of data)
    pub fn value_and_name(&self) -> Option<(&'a [u8], &'a [u8])> {
        let code = self.code();
        if code != codes::CHALLENGE && code != codes::RESPONSE {
            return None;
        }
        let data = self.data();
        if data.is_empty() {
            return None;
        }
        let value_size = data[0] as usize;
        if value_size == 0 || data.len() < 1 + value_size {
            return None;
        }
        Some((&data[1..1 + value_size], &data[1 + value_size..]))
    }

    /// Get Challenge/Response value
    pub fn value(&self) -> Option<&'a [u8]> {
        self.value_and_name().map(|(value, _)| value)
    }

    /// Get Name from Challenge/Response
    pub fn name(&self) -> Option<&'a [u8]> {
        self.value_and_name().map(|(_, name)| name)
    }

    /// Get message from Success/Failure
    pub fn message(&self) -> Option<&'a [u8]> {
        let code = self.code();
        if code != codes::SUCCESS && code != codes::FAILURE {
            return None;
        }
        Some(self.data())
    }
}

/// Calculate CHAP-MD5 response
///
/// response = MD5(identifier + secret + challenge)
pub fn calculate_chap_md5(identifier: u8, secret: &[u8], challenge: &[u8]) -> [u8; 16] {
    let mut ctx = md5::Context::new();
    ctx.consume([identifier]);
    ctx.consume(secret);
    ctx.consume(challenge);
    ctx.compute().0
}

/// Builder for CHAP packets
#[derive(Debug, Default)]
pub struct ChapBuilder {
    code: u8,
    identifier: u8,
    data: Vec<u8>,
}

impl ChapBuilder {
    /// Create a new CHAP packet builder
    pub fn new(code: u8, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            data: Vec::new(),
        }
    }

    /// Create Challenge builder
    pub fn challenge(identifier: u8, challenge_value: &[u8], name: &[u8]) -> Self {
        Self::new(codes::CHALLENGE, identifier).value_and_name(challenge_value, name)
    }

    /// Create Response builder
    pub fn response(identifier: u8, response_value: &[u8], name: &[u8]) -> Self {
        Self::new(codes::RESPONSE, identifier).value_and_name(response_value, name)
    }

    /// Create Success builder
    pub fn success(identifier: u8, message: &str) -> Self {
        let mut builder = Self::new(codes::SUCCESS, identifier);
        builder.data.extend_from_slice(message.as_bytes());
        builder
    }

    /// Create Failure builder
    pub fn failure(identifier: u8, message: &str) -> Self {
        let mut builder = Self::new(codes::FAILURE, identifier);
        builder.data.extend_from_slice(message.as_bytes());
        builder
    }

    fn value_and_name(mut self, value: &[u8], name: &[u8]) -> Self {
        self.data.push(value.len() as u8);
        self.data.extend_from_slice(value);
        self.data.extend_from_slice(name);
        self
    }

    /// Data part only (no header)
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Build the CHAP packet
    pub fn build(self) -> Vec<u8> {
        let length = (CHAP_HEADER_SIZE + self.data.len()) as u16;
        let mut packet = Vec::with_capacity(length as usize);

        packet.push(self.code);
        packet.push(self.identifier);
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(&self.data);

        packet
    }
}
