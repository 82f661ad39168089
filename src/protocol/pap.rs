//! PAP protocol - RFC 1334
//!
//! Password Authentication Protocol for simple clear-text authentication.

use super::control::CONTROL_HEADER_SIZE;
use crate::{Error, Result};

/// PAP header size (code + identifier + length)
pub const PAP_HEADER_SIZE: usize = CONTROL_HEADER_SIZE;

/// PAP packet codes
pub mod codes {
    /// Authenticate-Request
    pub const AUTHENTICATE_REQUEST: u8 = 1;
    /// Authenticate-Ack (success)
    pub const AUTHENTICATE_ACK: u8 = 2;
    /// Authenticate-Nak (failure)
    pub const AUTHENTICATE_NAK: u8 = 3;
}

/// Parsed PAP packet (zero-copy reference)
#[derive(Debug)]
pub struct PapPacket<'a> {
    buffer: &'a [u8],
}

impl<'a> PapPacket<'a> {
    /// Parse PAP packet from buffer
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < PAP_HEADER_SIZE {
            return Err(Error::Parse("PAP packet too short".into()));
        }

        let packet = Self { buffer };

        let length = packet.length() as usize;
        if length < PAP_HEADER_SIZE {
            return Err(Error::Parse("PAP length too small".into()));
        }
        if buffer.len() < length {
            return Err(Error::Parse("PAP packet truncated".into()));
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
        &self.buffer[PAP_HEADER_SIZE..len]
    }

    /// Peer-ID and Password from an Authenticate-Request
    ///
    /// Format: Peer-ID-Length (1) + Peer-ID + Passwd-Length (1) + Password.
    /// The two fields must account for the whole payload, nothing more.
    pub fn credentials(&self) -> Option<(&'a [u8], &'a [u8])> {
        if self.code() != codes::AUTHENTICATE_REQUEST {
            return None;
        }
        let data = self.data();
        let peer_id_len = *data.first()? as usize;
        let passwd_offset = 1 + peer_id_len;
        let passwd_len = *data.get(passwd_offset)? as usize;
        let passwd_start = passwd_offset + 1;
        if passwd_start + passwd_len != data.len() {
            return None;
        }
        Some((
            &data[1..passwd_offset],
            &data[passwd_start..passwd_start + passwd_len],
        ))
    }

    /// Get message from Authenticate-Ack/Nak
    /// Format: Msg-Length (1 byte) + Message
    pub fn message(&self) -> Option<&'a [u8]> {
        if self.code() != codes::AUTHENTICATE_ACK && self.code() != codes::AUTHENTICATE_NAK {
            return None;
        }
        let data = self.data();
        if data.is_empty() {
            return Some(&[]);
        }
        let msg_len = data[0] as usize;
        if data.len() < 1 + msg_len {
            return Some(&[]);
        }
        Some(&data[1..1 + msg_len])
    }

    /// Check if this is an authentication success
    pub fn is_success(&self) -> bool {
        self.code() == codes::AUTHENTICATE_ACK
    }

    /// Check if this is an authentication failure
    pub fn is_failure(&self) -> bool {
        self.code() == codes::AUTHENTICATE_NAK
    }
}

/// Builder for PAP packets
#[derive(Debug, Default)]
pub struct PapBuilder {
    code: u8,
    identifier: u8,
    data: Vec<u8>,
}

impl PapBuilder {
    /// Create a new PAP packet builder
    pub fn new(code: u8, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            data: Vec::new(),
        }
    }

    /// Create Authenticate-Request builder
    pub fn authenticate_request(identifier: u8, peer_id: &[u8], password: &[u8]) -> Self {
        let mut builder = Self::new(codes::AUTHENTICATE_REQUEST, identifier);
        builder.push_field(peer_id);
        builder.push_field(password);
        builder
    }

    /// Create Authenticate-Ack builder
    pub fn authenticate_ack(identifier: u8, message: &str) -> Self {
        let mut builder = Self::new(codes::AUTHENTICATE_ACK, identifier);
        builder.push_field(message.as_bytes());
        builder
    }

    /// Create Authenticate-Nak builder
    pub fn authenticate_nak(identifier: u8, message: &str) -> Self {
        let mut builder = Self::new(codes::AUTHENTICATE_NAK, identifier);
        builder.push_field(message.as_bytes());
        builder
    }

    // Length-prefixed field, clipped to what a one-byte length can describe
    fn push_field(&mut self, field: &[u8]) {
        let field = &field[..field.len().min(u8::MAX as usize)];
        self.data.push(field.len() as u8);
        self.data.extend_from_slice(field);
    }

    /// Build the PAP packet
    pub fn build(self) -> Vec<u8> {
        let length = (PAP_HEADER_SIZE + self.data.len()) as u16;
        let mut packet = Vec::with_capacity(length as usize);

        packet.push(self.code);
        packet.push(self.identifier);
        packet.extend_from_slice(&length.to_be_bytes());
        packet.extend_from_slice(&self.data);

        packet
    }
}
