//! Configuration option codec - RFC 1661 section 6
//!
//! Options are type-length-value triples where the length octet counts the
//! two header octets. Decoding is a lazy scan that stops at the first
//! malformed option; whatever follows is reported as garbage.

use crate::{Error, Result};

/// Option header size (type + length)
pub const OPTION_HEADER_SIZE: usize = 2;

/// Largest value that fits behind an option header
pub const MAX_OPTION_VALUE: usize = u8::MAX as usize - OPTION_HEADER_SIZE;

/// A configuration option during iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigOption<'a> {
    /// Option type
    pub opt_type: u8,
    /// Option data (excluding type and length bytes)
    pub data: &'a [u8],
}

impl<'a> ConfigOption<'a> {
    /// Value as a big-endian u16, if exactly two bytes long
    pub fn as_u16(&self) -> Option<u16> {
        <[u8; 2]>::try_from(self.data).ok().map(u16::from_be_bytes)
    }

    /// Value as a big-endian u32, if exactly four bytes long
    pub fn as_u32(&self) -> Option<u32> {
        <[u8; 4]>::try_from(self.data).ok().map(u32::from_be_bytes)
    }

    /// Re-encode this option
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(OPTION_HEADER_SIZE + self.data.len());
        out.push(self.opt_type);
        out.push((OPTION_HEADER_SIZE + self.data.len()) as u8);
        out.extend_from_slice(self.data);
        out
    }
}

/// Option value to encode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValue<'a> {
    /// No value (boolean options such as PFC/ACFC)
    Empty,
    /// 16-bit value in network byte order
    U16(u16),
    /// 32-bit value in network byte order
    U32(u32),
    /// Raw bytes
    Bytes(&'a [u8]),
}

/// Encode a single option
pub fn encode(opt_type: u8, value: OptionValue<'_>) -> Result<Vec<u8>> {
    let mut writer = OptionWriter::new();
    writer.push(opt_type, value)?;
    Ok(writer.into_bytes())
}

/// Decode options from buffer, yielding at most `max_options` entries
pub fn decode(data: &[u8], max_options: usize) -> OptionIterator<'_> {
    OptionIterator {
        data,
        offset: 0,
        remaining: max_options,
        malformed: false,
    }
}

/// Iterator over configuration options
#[derive(Debug, Clone)]
pub struct OptionIterator<'a> {
    data: &'a [u8],
    offset: usize,
    remaining: usize,
    malformed: bool,
}

impl<'a> OptionIterator<'a> {
    /// Bytes left behind a malformed option, if the scan stopped on one
    pub fn garbage(&self) -> Option<&'a [u8]> {
        if self.malformed {
            Some(&self.data[self.offset..])
        } else {
            None
        }
    }

    /// Well-formed bytes left unscanned because the option cap was reached
    pub fn unscanned(&self) -> Option<&'a [u8]> {
        if !self.malformed && self.remaining == 0 && self.offset < self.data.len() {
            Some(&self.data[self.offset..])
        } else {
            None
        }
    }
}

impl<'a> Iterator for OptionIterator<'a> {
    type Item = ConfigOption<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.malformed || self.remaining == 0 || self.offset >= self.data.len() {
            return None;
        }

        // Need at least 2 bytes for option header (type + length)
        if self.offset + OPTION_HEADER_SIZE > self.data.len() {
            self.malformed = true;
            return None;
        }

        let opt_type = self.data[self.offset];
        let opt_len = self.data[self.offset + 1] as usize;

        // Option length includes type and length bytes
        if opt_len < OPTION_HEADER_SIZE || self.offset + opt_len > self.data.len() {
            self.malformed = true;
            return None;
        }

        let data_start = self.offset + OPTION_HEADER_SIZE;
        let data_end = self.offset + opt_len;

        let opt = ConfigOption {
            opt_type,
            data: &self.data[data_start..data_end],
        };

        self.offset = data_end;
        self.remaining -= 1;
        Some(opt)
    }
}

/// Accumulates encoded options
#[derive(Debug, Default, Clone)]
pub struct OptionWriter {
    data: Vec<u8>,
}

impl OptionWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an option
    pub fn push(&mut self, opt_type: u8, value: OptionValue<'_>) -> Result<()> {
        let start = self.data.len();
        self.data.push(opt_type);
        self.data.push(0);
        match value {
            OptionValue::Empty => {}
            OptionValue::U16(v) => self.data.extend_from_slice(&v.to_be_bytes()),
            OptionValue::U32(v) => self.data.extend_from_slice(&v.to_be_bytes()),
            OptionValue::Bytes(b) => {
                if b.len() > MAX_OPTION_VALUE {
                    self.data.truncate(start);
                    return Err(Error::InvalidPacket(format!(
                        "option {} value too long ({} bytes)",
                        opt_type,
                        b.len()
                    )));
                }
                self.data.extend_from_slice(b)
            }
        }
        self.data[start + 1] = (self.data.len() - start) as u8;
        Ok(())
    }

    /// Append an already encoded option
    pub fn push_option(&mut self, opt: &ConfigOption<'_>) {
        self.data.extend_from_slice(&opt.to_bytes());
    }

    /// True if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Encoded bytes so far
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
