//! # DLP NIRscan HID Command Protocol
//!
//! Definitions for talking to a NIRscan-class spectrometer over its USB HID
//! interface. Every exchange starts with a host command frame and, for read
//! commands, ends with a length-prefixed response that may span several
//! 64-byte input reports.
//!
//! ## Frame Layout
//!
//! ```text
//! host -> device   [flags, seq=0x00, len_lsb, len_msb, command, group, data...]
//! device -> host   [flags, seq, len_lsb, len_msb, payload...]
//! ```
//!
//! - The command length counts the command and group bytes, so it is always
//!   `data.len() + 2`.
//! - The response length counts only the payload that follows the 4-byte
//!   header.
//! - Responses longer than [`MAX_CHUNK_PAYLOAD`] continue in raw, headerless
//!   chunks (see [`crate::assembler`]).

use crate::error::Error;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

// --- Constants ---

pub const VID: u16 = 0x0451;
pub const PID: u16 = 0x4200;
pub const ENDPOINT_OUT: u8 = 0x01;
pub const ENDPOINT_IN: u8 = 0x81;

/// Report id used for every outbound frame.
pub const REPORT_ID: u8 = 0x00;
/// Size of one HID report in either direction.
pub const REPORT_SIZE: usize = 64;

/// Size of the inbound response header.
pub const RESPONSE_HEADER_SIZE: usize = 4;
/// Size of the outbound header including the command and group bytes.
pub const COMMAND_HEADER_SIZE: usize = 6;
/// Payload bytes that fit in the first chunk after the response header.
pub const MAX_CHUNK_PAYLOAD: usize = REPORT_SIZE - RESPONSE_HEADER_SIZE;

/// Largest command payload whose length still fits the 16-bit length field.
pub const MAX_COMMAND_PAYLOAD: usize = u16::MAX as usize - 2;

/// Size of the active scan configuration payload.
pub const CONFIGURATION_SIZE: usize = 5;

// Command groups and opcodes (group, command).
pub const GROUP_FILE: u8 = 0x00;
pub const CMD_FILE_SIZE: u8 = 0x2D;
pub const CMD_FILE_DATA: u8 = 0x2E;

pub const GROUP_SCAN: u8 = 0x02;
pub const CMD_START_SCAN: u8 = 0x18;
pub const CMD_READ_ACTIVE_CONFIG: u8 = 0x23;

// --- Core Enums and Structs ---

/// The flags byte of an outbound frame. Both variants request a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Direction {
    Write = 0x40,
    Read = 0xC0,
}

/// One host command. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub direction: Direction,
    pub group: u8,
    pub command: u8,
    pub payload: Bytes,
}

impl Command {
    pub fn write(group: u8, command: u8, payload: &[u8]) -> Self {
        Self {
            direction: Direction::Write,
            group,
            command,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    pub fn read(group: u8, command: u8, payload: &[u8]) -> Self {
        Self {
            direction: Direction::Read,
            group,
            command,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    pub fn start_scan() -> Self {
        Self::write(GROUP_SCAN, CMD_START_SCAN, &[0x00])
    }

    pub fn read_active_configuration() -> Self {
        Self::read(GROUP_SCAN, CMD_READ_ACTIVE_CONFIG, &[])
    }

    /// Asks the device to announce the size of file `file_id`.
    pub fn file_size(file_id: u8) -> Self {
        Self::read(GROUP_FILE, CMD_FILE_SIZE, &[file_id])
    }

    /// Fetches the next chunk of the file announced by [`Command::file_size`].
    pub fn file_data() -> Self {
        Self::read(GROUP_FILE, CMD_FILE_DATA, &[])
    }

    /// Value of the length field: the payload plus the command and group bytes.
    ///
    /// Payloads are capped at [`MAX_COMMAND_PAYLOAD`]; longer ones cannot be
    /// framed and saturate to `u16::MAX`.
    pub fn declared_length(&self) -> u16 {
        debug_assert!(
            self.payload.len() <= MAX_COMMAND_PAYLOAD,
            "command payload of {} bytes exceeds the 16-bit length field",
            self.payload.len()
        );
        u16::try_from(self.payload.len() + 2).unwrap_or(u16::MAX)
    }

    pub fn to_frame(&self) -> Bytes {
        build_frame(self)
    }
}

/// Encodes a command as `[flags, 0x00, len_lsb, len_msb, command, group, payload...]`.
pub fn build_frame(command: &Command) -> Bytes {
    let mut frame = BytesMut::with_capacity(COMMAND_HEADER_SIZE + command.payload.len());
    frame.put_u8(command.direction.into());
    frame.put_u8(0x00);
    frame.put_u16_le(command.declared_length());
    frame.put_u8(command.command);
    frame.put_u8(command.group);
    frame.extend_from_slice(&command.payload);
    frame.freeze()
}

/// The 4-byte header at the start of every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub flags: u8,
    pub sequence: u8,
    /// Payload bytes following the header, not counting the header itself.
    pub declared_length: u16,
}

impl ResponseHeader {
    /// True when the payload does not fit in the first chunk.
    pub fn is_large(&self) -> bool {
        self.declared_length as usize > MAX_CHUNK_PAYLOAD
    }
}

impl TryFrom<&[u8]> for ResponseHeader {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < RESPONSE_HEADER_SIZE {
            return Err(Error::TruncatedHeader { received: bytes.len() });
        }
        let mut header = &bytes[..RESPONSE_HEADER_SIZE];
        Ok(Self {
            flags: header.get_u8(),
            sequence: header.get_u8(),
            declared_length: header.get_u16_le(),
        })
    }
}

pub fn parse_header(bytes: &[u8]) -> Result<ResponseHeader, Error> {
    ResponseHeader::try_from(bytes)
}

/// Combines bytes into an integer with `bytes[0]` as the most significant byte.
///
/// Empty input yields 0. Only the last four bytes can contribute; anything
/// earlier is shifted out.
pub fn combine_big_endian(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0u32, |acc, &b| (acc << 8) | u32::from(b))
}

/// The active scan configuration, decoded positionally from a 5-byte payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceConfiguration {
    pub scan_type: u8,
    pub num_repeats: u8,
    pub exposure_time: u8,
    pub wavelength_start: u8,
    pub wavelength_end: u8,
}

impl TryFrom<&[u8]> for DeviceConfiguration {
    type Error = Error;

    fn try_from(mut bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.remaining() < CONFIGURATION_SIZE {
            return Err(Error::Underflow {
                expected: CONFIGURATION_SIZE,
                actual: bytes.remaining(),
            });
        }
        Ok(Self {
            scan_type: bytes.get_u8(),
            num_repeats: bytes.get_u8(),
            exposure_time: bytes.get_u8(),
            wavelength_start: bytes.get_u8(),
            wavelength_end: bytes.get_u8(),
        })
    }
}

pub fn decode_configuration(payload: &[u8]) -> Result<DeviceConfiguration, Error> {
    DeviceConfiguration::try_from(payload)
}

impl fmt::Display for DeviceConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "┌─ Active Scan Configuration ─────────┐")?;
        writeln!(f, "│ Scan type:        {:>17} │", self.scan_type)?;
        writeln!(f, "│ Repeats:          {:>17} │", self.num_repeats)?;
        writeln!(f, "│ Exposure time:    {:>17} │", self.exposure_time)?;
        writeln!(f, "│ Wavelength start: {:>17} │", self.wavelength_start)?;
        writeln!(f, "│ Wavelength end:   {:>17} │", self.wavelength_end)?;
        write!(f, "└─────────────────────────────────────┘")
    }
}

/// Space-separated lowercase hex, e.g. `c0 00 02 00`.
pub fn hexify(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ")
}

/// Parses a comma-separated list of hex bytes such as `c0, 00, 02, 00, 23, 02`.
pub fn parse_hex_list(input: &str) -> Result<Bytes, Error> {
    let mut out = BytesMut::new();
    for token in input.split(',') {
        let token = token.trim();
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        let byte = u8::from_str_radix(digits, 16)
            .map_err(|_| Error::InvalidCommand(format!("'{token}' is not a hex byte")))?;
        out.put_u8(byte);
    }
    Ok(out.freeze())
}
