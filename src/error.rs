// src/error.rs

use nusb::transfer::TransferError;
use strum_macros::Display;
use thiserror::Error;

/// Which wait of a read-command ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ResponseStage {
    /// Waiting for the header and the first chunk's worth of payload.
    FirstChunk,
    /// Waiting for one large-payload continuation chunk.
    Continuation,
}

/// The primary error type for the `nirscan-rs` library.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Device is not connected")]
    NotConnected,

    #[error("USB device {vendor_id:#06x}:{product_id:#06x} not found. Is the spectrometer connected?")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("USB error: {0}")]
    Usb(#[from] nusb::Error),

    #[error("USB transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("Transport rejected write: {0}")]
    WriteFailed(String),

    #[error("Response header truncated: stream ended after {received} of 4 bytes")]
    TruncatedHeader { received: usize },

    #[error("Inbound stream ended during {stage} stage after {received} payload bytes")]
    StreamClosed { stage: ResponseStage, received: usize },

    #[error("Timeout waiting for response ({stage})")]
    ResponseTimeout { stage: ResponseStage },

    #[error("Payload underflow: expected at least {expected} bytes, got {actual}")]
    Underflow { expected: usize, actual: usize },

    #[error("File transfer stalled after {chunks} chunk requests: received {received} of {expected} bytes")]
    TransferStalled { chunks: u32, received: u32, expected: u32 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
