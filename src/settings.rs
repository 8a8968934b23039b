use crate::protocol::{ENDPOINT_IN, ENDPOINT_OUT, PID, REPORT_SIZE, VID};
use std::time::Duration;

/// Timing contract of the command engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timing {
    /// Pause after every send so the device can start processing.
    pub settle_delay: Duration,
    /// Bound on the first stage of a response, covering on-device processing.
    pub first_chunk_timeout: Duration,
    /// Bound on each large-payload continuation chunk.
    pub continuation_timeout: Duration,
    /// Chunk requests allowed in one file transfer before giving up.
    pub max_file_chunks: u32,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(10),
            first_chunk_timeout: Duration::from_millis(10_000),
            continuation_timeout: Duration::from_millis(5_000),
            max_file_chunks: 4096,
        }
    }
}

/// Which USB device and HID endpoints to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub endpoint_in: u8,
    pub endpoint_out: u8,
    pub report_size: usize,
}

impl Default for DeviceSelector {
    fn default() -> Self {
        Self {
            vendor_id: VID,
            product_id: PID,
            interface: 0,
            endpoint_in: ENDPOINT_IN,
            endpoint_out: ENDPOINT_OUT,
            report_size: REPORT_SIZE,
        }
    }
}
