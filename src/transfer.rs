use crate::protocol::combine_big_endian;
use bytes::{Bytes, BytesMut};

/// Upper bound on the buffer reserved up front from an announced size.
const MAX_PREALLOCATION: usize = 64 * 1024;

/// State of one chunked file download.
#[derive(Debug)]
pub struct FileTransferSession {
    pub file_id: u8,
    pub expected_total_size: u32,
    pub bytes_received: u32,
    pub chunks_requested: u32,
    data: BytesMut,
}

impl FileTransferSession {
    /// Starts a session from the device's size announcement.
    ///
    /// The device sends the size least significant byte first; it is reversed
    /// and then combined most significant byte first.
    pub fn new(file_id: u8, announcement: &[u8]) -> Self {
        let mut size_bytes = announcement.to_vec();
        size_bytes.reverse();
        let expected_total_size = combine_big_endian(&size_bytes);
        Self {
            file_id,
            expected_total_size,
            bytes_received: 0,
            chunks_requested: 0,
            data: BytesMut::with_capacity((expected_total_size as usize).min(MAX_PREALLOCATION)),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_received >= self.expected_total_size
    }

    pub fn accept_chunk(&mut self, chunk: &[u8]) {
        self.data.extend_from_slice(chunk);
        let len = u32::try_from(chunk.len()).unwrap_or(u32::MAX);
        self.bytes_received = self.bytes_received.saturating_add(len);
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}
