//! Common test utilities and shared imports

// Shared across several test files; not every item is used in each one.
#[allow(unused_imports)]
pub use bytes::Bytes;
#[allow(unused_imports)]
pub use nirscan_rs::error::{Error, ResponseStage};
#[allow(unused_imports)]
pub use nirscan_rs::protocol::{Command, DeviceConfiguration};
#[allow(unused_imports)]
pub use nirscan_rs::{Spectrometer, Timing, Transport};

use std::collections::VecDeque;

/// Decode hex string to bytes for testing
#[allow(dead_code)]
pub fn hex_to_bytes(hex_data: &str) -> Bytes {
    Bytes::from(hex::decode(hex_data).expect("Failed to decode hex"))
}

/// Response header for a payload of `len` bytes.
#[allow(dead_code)]
pub fn header(len: u16) -> Vec<u8> {
    let [lsb, msb] = len.to_le_bytes();
    vec![0x00, 0x00, lsb, msb]
}

/// Scripted transport: records every send and replays scripted replies.
///
/// Each reply is delivered by the send that follows it in the script, so a
/// reply only "arrives" once its command went out. Chunks queued with
/// `push_chunk`/`end_stream` join the most recent reply. Once nothing has
/// arrived `next_chunk` never resolves, like a silent device.
#[derive(Debug, Default)]
pub struct MockTransport {
    pub sent: Vec<(u8, Vec<u8>)>,
    pub open_calls: usize,
    pub close_calls: usize,
    pub discarded: usize,
    pub fail_open: bool,
    pub fail_send: bool,
    replies: VecDeque<Vec<Option<Bytes>>>,
    arrived: VecDeque<Option<Bytes>>,
}

#[allow(dead_code)]
impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_reply(&mut self) -> &mut Vec<Option<Bytes>> {
        if self.replies.is_empty() {
            self.replies.push_back(Vec::new());
        }
        self.replies.back_mut().expect("a reply was just ensured")
    }

    pub fn push_chunk(&mut self, chunk: &[u8]) {
        self.current_reply().push(Some(Bytes::copy_from_slice(chunk)));
    }

    /// Scripts the next reply as the device sends it: 64-byte reports, the
    /// first carrying the header, all zero-padded.
    pub fn push_response(&mut self, payload: &[u8]) {
        let mut reports = Vec::new();
        let mut first = header(payload.len() as u16);
        let split = payload.len().min(60);
        first.extend_from_slice(&payload[..split]);
        first.resize(64, 0);
        reports.push(Some(Bytes::from(first)));
        for piece in payload[split..].chunks(64) {
            let mut report = piece.to_vec();
            report.resize(64, 0);
            reports.push(Some(Bytes::from(report)));
        }
        self.replies.push_back(reports);
    }

    pub fn end_stream(&mut self) {
        self.current_reply().push(None);
    }

    /// Chunks not yet consumed, arrived or still scripted.
    pub fn pending_chunks(&self) -> usize {
        self.arrived.len() + self.replies.iter().map(Vec::len).sum::<usize>()
    }

    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.sent.iter().map(|(_, frame)| frame.clone()).collect()
    }
}

impl Transport for MockTransport {
    async fn open(&mut self) -> Result<(), Error> {
        self.open_calls += 1;
        if self.fail_open {
            return Err(Error::DeviceUnavailable("mock device refused to open".to_string()));
        }
        Ok(())
    }

    fn close(&mut self) {
        self.close_calls += 1;
        self.arrived.clear();
    }

    async fn discard_pending(&mut self) -> Result<usize, Error> {
        let count = self.arrived.len();
        self.arrived.clear();
        self.discarded += count;
        Ok(count)
    }

    async fn send(&mut self, report_id: u8, bytes: &[u8]) -> Result<(), Error> {
        if self.fail_send {
            return Err(Error::WriteFailed("mock endpoint stalled".to_string()));
        }
        self.sent.push((report_id, bytes.to_vec()));
        if let Some(reply) = self.replies.pop_front() {
            self.arrived.extend(reply);
        }
        Ok(())
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        match self.arrived.pop_front() {
            Some(chunk) => Ok(chunk),
            None => std::future::pending().await,
        }
    }
}

/// A connected spectrometer over `transport` with default timing.
#[allow(dead_code)]
pub async fn connected(transport: MockTransport) -> Spectrometer<MockTransport> {
    let mut device = Spectrometer::new(transport);
    device.connect().await.expect("mock connect succeeds");
    device
}
