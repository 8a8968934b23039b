// src/device.rs

use crate::assembler::assemble;
use crate::error::Error;
use crate::protocol::{Command, DeviceConfiguration, REPORT_ID, hexify};
use crate::settings::Timing;
use crate::transfer::FileTransferSession;
use crate::transport::Transport;
use bytes::Bytes;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Represents a connection to a NIRscan-class spectrometer.
///
/// At most one command is outstanding at a time: every operation takes
/// `&mut self` and runs to completion or timeout before the next can start.
/// After a timeout the channel state is undefined and the caller should
/// reconnect.
pub struct Spectrometer<T: Transport> {
    transport: T,
    timing: Timing,
    connected: bool,
}

impl<T: Transport> Spectrometer<T> {
    pub fn new(transport: T) -> Self {
        Self::with_timing(transport, Timing::default())
    }

    pub fn with_timing(transport: T, timing: Timing) -> Self {
        Self {
            transport,
            timing,
            connected: false,
        }
    }

    pub fn timing(&self) -> &Timing {
        &self.timing
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub async fn connect(&mut self) -> Result<(), Error> {
        info!("Connecting to spectrometer...");
        self.connected = false;
        self.transport.open().await?;
        self.connected = true;
        info!("Connected to spectrometer");
        Ok(())
    }

    /// Releases the transport. Later commands fail with `NotConnected`.
    pub fn disconnect(&mut self) {
        self.transport.close();
        if self.connected {
            info!("Disconnected from spectrometer");
        }
        self.connected = false;
    }

    fn ensure_connected(&self) -> Result<(), Error> {
        if self.connected {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn send_bytes(&mut self, frame: &[u8]) -> Result<(), Error> {
        // Replies nobody waited for (e.g. to a write) must not answer this command.
        let stale = self.transport.discard_pending().await?;
        if stale > 0 {
            debug!(stale, "Discarded unsolicited reports before sending");
        }
        debug!("Sending command: {}", hexify(frame));
        self.transport.send(REPORT_ID, frame).await?;
        tokio::time::sleep(self.timing.settle_delay).await;
        Ok(())
    }

    async fn send_command(&mut self, command: &Command) -> Result<(), Error> {
        self.send_bytes(&command.to_frame()).await
    }

    /// Sends a write command and returns once the transport accepted it.
    pub async fn send_write(&mut self, group: u8, command: u8, data: &[u8]) -> Result<(), Error> {
        self.ensure_connected()?;
        self.send_command(&Command::write(group, command, data)).await
    }

    /// Sends a read command and reassembles the device's reply payload.
    pub async fn send_read(&mut self, group: u8, command: u8, data: &[u8]) -> Result<Bytes, Error> {
        self.ensure_connected()?;
        self.send_command(&Command::read(group, command, data)).await?;
        let payload = assemble(&mut self.transport, &self.timing).await?;
        debug!("Data requested: {}", hexify(&payload));
        Ok(payload)
    }

    /// Sends an already framed byte sequence as-is.
    pub async fn send_raw(&mut self, frame: &[u8]) -> Result<(), Error> {
        self.ensure_connected()?;
        self.send_bytes(frame).await
    }

    /// Collects raw inbound reports until none arrives for `quiet_period`
    /// or the stream ends.
    pub async fn read_reports(&mut self, quiet_period: Duration) -> Result<Vec<Bytes>, Error> {
        self.ensure_connected()?;
        let mut reports = Vec::new();
        while let Ok(chunk) = timeout(quiet_period, self.transport.next_chunk()).await {
            match chunk? {
                Some(report) => reports.push(report),
                None => break,
            }
        }
        debug!(count = reports.len(), "Collected inbound reports");
        Ok(reports)
    }

    async fn execute_read(&mut self, command: Command) -> Result<Bytes, Error> {
        self.send_read(command.group, command.command, &command.payload).await
    }

    pub async fn perform_scan(&mut self) -> Result<(), Error> {
        self.ensure_connected()?;
        info!("Starting scan...");
        let command = Command::start_scan();
        self.send_write(command.group, command.command, &command.payload).await?;
        info!("Scan started.");
        Ok(())
    }

    pub async fn get_configuration(&mut self) -> Result<DeviceConfiguration, Error> {
        self.ensure_connected()?;
        info!("Fetching current configuration...");
        let payload = self.execute_read(Command::read_active_configuration()).await?;
        let config = DeviceConfiguration::try_from(payload.as_ref())?;
        debug!(?config, "Parsed configuration");
        Ok(config)
    }

    /// Downloads file `file_id` chunk by chunk until the announced size is met.
    ///
    /// Any failure abandons the whole transfer; partial data is dropped.
    pub async fn get_file(&mut self, file_id: u8) -> Result<Bytes, Error> {
        self.ensure_connected()?;
        info!(file_id, "Fetching file size...");
        let announcement = self.execute_read(Command::file_size(file_id)).await?;
        let mut session = FileTransferSession::new(file_id, &announcement);
        info!(
            file_id,
            size = session.expected_total_size,
            "Fetching file data..."
        );

        while !session.is_complete() {
            if session.chunks_requested >= self.timing.max_file_chunks {
                warn!(
                    file_id,
                    received = session.bytes_received,
                    expected = session.expected_total_size,
                    "File transfer stalled"
                );
                return Err(Error::TransferStalled {
                    chunks: session.chunks_requested,
                    received: session.bytes_received,
                    expected: session.expected_total_size,
                });
            }
            session.chunks_requested += 1;
            let chunk = self.execute_read(Command::file_data()).await?;
            session.accept_chunk(&chunk);
            debug!(
                received = session.bytes_received,
                expected = session.expected_total_size,
                "Received chunk"
            );
        }

        info!(
            file_id,
            bytes = session.bytes_received,
            chunks = session.chunks_requested,
            "File data received"
        );
        Ok(session.into_bytes())
    }
}
