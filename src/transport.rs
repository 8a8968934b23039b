//! Transport seam between the command engine and the USB stack.

use crate::error::Error;
use crate::settings::DeviceSelector;
use bytes::Bytes;
use futures_lite::future::poll_once;
use nusb::transfer::{Queue, RequestBuffer, TransferError};
use nusb::Interface;
use std::future::Future;
use tracing::{debug, info};

/// Interrupt IN requests kept in flight so no input report is missed.
const IN_FLIGHT_REPORTS: usize = 4;

/// A fixed-size packet link to the device.
///
/// Inbound chunks are yielded in arrival order. `next_chunk` resolves to
/// `Ok(None)` once the stream has ended for good.
pub trait Transport {
    /// Opens the link, releasing any previous one first.
    fn open(&mut self) -> impl Future<Output = Result<(), Error>> + Send;

    /// Releases the link. Sends and reads fail with `NotConnected` until reopened.
    fn close(&mut self);

    /// Drops inbound chunks that already arrived without waiting for more.
    /// Returns how many were dropped.
    fn discard_pending(&mut self) -> impl Future<Output = Result<usize, Error>> + Send;

    fn send(
        &mut self,
        report_id: u8,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), Error>> + Send;

    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>, Error>> + Send;
}

/// HID interrupt-endpoint transport backed by `nusb`.
pub struct HidTransport {
    selector: DeviceSelector,
    interface: Option<Interface>,
    inbound: Option<Queue<RequestBuffer>>,
}

impl HidTransport {
    pub fn new(selector: DeviceSelector) -> Self {
        Self {
            selector,
            interface: None,
            inbound: None,
        }
    }

    pub fn selector(&self) -> &DeviceSelector {
        &self.selector
    }

    pub fn is_open(&self) -> bool {
        self.interface.is_some()
    }

    /// Lays a frame out as one output report: report id prefix when non-zero,
    /// zero padding up to the report size.
    fn build_report(&self, report_id: u8, bytes: &[u8]) -> Vec<u8> {
        let mut report = Vec::with_capacity(self.selector.report_size + 1);
        if report_id != 0 {
            report.push(report_id);
        }
        report.extend_from_slice(bytes);
        let padded = self.selector.report_size + usize::from(report_id != 0);
        if report.len() < padded {
            report.resize(padded, 0);
        }
        report
    }
}

impl Transport for HidTransport {
    async fn open(&mut self) -> Result<(), Error> {
        let DeviceSelector {
            vendor_id,
            product_id,
            ..
        } = self.selector;
        // The old claim must be gone before the interface is claimed again.
        self.close();
        info!("Searching for spectrometer {:04x}:{:04x}...", vendor_id, product_id);
        let device_info = nusb::list_devices()?
            .find(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
            .ok_or(Error::DeviceNotFound { vendor_id, product_id })?;

        info!(
            bus = device_info.bus_number(),
            addr = device_info.device_address(),
            "Found device"
        );

        let device = device_info
            .open()
            .map_err(|e| Error::DeviceUnavailable(format!("failed to open device: {e}")))?;
        let interface = device
            .detach_and_claim_interface(self.selector.interface)
            .map_err(|e| Error::DeviceUnavailable(format!("failed to claim interface: {e}")))?;
        info!("Interface {} claimed successfully.", self.selector.interface);

        let mut inbound = interface.interrupt_in_queue(self.selector.endpoint_in);
        for _ in 0..IN_FLIGHT_REPORTS {
            inbound.submit(RequestBuffer::new(self.selector.report_size));
        }

        self.interface = Some(interface);
        self.inbound = Some(inbound);
        Ok(())
    }

    fn close(&mut self) {
        // Dropping the queue cancels its in-flight IN requests.
        self.inbound = None;
        if self.interface.take().is_some() {
            info!("Interface {} released.", self.selector.interface);
        }
    }

    async fn discard_pending(&mut self) -> Result<usize, Error> {
        let report_size = self.selector.report_size;
        let Some(inbound) = self.inbound.as_mut() else {
            return Ok(0);
        };
        let mut discarded = 0;
        while inbound.pending() > 0 {
            let Some(completion) = poll_once(inbound.next_complete()).await else {
                break;
            };
            match completion.status {
                Ok(()) => {
                    debug!(bytes = hex::encode(&completion.data), "Discarding stale report");
                    discarded += 1;
                    inbound.submit(RequestBuffer::reuse(completion.data, report_size));
                }
                Err(TransferError::Disconnected) | Err(TransferError::Cancelled) => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(discarded)
    }

    async fn send(&mut self, report_id: u8, bytes: &[u8]) -> Result<(), Error> {
        let interface = self.interface.clone().ok_or(Error::NotConnected)?;
        let report = self.build_report(report_id, bytes);
        debug!(bytes = hex::encode(&report), "HID Write");
        interface
            .interrupt_out(self.selector.endpoint_out, report)
            .await
            .into_result()
            .map_err(|e| Error::WriteFailed(e.to_string()))?;
        Ok(())
    }

    async fn next_chunk(&mut self) -> Result<Option<Bytes>, Error> {
        let report_size = self.selector.report_size;
        let inbound = self.inbound.as_mut().ok_or(Error::NotConnected)?;
        if inbound.pending() == 0 {
            return Ok(None);
        }
        let completion = inbound.next_complete().await;
        match completion.status {
            Ok(()) => {
                let chunk = Bytes::copy_from_slice(&completion.data);
                debug!(bytes = hex::encode(&chunk), "HID Read");
                inbound.submit(RequestBuffer::reuse(completion.data, report_size));
                Ok(Some(chunk))
            }
            Err(TransferError::Disconnected) | Err(TransferError::Cancelled) => {
                info!("Inbound report stream closed.");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
