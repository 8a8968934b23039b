//! Tests for the command surface: framing on the wire, preconditions, errors

mod common;

use common::*;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_perform_scan_sends_start_scan_frame() {
    let mut device = connected(MockTransport::new()).await;
    let started = Instant::now();
    device.perform_scan().await.unwrap();

    let transport = device.into_transport();
    assert_eq!(transport.sent.len(), 1);
    let (report_id, frame) = &transport.sent[0];
    assert_eq!(*report_id, 0x00, "frames always go out on report id 0");
    assert_eq!(frame.as_slice(), &[0x40, 0x00, 0x03, 0x00, 0x18, 0x02, 0x00]);
    assert!(started.elapsed() >= Duration::from_millis(10), "settle delay after send");
}

#[tokio::test(start_paused = true)]
async fn test_get_configuration() {
    let mut transport = MockTransport::new();
    transport.push_response(&[1, 2, 3, 4, 5]);
    let mut device = connected(transport).await;

    let config = device.get_configuration().await.unwrap();
    assert_eq!(
        config,
        DeviceConfiguration {
            scan_type: 1,
            num_repeats: 2,
            exposure_time: 3,
            wavelength_start: 4,
            wavelength_end: 5,
        }
    );
    assert_eq!(device.transport().frames(), vec![vec![0xC0, 0x00, 0x02, 0x00, 0x23, 0x02]]);
}

#[tokio::test(start_paused = true)]
async fn test_get_configuration_underflow() {
    let mut transport = MockTransport::new();
    transport.push_response(&[1, 2]);
    let mut device = connected(transport).await;

    match device.get_configuration().await {
        Err(Error::Underflow { expected, actual }) => {
            assert_eq!(expected, 5);
            assert_eq!(actual, 2);
        }
        other => panic!("Expected Underflow, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_commands_fail_fast_when_not_connected() {
    let mut device = Spectrometer::new(MockTransport::new());
    assert!(!device.is_connected());

    assert!(matches!(device.perform_scan().await, Err(Error::NotConnected)));
    assert!(matches!(device.get_configuration().await, Err(Error::NotConnected)));
    assert!(matches!(device.get_file(1).await, Err(Error::NotConnected)));
    assert!(matches!(device.send_write(0x02, 0x18, &[0x00]).await, Err(Error::NotConnected)));
    assert!(matches!(device.send_read(0x02, 0x23, &[]).await, Err(Error::NotConnected)));
    assert!(matches!(device.send_raw(&[0xC0]).await, Err(Error::NotConnected)));

    let transport = device.into_transport();
    assert!(transport.sent.is_empty(), "no I/O may happen before connect");
    assert_eq!(transport.open_calls, 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_leaves_device_disconnected() {
    let mut transport = MockTransport::new();
    transport.fail_open = true;
    let mut device = Spectrometer::new(transport);

    assert!(matches!(device.connect().await, Err(Error::DeviceUnavailable(_))));
    assert!(!device.is_connected());
    assert!(matches!(device.perform_scan().await, Err(Error::NotConnected)));
    assert!(device.transport().sent.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_blocks_further_commands() {
    let mut device = connected(MockTransport::new()).await;
    device.perform_scan().await.unwrap();
    device.disconnect();

    assert!(matches!(device.perform_scan().await, Err(Error::NotConnected)));
    assert_eq!(device.transport().sent.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_write_failure_is_surfaced() {
    let mut transport = MockTransport::new();
    transport.fail_send = true;
    let mut device = connected(transport).await;

    assert!(matches!(device.perform_scan().await, Err(Error::WriteFailed(_))));
    assert!(matches!(device.get_configuration().await, Err(Error::WriteFailed(_))));
}

#[tokio::test(start_paused = true)]
async fn test_send_read_frames_payload_length() {
    let mut transport = MockTransport::new();
    transport.push_response(&[]);
    let mut device = connected(transport).await;

    let response = device.send_read(0x04, 0x11, &[0xAA, 0xBB, 0xCC]).await.unwrap();
    assert!(response.is_empty());
    assert_eq!(
        device.transport().frames()[0],
        vec![0xC0, 0x00, 0x05, 0x00, 0x11, 0x04, 0xAA, 0xBB, 0xCC]
    );
}

#[tokio::test(start_paused = true)]
async fn test_send_raw_passes_bytes_through() {
    let mut device = connected(MockTransport::new()).await;
    let frame = hex_to_bytes("c00002002302");
    device.send_raw(&frame).await.unwrap();
    assert_eq!(device.transport().frames(), vec![frame.to_vec()]);
}

#[tokio::test(start_paused = true)]
async fn test_write_does_not_consume_inbound_chunks() {
    let mut transport = MockTransport::new();
    transport.push_response(&[9, 9, 9]);
    let mut device = connected(transport).await;

    device.send_write(0x02, 0x18, &[0x00]).await.unwrap();
    assert_eq!(device.transport().pending_chunks(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_scan_reply_does_not_answer_configuration_read() {
    let mut transport = MockTransport::new();
    // The device acknowledges the scan write; nobody reads that reply.
    transport.push_response(&[]);
    transport.push_response(&[1, 2, 3, 4, 5]);
    let mut device = connected(transport).await;

    device.perform_scan().await.unwrap();
    let config = device.get_configuration().await.unwrap();
    assert_eq!(config.scan_type, 1);
    assert_eq!(config.wavelength_end, 5);
    assert_eq!(device.transport().discarded, 1, "the scan reply is dropped, not decoded");
    assert_eq!(device.transport().pending_chunks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_raw_frame_reply_is_read_back() {
    let mut transport = MockTransport::new();
    transport.push_response(&[0xAA]);
    let mut device = connected(transport).await;

    device.send_raw(&hex_to_bytes("c00002002302")).await.unwrap();
    let reports = device.read_reports(Duration::from_millis(500)).await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].len(), 64);
    assert_eq!(&reports[0][..5], &[0x00, 0x00, 0x01, 0x00, 0xAA]);

    let started = Instant::now();
    let reports = device.read_reports(Duration::from_millis(500)).await.unwrap();
    assert!(reports.is_empty());
    assert!(started.elapsed() >= Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_read_reports_requires_connection() {
    let mut device = Spectrometer::new(MockTransport::new());
    let result = device.read_reports(Duration::from_millis(100)).await;
    assert!(matches!(result, Err(Error::NotConnected)));
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_after_disconnect_releases_transport() {
    let mut transport = MockTransport::new();
    transport.push_response(&[7, 7, 7, 7, 7]);
    let mut device = connected(transport).await;

    device.disconnect();
    assert_eq!(device.transport().close_calls, 1);
    device.connect().await.unwrap();
    assert_eq!(device.transport().open_calls, 2);

    let config = device.get_configuration().await.unwrap();
    assert_eq!(config.num_repeats, 7);
}
