//! # Driver Integration Tests
//!
//! End-to-end tests over the scripted mock transport: full command
//! sequences for whole jobs, transport fallback, and cancellation. Time is
//! virtual (`start_paused`), so the mandatory settle delays cost nothing
//! here while still going through the real sleep points.

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use etiqueta::job::{FailureStage, Orchestrator, PrintJob, PrintOutcome};
use etiqueta::printer::{ProtocolOptions, RasterPolarity};
use etiqueta::protocol::commands::{
    OP_BITMAP_ROW, OP_HEARTBEAT, OP_PAGE_END, OP_PAGE_START, OP_PRINT_END, OP_PRINT_START,
    OP_SET_DENSITY, OP_SET_DIMENSIONS, OP_SET_LABEL_TYPE, OP_SET_QUANTITY,
};
use etiqueta::protocol::Packet;
use etiqueta::raster::RasterImage;
use etiqueta::session::{PrintSession, SessionState};
use etiqueta::transport::{
    ConnectError, MockTransport, Transport, TransportEndpoint, TransportKind,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// A full-width checkerboard; adjacent rows differ, so every canvas row
/// becomes its own frame and frame counts are predictable.
fn checkerboard_job(height: u32) -> PrintJob {
    let img = image::GrayImage::from_fn(384, height, |x, y| {
        if (x + y) % 2 == 0 {
            image::Luma([0u8])
        } else {
            image::Luma([255u8])
        }
    });
    let raster = RasterImage::from_gray(&img, RasterPolarity::InvertThenThreshold).unwrap();
    PrintJob::new(raster, 1)
}

async fn run_session(mock: &MockTransport, job: &PrintJob) -> SessionState {
    let endpoint = mock
        .discover(Duration::from_secs(1))
        .await
        .unwrap()
        .remove(0);
    let conn = mock
        .connect(&endpoint, Duration::from_secs(1))
        .await
        .unwrap();

    let mut session = PrintSession::new(conn, ProtocolOptions::default());
    let _ = session.run(job, &CancellationToken::new()).await;
    session.state()
}

/// Decode every recorded frame and return the opcode sequence.
fn opcodes(mock: &MockTransport) -> Vec<u8> {
    mock.sent_frames()
        .iter()
        .map(|frame| Packet::from_bytes(frame).unwrap().command())
        .collect()
}

fn expected_opcodes(rows: usize) -> Vec<u8> {
    let mut seq = vec![
        OP_HEARTBEAT,
        OP_SET_DENSITY,
        OP_SET_LABEL_TYPE,
        OP_PRINT_START,
        OP_PAGE_START,
        OP_SET_DIMENSIONS,
        OP_SET_QUANTITY,
    ];
    seq.extend(std::iter::repeat(OP_BITMAP_ROW).take(rows));
    seq.push(OP_PAGE_END);
    seq.push(OP_PRINT_END);
    seq
}

// ============================================================================
// COMMAND SEQUENCE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_single_row_job_command_sequence() {
    let mock = MockTransport::healthy(TransportKind::UsbSerial);
    let state = run_session(&mock, &checkerboard_job(1)).await;

    assert_eq!(state, SessionState::Done);
    assert_eq!(opcodes(&mock), expected_opcodes(1));
}

#[tokio::test(start_paused = true)]
async fn test_fifty_row_job_command_sequence() {
    let mock = MockTransport::healthy(TransportKind::Ble);
    let state = run_session(&mock, &checkerboard_job(50)).await;

    assert_eq!(state, SessionState::Done);
    assert_eq!(opcodes(&mock), expected_opcodes(50));
}

#[tokio::test(start_paused = true)]
async fn test_full_height_job_command_sequence() {
    let mock = MockTransport::healthy(TransportKind::BluetoothSerial);
    let state = run_session(&mock, &checkerboard_job(384)).await;

    assert_eq!(state, SessionState::Done);
    assert_eq!(opcodes(&mock), expected_opcodes(384));
}

#[tokio::test(start_paused = true)]
async fn test_row_frames_cover_canvas_in_order() {
    let mock = MockTransport::healthy(TransportKind::UsbSerial);
    run_session(&mock, &checkerboard_job(50)).await;

    // Row payload: index u16 BE, three reserved bytes, repeat count, 48
    // bytes of bitmap
    let mut next_row = 0u16;
    for frame in mock.sent_frames() {
        let packet = Packet::from_bytes(&frame).unwrap();
        if packet.command() != OP_BITMAP_ROW {
            continue;
        }
        let payload = packet.payload();
        assert_eq!(payload.len(), 2 + 3 + 1 + 48);
        let row = u16::from_be_bytes([payload[0], payload[1]]);
        let repeat = payload[5];
        assert_eq!(row, next_row);
        next_row = row + repeat as u16;
    }
    assert_eq!(next_row, 50);
}

#[tokio::test(start_paused = true)]
async fn test_quantity_frame_carries_copy_count() {
    let mock = MockTransport::healthy(TransportKind::UsbSerial);
    let mut job = checkerboard_job(4);
    job.copies = 300;
    run_session(&mock, &job).await;

    let quantity = mock
        .sent_frames()
        .iter()
        .map(|frame| Packet::from_bytes(frame).unwrap())
        .find(|p| p.command() == OP_SET_QUANTITY)
        .unwrap();
    assert_eq!(quantity.payload(), 300u16.to_be_bytes().as_slice());
}

// ============================================================================
// TRANSPORT FALLBACK
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cascade_falls_through_to_working_transport() {
    let winner = MockTransport::healthy(TransportKind::BluetoothSerial);
    let orchestrator = Orchestrator::new(vec![
        Box::new(MockTransport::failing_discovery(
            TransportKind::Ble,
            ConnectError::Timeout("adapter scan timed out".into()),
        )),
        Box::new(MockTransport::refusing(
            TransportKind::UsbSerial,
            ConnectError::Busy("/dev/ttyUSB7: claimed".into()),
        )),
        Box::new(winner.clone()),
    ]);

    let outcome = orchestrator.print(&checkerboard_job(10)).await;
    match outcome {
        PrintOutcome::Printed {
            transport,
            earlier_failures,
            ..
        } => {
            assert_eq!(transport, TransportKind::BluetoothSerial);
            assert_eq!(earlier_failures.len(), 2);
            assert_eq!(earlier_failures[0].transport, TransportKind::Ble);
            assert_eq!(earlier_failures[0].stage, FailureStage::Discovery);
            assert_eq!(earlier_failures[1].transport, TransportKind::UsbSerial);
            assert_eq!(earlier_failures[1].stage, FailureStage::Connect);
        }
        other => panic!("expected success, got {:?}", other),
    }
    // 7 handshake + 10 rows + 2 finalize frames on the winning transport
    assert_eq!(winner.sent_frames().len(), 19);
}

#[tokio::test(start_paused = true)]
async fn test_cascade_reports_every_failed_transport() {
    let orchestrator = Orchestrator::new(vec![
        Box::new(MockTransport::no_devices(TransportKind::Ble)),
        Box::new(MockTransport::failing_discovery(
            TransportKind::UsbSerial,
            ConnectError::Rejected("enumeration failed".into()),
        )),
        Box::new(MockTransport::refusing(
            TransportKind::BluetoothSerial,
            ConnectError::NotFound("/dev/rfcomm9: no such device".into()),
        )),
    ]);

    let outcome = orchestrator.print(&checkerboard_job(10)).await;
    match outcome {
        PrintOutcome::Failed { attempts } => {
            assert_eq!(attempts.len(), 3);
            assert_eq!(attempts[0].stage, FailureStage::Discovery);
            assert_eq!(attempts[1].stage, FailureStage::Discovery);
            assert_eq!(attempts[2].stage, FailureStage::Connect);
            assert!(attempts.iter().all(|a| a.retryable));
        }
        other => panic!("expected failure, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_mid_session_drop_falls_through_to_next_transport() {
    let flaky = MockTransport::healthy(TransportKind::Ble).failing_after_sends(9);
    let winner = MockTransport::healthy(TransportKind::UsbSerial);
    let orchestrator = Orchestrator::new(vec![Box::new(flaky), Box::new(winner.clone())]);

    let outcome = orchestrator.print(&checkerboard_job(20)).await;
    match outcome {
        PrintOutcome::Printed {
            transport,
            earlier_failures,
            ..
        } => {
            assert_eq!(transport, TransportKind::UsbSerial);
            assert_eq!(earlier_failures.len(), 1);
            assert_eq!(earlier_failures[0].stage, FailureStage::Session);
            assert!(earlier_failures[0].retryable);
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(winner.sent_frames().len(), 7 + 20 + 2);
}

#[tokio::test(start_paused = true)]
async fn test_connect_refusal_falls_to_next_candidate() {
    let first = TransportEndpoint::Serial {
        port: "/dev/ttyUSB0".to_string(),
    };
    let second = TransportEndpoint::Serial {
        port: "/dev/ttyACM0".to_string(),
    };
    let mock = MockTransport::healthy(TransportKind::UsbSerial)
        .with_endpoints(vec![first.clone(), second])
        .refusing_endpoint(first, ConnectError::Busy("/dev/ttyUSB0: claimed".into()));
    let orchestrator = Orchestrator::new(vec![Box::new(mock.clone())]);

    let outcome = orchestrator.print(&checkerboard_job(10)).await;
    match outcome {
        PrintOutcome::Printed {
            endpoint,
            earlier_failures,
            ..
        } => {
            assert!(endpoint.contains("/dev/ttyACM0"));
            assert!(earlier_failures.is_empty());
        }
        other => panic!("expected success, got {:?}", other),
    }
    assert_eq!(mock.sent_frames().len(), 7 + 10 + 2);
}

#[tokio::test(start_paused = true)]
async fn test_all_candidates_refused_is_one_connect_failure() {
    let first = TransportEndpoint::Serial {
        port: "/dev/ttyUSB0".to_string(),
    };
    let second = TransportEndpoint::Serial {
        port: "/dev/ttyACM0".to_string(),
    };
    let mock = MockTransport::healthy(TransportKind::UsbSerial)
        .with_endpoints(vec![first.clone(), second.clone()])
        .refusing_endpoint(first, ConnectError::Busy("claimed".into()))
        .refusing_endpoint(second, ConnectError::NotFound("gone".into()));
    let orchestrator = Orchestrator::new(vec![Box::new(mock.clone())]);

    let outcome = orchestrator.print(&checkerboard_job(10)).await;
    match outcome {
        PrintOutcome::Failed { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].stage, FailureStage::Connect);
            assert!(attempts[0].retryable);
            assert!(attempts[0].reason.contains("/dev/ttyUSB0"));
            assert!(attempts[0].reason.contains("/dev/ttyACM0"));
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(mock.sent_frames().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout_bounds_slow_discovery() {
    let slow = MockTransport::healthy(TransportKind::Ble)
        .with_discover_delay(Duration::from_secs(600));
    let orchestrator = Orchestrator::new(vec![Box::new(slow.clone())]).with_timeouts(
        Duration::from_secs(5),
        Duration::from_secs(30),
        Duration::from_secs(1),
    );

    let outcome = orchestrator.print(&checkerboard_job(5)).await;
    match outcome {
        PrintOutcome::Failed { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].stage, FailureStage::Session);
            assert!(attempts[0].reason.contains("job timeout"));
            assert!(!attempts[0].retryable);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(slow.sent_frames().is_empty());
}

// ============================================================================
// RASTER POLARITY
// ============================================================================

/// Bitmap bytes of the first row frame a transport saw.
fn first_row_bitmap(mock: &MockTransport) -> Vec<u8> {
    mock.sent_frames()
        .iter()
        .map(|frame| Packet::from_bytes(frame).unwrap())
        .find(|p| p.command() == OP_BITMAP_ROW)
        .map(|p| p.payload()[6..].to_vec())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_polarity_selects_which_pixels_print() {
    let black = image::GrayImage::from_pixel(384, 2, image::Luma([0u8]));

    let inverted = MockTransport::healthy(TransportKind::UsbSerial);
    let raster = RasterImage::from_gray(&black, RasterPolarity::InvertThenThreshold).unwrap();
    run_session(&inverted, &PrintJob::new(raster, 1)).await;

    let direct = MockTransport::healthy(TransportKind::UsbSerial);
    let raster = RasterImage::from_gray(&black, RasterPolarity::DirectThreshold).unwrap();
    run_session(&direct, &PrintJob::new(raster, 1)).await;

    // A black source burns every dot under the canonical convention and
    // none under the direct one
    assert_eq!(first_row_bitmap(&inverted), vec![0xFF; 48]);
    assert_eq!(first_row_bitmap(&direct), vec![0x00; 48]);
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_cancellation_mid_stream_stops_and_releases_lock() {
    let cancel = CancellationToken::new();
    // 7 handshake frames + 10 row frames, then the token fires
    let mock =
        MockTransport::healthy(TransportKind::UsbSerial).cancelling_after_sends(17, cancel.clone());
    let orchestrator = Orchestrator::new(vec![Box::new(mock.clone())]);

    let outcome = orchestrator
        .print_with_cancel(&checkerboard_job(100), &cancel)
        .await;
    match outcome {
        PrintOutcome::Failed { attempts } => {
            assert_eq!(attempts.len(), 1);
            assert_eq!(attempts[0].stage, FailureStage::Session);
            assert!(!attempts[0].retryable);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(mock.sent_frames().len(), 17);

    // The device lock must be free again: a fresh job through the same
    // orchestrator completes instead of deadlocking
    let outcome = orchestrator.print(&checkerboard_job(5)).await;
    assert!(outcome.is_success());
    assert_eq!(mock.sent_frames().len(), 17 + 7 + 5 + 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_before_start_tries_nothing() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mock = MockTransport::healthy(TransportKind::Ble);
    let orchestrator = Orchestrator::new(vec![Box::new(mock.clone())]);

    let outcome = orchestrator
        .print_with_cancel(&checkerboard_job(5), &cancel)
        .await;
    assert!(!outcome.is_success());
    assert!(mock.sent_frames().is_empty());
}
