//! # Print Session
//!
//! Drives one print job over one established connection. The firmware
//! processes commands serially and has no reordering or retransmission
//! machinery, so the session is a strict state machine: every transition is
//! one or more frames followed by a mandatory settle delay.
//!
//! ## Command Sequence
//!
//! ```text
//! Connected ──► Initialized ──► PrintStarted ──► PageStarted
//!   Heartbeat     PrintStart      PageStart        SetDimensions
//!   SetDensity                                     SetQuantity
//!   SetLabelType                                      │
//!                                                     ▼
//!      Done ◄── Finalizing ◄──────────────────── Streaming
//!                 PageEnd          BitmapRow × N, ≥10ms apart
//!                 PrintEnd
//! ```
//!
//! `Aborted` is reachable from every non-idle state: connection loss,
//! cancellation, or an encoder defect all land there.
//!
//! ## Timing Is a Contract
//!
//! The settle delays are not tunable throughput knobs. The device's input
//! buffer silently drops frames under flood, and commands sent before the
//! previous one settles produce malformed prints. Inbound notifications
//! never gate progress; the device does not reliably acknowledge.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::job::PrintJob;
use crate::printer::ProtocolOptions;
use crate::protocol::commands::Command;
use crate::protocol::packet::{FrameError, Packet};
use crate::transport::{Connection, SendError};

/// Settle after most configuration commands
pub const SETTLE_SHORT: Duration = Duration::from_millis(100);

/// Settle after PrintStart; the firmware takes longer to arm a job
pub const SETTLE_PRINT_START: Duration = Duration::from_millis(200);

/// Minimum gap between consecutive row frames
pub const ROW_GAP: Duration = Duration::from_millis(10);

/// Settle before and after the finalization commands; disconnecting
/// early truncates the physical print
pub const SETTLE_FINALIZE: Duration = Duration::from_millis(500);

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connected,
    Initialized,
    PrintStarted,
    PageStarted,
    DimensionsSet,
    Streaming,
    Finalizing,
    Done,
    Aborted,
}

/// Why a session ended short of `Done`
#[derive(Debug, Error)]
pub enum SessionError {
    /// The connection failed mid-session. Retryable on another transport.
    #[error("transport failure in {state:?}: {source}")]
    Transport {
        state: SessionState,
        #[source]
        source: SendError,
    },

    /// The job was cancelled. Not retried.
    #[error("cancelled in {0:?}")]
    Cancelled(SessionState),

    /// A frame failed to encode. This indicates an encoder defect, not a
    /// device fault, so it is fatal and never retried.
    #[error("frame encoding failed: {0}")]
    Encoding(#[from] FrameError),
}

impl SessionError {
    /// Whether the orchestrator should try the next transport
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Transport { .. })
    }
}

/// # Print Session
///
/// Ephemeral state for one job on one connection: created in `Connected`,
/// destroyed after `Done` or `Aborted`. Owns the connection exclusively
/// for its lifetime.
pub struct PrintSession {
    conn: Box<dyn Connection>,
    options: ProtocolOptions,
    state: SessionState,
}

impl PrintSession {
    /// Wrap an established connection. The session starts in `Connected`.
    pub fn new(conn: Box<dyn Connection>, options: ProtocolOptions) -> Self {
        Self {
            conn,
            options,
            state: SessionState::Connected,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the full handshake, stream every row, and finalize.
    ///
    /// The cancellation token is checked before every send; cancellation
    /// aborts cleanly without sending further frames. On success the
    /// session disconnects after the final settle interval.
    pub async fn run(
        &mut self,
        job: &PrintJob,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        // Inbound frames are advisory; decode them for the log on the side.
        let drain = self
            .conn
            .notifications()
            .map(|rx| tokio::spawn(drain_notifications(rx)));

        let result = self.drive(job, cancel).await;

        if let Some(handle) = drain {
            handle.abort();
        }

        match &result {
            Ok(()) => {
                self.state = SessionState::Done;
                self.conn.disconnect().await;
                tracing::info!(rows = job.image.height(), copies = job.copies, "print complete");
            }
            Err(error) => {
                self.state = SessionState::Aborted;
                tracing::warn!(error = %error, "session aborted");
            }
        }
        result
    }

    async fn drive(&mut self, job: &PrintJob, cancel: &CancellationToken) -> Result<(), SessionError> {
        self.step(Command::Heartbeat, SETTLE_SHORT, cancel).await?;
        self.step(Command::SetDensity(job.density), SETTLE_SHORT, cancel)
            .await?;
        self.step(Command::SetLabelType(job.label_type), SETTLE_SHORT, cancel)
            .await?;
        self.state = SessionState::Initialized;

        // One page per job; copies are expressed through SetQuantity
        self.step(
            Command::PrintStart { total_pages: 1 },
            SETTLE_PRINT_START,
            cancel,
        )
        .await?;
        self.state = SessionState::PrintStarted;

        self.step(Command::PageStart, SETTLE_SHORT, cancel).await?;
        self.state = SessionState::PageStarted;

        self.step(
            Command::SetDimensions {
                height: job.image.height(),
                width: job.image.width(),
            },
            SETTLE_SHORT,
            cancel,
        )
        .await?;
        self.step(Command::SetQuantity(job.copies), SETTLE_SHORT, cancel)
            .await?;
        self.state = SessionState::DimensionsSet;

        self.state = SessionState::Streaming;
        let packets = job.image.encode_rows();
        let total = packets.len();
        for (sent, row) in packets.into_iter().enumerate() {
            self.step(Command::BitmapRow(row), ROW_GAP, cancel).await?;
            if (sent + 1) % 50 == 0 {
                tracing::debug!(sent = sent + 1, total, "row progress");
            }
        }

        self.state = SessionState::Finalizing;
        tokio::time::sleep(SETTLE_FINALIZE).await;
        self.step(Command::PageEnd, SETTLE_FINALIZE, cancel).await?;
        self.step(Command::PrintEnd, SETTLE_FINALIZE, cancel).await?;

        Ok(())
    }

    /// Send one command then hold the mandatory settle delay.
    async fn step(
        &mut self,
        command: Command,
        settle: Duration,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        if cancel.is_cancelled() {
            return Err(SessionError::Cancelled(self.state));
        }

        let frame = command.encode(&self.options)?;
        self.conn
            .send(&frame)
            .await
            .map_err(|source| SessionError::Transport {
                state: self.state,
                source,
            })?;

        tokio::time::sleep(settle).await;
        Ok(())
    }
}

/// Log inbound frames until the channel closes. Undecodable frames are
/// noted and dropped; they never block outbound progress.
async fn drain_notifications(mut rx: mpsc::UnboundedReceiver<Vec<u8>>) {
    while let Some(frame) = rx.recv().await {
        match Packet::from_bytes(&frame) {
            Ok(packet) => {
                tracing::debug!(
                    command = format_args!("{:#04x}", packet.command()),
                    len = packet.payload().len(),
                    "printer notification"
                );
            }
            Err(error) => {
                tracing::warn!(error = %error, bytes = frame.len(), "ignoring undecodable notification");
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::PrintJob;
    use crate::raster::RasterImage;
    use crate::transport::{MockTransport, Transport, TransportKind};
    use image::GrayImage;

    fn test_job(height: u32) -> PrintJob {
        let img = GrayImage::from_fn(384, height, |x, y| {
            if (x + y) % 2 == 0 {
                image::Luma([0u8])
            } else {
                image::Luma([255u8])
            }
        });
        let raster =
            RasterImage::from_gray(&img, crate::printer::RasterPolarity::InvertThenThreshold)
                .unwrap();
        PrintJob::new(raster, 1)
    }

    async fn connect(mock: &MockTransport) -> Box<dyn crate::transport::Connection> {
        let endpoint = mock
            .discover(Duration::from_secs(1))
            .await
            .unwrap()
            .remove(0);
        mock.connect(&endpoint, Duration::from_secs(1)).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run_reaches_done() {
        let mock = MockTransport::healthy(TransportKind::UsbSerial);
        let conn = connect(&mock).await;
        let mut session = PrintSession::new(conn, ProtocolOptions::default());

        session
            .run(&test_job(8), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Done);
        // 7 handshake frames + 8 distinct rows + 2 finalize frames
        assert_eq!(mock.sent_frames().len(), 7 + 8 + 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_loss_aborts_as_retryable() {
        // Drop the connection after the handshake, mid-stream
        let mock = MockTransport::healthy(TransportKind::Ble).failing_after_sends(9);
        let conn = connect(&mock).await;
        let mut session = PrintSession::new(conn, ProtocolOptions::default());

        let err = session
            .run(&test_job(20), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            SessionError::Transport {
                state: SessionState::Streaming,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_cancelled_token_sends_nothing() {
        let mock = MockTransport::healthy(TransportKind::UsbSerial);
        let conn = connect(&mock).await;
        let mut session = PrintSession::new(conn, ProtocolOptions::default());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = session.run(&test_job(4), &cancel).await.unwrap_err();
        assert!(matches!(err, SessionError::Cancelled(_)));
        assert!(!err.is_retryable());
        assert_eq!(session.state(), SessionState::Aborted);
        assert!(mock.sent_frames().is_empty());
    }
}
