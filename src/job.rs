//! # Print Jobs and Orchestration
//!
//! A [`PrintJob`] is the unit of work: one raster image plus copy count and
//! density/label-type configuration, consumed exactly once. The
//! [`Orchestrator`] runs it over an ordered list of transports (typically
//! BLE, then USB serial, then Bluetooth serial) with a fresh
//! [`PrintSession`](crate::session::PrintSession) per attempt and no state
//! carried between attempts.
//!
//! The result is always a structured [`PrintOutcome`] naming every
//! transport tried and why it failed. Operators need to tell "printer off"
//! from "wrong port" from "protocol mismatch"; a bare I/O error cannot.
//!
//! ## Exclusivity
//!
//! At most one session may be in flight per physical printer. The
//! orchestrator enforces this with an async lock keyed by resolved device
//! identity, held for the duration of one `print()` call and released on
//! every exit path including cancellation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::printer::{PrinterConfig, ProtocolOptions};
use crate::protocol::commands::LabelType;
use crate::raster::RasterImage;
use crate::session::PrintSession;
use crate::transport::{Transport, TransportKind};

/// Default scan window per transport
pub const DEFAULT_DISCOVER_TIMEOUT: Duration = Duration::from_secs(5);

/// Default connection establishment timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on the whole transport cascade
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(120);

/// One print job: an image plus how to print it.
#[derive(Debug, Clone)]
pub struct PrintJob {
    /// The normalized bitmap to print
    pub image: RasterImage,
    /// Number of copies (SetQuantity)
    pub copies: u16,
    /// Print density, 1-5
    pub density: u8,
    /// Label stock type
    pub label_type: LabelType,
}

impl PrintJob {
    /// A job with the B1 default density and gap-label stock.
    pub fn new(image: RasterImage, copies: u16) -> Self {
        Self {
            image,
            copies,
            density: PrinterConfig::B1.default_density,
            label_type: LabelType::default(),
        }
    }

    pub fn with_density(mut self, density: u8) -> Self {
        self.density = density;
        self
    }

    pub fn with_label_type(mut self, label_type: LabelType) -> Self {
        self.label_type = label_type;
        self
    }
}

/// Where in an attempt the failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Discovery,
    Connect,
    Session,
}

/// One failed transport attempt, preserved for the final outcome.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptFailure {
    pub transport: TransportKind,
    pub stage: FailureStage,
    pub reason: String,
    /// Whether trying the next transport could plausibly succeed
    pub retryable: bool,
}

/// Terminal result of one job.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PrintOutcome {
    /// The job printed; `earlier_failures` lists transports that failed
    /// before the winning one
    Printed {
        transport: TransportKind,
        endpoint: String,
        earlier_failures: Vec<AttemptFailure>,
    },
    /// Every transport failed
    Failed { attempts: Vec<AttemptFailure> },
}

impl PrintOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PrintOutcome::Printed { .. })
    }

    /// One-line human summary for logs and the CLI.
    pub fn summary(&self) -> String {
        match self {
            PrintOutcome::Printed {
                transport,
                endpoint,
                earlier_failures,
            } => {
                if earlier_failures.is_empty() {
                    format!("printed via {} ({})", transport, endpoint)
                } else {
                    format!(
                        "printed via {} ({}) after {} failed attempt(s)",
                        transport,
                        endpoint,
                        earlier_failures.len()
                    )
                }
            }
            PrintOutcome::Failed { attempts } => {
                let reasons: Vec<String> = attempts
                    .iter()
                    .map(|a| format!("{}: {}", a.transport, a.reason))
                    .collect();
                format!("print failed; tried {}", reasons.join("; "))
            }
        }
    }
}

/// What to do when the target printer is already serving another job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusyPolicy {
    /// Queue behind the in-flight job
    #[default]
    Wait,
    /// Record a busy failure and move on
    FailFast,
}

/// Async locks keyed by resolved device identity.
#[derive(Default)]
struct DeviceLocks {
    inner: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DeviceLocks {
    fn entry(&self, identity: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(map.entry(identity.to_string()).or_default())
    }
}

/// # Job Orchestrator
///
/// Owns the transport priority list and runs jobs over it.
///
/// ## Example
///
/// ```no_run
/// use etiqueta::job::{Orchestrator, PrintJob};
/// use etiqueta::printer::PrinterConfig;
/// use etiqueta::transport::{BleTransport, UsbSerialTransport};
///
/// # async fn example(image: etiqueta::raster::RasterImage) {
/// let orchestrator = Orchestrator::new(vec![
///     Box::new(BleTransport::new(PrinterConfig::B1.name_token)),
///     Box::new(UsbSerialTransport::new("niimbot")),
/// ]);
///
/// let outcome = orchestrator.print(&PrintJob::new(image, 1)).await;
/// println!("{}", outcome.summary());
/// # }
/// ```
pub struct Orchestrator {
    transports: Vec<Box<dyn Transport>>,
    options: ProtocolOptions,
    discover_timeout: Duration,
    connect_timeout: Duration,
    job_timeout: Duration,
    busy_policy: BusyPolicy,
    locks: DeviceLocks,
}

impl Orchestrator {
    /// Build an orchestrator over transports in priority order.
    pub fn new(transports: Vec<Box<dyn Transport>>) -> Self {
        Self {
            transports,
            options: ProtocolOptions::default(),
            discover_timeout: DEFAULT_DISCOVER_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            busy_policy: BusyPolicy::default(),
            locks: DeviceLocks::default(),
        }
    }

    pub fn with_options(mut self, options: ProtocolOptions) -> Self {
        self.options = options;
        self
    }

    /// The firmware-variant options sessions will run with. Callers that
    /// rasterize images themselves must use the same polarity.
    pub fn options(&self) -> ProtocolOptions {
        self.options
    }

    pub fn with_timeouts(mut self, discover: Duration, connect: Duration, job: Duration) -> Self {
        self.discover_timeout = discover;
        self.connect_timeout = connect;
        self.job_timeout = job;
        self
    }

    pub fn with_busy_policy(mut self, policy: BusyPolicy) -> Self {
        self.busy_policy = policy;
        self
    }

    /// Run a job to a terminal outcome.
    pub async fn print(&self, job: &PrintJob) -> PrintOutcome {
        self.print_with_cancel(job, &CancellationToken::new()).await
    }

    /// Run a job, observing an external cancellation token.
    ///
    /// The whole cascade is bounded by the job timeout. Each attempt
    /// starts a fresh session; nothing is shared between attempts except
    /// the accumulated failure list.
    pub async fn print_with_cancel(
        &self,
        job: &PrintJob,
        cancel: &CancellationToken,
    ) -> PrintOutcome {
        let deadline = tokio::time::Instant::now() + self.job_timeout;
        let mut attempts = Vec::new();

        for transport in &self.transports {
            let kind = transport.kind();

            if cancel.is_cancelled() {
                attempts.push(AttemptFailure {
                    transport: kind,
                    stage: FailureStage::Discovery,
                    reason: "job cancelled".to_string(),
                    retryable: false,
                });
                break;
            }

            match tokio::time::timeout_at(deadline, self.attempt(transport.as_ref(), job, cancel))
                .await
            {
                Err(_) => {
                    attempts.push(AttemptFailure {
                        transport: kind,
                        stage: FailureStage::Session,
                        reason: format!("job timeout ({:?}) elapsed", self.job_timeout),
                        retryable: false,
                    });
                    break;
                }
                Ok(Ok(endpoint)) => {
                    return PrintOutcome::Printed {
                        transport: kind,
                        endpoint,
                        earlier_failures: attempts,
                    };
                }
                Ok(Err(failure)) => {
                    tracing::warn!(
                        transport = %kind,
                        stage = ?failure.stage,
                        reason = %failure.reason,
                        "attempt failed"
                    );
                    let stop = !failure.retryable;
                    attempts.push(failure);
                    if stop {
                        break;
                    }
                }
            }
        }

        PrintOutcome::Failed { attempts }
    }

    /// One transport attempt: discover, then walk the discovered endpoints
    /// in order (lock, connect, run a session) until one takes the job.
    /// A session only ever starts on one endpoint; connect refusals on
    /// earlier candidates are folded into a single failure if every
    /// candidate refuses.
    async fn attempt(
        &self,
        transport: &dyn Transport,
        job: &PrintJob,
        cancel: &CancellationToken,
    ) -> Result<String, AttemptFailure> {
        let kind = transport.kind();
        let fail = |stage: FailureStage, reason: String, retryable: bool| AttemptFailure {
            transport: kind,
            stage,
            reason,
            retryable,
        };

        let endpoints = match with_cancel(cancel, transport.discover(self.discover_timeout)).await {
            None => return Err(fail(FailureStage::Discovery, "job cancelled".into(), false)),
            Some(Err(e)) => return Err(fail(FailureStage::Discovery, e.to_string(), true)),
            Some(Ok(endpoints)) => endpoints,
        };

        if endpoints.is_empty() {
            return Err(fail(
                FailureStage::Discovery,
                "no matching device found within the scan window".into(),
                true,
            ));
        }

        let mut connect_reasons = Vec::new();
        for endpoint in endpoints {
            if cancel.is_cancelled() {
                return Err(fail(FailureStage::Connect, "job cancelled".into(), false));
            }
            tracing::info!(transport = %kind, endpoint = %endpoint, "device found");

            // Exclusive access to this physical printer for the rest of
            // the attempt; the guard drops (and releases) on every exit
            // path.
            let lock = self.locks.entry(&endpoint.identity());
            let _guard = match self.busy_policy {
                BusyPolicy::FailFast => match lock.try_lock_owned() {
                    Ok(guard) => guard,
                    Err(_) => {
                        connect_reasons
                            .push(format!("device {} is busy with another job", endpoint));
                        continue;
                    }
                },
                BusyPolicy::Wait => match with_cancel(cancel, lock.lock_owned()).await {
                    None => {
                        return Err(fail(FailureStage::Connect, "job cancelled".into(), false))
                    }
                    Some(guard) => guard,
                },
            };

            let conn =
                match with_cancel(cancel, transport.connect(&endpoint, self.connect_timeout)).await
                {
                    None => {
                        return Err(fail(FailureStage::Connect, "job cancelled".into(), false))
                    }
                    Some(Err(e)) => {
                        tracing::debug!(
                            transport = %kind,
                            endpoint = %endpoint,
                            "connect refused ({}); trying next candidate", e
                        );
                        connect_reasons.push(format!("{}: {}", endpoint, e));
                        continue;
                    }
                    Some(Ok(conn)) => conn,
                };

            let mut session = PrintSession::new(conn, self.options);
            return match session.run(job, cancel).await {
                Ok(()) => Ok(endpoint.to_string()),
                Err(e) => Err(fail(FailureStage::Session, e.to_string(), e.is_retryable())),
            };
        }

        Err(fail(
            FailureStage::Connect,
            connect_reasons.join("; "),
            true,
        ))
    }
}

/// Race a future against cancellation; `None` means cancelled first.
async fn with_cancel<F: std::future::Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        value = fut => Some(value),
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_exposes_configured_options() {
        use crate::printer::RasterPolarity;

        let orchestrator = Orchestrator::new(Vec::new()).with_options(ProtocolOptions {
            polarity: RasterPolarity::DirectThreshold,
            ..Default::default()
        });
        assert_eq!(
            orchestrator.options().polarity,
            RasterPolarity::DirectThreshold
        );
    }

    #[test]
    fn test_device_locks_shared_by_identity() {
        let locks = DeviceLocks::default();
        let a = locks.entry("ble:AA");
        let b = locks.entry("ble:AA");
        let c = locks.entry("ble:BB");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_outcome_summary_failure_lists_transports() {
        let outcome = PrintOutcome::Failed {
            attempts: vec![
                AttemptFailure {
                    transport: TransportKind::Ble,
                    stage: FailureStage::Discovery,
                    reason: "no matching device found within the scan window".into(),
                    retryable: true,
                },
                AttemptFailure {
                    transport: TransportKind::UsbSerial,
                    stage: FailureStage::Connect,
                    reason: "COM3: busy".into(),
                    retryable: true,
                },
            ],
        };
        let summary = outcome.summary();
        assert!(summary.contains("BLE"));
        assert!(summary.contains("USB serial"));
        assert!(!outcome.is_success());
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = PrintOutcome::Printed {
            transport: TransportKind::Ble,
            endpoint: "B1-G2026 (AA:BB:CC:DD:EE:FF)".into(),
            earlier_failures: vec![],
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "printed");
        assert_eq!(json["transport"], "ble");
    }
}
