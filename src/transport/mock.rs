//! # Mock Transport
//!
//! Scripted in-memory transport for session and orchestrator tests: records
//! every frame sent, and can be told to fail discovery, refuse connections,
//! drop the connection after N sends, or fire a cancellation token after N
//! sends.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{ConnectError, Connection, SendError, Transport, TransportEndpoint, TransportKind};

#[derive(Clone)]
enum DiscoverScript {
    /// One healthy endpoint
    Found,
    /// Scan completes but finds nothing
    Empty,
    /// Scan itself fails
    Fail(ConnectError),
}

/// Scripted transport that records all sent frames.
#[derive(Clone)]
pub struct MockTransport {
    kind: TransportKind,
    discover: DiscoverScript,
    discover_delay: Option<Duration>,
    endpoints: Option<Vec<TransportEndpoint>>,
    connect_error: Option<ConnectError>,
    refused_endpoints: Vec<(TransportEndpoint, ConnectError)>,
    fail_after_sends: Option<usize>,
    cancel_after_sends: Option<(usize, CancellationToken)>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MockTransport {
    /// A transport that discovers one device and accepts everything.
    pub fn healthy(kind: TransportKind) -> Self {
        Self {
            kind,
            discover: DiscoverScript::Found,
            discover_delay: None,
            endpoints: None,
            connect_error: None,
            refused_endpoints: Vec::new(),
            fail_after_sends: None,
            cancel_after_sends: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// A transport whose scans come back empty.
    pub fn no_devices(kind: TransportKind) -> Self {
        Self {
            discover: DiscoverScript::Empty,
            ..Self::healthy(kind)
        }
    }

    /// A transport whose scans fail outright.
    pub fn failing_discovery(kind: TransportKind, error: ConnectError) -> Self {
        Self {
            discover: DiscoverScript::Fail(error),
            ..Self::healthy(kind)
        }
    }

    /// A transport that discovers a device but refuses to connect.
    pub fn refusing(kind: TransportKind, error: ConnectError) -> Self {
        Self {
            connect_error: Some(error),
            ..Self::healthy(kind)
        }
    }

    /// Override the endpoints a scan reports, in order.
    pub fn with_endpoints(mut self, endpoints: Vec<TransportEndpoint>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Sleep this long inside discover() before reporting anything.
    pub fn with_discover_delay(mut self, delay: Duration) -> Self {
        self.discover_delay = Some(delay);
        self
    }

    /// Refuse connections to one specific endpoint while accepting others.
    pub fn refusing_endpoint(mut self, endpoint: TransportEndpoint, error: ConnectError) -> Self {
        self.refused_endpoints.push((endpoint, error));
        self
    }

    /// Drop the connection after `n` successful sends.
    pub fn failing_after_sends(mut self, n: usize) -> Self {
        self.fail_after_sends = Some(n);
        self
    }

    /// Fire `token` once the `n`-th frame has been sent.
    pub fn cancelling_after_sends(mut self, n: usize, token: CancellationToken) -> Self {
        self.cancel_after_sends = Some((n, token));
        self
    }

    /// Every frame sent over connections from this transport, in order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn endpoint(&self) -> TransportEndpoint {
        match self.kind {
            TransportKind::Ble => TransportEndpoint::Ble {
                address: "00:11:22:33:44:55".to_string(),
                name: "B1-MOCK".to_string(),
            },
            TransportKind::UsbSerial => TransportEndpoint::Serial {
                port: "/dev/ttyUSB7".to_string(),
            },
            TransportKind::BluetoothSerial => TransportEndpoint::Rfcomm {
                device: "/dev/rfcomm9".to_string(),
            },
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn discover(&self, _timeout: Duration) -> Result<Vec<TransportEndpoint>, ConnectError> {
        if let Some(delay) = self.discover_delay {
            tokio::time::sleep(delay).await;
        }
        match &self.discover {
            DiscoverScript::Found => Ok(self
                .endpoints
                .clone()
                .unwrap_or_else(|| vec![self.endpoint()])),
            DiscoverScript::Empty => Ok(Vec::new()),
            DiscoverScript::Fail(error) => Err(error.clone()),
        }
    }

    async fn connect(
        &self,
        endpoint: &TransportEndpoint,
        _timeout: Duration,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        if let Some((_, error)) = self
            .refused_endpoints
            .iter()
            .find(|(refused, _)| refused == endpoint)
        {
            return Err(error.clone());
        }
        if let Some(error) = &self.connect_error {
            return Err(error.clone());
        }

        // A closed channel: notifications() hands out a receiver that ends
        // immediately, exercising the session's drain path.
        let (_tx, rx) = mpsc::unbounded_channel();

        Ok(Box::new(MockConnection {
            sent: Arc::clone(&self.sent),
            sends_done: 0,
            fail_after_sends: self.fail_after_sends,
            cancel_after_sends: self.cancel_after_sends.clone(),
            notifications: Some(rx),
        }))
    }
}

struct MockConnection {
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    sends_done: usize,
    fail_after_sends: Option<usize>,
    cancel_after_sends: Option<(usize, CancellationToken)>,
    notifications: Option<mpsc::UnboundedReceiver<Vec<u8>>>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn send(&mut self, bytes: &[u8]) -> Result<(), SendError> {
        if let Some(limit) = self.fail_after_sends {
            if self.sends_done >= limit {
                return Err(SendError::ConnectionLost("scripted drop".to_string()));
            }
        }

        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(bytes.to_vec());
        self.sends_done += 1;

        if let Some((threshold, token)) = &self.cancel_after_sends {
            if self.sends_done == *threshold {
                token.cancel();
            }
        }

        Ok(())
    }

    fn notifications(&mut self) -> Option<mpsc::UnboundedReceiver<Vec<u8>>> {
        self.notifications.take()
    }

    async fn disconnect(&mut self) {}
}
