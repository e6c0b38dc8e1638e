//! Push-channel connection management
//!
//! This module owns the lifecycle of the single logical connection a
//! session keeps to the real-time hub. The transport itself lives behind
//! the [`Connector`] and [`Socket`] traits so the core stays free of
//! network code; the manager contributes the connect protocol (direct
//! socket first, full negotiation as fallback), bounded background
//! reconnects, and the cascading remote-method invocation the hub's
//! unstable method naming requires.
//!
//! Losing the connection is never fatal: the manager flags itself as
//! degraded and the session keeps functioning on roster polling alone.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::CoreOptions;

/// The lifecycle state of the push-channel connection
///
/// Exactly one instance exists per session process, owned exclusively by
/// the [`ConnectionManager`]; only connect/disconnect/retry transitions
/// mutate it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No connection and none being attempted
    Disconnected,
    /// A connect attempt is in flight
    Connecting,
    /// The channel is live
    Connected,
    /// The channel dropped unexpectedly and background retries are running
    Reconnecting,
    /// All transports and retries are exhausted; polling carries the session
    Failed,
}

/// Error raised by a transport while establishing a connection
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transport failed: {0}")]
pub struct TransportError(pub String);

/// Error raised by a socket while invoking a remote method
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The hub does not expose a method under this name
    #[error("remote method not found")]
    MethodNotFound,
    /// The method exists but the invocation failed
    #[error("remote invocation faulted: {0}")]
    Faulted(String),
}

/// Errors surfaced by the connection manager
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Every transport failed; the session degrades to polling
    #[error("all transports exhausted while connecting to {endpoint}")]
    ConnectionFailure {
        /// The hub endpoint that could not be reached
        endpoint: String,
    },
    /// Every candidate method name was rejected by the hub
    #[error("no candidate method accepted, attempted {attempted:?}")]
    RemoteInvocationExhausted {
        /// The method names tried, in order
        attempted: Vec<String>,
    },
    /// The channel is not connected and the grace period elapsed
    #[error("push channel is not connected")]
    NotConnected,
    /// A candidate method was accepted but the invocation faulted
    #[error("remote invocation of {method} failed: {reason}")]
    Remote {
        /// The method name that was accepted
        method: String,
        /// The fault reported by the hub
        reason: String,
    },
}

/// A live bidirectional socket to the real-time hub
pub trait Socket {
    /// Invokes a remote method by name
    ///
    /// # Errors
    ///
    /// [`InvokeError::MethodNotFound`] must be distinguishable from other
    /// faults; the manager uses it to advance through candidate names.
    fn invoke(&mut self, method: &str, args: &Value) -> Result<Value, InvokeError>;

    /// Returns whether the socket is still open
    fn is_open(&self) -> bool;

    /// Closes the socket
    fn close(&mut self);
}

/// Establishes sockets to the real-time hub
///
/// Implementations wrap the actual transport stack. Both methods are
/// subject to the deadline passed in; an implementation that cannot
/// enforce it should fail conservatively.
pub trait Connector {
    /// The socket type produced by this connector
    type Socket: Socket;

    /// Connects skipping transport negotiation, using the fastest
    /// supported transport
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the direct connection fails.
    fn connect_direct(
        &self,
        endpoint: &str,
        deadline: Duration,
    ) -> Result<Self::Socket, TransportError>;

    /// Connects with full negotiation, letting the transport be
    /// auto-selected
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if negotiation fails.
    fn connect_negotiated(
        &self,
        endpoint: &str,
        deadline: Duration,
    ) -> Result<Self::Socket, TransportError>;
}

/// Alarm messages scheduled by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlarmMessage {
    /// Retry the connect protocol in the background
    RetryConnect {
        /// Zero-based index of this retry attempt
        attempt: u8,
    },
}

/// Mutable connection state behind the manager's mutex
struct Inner<S> {
    state: ConnectionState,
    socket: Option<S>,
    degraded: bool,
}

/// Manages the single push-channel connection of a session
///
/// The manager is shared by reference between the session facade and the
/// transport glue; all state lives behind one mutex, which also provides
/// the single-flight connect guarantee: a caller that arrives while a
/// connect is in flight blocks on the lock and observes the finished
/// attempt instead of opening a second socket.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    endpoint: String,
    retry_budget: u8,
    retry_backoff: Duration,
    invoke_grace: Duration,
    deadline: Duration,
    inner: Mutex<Inner<C::Socket>>,
}

impl<C: Connector> std::fmt::Debug for ConnectionManager<C> {
    /// Debug formatting that reports the endpoint and current state
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.endpoint)
            .field("state", &self.lock().state)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> ConnectionManager<C> {
    /// Creates a manager for the given hub endpoint
    ///
    /// The manager starts in [`ConnectionState::Disconnected`]; nothing is
    /// attempted until [`connect`](Self::connect) is called.
    pub fn new(connector: C, endpoint: impl Into<String>, options: &CoreOptions) -> Self {
        Self {
            connector,
            endpoint: endpoint.into(),
            retry_budget: options.retry_budget,
            retry_backoff: options.retry_backoff,
            invoke_grace: options.invoke_grace,
            deadline: options.network_deadline,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                socket: None,
                degraded: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<C::Socket>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs the ordered connect protocol: direct socket first, full
    /// negotiation on failure
    fn try_protocol(&self) -> Result<C::Socket, TransportError> {
        match self.connector.connect_direct(&self.endpoint, self.deadline) {
            Ok(socket) => Ok(socket),
            Err(direct_error) => {
                tracing::debug!(
                    endpoint = %self.endpoint,
                    error = %direct_error,
                    "direct transport failed, falling back to negotiation"
                );
                self.connector.connect_negotiated(&self.endpoint, self.deadline)
            }
        }
    }

    /// Connects to the hub
    ///
    /// Already-connected callers return immediately. When both transports
    /// fail, the manager parks in [`ConnectionState::Failed`], flags
    /// degraded mode, and schedules the first background retry through
    /// `schedule` before surfacing the error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionFailure`] if every transport failed.
    pub fn connect<S: FnMut(crate::AlarmMessage, Duration)>(
        &self,
        mut schedule: S,
    ) -> Result<(), Error> {
        let mut inner = self.lock();

        if inner.state == ConnectionState::Connected
            && inner.socket.as_ref().is_some_and(Socket::is_open)
        {
            return Ok(());
        }

        inner.state = ConnectionState::Connecting;

        match self.try_protocol() {
            Ok(socket) => {
                inner.socket = Some(socket);
                inner.state = ConnectionState::Connected;
                inner.degraded = false;
                tracing::debug!(endpoint = %self.endpoint, "push channel connected");
                Ok(())
            }
            Err(error) => {
                inner.socket = None;
                inner.state = ConnectionState::Failed;
                inner.degraded = true;
                tracing::warn!(
                    endpoint = %self.endpoint,
                    error = %error,
                    "all transports failed, degrading to polling"
                );
                schedule(
                    AlarmMessage::RetryConnect { attempt: 0 }.into(),
                    self.retry_backoff,
                );
                Err(Error::ConnectionFailure {
                    endpoint: self.endpoint.clone(),
                })
            }
        }
    }

    /// Closes the connection and cancels pending retries
    ///
    /// Retry alarms that fire after this call are no-ops.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        if let Some(mut socket) = inner.socket.take() {
            socket.close();
        }
        inner.state = ConnectionState::Disconnected;
        inner.degraded = false;
    }

    /// Returns whether the channel is currently live
    pub fn is_connected(&self) -> bool {
        let inner = self.lock();
        inner.state == ConnectionState::Connected
            && inner.socket.as_ref().is_some_and(Socket::is_open)
    }

    /// Returns the current connection state
    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Returns whether the session is running without a push channel
    pub fn is_degraded(&self) -> bool {
        self.lock().degraded
    }

    /// Reports an unexpected socket closure
    ///
    /// Transitions to [`ConnectionState::Reconnecting`] and schedules the
    /// first background retry.
    pub fn notify_closed<S: FnMut(crate::AlarmMessage, Duration)>(&self, mut schedule: S) {
        let mut inner = self.lock();
        if inner.state != ConnectionState::Connected {
            return;
        }

        inner.socket = None;
        inner.state = ConnectionState::Reconnecting;
        tracing::warn!(endpoint = %self.endpoint, "push channel closed unexpectedly, reconnecting");
        schedule(
            AlarmMessage::RetryConnect { attempt: 0 }.into(),
            self.retry_backoff,
        );
    }

    /// Handles a scheduled retry alarm
    ///
    /// A retry that fires after [`disconnect`](Self::disconnect) or after a
    /// successful reconnect is a no-op. Failed attempts reschedule with a
    /// linearly growing backoff until the retry budget is spent, after
    /// which the manager stays in [`ConnectionState::Failed`] and polling
    /// carries the session.
    pub fn receive_alarm<S: FnMut(crate::AlarmMessage, Duration)>(
        &self,
        message: AlarmMessage,
        mut schedule: S,
    ) {
        let AlarmMessage::RetryConnect { attempt } = message;

        let mut inner = self.lock();
        if !matches!(
            inner.state,
            ConnectionState::Reconnecting | ConnectionState::Failed
        ) {
            return;
        }

        match self.try_protocol() {
            Ok(socket) => {
                inner.socket = Some(socket);
                inner.state = ConnectionState::Connected;
                inner.degraded = false;
                tracing::debug!(endpoint = %self.endpoint, attempt, "reconnected");
            }
            Err(error) => {
                let next = attempt + 1;
                if next < self.retry_budget {
                    inner.state = ConnectionState::Reconnecting;
                    tracing::debug!(
                        endpoint = %self.endpoint,
                        attempt,
                        error = %error,
                        "reconnect attempt failed, rescheduling"
                    );
                    schedule(
                        AlarmMessage::RetryConnect { attempt: next }.into(),
                        self.retry_backoff * u32::from(next + 1),
                    );
                } else {
                    inner.state = ConnectionState::Failed;
                    tracing::warn!(
                        endpoint = %self.endpoint,
                        attempts = next,
                        "retry budget exhausted, staying on polling"
                    );
                }
            }
        }
    }

    /// Invokes a remote method, cascading through candidate names
    ///
    /// The hub's exposed method names are not assumed stable, so the caller
    /// supplies an ordered candidate list; the first name the hub accepts
    /// is used and later candidates are not attempted. While the channel is
    /// reconnecting the call waits once for the configured grace period
    /// (through the caller-supplied `wait`) and then fails fast instead of
    /// queueing.
    ///
    /// # Errors
    ///
    /// * [`Error::NotConnected`] if no live channel is available
    /// * [`Error::Remote`] if an accepted method faulted
    /// * [`Error::RemoteInvocationExhausted`] if every candidate was
    ///   rejected as not found
    pub fn invoke<W: FnMut(Duration)>(
        &self,
        candidates: &[&str],
        args: &Value,
        mut wait: W,
    ) -> Result<Value, Error> {
        if self.state() == ConnectionState::Reconnecting {
            wait(self.invoke_grace);
        }

        let mut inner = self.lock();
        if inner.state != ConnectionState::Connected {
            return Err(Error::NotConnected);
        }
        let Some(socket) = inner.socket.as_mut() else {
            return Err(Error::NotConnected);
        };

        let mut attempted = Vec::new();
        for method in candidates {
            match socket.invoke(method, args) {
                Ok(value) => return Ok(value),
                Err(InvokeError::MethodNotFound) => {
                    attempted.push((*method).to_owned());
                }
                Err(InvokeError::Faulted(reason)) => {
                    return Err(Error::Remote {
                        method: (*method).to_owned(),
                        reason,
                    });
                }
            }
        }

        Err(Error::RemoteInvocationExhausted { attempted })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use serde_json::json;

    use super::*;

    /// Socket that accepts a fixed set of method names
    struct MockSocket {
        known_methods: Vec<&'static str>,
        invoked: Arc<Mutex<Vec<String>>>,
        open: bool,
    }

    impl Socket for MockSocket {
        fn invoke(&mut self, method: &str, args: &Value) -> Result<Value, InvokeError> {
            self.invoked.lock().unwrap().push(method.to_owned());
            if self.known_methods.contains(&method) {
                Ok(args.clone())
            } else {
                Err(InvokeError::MethodNotFound)
            }
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn close(&mut self) {
            self.open = false;
        }
    }

    /// Connector with programmable failure counts per transport
    struct MockConnector {
        direct_failures: AtomicUsize,
        negotiated_failures: AtomicUsize,
        direct_attempts: AtomicUsize,
        negotiated_attempts: AtomicUsize,
        known_methods: Vec<&'static str>,
        invoked: Arc<Mutex<Vec<String>>>,
    }

    impl MockConnector {
        fn new(direct_failures: usize, negotiated_failures: usize) -> Self {
            Self {
                direct_failures: AtomicUsize::new(direct_failures),
                negotiated_failures: AtomicUsize::new(negotiated_failures),
                direct_attempts: AtomicUsize::new(0),
                negotiated_attempts: AtomicUsize::new(0),
                known_methods: vec!["B"],
                invoked: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn socket(&self) -> MockSocket {
            MockSocket {
                known_methods: self.known_methods.clone(),
                invoked: Arc::clone(&self.invoked),
                open: true,
            }
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    impl Connector for MockConnector {
        type Socket = MockSocket;

        fn connect_direct(
            &self,
            _endpoint: &str,
            _deadline: Duration,
        ) -> Result<MockSocket, TransportError> {
            self.direct_attempts.fetch_add(1, Ordering::SeqCst);
            if Self::take_failure(&self.direct_failures) {
                Err(TransportError("direct refused".to_owned()))
            } else {
                Ok(self.socket())
            }
        }

        fn connect_negotiated(
            &self,
            _endpoint: &str,
            _deadline: Duration,
        ) -> Result<MockSocket, TransportError> {
            self.negotiated_attempts.fetch_add(1, Ordering::SeqCst);
            if Self::take_failure(&self.negotiated_failures) {
                Err(TransportError("negotiation refused".to_owned()))
            } else {
                Ok(self.socket())
            }
        }
    }

    fn manager(connector: MockConnector) -> ConnectionManager<MockConnector> {
        ConnectionManager::new(connector, "wss://hub.example/session", &CoreOptions::default())
    }

    fn no_schedule(_: crate::AlarmMessage, _: Duration) {
        panic!("no alarm expected");
    }

    #[test]
    fn test_direct_transport_wins_without_negotiation() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();

        assert!(manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(manager.connector.direct_attempts.load(Ordering::SeqCst), 1);
        assert_eq!(
            manager.connector.negotiated_attempts.load(Ordering::SeqCst),
            0
        );
    }

    #[test]
    fn test_negotiation_fallback() {
        let manager = manager(MockConnector::new(1, 0));
        manager.connect(no_schedule).unwrap();

        assert!(manager.is_connected());
        assert_eq!(
            manager.connector.negotiated_attempts.load(Ordering::SeqCst),
            1
        );
    }

    #[test]
    fn test_total_failure_degrades_and_schedules_retry() {
        let manager = manager(MockConnector::new(10, 10));
        let scheduled = Arc::new(Mutex::new(Vec::new()));
        let result = {
            let scheduled = Arc::clone(&scheduled);
            manager.connect(move |message, after| {
                scheduled.lock().unwrap().push((message, after));
            })
        };

        assert!(matches!(result, Err(Error::ConnectionFailure { .. })));
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.is_degraded());
        assert_eq!(scheduled.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_connect_is_idempotent_when_connected() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();
        manager.connect(no_schedule).unwrap();

        // The second call observes the live socket and does not redial.
        assert_eq!(manager.connector.direct_attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invoke_cascades_to_first_accepted_name() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();

        let result = manager
            .invoke(&["A", "B", "C"], &json!({"x": 1}), |_| {})
            .unwrap();
        assert_eq!(result, json!({"x": 1}));

        let invoked = manager.connector.invoked.lock().unwrap().clone();
        assert_eq!(invoked, vec!["A", "B"]);
    }

    #[test]
    fn test_invoke_exhaustion_lists_attempted_names() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();

        let result = manager.invoke(&["X", "Y"], &json!(null), |_| {});
        match result {
            Err(Error::RemoteInvocationExhausted { attempted }) => {
                assert_eq!(attempted, vec!["X", "Y"]);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }

    #[test]
    fn test_invoke_fails_fast_when_disconnected() {
        let manager = manager(MockConnector::new(0, 0));
        let result = manager.invoke(&["A"], &json!(null), |_| {});
        assert_eq!(result, Err(Error::NotConnected));
    }

    #[test]
    fn test_invoke_waits_grace_period_while_reconnecting() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();
        manager.notify_closed(|_, _| {});

        let waited = Arc::new(Mutex::new(Vec::new()));
        let result = {
            let waited = Arc::clone(&waited);
            manager.invoke(&["A"], &json!(null), move |d| {
                waited.lock().unwrap().push(d);
            })
        };

        assert_eq!(result, Err(Error::NotConnected));
        assert_eq!(waited.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unexpected_closure_schedules_reconnect() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();

        let scheduled = Arc::new(Mutex::new(Vec::new()));
        {
            let scheduled = Arc::clone(&scheduled);
            manager.notify_closed(move |message, after| {
                scheduled.lock().unwrap().push((message, after));
            });
        }

        assert_eq!(manager.state(), ConnectionState::Reconnecting);
        assert_eq!(scheduled.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_retry_alarm_reconnects() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();
        manager.notify_closed(|_, _| {});

        manager.receive_alarm(AlarmMessage::RetryConnect { attempt: 0 }, no_schedule);
        assert!(manager.is_connected());
    }

    #[test]
    fn test_retry_budget_exhaustion_parks_in_failed() {
        let manager = manager(MockConnector::new(20, 20));
        let _ = manager.connect(|_, _| {});

        let mut alarms = vec![AlarmMessage::RetryConnect { attempt: 0 }];
        let mut fired = 0;
        while let Some(alarm) = alarms.pop() {
            fired += 1;
            let next = &mut alarms;
            manager.receive_alarm(alarm, |message, _| {
                if let crate::AlarmMessage::Connection(inner) = message {
                    next.push(inner);
                }
            });
        }

        // Default budget is 3 attempts.
        assert_eq!(fired, 3);
        assert_eq!(manager.state(), ConnectionState::Failed);
        assert!(manager.is_degraded());
    }

    #[test]
    fn test_retry_after_disconnect_is_noop() {
        let manager = manager(MockConnector::new(10, 10));
        let _ = manager.connect(|_, _| {});
        manager.disconnect();

        manager.receive_alarm(AlarmMessage::RetryConnect { attempt: 0 }, no_schedule);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_disconnect_closes_socket() {
        let manager = manager(MockConnector::new(0, 0));
        manager.connect(no_schedule).unwrap();
        manager.disconnect();

        assert!(!manager.is_connected());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
