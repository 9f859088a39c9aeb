use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use crate::diagnostics::{DiagnosticEvent, DiagnosticLevel, DiagnosticsHub, Unsubscribe};
use crate::drivers::TokioPostgresConnector;
use crate::error::{PgClientError, Result};
use crate::traits::{Connector, Session};
use crate::types::{Notification, RawQueryResult, ResultView};

const SOURCE: &str = "pgclient::Connection";

/// Pause between polls in [`Connection::wait_notify`].
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Main entry point for pgclient.
/// Owns at most one session with the server and runs commands on it.
///
/// Failures are routine here: `connect`, `execute` and friends report them through
/// their return value and leave the reason in [`last_error`](Self::last_error),
/// which the next failing call overwrites.
pub struct Connection {
    connector: Box<dyn Connector>,
    session: Option<Box<dyn Session>>,
    last_error: String,
    poll_interval: Duration,
    diagnostics: DiagnosticsHub,
}

impl Connection {
    /// A disconnected connection that opens sessions with tokio-postgres.
    pub fn new() -> Self {
        Self::with_connector(TokioPostgresConnector)
    }

    /// Create a connection that opens sessions with a custom connector.
    /// Useful for testing or using alternative database drivers.
    pub fn with_connector(connector: impl Connector + 'static) -> Self {
        Self {
            connector: Box::new(connector),
            session: None,
            last_error: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            diagnostics: DiagnosticsHub::new(SOURCE),
        }
    }

    /// Wrap a session that is already open.
    pub fn with_session(session: Box<dyn Session>) -> Self {
        let mut connection = Self::new();
        connection.session = Some(session);
        connection
    }

    /// Open a session, releasing any session held before.
    ///
    /// # Example
    /// ```no_run
    /// let mut conn = pgclient::Connection::new();
    /// if !conn.connect("host=localhost user=postgres") {
    ///     eprintln!("connect failed: {}", conn.last_error());
    /// }
    /// ```
    pub fn connect(&mut self, conninfo: &str) -> bool {
        self.close();
        match self.connector.open(conninfo) {
            Ok(session) => {
                self.session = Some(session);
                self.diagnostics.info("connected");
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    /// Release the session, if any.
    pub fn close(&mut self) {
        if self.session.take().is_some() {
            self.diagnostics.debug("session released");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// The most recent failure, or an empty string if nothing has failed yet.
    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    /// Run a statement without parameters.
    ///
    /// Returns `None` if the command could not be sent or finished with any status
    /// other than `CommandOk` or `TuplesOk`; the reason is in `last_error`.
    pub fn execute(&mut self, sql: &str) -> Option<ResultView> {
        self.run(|session| session.execute(sql))
    }

    /// Run a statement with text parameters bound to `$1`, `$2`, ...
    /// Same contract as [`execute`](Self::execute).
    pub fn execute_params<S: AsRef<str>>(
        &mut self,
        sql: &str,
        params: &[S],
    ) -> Option<ResultView> {
        let params: Vec<&str> = params.iter().map(AsRef::as_ref).collect();
        self.run(|session| session.execute_params(sql, &params))
    }

    /// Register for notifications on `channel`. The name is used verbatim, so it
    /// must be an identifier that needs no quoting.
    pub fn listen(&mut self, channel: &str) -> bool {
        if self.execute(&format!("LISTEN {};", channel)).is_none() {
            return false;
        }
        self.diagnostics.debug(format!("listening on {}", channel));
        true
    }

    /// Like [`listen`](Self::listen), then runs `on_listening` once if the
    /// registration succeeded. The callback is not kept for later notifications.
    pub fn listen_with<F: FnOnce()>(&mut self, channel: &str, on_listening: F) -> bool {
        if !self.listen(channel) {
            return false;
        }
        on_listening();
        true
    }

    /// Returns one pending notification without blocking.
    ///
    /// Input already sent by the server is read first, since that is what surfaces
    /// queued notifications. Call repeatedly to drain a backlog.
    pub fn poll_notify(&mut self) -> Option<Notification> {
        match self.poll_once() {
            Ok(notification) => notification,
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    /// Polls until a notification arrives or `timeout` has passed since the call.
    ///
    /// Sleeps [`poll_interval`](Self::poll_interval) between attempts and keeps
    /// trying after an empty or failed poll. A failed poll is reported once per
    /// call. No poll is started after the deadline.
    pub fn wait_notify(&mut self, timeout: Duration) -> Option<Notification> {
        let deadline = Instant::now() + timeout;
        let mut reported = false;
        loop {
            match self.poll_once() {
                Ok(Some(notification)) => return Some(notification),
                Ok(None) => {}
                Err(e) if !reported => {
                    self.fail(e);
                    reported = true;
                }
                Err(_) => {}
            }
            if !self.is_connected() {
                return None;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            thread::sleep(self.poll_interval.min(remaining));
            if Instant::now() >= deadline {
                return None;
            }
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Intervals under a millisecond are raised to one.
    pub fn set_poll_interval(&mut self, interval: Duration) {
        self.poll_interval = interval.max(MIN_POLL_INTERVAL);
    }

    pub fn subscribe_to_diagnostics<F>(
        &self,
        handler: F,
        min_level: DiagnosticLevel,
    ) -> Unsubscribe
    where
        F: Fn(&DiagnosticEvent) + Send + Sync + 'static,
    {
        self.diagnostics.subscribe(handler, min_level)
    }

    fn poll_once(&mut self) -> Result<Option<Notification>> {
        let session = self
            .session
            .as_deref_mut()
            .ok_or(PgClientError::NotConnected)?;
        session.consume_input()?;
        let Some(notification) = session.next_notification() else {
            return Ok(None);
        };
        self.diagnostics.debug(format!(
            "notification on {} from backend {}",
            notification.channel(),
            notification.process_id()
        ));
        Ok(Some(notification))
    }

    fn run(
        &mut self,
        command: impl FnOnce(&mut dyn Session) -> Result<RawQueryResult>,
    ) -> Option<ResultView> {
        let Some(session) = self.session.as_deref_mut() else {
            self.fail(PgClientError::NotConnected);
            return None;
        };
        match command(session) {
            Ok(result) if result.status.is_success() => Some(ResultView::from_raw(result)),
            Ok(result) => {
                let message = result
                    .error_message
                    .unwrap_or_else(|| format!("command finished with status {}", result.status));
                self.fail(PgClientError::QueryFailed(message));
                None
            }
            Err(e) => {
                self.fail(e);
                None
            }
        }
    }

    fn fail(&mut self, error: PgClientError) {
        self.last_error = error.to_string();
        self.diagnostics.warning(self.last_error.clone());
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .field("last_error", &self.last_error)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}
