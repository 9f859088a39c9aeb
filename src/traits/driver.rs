use crate::error::Result;
use crate::types::{Notification, RawQueryResult};

/// Opens sessions for a [`Connection`](crate::Connection).
pub trait Connector: Send {
    /// Establish a ready session from a connection descriptor.
    /// Failure carries the human-readable reason reported by the driver.
    fn open(&self, conninfo: &str) -> Result<Box<dyn Session>>;
}

/// A live session with the server. Dropping it closes the session.
///
/// Implementations are responsible for:
/// - Running commands and reporting their status and text-format rows
/// - Buffering notifications received from the server
pub trait Session: Send {
    /// Run one or more statements through the simple query protocol.
    ///
    /// `Err` means the command could not be dispatched at all (for example, the
    /// connection is gone). A command the server rejected is `Ok` with
    /// [`ExecStatus::FatalError`](crate::ExecStatus::FatalError).
    fn execute(&mut self, sql: &str) -> Result<RawQueryResult>;

    /// Run a single statement with text parameters bound to `$1`, `$2`, ...
    /// Parameter types are inferred by the server. Same error contract as
    /// [`execute`](Self::execute).
    fn execute_params(&mut self, sql: &str, params: &[&str]) -> Result<RawQueryResult>;

    /// Read whatever input the server has already sent, without waiting for more.
    fn consume_input(&mut self) -> Result<()>;

    /// Pop one buffered notification, if any.
    fn next_notification(&mut self) -> Option<Notification>;
}
