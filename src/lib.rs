//! pgclient - A blocking PostgreSQL access layer with LISTEN/NOTIFY support
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//! use pgclient::Connection;
//!
//! let mut conn = Connection::new();
//! if !conn.connect("host=localhost user=postgres dbname=app") {
//!     panic!("connect failed: {}", conn.last_error());
//! }
//!
//! // Run a parameterized query
//! let users = conn
//!     .execute_params("SELECT id, name, active FROM users WHERE name = $1", &["John"])
//!     .expect("query failed");
//! for row in 0..users.rows() {
//!     let id = users.int(row, "id", 0)?;
//!     let name = users.text(row, "name", "");
//!     let active = users.bool(row, "active", false)?;
//!     println!("{id} {name} {active}");
//! }
//!
//! // Wait for a notification
//! conn.listen("jobs");
//! if let Some(notification) = conn.wait_notify(Duration::from_secs(2)) {
//!     println!("{}: {}", notification.channel(), notification.payload());
//! }
//! # Ok::<(), pgclient::PgClientError>(())
//! ```

pub mod diagnostics;
pub mod drivers;
pub mod error;
pub mod traits;
pub mod types;

mod connection;

// Re-export main types for convenient access
pub use connection::{Connection, DEFAULT_POLL_INTERVAL};
pub use diagnostics::{DiagnosticEvent, DiagnosticLevel, DiagnosticsHub, Unsubscribe};
pub use error::{PgClientError, Result};
pub use traits::{Connector, Session};
pub use types::{ExecStatus, JsonKind, Notification, RawQueryResult, ResultView};
