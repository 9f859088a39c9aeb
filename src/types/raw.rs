use std::fmt;

/// Completion status of an executed command, as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStatus {
    /// No result, or the command string was empty.
    Empty,
    /// A command that returns no rows completed.
    CommandOk,
    /// A query returned rows (possibly zero of them).
    TuplesOk,
    CopyOut,
    CopyIn,
    /// The server's reply could not be understood.
    BadResponse,
    /// A notice or warning was reported.
    NonFatalError,
    /// The command failed.
    FatalError,
    Unknown,
}

impl ExecStatus {
    /// The only two statuses `execute` treats as success.
    pub fn is_success(self) -> bool {
        matches!(self, ExecStatus::CommandOk | ExecStatus::TuplesOk)
    }
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecStatus::Empty => "EMPTY_QUERY",
            ExecStatus::CommandOk => "COMMAND_OK",
            ExecStatus::TuplesOk => "TUPLES_OK",
            ExecStatus::CopyOut => "COPY_OUT",
            ExecStatus::CopyIn => "COPY_IN",
            ExecStatus::BadResponse => "BAD_RESPONSE",
            ExecStatus::NonFatalError => "NONFATAL_ERROR",
            ExecStatus::FatalError => "FATAL_ERROR",
            ExecStatus::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// Driver-agnostic result of one executed command.
/// All values are in the server's text format; `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQueryResult {
    pub status: ExecStatus,
    /// Column names in order
    pub columns: Vec<String>,
    /// Rows, where each row is a vector of cell values in column order
    pub rows: Vec<Vec<Option<String>>>,
    /// Row count from the command tag, when the server reported one
    pub affected_rows: Option<u64>,
    /// Server error text for failed commands
    pub error_message: Option<String>,
}

impl RawQueryResult {
    pub fn new(status: ExecStatus, columns: Vec<String>, rows: Vec<Vec<Option<String>>>) -> Self {
        Self {
            status,
            columns,
            rows,
            affected_rows: None,
            error_message: None,
        }
    }

    pub fn empty() -> Self {
        Self::new(ExecStatus::Empty, Vec::new(), Vec::new())
    }

    /// A completed command that returned no rows.
    pub fn command_ok(affected_rows: u64) -> Self {
        Self {
            affected_rows: Some(affected_rows),
            ..Self::new(ExecStatus::CommandOk, Vec::new(), Vec::new())
        }
    }

    /// A command the server rejected.
    pub fn fatal_error(message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(ExecStatus::FatalError, Vec::new(), Vec::new())
        }
    }

    pub(crate) fn cell(&self, row: usize, col: usize) -> Option<&Option<String>> {
        self.rows.get(row).and_then(|r| r.get(col))
    }
}
