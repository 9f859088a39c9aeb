use std::collections::VecDeque;
use std::error::Error as _;
use std::fmt::Write;
use std::future::{poll_fn, Future};
use std::pin::pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::BytesMut;
use tokio::runtime::{Builder, Runtime};
use tokio_postgres::tls::NoTlsStream;
use tokio_postgres::types::{to_sql_checked, FromSql, Format, IsNull, ToSql, Type};
use tokio_postgres::{
    AsyncMessage, Client, Column, NoTls, Row, SimpleQueryMessage, Socket, Statement,
};

use super::text_format::{self, RenderError};
use crate::error::{PgClientError, Result};
use crate::traits::{Connector, Session};
use crate::types::{ExecStatus, Notification, RawQueryResult};

type PgConnection = tokio_postgres::Connection<Socket, NoTlsStream>;

/// How long a dropped session waits for its Terminate message to be flushed.
const TERMINATE_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens [`TokioPostgresSession`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioPostgresConnector;

impl Connector for TokioPostgresConnector {
    fn open(&self, conninfo: &str) -> Result<Box<dyn Session>> {
        Ok(Box::new(TokioPostgresSession::connect(conninfo)?))
    }
}

/// PostgreSQL session implementation using tokio-postgres.
///
/// Owns a current-thread runtime. The protocol connection is only driven inside
/// the blocking call that needs it, so no background task or thread exists.
pub struct TokioPostgresSession {
    runtime: Runtime,
    client: Option<Client>,
    connection: PgConnection,
    notifications: VecDeque<Notification>,
    closed: bool,
}

impl TokioPostgresSession {
    /// Connect to a PostgreSQL server. `conninfo` is either a `key=value` string or
    /// a `postgresql://` URL.
    pub fn connect(conninfo: &str) -> Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let (client, connection) = runtime
            .block_on(tokio_postgres::connect(conninfo, NoTls))
            .map_err(|e| PgClientError::ConnectionFailed(describe(&e)))?;

        Ok(Self {
            runtime,
            client: Some(client),
            connection,
            notifications: VecDeque::new(),
            closed: false,
        })
    }
}

impl Session for TokioPostgresSession {
    fn execute(&mut self, sql: &str) -> Result<RawQueryResult> {
        let client = self.client.as_ref().ok_or(PgClientError::ConnectionClosed)?;
        let outcome = drive(
            &self.runtime,
            &mut self.connection,
            &mut self.notifications,
            &mut self.closed,
            client.simple_query(sql),
        )?;

        match outcome {
            Ok(messages) => Ok(simple_query_result(messages)),
            Err(e) => server_error(e),
        }
    }

    fn execute_params(&mut self, sql: &str, params: &[&str]) -> Result<RawQueryResult> {
        let client = self.client.as_ref().ok_or(PgClientError::ConnectionClosed)?;
        let params: Vec<TextParam<'_>> = params.iter().map(|p| TextParam(p)).collect();
        let outcome = drive(
            &self.runtime,
            &mut self.connection,
            &mut self.notifications,
            &mut self.closed,
            async move {
                let statement = client.prepare(sql).await?;
                let params: Vec<&(dyn ToSql + Sync)> =
                    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
                if statement.columns().is_empty() {
                    let affected = client.execute(&statement, &params).await?;
                    Ok::<_, tokio_postgres::Error>(Extended::Command(affected))
                } else {
                    let rows = client.query(&statement, &params).await?;
                    Ok::<_, tokio_postgres::Error>(Extended::Rows(statement, rows))
                }
            },
        )?;

        match outcome {
            Ok(Extended::Command(affected)) => Ok(RawQueryResult::command_ok(affected)),
            Ok(Extended::Rows(statement, rows)) => rows_result(statement.columns(), &rows),
            Err(e) => server_error(e),
        }
    }

    fn consume_input(&mut self) -> Result<()> {
        // Yielding once lets the runtime poll the socket, then the connection
        // reads whatever has arrived.
        drive(
            &self.runtime,
            &mut self.connection,
            &mut self.notifications,
            &mut self.closed,
            tokio::task::yield_now(),
        )
    }

    fn next_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }
}

impl Drop for TokioPostgresSession {
    fn drop(&mut self) {
        // Dropping the client makes the connection send Terminate and finish.
        self.client.take();
        if !self.closed {
            let _ = drive(
                &self.runtime,
                &mut self.connection,
                &mut self.notifications,
                &mut self.closed,
                // The timer has to be created inside the runtime.
                async { tokio::time::sleep(TERMINATE_TIMEOUT).await },
            );
        }
        tracing::debug!("session closed");
    }
}

enum Extended {
    Command(u64),
    Rows(Statement, Vec<Row>),
}

/// Block on `future` while driving the protocol connection, buffering any
/// notifications it yields.
fn drive<F: Future>(
    runtime: &Runtime,
    connection: &mut PgConnection,
    notifications: &mut VecDeque<Notification>,
    closed: &mut bool,
    future: F,
) -> Result<F::Output> {
    let mut future = pin!(future);
    runtime.block_on(poll_fn(|cx| {
        if !*closed {
            match poll_connection(connection, notifications, cx) {
                Ok(done) => *closed = done,
                Err(e) => {
                    *closed = true;
                    return Poll::Ready(Err(e));
                }
            }
        }
        match future.as_mut().poll(cx) {
            Poll::Ready(output) => Poll::Ready(Ok(output)),
            Poll::Pending if *closed => Poll::Ready(Err(PgClientError::ConnectionClosed)),
            Poll::Pending => Poll::Pending,
        }
    }))
}

/// Returns true once the connection has shut down.
fn poll_connection(
    connection: &mut PgConnection,
    notifications: &mut VecDeque<Notification>,
    cx: &mut Context<'_>,
) -> Result<bool> {
    loop {
        match connection.poll_message(cx) {
            Poll::Ready(Some(Ok(AsyncMessage::Notification(n)))) => {
                tracing::debug!(
                    pid = n.process_id(),
                    channel = n.channel(),
                    "notification received"
                );
                notifications.push_back(Notification::new(
                    n.channel(),
                    n.payload(),
                    n.process_id(),
                ));
            }
            Poll::Ready(Some(Ok(AsyncMessage::Notice(notice)))) => {
                tracing::debug!("notice: {}", notice);
            }
            Poll::Ready(Some(Ok(_))) => {
                tracing::debug!("unknown message");
            }
            Poll::Ready(Some(Err(e))) => {
                let reason = describe(&e);
                tracing::warn!("connection error: {}", reason);
                return Err(PgClientError::QueryFailed(reason));
            }
            Poll::Ready(None) => {
                tracing::debug!("connection closed");
                return Ok(true);
            }
            Poll::Pending => return Ok(false),
        }
    }
}

/// A server rejection becomes a failed result; anything else means the command
/// never completed.
fn server_error(e: tokio_postgres::Error) -> Result<RawQueryResult> {
    if e.as_db_error().is_some() {
        Ok(RawQueryResult::fatal_error(describe(&e)))
    } else if e.is_closed() {
        Err(PgClientError::ConnectionClosed)
    } else {
        Err(PgClientError::QueryFailed(describe(&e)))
    }
}

/// The server's report for a rejected command, otherwise the error followed by
/// its chain of causes. `tokio_postgres::Error` alone only names the kind.
fn describe(e: &tokio_postgres::Error) -> String {
    if let Some(db) = e.as_db_error() {
        let mut text = format!("{}:  {}", db.severity(), db.message());
        if let Some(detail) = db.detail() {
            let _ = write!(text, "\nDETAIL:  {}", detail);
        }
        if let Some(hint) = db.hint() {
            let _ = write!(text, "\nHINT:  {}", hint);
        }
        return text;
    }
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        let _ = write!(text, ": {}", cause);
        source = cause.source();
    }
    text
}

/// Keeps the result of the last statement, the way the server reports a
/// multi-statement string.
fn simple_query_result(messages: Vec<SimpleQueryMessage>) -> RawQueryResult {
    let mut result = RawQueryResult::empty();
    let mut next_statement = true;

    for message in messages {
        match message {
            SimpleQueryMessage::RowDescription(columns) => {
                let names = columns.iter().map(|c| c.name().to_string()).collect();
                result = RawQueryResult::new(ExecStatus::TuplesOk, names, Vec::new());
                next_statement = false;
            }
            SimpleQueryMessage::Row(row) => {
                if next_statement {
                    let names = row.columns().iter().map(|c| c.name().to_string()).collect();
                    result = RawQueryResult::new(ExecStatus::TuplesOk, names, Vec::new());
                    next_statement = false;
                }
                result
                    .rows
                    .push((0..row.len()).map(|i| row.get(i).map(str::to_string)).collect());
            }
            SimpleQueryMessage::CommandComplete(affected) => {
                if next_statement {
                    result = RawQueryResult::new(ExecStatus::CommandOk, Vec::new(), Vec::new());
                }
                result.affected_rows = Some(affected);
                next_statement = true;
            }
            _ => {}
        }
    }
    result
}

fn rows_result(columns: &[Column], rows: &[Row]) -> Result<RawQueryResult> {
    let names = columns.iter().map(|c| c.name().to_string()).collect();
    let mut values = Vec::with_capacity(rows.len());
    for row in rows {
        let mut cells = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter().enumerate() {
            cells.push(cell_to_text(row, column, i)?);
        }
        values.push(cells);
    }
    Ok(RawQueryResult {
        affected_rows: Some(rows.len() as u64),
        ..RawQueryResult::new(ExecStatus::TuplesOk, names, values)
    })
}

/// Render a binary-format cell in the server's text format.
fn cell_to_text(row: &Row, column: &Column, index: usize) -> Result<Option<String>> {
    let cell = row.try_get::<_, Option<RawCell<'_>>>(index).map_err(|e| {
        PgClientError::QueryFailed(format!("column {}: {}", column.name(), describe(&e)))
    })?;
    let Some(RawCell(raw)) = cell else {
        return Ok(None);
    };
    match text_format::render(column.type_(), raw) {
        Ok(text) => Ok(Some(text)),
        Err(RenderError::Unsupported(type_name)) => Err(PgClientError::UnsupportedColumnType {
            column: column.name().to_string(),
            type_name,
        }),
        Err(RenderError::Malformed(e)) => Err(PgClientError::QueryFailed(format!(
            "column {}: {}",
            column.name(),
            e
        ))),
    }
}

/// A cell's undecoded bytes, whatever its type.
struct RawCell<'a>(&'a [u8]);

impl<'a> FromSql<'a> for RawCell<'a> {
    fn from_sql(
        _ty: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(RawCell(raw))
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

/// A parameter sent in text format, leaving its type to the server.
#[derive(Debug)]
struct TextParam<'a>(&'a str);

impl ToSql for TextParam<'_> {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    fn encode_format(&self, _ty: &Type) -> Format {
        Format::Text
    }

    to_sql_checked!();
}
