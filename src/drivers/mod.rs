mod text_format;
mod tokio_postgres;

pub use self::in_memory_test::{
    InMemoryTestConnector, InMemoryTestResponseBuilder, InMemoryTestSession, RecordedQuery,
};
pub use self::tokio_postgres::{TokioPostgresConnector, TokioPostgresSession};
