use std::{fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;
use snafu::Snafu;

use super::{columnar::ColumnarBatch, config::NativeDaemon, proton::ProtonDriver, BuildError};
use crate::internal_events::TimeplusBatchSent;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum NativeError {
    #[snafu(display("Failed to connect to timeplusd: {}", source))]
    Connect { source: clickhouse_rs::errors::Error },

    #[snafu(display("Ping failed: {}", source))]
    Ping { source: clickhouse_rs::errors::Error },

    #[snafu(display("Failed to commit insert: {}", source))]
    Commit { source: clickhouse_rs::errors::Error },

    #[snafu(display("Row has {} values but the statement has {} columns", values, columns))]
    ColumnCount { values: usize, columns: usize },

    #[snafu(display("Row appended before the insert statement was prepared"))]
    NotPrepared,
}

/// `INSERT INTO {stream} ({columns}) VALUES`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InsertStatement {
    pub stream: String,
    pub columns: Vec<String>,
}

impl fmt::Display for InsertStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "INSERT INTO {} ({}) VALUES",
            self.stream,
            self.columns.join(",")
        )
    }
}

/// A pool of native connections to timeplusd.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, NativeError>;

    async fn ping(&self) -> Result<(), NativeError>;
}

/// A bulk insert in progress. Dropping it without committing discards every
/// row appended so far.
#[async_trait]
pub trait Transaction: Send {
    async fn prepare(&mut self, statement: &InsertStatement) -> Result<(), NativeError>;

    async fn exec(&mut self, row: &[Value]) -> Result<(), NativeError>;

    async fn commit(self: Box<Self>) -> Result<(), NativeError>;
}

pub struct NativeDriverWriter {
    driver: Arc<dyn Driver>,
    stream: String,
}

impl NativeDriverWriter {
    pub fn new(driver: Arc<dyn Driver>, stream: impl Into<String>) -> Self {
        Self {
            driver,
            stream: stream.into(),
        }
    }

    /// Creates the connection pool. No connection is opened until the first
    /// write or healthcheck.
    pub fn connect(daemon: NativeDaemon) -> Result<Self, BuildError> {
        let driver = ProtonDriver::new(&daemon)?;
        Ok(Self::new(Arc::new(driver), daemon.stream))
    }

    /// Appends every row in order inside one transaction and commits it.
    ///
    /// The first failing row aborts the batch. Remaining rows are not
    /// attempted and nothing is committed.
    pub async fn write(&self, batch: &ColumnarBatch) -> Result<(), NativeError> {
        let statement = InsertStatement {
            stream: self.stream.clone(),
            columns: batch.columns.clone(),
        };

        let mut transaction = self.driver.begin().await?;
        transaction.prepare(&statement).await?;
        for row in &batch.rows {
            transaction.exec(row).await?;
        }
        transaction.commit().await?;

        emit!(TimeplusBatchSent {
            rows: batch.len(),
            byte_size: None,
            transport: "native",
        });
        Ok(())
    }

    pub async fn healthcheck(&self) -> Result<(), NativeError> {
        self.driver.ping().await
    }
}

impl fmt::Debug for NativeDriverWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDriverWriter")
            .field("stream", &self.stream)
            .finish_non_exhaustive()
    }
}
