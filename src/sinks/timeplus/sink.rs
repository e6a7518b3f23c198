use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arc_swap::ArcSwapOption;
use snafu::{OptionExt, ResultExt, Snafu};
use tokio_util::sync::CancellationToken;

use super::{
    columnar::ColumnarBatchBuilder,
    record::Record,
    writer::{WriteError, Writer},
};

#[derive(Debug, Snafu)]
pub enum SinkError {
    #[snafu(display("client not initialized"))]
    NotInitialized,

    #[snafu(display("sink is closed"))]
    Closed,

    #[snafu(display("{}", source))]
    Write { source: WriteError },
}

impl SinkError {
    /// The underlying delivery failure, if any.
    pub const fn write_error(&self) -> Option<&WriteError> {
        match self {
            Self::Write { source } => Some(source),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkState {
    Uninitialized,
    Connected,
    Closed,
}

/// The output handed to the stream-processing framework.
///
/// Owns exactly one [`Writer`] from construction until [`TimeplusSink::close`].
/// Every call to [`TimeplusSink::write_batch`] is a single delivery attempt;
/// retries are up to the caller.
pub struct TimeplusSink {
    writer: ArcSwapOption<Writer>,
    builder: ColumnarBatchBuilder,
    state: Mutex<SinkState>,
}

impl TimeplusSink {
    pub fn new(writer: Writer, builder: ColumnarBatchBuilder) -> Self {
        Self {
            writer: ArcSwapOption::from_pointee(writer),
            builder,
            state: Mutex::new(SinkState::Uninitialized),
        }
    }

    pub fn state(&self) -> SinkState {
        *self.lock_state()
    }

    pub fn connect(&self) -> Result<(), SinkError> {
        let mut state = self.lock_state();
        let guard = self.writer.load();
        let writer = Option::as_ref(&guard).context(NotInitializedSnafu)?;

        *state = SinkState::Connected;
        debug!(message = "Connected.", transport = writer.transport());
        Ok(())
    }

    /// Converts `records` into a columnar batch and delivers it.
    ///
    /// Nothing is sent when no record survives conversion. `cancel` aborts a
    /// call that is still waiting for an HTTP ingest slot.
    pub async fn write_batch(
        &self,
        cancel: &CancellationToken,
        records: &[Record],
    ) -> Result<(), SinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let batch = self.builder.build(records);
        if batch.is_empty() {
            debug!(
                message = "No record in batch could be converted, skipping delivery.",
                records = records.len(),
            );
            return Ok(());
        }

        let writer: Arc<Writer> = self.writer.load_full().context(ClosedSnafu)?;
        writer.write(cancel, &batch).await.context(WriteSnafu)
    }

    /// Drops the writer. In-flight writes keep their own handle and run to
    /// completion.
    pub fn close(&self) {
        let mut state = self.lock_state();
        self.writer.store(None);
        *state = SinkState::Closed;
    }

    pub async fn healthcheck(&self) -> crate::Result<()> {
        let writer = self.writer.load_full().context(ClosedSnafu)?;
        writer.healthcheck().await
    }

    fn lock_state(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for TimeplusSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeplusSink")
            .field("writer", &self.writer.load().as_deref().map(Writer::transport))
            .field("builder", &self.builder)
            .field("state", &self.state())
            .finish()
    }
}
