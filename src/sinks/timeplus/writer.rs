use http::StatusCode;
use snafu::Snafu;
use tokio::sync::AcquireError;
use tokio_util::sync::CancellationToken;

use super::{
    columnar::ColumnarBatch, config::DeliveryTarget, http::HttpIngestWriter,
    native::NativeDriverWriter, BuildError, NativeError,
};
use crate::{
    http::HttpError,
    internal_events::{error_type, TimeplusWriteFailed},
};

/// Failure of a single delivery attempt. The whole batch is either accepted
/// or rejected; there is no partial success.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum WriteError {
    #[snafu(display("Failed to encode ingest payload: {}", source))]
    Encode { source: serde_json::Error },

    #[snafu(display("Cancelled while waiting for an ingest slot"))]
    Cancelled,

    #[snafu(display("Ingest concurrency limiter closed: {}", source))]
    LimiterClosed { source: AcquireError },

    #[snafu(display("Failed to build ingest request: {}", source))]
    BuildRequest { source: http::Error },

    #[snafu(display("{}", source))]
    Request { source: HttpError },

    #[snafu(display("failed to ingest, got status code {}", status.as_u16()))]
    UnexpectedStatus { status: StatusCode, body: String },

    #[snafu(display("{}", source))]
    Native { source: NativeError },
}

impl WriteError {
    /// The HTTP status of a rejected ingest request.
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) const fn error_type(&self) -> &'static str {
        match self {
            Self::Encode { .. } => error_type::ENCODER_FAILED,
            Self::Cancelled | Self::LimiterClosed { .. } => error_type::CONDITION_FAILED,
            Self::BuildRequest { .. } | Self::Request { .. } | Self::UnexpectedStatus { .. } => {
                error_type::REQUEST_FAILED
            }
            Self::Native { .. } => error_type::WRITER_FAILED,
        }
    }
}

/// Delivers columnar batches to Timeplus.
///
/// The transport is chosen once, when the sink is built, and never changes
/// afterwards.
#[derive(Debug)]
pub enum Writer {
    Http(HttpIngestWriter),
    Native(NativeDriverWriter),
}

impl Writer {
    pub fn new(target: DeliveryTarget) -> Result<Self, BuildError> {
        match target {
            DeliveryTarget::Http(endpoint) => HttpIngestWriter::new(endpoint).map(Self::Http),
            DeliveryTarget::Native(daemon) => NativeDriverWriter::connect(daemon).map(Self::Native),
        }
    }

    pub const fn transport(&self) -> &'static str {
        match self {
            Self::Http(_) => "http",
            Self::Native(_) => "native",
        }
    }

    /// Delivers one batch. `cancel` is only observed by the HTTP transport,
    /// while it waits for a free ingest slot.
    pub async fn write(
        &self,
        cancel: &CancellationToken,
        batch: &ColumnarBatch,
    ) -> Result<(), WriteError> {
        let result = match self {
            Self::Http(writer) => writer.write(cancel, batch).await,
            Self::Native(writer) => writer
                .write(batch)
                .await
                .map_err(|source| WriteError::Native { source }),
        };

        if let Err(error) = &result {
            emit!(TimeplusWriteFailed {
                error,
                rows: batch.len(),
                transport: self.transport(),
            });
        }
        result
    }

    pub async fn healthcheck(&self) -> crate::Result<()> {
        match self {
            Self::Http(_) => Ok(()),
            Self::Native(writer) => writer.healthcheck().await.map_err(Into::into),
        }
    }
}
