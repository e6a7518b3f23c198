use std::fmt;

use http::header::InvalidHeaderValue;
use serde::Deserialize;
use snafu::{ensure, OptionExt, Snafu};
use url::Url;

use super::{columnar::ColumnarBatchBuilder, sink::TimeplusSink, writer::Writer};
use crate::http::HttpError;

pub const DEFAULT_NATIVE_PORT: u16 = 8463;
pub const DEFAULT_NATIVE_USER: &str = "default";

const fn default_max_in_flight() -> usize {
    64
}

const fn default_pool_size() -> usize {
    10
}

/// Which Timeplus deployment receives the data.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Timeplus Cloud or an on-prem Timeplus Enterprise, addressed per workspace.
    #[default]
    Timeplus,
    /// A bare `timeplusd` daemon.
    Timeplusd,
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// The REST ingest API.
    #[default]
    Http,
    /// Bulk inserts over the native TCP protocol. Only `timeplusd` speaks it.
    Native,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(super)))]
pub enum BuildError {
    #[snafu(display("workspace is required for `timeplus` target"))]
    MissingWorkspace,

    #[snafu(display("stream is required"))]
    MissingStream,

    #[snafu(display("url `{}` cannot be used as a base URL", url))]
    UrlNotBase { url: String },

    #[snafu(display("url `{}` has no host", url))]
    MissingHost { url: String },

    #[snafu(display("Ingest URL is not a valid URI: {}", source))]
    InvalidIngestUri { source: http::uri::InvalidUri },

    #[snafu(display("native address `{}` is invalid", address))]
    NativeAddress { address: String },

    #[snafu(display("max_in_flight must be greater than zero"))]
    ZeroMaxInFlight,

    #[snafu(display("pool_size must be greater than zero"))]
    ZeroPoolSize,

    #[snafu(display("transport `native` is only supported with the `timeplusd` target"))]
    NativeRequiresTimeplusd,

    #[snafu(display("Invalid credential header value: {}", source))]
    InvalidHeader { source: InvalidHeaderValue },

    #[snafu(display("Failed to build HTTP client: {}", source))]
    HttpClient { source: HttpError },
}

/// Configuration for the Timeplus output.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TimeplusConfig {
    #[serde(default)]
    pub target: Target,

    #[serde(default)]
    pub transport: Transport,

    /// Base URL of the ingest API. For the native transport only its host is used.
    pub url: Url,

    /// Port of the native protocol listener.
    #[serde(default)]
    pub port: Option<u16>,

    /// Required for the `timeplus` target.
    #[serde(default)]
    pub workspace: String,

    pub stream: String,

    /// Sent as `X-Api-Key`.
    #[serde(default)]
    pub apikey: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Upper bound of concurrent HTTP ingest requests.
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Size of the native connection pool.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Send records that are not key/value mappings as a single `raw` column
    /// instead of dropping them.
    #[serde(default)]
    pub raw_fallback: bool,
}

impl fmt::Debug for TimeplusConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeplusConfig")
            .field("target", &self.target)
            .field("transport", &self.transport)
            .field("url", &self.url.as_str())
            .field("port", &self.port)
            .field("workspace", &self.workspace)
            .field("stream", &self.stream)
            .field("apikey", &self.apikey.as_ref().map(|_| "**REDACTED**"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "**REDACTED**"))
            .field("max_in_flight", &self.max_in_flight)
            .field("pool_size", &self.pool_size)
            .field("raw_fallback", &self.raw_fallback)
            .finish()
    }
}

/// Everything an HTTP ingest writer needs, validated.
#[derive(Clone, Debug)]
pub struct HttpEndpoint {
    pub target: Target,
    pub base_url: Url,
    pub workspace: String,
    pub stream: String,
    pub apikey: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub max_in_flight: usize,
}

/// Everything a native writer needs, validated.
#[derive(Clone)]
pub struct NativeDaemon {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub stream: String,
    pub pool_size: usize,
}

impl fmt::Debug for NativeDaemon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeDaemon")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("stream", &self.stream)
            .field("pool_size", &self.pool_size)
            .finish_non_exhaustive()
    }
}

/// Where batches are delivered. Fixed for the lifetime of a sink.
#[derive(Clone, Debug)]
pub enum DeliveryTarget {
    Http(HttpEndpoint),
    Native(NativeDaemon),
}

impl TimeplusConfig {
    /// Minimal configuration for the given base URL and stream.
    pub fn new(url: Url, stream: impl Into<String>) -> Self {
        Self {
            target: Target::default(),
            transport: Transport::default(),
            url,
            port: None,
            workspace: String::new(),
            stream: stream.into(),
            apikey: None,
            username: None,
            password: None,
            max_in_flight: default_max_in_flight(),
            pool_size: default_pool_size(),
            raw_fallback: false,
        }
    }

    /// Validates the configuration and describes where batches go.
    pub fn delivery_target(&self) -> Result<DeliveryTarget, BuildError> {
        ensure!(!self.stream.is_empty(), MissingStreamSnafu);

        match self.transport {
            Transport::Http => {
                ensure!(
                    self.target != Target::Timeplus || !self.workspace.is_empty(),
                    MissingWorkspaceSnafu
                );
                ensure!(self.max_in_flight > 0, ZeroMaxInFlightSnafu);

                Ok(DeliveryTarget::Http(HttpEndpoint {
                    target: self.target,
                    base_url: self.url.clone(),
                    workspace: self.workspace.clone(),
                    stream: self.stream.clone(),
                    apikey: self.apikey.clone(),
                    username: self.username.clone(),
                    password: self.password.clone(),
                    max_in_flight: self.max_in_flight,
                }))
            }
            Transport::Native => {
                ensure!(self.target == Target::Timeplusd, NativeRequiresTimeplusdSnafu);
                ensure!(self.pool_size > 0, ZeroPoolSizeSnafu);

                let host = self.url.host_str().context(MissingHostSnafu {
                    url: self.url.as_str(),
                })?;

                Ok(DeliveryTarget::Native(NativeDaemon {
                    host: host.to_owned(),
                    port: self.port.unwrap_or(DEFAULT_NATIVE_PORT),
                    user: self
                        .username
                        .clone()
                        .unwrap_or_else(|| DEFAULT_NATIVE_USER.to_owned()),
                    password: self.password.clone().unwrap_or_default(),
                    stream: self.stream.clone(),
                    pool_size: self.pool_size,
                }))
            }
        }
    }

    /// Builds a sink in the `Uninitialized` state. No network call is made.
    pub fn build(&self) -> Result<TimeplusSink, BuildError> {
        let target = self.delivery_target()?;
        let writer = Writer::new(target)?;
        debug!(
            message = "Built Timeplus sink.",
            transport = writer.transport(),
            stream = %self.stream,
        );
        Ok(TimeplusSink::new(
            writer,
            ColumnarBatchBuilder::new(self.raw_fallback),
        ))
    }
}
