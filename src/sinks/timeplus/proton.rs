use async_trait::async_trait;
use clickhouse_rs::{Block, ClientHandle, Pool};
use serde_json::Value;
use snafu::{OptionExt, ResultExt};
use url::Url;

use super::{
    config::{NativeAddressSnafu, NativeDaemon},
    native::{
        CommitSnafu, ConnectSnafu, Driver, InsertStatement, NativeError,
        NotPreparedSnafu, PingSnafu, Transaction,
    },
    BuildError,
};

const CONNECTION_TIMEOUT: &str = "5s";

/// [`Driver`] backed by a `clickhouse-rs` connection pool.
pub(super) struct ProtonDriver {
    pool: Pool,
}

impl ProtonDriver {
    pub(super) fn new(daemon: &NativeDaemon) -> Result<Self, BuildError> {
        let url = connection_url(daemon)?;
        debug!(
            message = "Creating native connection pool.",
            host = %daemon.host,
            port = daemon.port,
            pool_size = daemon.pool_size,
        );
        Ok(Self {
            pool: Pool::new(url.to_string()),
        })
    }
}

fn connection_url(daemon: &NativeDaemon) -> Result<Url, BuildError> {
    let address = format!("tcp://{}:{}", daemon.host, daemon.port);
    let mut url = Url::parse(&address)
        .ok()
        .context(NativeAddressSnafu { address: &address })?;

    url.set_username(&daemon.user)
        .ok()
        .context(NativeAddressSnafu { address: &address })?;
    if !daemon.password.is_empty() {
        url.set_password(Some(&daemon.password))
            .ok()
            .context(NativeAddressSnafu { address: &address })?;
    }

    let pool_size = daemon.pool_size.to_string();
    url.query_pairs_mut()
        .append_pair("connection_timeout", CONNECTION_TIMEOUT)
        .append_pair("pool_min", &pool_size)
        .append_pair("pool_max", &pool_size);

    Ok(url)
}

#[async_trait]
impl Driver for ProtonDriver {
    async fn begin(&self) -> Result<Box<dyn Transaction>, NativeError> {
        let handle = self.pool.clone().get_handle().await.context(ConnectSnafu)?;
        Ok(Box::new(ProtonTransaction {
            handle,
            statement: None,
            rows: Vec::new(),
        }))
    }

    async fn ping(&self) -> Result<(), NativeError> {
        let mut handle = self.pool.clone().get_handle().await.context(ConnectSnafu)?;
        handle.ping().await.context(PingSnafu)
    }
}

/// Rows are buffered and sent as a single block on commit.
struct ProtonTransaction {
    handle: ClientHandle,
    statement: Option<InsertStatement>,
    rows: Vec<Vec<Value>>,
}

#[async_trait]
impl Transaction for ProtonTransaction {
    async fn prepare(&mut self, statement: &InsertStatement) -> Result<(), NativeError> {
        trace!(message = "Preparing native insert.", statement = %statement);
        self.statement = Some(statement.clone());
        Ok(())
    }

    async fn exec(&mut self, row: &[Value]) -> Result<(), NativeError> {
        let statement = self.statement.as_ref().context(NotPreparedSnafu)?;
        if row.len() != statement.columns.len() {
            return Err(NativeError::ColumnCount {
                values: row.len(),
                columns: statement.columns.len(),
            });
        }

        self.rows.push(row.to_vec());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), NativeError> {
        let Self {
            mut handle,
            statement,
            rows,
        } = *self;
        let statement = statement.context(NotPreparedSnafu)?;
        let block = build_block(&statement.columns, &rows);

        handle
            .insert(statement.stream.as_str(), block)
            .await
            .context(CommitSnafu)
    }
}

/// Native type of a block column, shared by every row of the batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Int64,
    UInt64,
    Float64,
    String,
}

impl ColumnKind {
    fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Bool),
            Value::Number(number) if number.is_i64() => Some(Self::Int64),
            Value::Number(number) if number.is_u64() => Some(Self::UInt64),
            Value::Number(_) => Some(Self::Float64),
            _ => Some(Self::String),
        }
    }

    /// Mixed numbers become `Float64`; any other mix falls back to text.
    fn widen(self, other: Self) -> Self {
        match (self, other) {
            (a, b) if a == b => a,
            (Self::Int64 | Self::UInt64 | Self::Float64, Self::Int64 | Self::UInt64 | Self::Float64) => {
                Self::Float64
            }
            _ => Self::String,
        }
    }
}

/// Picks one type per column from all of its values. A column holding any
/// `null` is nullable; a column holding only `null`s is a nullable string.
fn column_kind<'a>(values: impl IntoIterator<Item = &'a Value>) -> (ColumnKind, bool) {
    let mut kind = None;
    let mut nullable = false;

    for value in values {
        match ColumnKind::of(value) {
            None => nullable = true,
            Some(next) => kind = Some(kind.map_or(next, |current: ColumnKind| current.widen(next))),
        }
    }

    (kind.unwrap_or(ColumnKind::String), nullable)
}

/// Strings are sent as is; everything else that lands in a text column is
/// sent as its JSON text.
fn to_text(value: &Value) -> String {
    match value {
        Value::String(string) => string.clone(),
        other => other.to_string(),
    }
}

fn build_block(columns: &[String], rows: &[Vec<Value>]) -> Block {
    columns
        .iter()
        .enumerate()
        .fold(Block::new(), |block, (index, name)| {
            let values: Vec<&Value> = rows.iter().map(|row| &row[index]).collect();
            let name = name.as_str();

            match column_kind(values.iter().copied()) {
                (ColumnKind::Bool, false) => block.column(
                    name,
                    values
                        .iter()
                        .map(|value| u8::from(value.as_bool().unwrap_or_default()))
                        .collect::<Vec<u8>>(),
                ),
                (ColumnKind::Bool, true) => block.column(
                    name,
                    values
                        .iter()
                        .map(|value| value.as_bool().map(u8::from))
                        .collect::<Vec<Option<u8>>>(),
                ),
                (ColumnKind::Int64, false) => block.column(
                    name,
                    values
                        .iter()
                        .map(|value| value.as_i64().unwrap_or_default())
                        .collect::<Vec<i64>>(),
                ),
                (ColumnKind::Int64, true) => block.column(
                    name,
                    values.iter().map(|value| value.as_i64()).collect::<Vec<Option<i64>>>(),
                ),
                (ColumnKind::UInt64, false) => block.column(
                    name,
                    values
                        .iter()
                        .map(|value| value.as_u64().unwrap_or_default())
                        .collect::<Vec<u64>>(),
                ),
                (ColumnKind::UInt64, true) => block.column(
                    name,
                    values.iter().map(|value| value.as_u64()).collect::<Vec<Option<u64>>>(),
                ),
                (ColumnKind::Float64, false) => block.column(
                    name,
                    values
                        .iter()
                        .map(|value| value.as_f64().unwrap_or_default())
                        .collect::<Vec<f64>>(),
                ),
                (ColumnKind::Float64, true) => block.column(
                    name,
                    values.iter().map(|value| value.as_f64()).collect::<Vec<Option<f64>>>(),
                ),
                (ColumnKind::String, false) => block.column(
                    name,
                    values.iter().map(|value| to_text(value)).collect::<Vec<String>>(),
                ),
                (ColumnKind::String, true) => block.column(
                    name,
                    values
                        .iter()
                        .map(|value| (!value.is_null()).then(|| to_text(value)))
                        .collect::<Vec<Option<String>>>(),
                ),
            }
        })
}
