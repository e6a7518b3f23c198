use serde::Serialize;
use serde_json::{Map, Value};

use super::record::Record;
use crate::internal_events::{TimeplusRawFallback, TimeplusRecordDropped};

/// Column used when a record is sent as its raw payload.
pub const RAW_COLUMN: &str = "raw";

/// Rows aligned positionally to a single column list.
///
/// Serializes to the ingest API body, `{"columns": [...], "data": [[...], ...]}`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ColumnarBatch {
    pub columns: Vec<String>,
    #[serde(rename = "data")]
    pub rows: Vec<Vec<Value>>,
}

impl ColumnarBatch {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }
}

/// Turns a batch of records into a [`ColumnarBatch`].
///
/// Every record contributes its keys in ascending byte order. The column
/// list of the whole batch is the key list of the last record that could be
/// read; rows from records with a different key set are not reconciled
/// against it.
#[derive(Clone, Copy, Debug, Default)]
pub struct ColumnarBatchBuilder {
    raw_fallback: bool,
}

impl ColumnarBatchBuilder {
    pub const fn new(raw_fallback: bool) -> Self {
        Self { raw_fallback }
    }

    pub fn build<'a, I>(&self, records: I) -> ColumnarBatch
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut batch = ColumnarBatch::default();

        for record in records {
            let Some(fields) = self.fields(record) else {
                continue;
            };

            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort_unstable();

            batch
                .rows
                .push(keys.iter().map(|key| fields[key.as_str()].clone()).collect());
            batch.columns = keys.into_iter().cloned().collect();
        }

        batch
    }

    fn fields(&self, record: &Record) -> Option<Map<String, Value>> {
        let reason = match record.as_structured() {
            Ok(value) => match value.into_owned() {
                Value::Object(fields) => return Some(fields),
                _ => "not an object",
            },
            Err(_) => "not valid JSON",
        };

        if !self.raw_fallback {
            emit!(TimeplusRecordDropped { reason });
            return None;
        }

        let raw = record.as_bytes();
        emit!(TimeplusRawFallback {
            byte_size: raw.len()
        });

        let mut fields = Map::new();
        fields.insert(
            RAW_COLUMN.to_owned(),
            Value::String(String::from_utf8_lossy(raw).into_owned()),
        );
        Some(fields)
    }
}
