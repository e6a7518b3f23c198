#![deny(unreachable_pub)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::module_name_repetitions)]

//! The Timeplus batch output.
//!
//! A stream-processing framework hands this crate batches of loosely typed
//! records. Each batch is turned into a columnar `{columns, data}` pair and
//! delivered to a Timeplus stream, either through the REST ingest API or via a
//! bulk insert over the native wire protocol.

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;
pub mod http;
pub mod sinks;
#[cfg(test)]
pub mod test_util;
pub mod trace;

pub use sinks::timeplus::{
    BuildError, ColumnarBatch, ColumnarBatchBuilder, Record, SinkError, SinkState, Target,
    TimeplusConfig, TimeplusSink, Transport, WriteError, Writer,
};

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;
