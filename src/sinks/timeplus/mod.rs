//! Delivers batches of records to a Timeplus stream.
//!
//! A [`TimeplusSink`] turns each batch into a [`ColumnarBatch`] and hands it
//! to its [`Writer`], which posts it to the REST ingest API or bulk-inserts it
//! over the native protocol.

mod columnar;
mod config;
mod http;
pub mod native;
mod proton;
mod record;
mod sink;
mod writer;


pub use self::{
    columnar::{ColumnarBatch, ColumnarBatchBuilder, RAW_COLUMN},
    config::{
        BuildError, DeliveryTarget, HttpEndpoint, NativeDaemon, Target, TimeplusConfig,
        Transport, DEFAULT_NATIVE_PORT, DEFAULT_NATIVE_USER,
    },
    http::HttpIngestWriter,
    native::{NativeDriverWriter, NativeError},
    record::Record,
    sink::{SinkError, SinkState, TimeplusSink},
    writer::{WriteError, Writer},
};
