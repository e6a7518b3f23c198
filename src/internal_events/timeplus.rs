use metrics::counter;

use super::{error_stage, error_type, InternalEvent};

/// A record that could not be read as a key/value mapping was left out of the batch.
#[derive(Debug)]
pub struct TimeplusRecordDropped<'a> {
    pub reason: &'a str,
}

impl InternalEvent for TimeplusRecordDropped<'_> {
    fn emit(self) {
        debug!(
            message = "Dropping record that is not a key/value mapping.",
            reason = %self.reason,
            error_type = error_type::PARSER_FAILED,
            stage = error_stage::PROCESSING,
        );
        counter!("timeplus_records_dropped_total").increment(1);
    }
}

/// A record was substituted by its raw payload under the `raw` column.
#[derive(Debug)]
pub struct TimeplusRawFallback {
    pub byte_size: usize,
}

impl InternalEvent for TimeplusRawFallback {
    fn emit(self) {
        trace!(
            message = "Record is not a key/value mapping, sending raw payload.",
            byte_size = %self.byte_size,
        );
        counter!("timeplus_raw_fallback_total").increment(1);
    }
}

#[derive(Debug)]
pub struct TimeplusBatchSent {
    pub rows: usize,
    pub byte_size: Option<usize>,
    pub transport: &'static str,
}

impl InternalEvent for TimeplusBatchSent {
    fn emit(self) {
        debug!(
            message = "Batch delivered.",
            rows = %self.rows,
            byte_size = ?self.byte_size,
            transport = %self.transport,
        );
        counter!("timeplus_rows_sent_total", "transport" => self.transport)
            .increment(self.rows as u64);
        if let Some(byte_size) = self.byte_size {
            counter!("timeplus_bytes_sent_total", "transport" => self.transport)
                .increment(byte_size as u64);
        }
    }
}

#[derive(Debug)]
pub struct TimeplusWriteFailed<'a> {
    pub error: &'a crate::sinks::timeplus::WriteError,
    pub rows: usize,
    pub transport: &'static str,
}

impl InternalEvent for TimeplusWriteFailed<'_> {
    fn emit(self) {
        debug!(
            message = "Batch delivery failed.",
            error = %self.error,
            rows = %self.rows,
            transport = %self.transport,
            error_type = self.error.error_type(),
            stage = error_stage::SENDING,
        );
        counter!(
            "timeplus_write_errors_total",
            "error_type" => self.error.error_type(),
            "transport" => self.transport,
        )
        .increment(1);
    }
}
