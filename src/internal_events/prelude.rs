pub(crate) mod error_stage {
    pub(crate) const PROCESSING: &str = "processing";
    pub(crate) const SENDING: &str = "sending";
}

pub(crate) mod error_type {
    pub(crate) const CONDITION_FAILED: &str = "condition_failed";
    pub(crate) const ENCODER_FAILED: &str = "encoder_failed";
    pub(crate) const PARSER_FAILED: &str = "parser_failed";
    pub(crate) const REQUEST_FAILED: &str = "request_failed";
    pub(crate) const WRITER_FAILED: &str = "writer_failed";
}
