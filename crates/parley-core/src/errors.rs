/// Error taxonomy for the chunked text-stream protocol.
/// Header errors are dropped silently; decode errors surface as an event to
/// subscribers. Neither may escape the hosting loop.
#[derive(Clone, Debug, thiserror::Error)]
pub enum HeaderError {
    #[error("expected 4 pipe-delimited fields, got {0}")]
    FieldCount(usize),
    #[error("part index is not an integer: {0:?}")]
    BadPartIndex(String),
    #[error("total parts is not an integer: {0:?}")]
    BadTotalParts(String),
}

/// Failure after all fragments were assembled: the joined payload did not
/// survive base64 → UTF-8 → JSON decoding.
#[derive(Clone, Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(String),
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(String),
    #[error("payload is not a valid envelope: {0}")]
    Envelope(String),
    #[error("raw sub-payload is malformed: {0}")]
    RawPayload(String),
}

impl HeaderError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::FieldCount(_) => "field_count",
            Self::BadPartIndex(_) => "bad_part_index",
            Self::BadTotalParts(_) => "bad_total_parts",
        }
    }
}

impl DecodeError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Base64(_) => "base64",
            Self::Utf8(_) => "utf8",
            Self::Envelope(_) => "envelope",
            Self::RawPayload(_) => "raw_payload",
        }
    }
}
