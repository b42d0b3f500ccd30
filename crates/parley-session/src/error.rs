#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session is closed")]
    Closed,

    #[error("no outbound frame sink configured")]
    NoSink,

    #[error("transport rejected frame: {0}")]
    Transport(String),
}
