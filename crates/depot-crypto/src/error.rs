/// Errors from stream metric computation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MetricsError {
    /// Metrics were requested before the wrapped stream reached end-of-stream.
    #[error("stream not exhausted: {consumed} bytes consumed so far")]
    NotExhausted { consumed: u64 },
}
