use std::fmt;

/// The error taxonomy used throughout the commit core. Every fallible
/// client-visible operation resolves to one of these, never to an
/// out-of-band signal or a panic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxError {
  /// A dependent operation did not respond within its bound. Recoverable
  /// by retry at the caller.
  Timeout,
  /// The key has no committed version (read), or the subscriber was
  /// absent (unsubscribe).
  NotFound,
  /// The transaction validated to `abort`. Definitive.
  Abort,
  /// A transport-level failure. Retryable after reconnection.
  Connection,
  /// A protocol-level invariant was violated (unexpected reply shape).
  /// Fatal for the operation; callers should log and drop the request.
  Unknown(String),
}

impl fmt::Display for TxError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TxError::Timeout => write!(f, "timeout"),
      TxError::NotFound => write!(f, "not_found"),
      TxError::Abort => write!(f, "abort"),
      TxError::Connection => write!(f, "connection"),
      TxError::Unknown(msg) => write!(f, "unknown: {}", msg),
    }
  }
}

impl std::error::Error for TxError {}

pub type TxResult<T> = Result<T, TxError>;
