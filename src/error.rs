//! Error codes shared by the store, asset and session error types.
//!
//! Every failure the sync core can observe falls into one of a few
//! buckets: a rejected write (logged and dropped, healed by the next edit
//! or snapshot), a missing board (terminal for the view), an asset that
//! cannot be materialized (that element is skipped), and database faults.
//! Callers log the code alongside the message so failures stay grepable.

/// Grepable error code and retryable flag.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}
