//! Utility modules

pub mod paths;
pub mod retry;

pub use paths::{is_junk_path, normalize_path, split_archive_member};
pub use retry::{bounded_retry, bounded_retry_ranked, retry_transient, with_timeout, RetryOutcome};
