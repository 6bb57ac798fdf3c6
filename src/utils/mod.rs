//! Utility modules.

pub mod file;
pub mod retry;
pub mod text;

pub use file::{calculate_checksum, calculate_file_checksum, sanitize_filename, write_atomic};
pub use retry::{RetryPolicy, RetryResult, Retryable, with_retry};
pub use text::{estimate_tokens, has_meaningful_content};
