pub mod logging;
pub mod retry;

pub use logging::truncate_text;
pub use retry::{call_with_retry, RetryExhausted, RetryPolicy};
