pub mod group_flow;
pub mod run_ctx;

pub use group_flow::{GroupFlow, GroupResult};
pub use run_ctx::{RunCtx, STAGING_DIR_NAME, TIMESTAMP_FORMAT};
