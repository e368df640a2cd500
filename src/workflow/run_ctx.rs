//! 运行上下文
//!
//! 封装"这是哪一次运行、临时文件放在哪里"这一信息

use std::fmt::Display;
use std::path::PathBuf;

use chrono::{DateTime, Local};

use crate::config::Config;

/// 暂存目录名（位于归档根目录下，保证与目标目录同一文件系统）
pub const STAGING_DIR_NAME: &str = ".staging";

/// 文件名中的时间戳格式
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// 运行上下文
#[derive(Debug, Clone)]
pub struct RunCtx {
    /// 用于文件名的时间戳
    pub timestamp: String,

    /// 运行 ID（时间戳 + 毫秒）
    pub run_id: String,

    /// 本次运行的工作目录
    pub work_dir: PathBuf,

    /// 本次运行的暂存目录
    pub staging_dir: PathBuf,
}

impl RunCtx {
    /// 以当前时间创建上下文
    pub fn new(config: &Config) -> Self {
        Self::at(config, Local::now())
    }

    pub fn at(config: &Config, now: DateTime<Local>) -> Self {
        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let run_id = format!("{}-{:03}", timestamp, now.timestamp_subsec_millis() % 1000);
        let run_dir = format!("run_{}", run_id);

        Self {
            work_dir: config.work_dir.join(&run_dir),
            staging_dir: config.processed_dir.join(STAGING_DIR_NAME).join(&run_dir),
            timestamp,
            run_id,
        }
    }
}

impl Display for RunCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[运行 {}]", self.run_id)
    }
}
