//! # Scan Sorter
//!
//! 把扫描仪输入目录中的 PDF 合并、OCR、按逻辑文档分组排序后归档
//!
//! ## 架构设计
//!
//! 本系统采用严格的分层架构：
//!
//! ### ① 基础设施层（Infrastructure / Clients）
//! - `infrastructure/pdf` - 基于 lopdf 的合并、抽页、序列化
//! - `infrastructure/fs_ops` - 不覆盖目标的链接与移动
//! - `clients/` - 聊天模型（`ChatModel`）和 OCR 引擎（`OcrEngine`）
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，每个服务只负责一个阶段
//! - `Merger` - 合并输入文件，分配全局页码
//! - `OcrService` - 逐页 OCR，失败降级为空文本
//! - `GroupingService` - 模型分组 + 划分校验
//! - `OrderingService` - 模型排序 + 排列校验，失败回退合并顺序
//! - `Filer` - 暂存、校验、不覆盖提交
//! - `Archiver` - 存档原件、清理临时文件
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一个分组"的完整处理流程
//! - `RunCtx` - 上下文封装（运行 ID + 时间戳 + 临时目录）
//! - `GroupFlow` - 流程编排（排序 → 归档）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 驱动运行状态机，输出运行汇总
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;
pub mod logger;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use clients::{ChatModel, OcrEngine, OcrOutput};
pub use config::{Config, OcrEngineKind};
pub use error::{PipelineError, PipelineResult};
pub use models::{FiledDocument, RunState, RunSummary};
pub use orchestrator::App;
pub use workflow::{GroupFlow, GroupResult, RunCtx};
