//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责一次运行的阶段调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批次处理器
//! - 管理应用生命周期（初始化、运行、清理）
//! - 驱动运行状态机（Collecting → … → Done / Failed）
//! - 区分批次级失败（终止运行）和分组级失败（记录后继续）
//! - 输出运行汇总
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理一个 Batch)
//!     ↓
//! workflow::GroupFlow (处理单个 Group：排序 → 归档)
//!     ↓
//! services (能力层：merge / ocr / grouping / ordering / filing / archive)
//!     ↓
//! clients + infrastructure (模型、OCR 引擎、PDF 读写、文件移动)
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：batch_processor 管批次，GroupFlow 管单个分组
//! 2. **资源隔离**：只有编排层持有模型客户端和 OCR 引擎
//! 3. **向下依赖**：编排层 → workflow → services → clients / infrastructure
//! 4. **无业务逻辑**：只做调度和统计，不做具体业务判断

pub mod batch_processor;

// 重新导出主要类型
pub use batch_processor::App;
