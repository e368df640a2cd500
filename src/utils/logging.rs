/// 日志工具模块
///
/// 提供运行阶段横幅和统计输出的辅助函数
use tracing::info;

use crate::config::Config;
use crate::models::{RunState, RunSummary};

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 扫描件分拣模式");
    info!("📥 输入目录: {}", config.intake_dir.display());
    info!("📂 归档目录: {}", config.processed_dir.display());
    info!("🗄️ 存档目录: {}", config.archive_dir.display());
    info!("🤖 模型: {}", config.llm_model_name);
    info!("{}", "=".repeat(60));
}

/// 记录阶段切换
///
/// # 参数
/// - `from`: 原状态
/// - `to`: 新状态
pub fn log_transition(from: &RunState, to: &RunState) {
    info!("\n{}", "─".repeat(60));
    info!("🔁 {} → {}", from, to);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
pub fn print_final_stats(summary: &RunSummary) {
    info!("\n{}", "=".repeat(60));
    info!("📊 本次运行统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("状态: {}", summary.state);
    info!("📄 页面总数: {}", summary.total_pages);
    info!(
        "✅ 已归档文档: {} (共 {} 页)",
        summary.filed.len(),
        summary.pages_filed()
    );
    info!("↩️ 回退到原顺序: {}", summary.order_fallbacks.len());
    info!("❌ 归档失败分组: {}", summary.failed_groups.len());
    info!("🔤 OCR 失败页面: {}", summary.ocr_failed_pages.len());
    info!(
        "🗄️ 已存档原件: {}，保留在输入目录: {}",
        summary.archived.len(),
        summary.retained.len()
    );
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（字符数）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
