use anyhow::Result;
use scan_sorter::{logger, App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logger::init_with_verbose(config.verbose_logging);

    // 初始化并运行应用
    let app = App::initialize(config)?;
    if app.run().await?.is_none() {
        tracing::info!("没有需要处理的文件，程序结束");
    }

    Ok(())
}
