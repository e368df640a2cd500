//! 文件移动 - 基础设施层
//!
//! 所有写入目标目录的操作都不覆盖已有文件

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

/// 在 `dst` 建立 `src` 的副本，`dst` 已存在时返回 `AlreadyExists`
///
/// 优先使用硬链接（原子且不覆盖），跨文件系统时退回 `create_new` + 复制
pub async fn link_no_clobber(src: &Path, dst: &Path) -> std::io::Result<()> {
    match fs::hard_link(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(e),
        Err(_) => copy_no_clobber(src, dst).await,
    }
}

async fn copy_no_clobber(src: &Path, dst: &Path) -> std::io::Result<()> {
    let mut target = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(dst)
        .await?;
    let mut source = fs::File::open(src).await?;

    if let Err(e) = tokio::io::copy(&mut source, &mut target).await {
        drop(target);
        let _ = fs::remove_file(dst).await;
        return Err(e);
    }
    target.sync_all().await?;
    Ok(())
}

/// 移动文件，不覆盖目标
pub async fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    link_no_clobber(src, dst).await?;
    if let Err(e) = fs::remove_file(src).await {
        // 源文件删不掉时撤销目标，保持"只在一处"
        let _ = fs::remove_file(dst).await;
        return Err(e);
    }
    Ok(())
}
