//! 存档与清理服务
//!
//! 只有全部页面都已归档的原件才会移出输入目录

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ArchiveError;
use crate::infrastructure::move_file;
use crate::models::{Batch, RetainedFile};
use crate::workflow::RunCtx;

const MAX_DISCRIMINATOR: u32 = 999;

/// 存档结果
#[derive(Debug, Default)]
pub struct ArchiveOutcome {
    pub archived: Vec<PathBuf>,
    pub retained: Vec<RetainedFile>,
    pub errors: Vec<ArchiveError>,
}

/// 存档器
pub struct Archiver {
    archive_dir: PathBuf,
}

impl Archiver {
    pub fn new(config: &Config) -> Self {
        Self {
            archive_dir: config.archive_dir.clone(),
        }
    }

    /// 移走已完全归档的原件，其余留在输入目录
    pub async fn archive(
        &self,
        batch: &Batch,
        filed_indices: &BTreeSet<usize>,
        ctx: &RunCtx,
    ) -> ArchiveOutcome {
        let mut outcome = ArchiveOutcome::default();

        for file in batch.intake_files() {
            let contributed = batch.indices_of_file(file);
            let pending: Vec<usize> = contributed.difference(filed_indices).copied().collect();
            if !pending.is_empty() {
                info!(
                    "📌 保留原件 {}，页面 {:?} 未归档",
                    file.display(),
                    pending
                );
                outcome.retained.push(RetainedFile {
                    path: file.clone(),
                    reason: format!("页面 {:?} 所在分组归档失败", pending),
                });
                continue;
            }

            match self.move_into_archive(file, &ctx.timestamp).await {
                Ok(target) => {
                    info!("🗄️ 已存档: {} → {}", file.display(), target.display());
                    outcome.archived.push(target);
                }
                Err(e) => {
                    warn!("⚠️ {}", e);
                    outcome.retained.push(RetainedFile {
                        path: file.clone(),
                        reason: e.to_string(),
                    });
                    outcome.errors.push(e);
                }
            }
        }

        outcome
    }

    async fn move_into_archive(&self, file: &Path, timestamp: &str) -> Result<PathBuf, ArchiveError> {
        let move_err = |source| ArchiveError::Move {
            path: file.to_path_buf(),
            source,
        };
        fs::create_dir_all(&self.archive_dir).await.map_err(move_err)?;

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "scan".to_string());
        let base = format!("{}_{}", stem, timestamp);

        for n in 1..=MAX_DISCRIMINATOR {
            let name = if n == 1 {
                format!("{}.pdf", base)
            } else {
                format!("{}_{}.pdf", base, n)
            };
            let target = self.archive_dir.join(name);
            if target.exists() {
                continue;
            }
            match move_file(file, &target).await {
                Ok(()) => return Ok(target),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(move_err(e)),
            }
        }

        Err(move_err(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("存档目录中 {} 的编号已用尽", base),
        )))
    }
}

/// 删除临时目录，不存在的目录视为已清理
pub async fn cleanup(dirs: &[&Path]) -> Vec<ArchiveError> {
    let mut errors = Vec::new();
    for dir in dirs {
        match fs::remove_dir_all(dir).await {
            Ok(()) => info!("🧹 已清理: {}", dir.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(source) => {
                let err = ArchiveError::Cleanup {
                    path: dir.to_path_buf(),
                    source,
                };
                warn!("⚠️ {}", err);
                errors.push(err);
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::pdf::fixtures::sample_bytes;
    use crate::services::merger::Merger;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_only_fully_filed_files_are_archived() {
        let root = tempfile::tempdir().unwrap();
        let intake = root.path().join("intake");
        std::fs::create_dir_all(&intake).unwrap();
        let a = intake.join("a.pdf");
        let b = intake.join("b.pdf");
        std::fs::write(&a, sample_bytes(&[600, 601, 602])).unwrap();
        std::fs::write(&b, sample_bytes(&[603, 604])).unwrap();

        let config = Config {
            intake_dir: intake.clone(),
            archive_dir: root.path().join("archive"),
            work_dir: root.path().join("work"),
            ..Config::default()
        };
        let ctx = RunCtx::at(
            &config,
            chrono::Local.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
        );
        std::fs::create_dir_all(&ctx.work_dir).unwrap();
        let batch = Merger::merge(vec![a.clone(), b.clone()], &ctx.work_dir)
            .await
            .unwrap();

        // 页面 3 所在分组失败
        let filed: BTreeSet<usize> = [0, 1, 2, 4].into_iter().collect();
        let outcome = Archiver::new(&config).archive(&batch, &filed, &ctx).await;

        assert_eq!(
            outcome.archived,
            vec![config.archive_dir.join("a_20261016-090000.pdf")]
        );
        assert!(!a.exists());
        assert!(b.exists());
        assert_eq!(outcome.retained.len(), 1);
        assert_eq!(outcome.retained[0].path, b);
        assert!(outcome.errors.is_empty());

        let errors = cleanup(&[ctx.work_dir.as_path(), Path::new("/nonexistent/work")]).await;
        assert!(errors.is_empty());
        assert!(!ctx.work_dir.exists());
    }

    #[tokio::test]
    async fn test_archive_name_collision_gets_discriminator() {
        let root = tempfile::tempdir().unwrap();
        let archive = root.path().join("archive");
        std::fs::create_dir_all(&archive).unwrap();
        std::fs::write(archive.join("a_20261016-090000.pdf"), b"earlier").unwrap();
        let src = root.path().join("a.pdf");
        std::fs::write(&src, b"scan").unwrap();

        let archiver = Archiver {
            archive_dir: archive.clone(),
        };
        let target = archiver
            .move_into_archive(&src, "20261016-090000")
            .await
            .unwrap();

        assert_eq!(target, archive.join("a_20261016-090000_2.pdf"));
        assert_eq!(std::fs::read(archive.join("a_20261016-090000.pdf")).unwrap(), b"earlier");
    }
}
