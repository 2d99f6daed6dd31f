use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Snapshot statistics for operators.
#[derive(Debug, Clone, Serialize)]
pub struct BackupStats {
    pub database_exists: bool,
    pub database_size: u64,
    pub backup_count: usize,
    pub total_backup_size: u64,
    pub latest_backup: Option<String>,
}

/// Point-in-time copies of the database file with retention.
///
/// Backup files are written next to each other in a dedicated directory as
/// `<stem>_<label>_<YYYYMMDD_HHMMSS>.<ext>` and pruned beyond `max_backups`,
/// newest first. Every file lands via temp-file + fsync + rename, so a
/// backup on disk is either complete or absent.
pub struct BackupManager {
    db_path: PathBuf,
    backup_dir: PathBuf,
    max_backups: usize,
    lock: Mutex<()>,
}

impl BackupManager {
    pub fn new(db_path: PathBuf, backup_dir: Option<PathBuf>, max_backups: usize) -> Self {
        let backup_dir = backup_dir.unwrap_or_else(|| {
            db_path
                .parent()
                .map(|p| p.join("backups"))
                .unwrap_or_else(|| PathBuf::from("backups"))
        });
        Self {
            db_path,
            backup_dir,
            max_backups: max_backups.max(1),
            lock: Mutex::new(()),
        }
    }

    fn stem(&self) -> String {
        self.db_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "database".to_string())
    }

    fn extension(&self) -> String {
        self.db_path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db".to_string())
    }

    /// Create a labeled backup now. Returns the backup path, or None when
    /// the database file is missing or the copy failed (logged, not raised:
    /// the scheduler retries on its next tick).
    pub async fn create_backup(&self, label: &str) -> Option<PathBuf> {
        let _guard = self.lock.lock().await;
        self.create_backup_locked(label).await
    }

    async fn create_backup_locked(&self, label: &str) -> Option<PathBuf> {
        if !self.db_path.exists() {
            warn!(
                "Database not found at {}, skipping backup",
                self.db_path.display()
            );
            return None;
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
        let filename = format!("{}_{}_{}.{}", self.stem(), label, timestamp, self.extension());
        let backup_path = self.backup_dir.join(filename);

        match self.copy_atomic(&self.db_path, &backup_path).await {
            Ok(()) => {
                info!("Database backup created: {}", backup_path.display());
                let deleted = self.cleanup_old_backups().await;
                if deleted > 0 {
                    info!("Cleaned up {} old backups", deleted);
                }
                Some(backup_path)
            }
            Err(e) => {
                error!("Failed to create database backup: {e:#}");
                None
            }
        }
    }

    /// Restore the database from a backup file.
    ///
    /// Takes a `before_restore` backup of the current state first; a failed
    /// restore leaves that safety copy in place.
    pub async fn restore(&self, backup_path: &Path) -> bool {
        let _guard = self.lock.lock().await;

        if !backup_path.exists() {
            error!("Backup file not found: {}", backup_path.display());
            return false;
        }
        if backup_path.extension().map(|e| e.to_string_lossy().into_owned())
            != Some(self.extension())
        {
            error!("Invalid backup file: {}", backup_path.display());
            return false;
        }

        let safety = self.create_backup_locked("before_restore").await;
        if safety.is_none() {
            warn!("Could not back up current database before restore");
        }

        match self.copy_atomic(backup_path, &self.db_path).await {
            Ok(()) => {
                info!("Database restored from backup: {}", backup_path.display());
                if let Some(safety) = safety {
                    info!("Previous database saved as: {}", safety.display());
                }
                true
            }
            Err(e) => {
                error!("Failed to restore database from backup: {e:#}");
                false
            }
        }
    }

    pub async fn latest_backup(&self) -> Option<PathBuf> {
        self.list_backups().await.into_iter().next().map(|(p, _)| p)
    }

    pub async fn stats(&self) -> BackupStats {
        let backups = self.list_backups().await;
        let mut total = 0;
        for (path, _) in &backups {
            if let Ok(meta) = fs::metadata(path).await {
                total += meta.len();
            }
        }

        BackupStats {
            database_exists: self.db_path.exists(),
            database_size: fs::metadata(&self.db_path).await.map(|m| m.len()).unwrap_or(0),
            backup_count: backups.len(),
            total_backup_size: total,
            latest_backup: backups
                .first()
                .and_then(|(p, _)| p.file_name().map(|n| n.to_string_lossy().into_owned())),
        }
    }

    /// Copy `src` to `dst` through a temp file in the destination directory,
    /// fsync, then rename into place.
    async fn copy_atomic(&self, src: &Path, dst: &Path) -> Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create backup directory")?;
        }

        let tmp = dst.with_extension("tmp");
        fs::copy(src, &tmp)
            .await
            .with_context(|| format!("Failed to copy {} to {}", src.display(), tmp.display()))?;

        let file = fs::File::open(&tmp).await.context("Failed to reopen temp file")?;
        file.sync_all().await.context("Failed to fsync temp file")?;
        drop(file);

        fs::rename(&tmp, dst)
            .await
            .with_context(|| format!("Failed to rename {} into place", tmp.display()))?;
        Ok(())
    }

    /// Backups for this database, newest first.
    async fn list_backups(&self) -> Vec<(PathBuf, std::time::SystemTime)> {
        let prefix = format!("{}_", self.stem());
        let ext = self.extension();

        let mut entries = Vec::new();
        let Ok(mut dir) = fs::read_dir(&self.backup_dir).await else {
            return entries;
        };
        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with(&prefix) {
                continue;
            }
            if path.extension().map(|e| e.to_string_lossy().into_owned()) != Some(ext.clone()) {
                continue;
            }
            let mtime = entry
                .metadata()
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            entries.push((path, mtime));
        }

        // Newest first; names carry the timestamp, so they break mtime ties
        // on coarse-grained filesystems.
        entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        entries
    }

    async fn cleanup_old_backups(&self) -> usize {
        let backups = self.list_backups().await;
        let mut deleted = 0;
        for (path, _) in backups.into_iter().skip(self.max_backups) {
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!("Deleted old backup: {}", path.display());
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete backup {}: {}", path.display(), e),
            }
        }
        deleted
    }
}
