//! Durable per-deployment JSON records with advisory locks, gzip backups,
//! migration on read, and corruption recovery.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use fs2::FileExt;
use geuse_domain::{DeploymentState, DeploymentStatus, Tier, STATE_SCHEMA_VERSION};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::StoreError;
use crate::migrate::MigrationRunner;

pub const DEFAULT_BACKUP_RETENTION: usize = 10;

const LOCK_WAIT_SECONDS: u64 = 10;
const LOCK_POLL: Duration = Duration::from_millis(100);

// ── Advisory lock ─────────────────────────────────────────────────────────────

/// Exclusive advisory lock on `<path>.lock`. Released on drop.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

fn acquire_lock(path: &Path) -> Result<LockGuard, StoreError> {
    let lock_path = PathBuf::from(format!("{}.lock", path.display()));
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| StoreError::io(lock_path.display().to_string(), e))?;

    let deadline = Instant::now() + Duration::from_secs(LOCK_WAIT_SECONDS);
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(LockGuard { file }),
            Err(_) if Instant::now() < deadline => std::thread::sleep(LOCK_POLL),
            Err(_) => {
                return Err(StoreError::LockTimeout(
                    path.display().to_string(),
                    LOCK_WAIT_SECONDS,
                ))
            }
        }
    }
}

// ── Query ─────────────────────────────────────────────────────────────────────

/// Equality filters plus an inclusive `[after, before]` window on `created_at`.
#[derive(Debug, Clone, Default)]
pub struct QueryFilters {
    pub status: Option<DeploymentStatus>,
    pub tier: Option<Tier>,
    pub region: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl QueryFilters {
    fn matches(&self, state: &DeploymentState) -> bool {
        if let Some(status) = self.status {
            if state.status != status {
                return false;
            }
        }
        if let Some(tier) = self.tier {
            if state.config.tier != tier {
                return false;
            }
        }
        if let Some(ref region) = self.region {
            if &state.config.region != region {
                return false;
            }
        }
        if let Some(after) = self.created_after {
            if state.created_at < after {
                return false;
            }
        }
        if let Some(before) = self.created_before {
            if state.created_at > before {
                return false;
            }
        }
        true
    }
}

// ── StateStore ────────────────────────────────────────────────────────────────

/// JSON-file-backed store under a base directory (default `~/.geusemaker`).
///
/// The blocking `*_sync` methods are the primitive write/read surface; the
/// async methods wrap them in `spawn_blocking` so callers on the scheduler
/// never block on file I/O.
#[derive(Clone)]
pub struct StateStore {
    base: PathBuf,
    backup_retention: usize,
    runner: Arc<MigrationRunner>,
}

impl StateStore {
    /// Open a store, creating the directory tree if needed.
    pub fn open(base: Option<PathBuf>) -> Result<Self, StoreError> {
        let base = match base {
            Some(p) => p,
            None => dirs::home_dir()
                .ok_or_else(|| {
                    StoreError::io(
                        "~",
                        std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "home directory not resolvable",
                        ),
                    )
                })?
                .join(".geusemaker"),
        };
        let store = Self {
            base,
            backup_retention: DEFAULT_BACKUP_RETENTION,
            runner: Arc::new(MigrationRunner::default()),
        };
        store.ensure_directories()?;
        Ok(store)
    }

    pub fn with_retention(mut self, backup_retention: usize) -> Self {
        self.backup_retention = backup_retention;
        self
    }

    fn ensure_directories(&self) -> Result<(), StoreError> {
        for dir in [
            self.base.clone(),
            self.deployments_dir(),
            self.backups_dir(),
            self.archive_dir(),
            self.base.join("cache"),
            self.base.join("config"),
            self.monitoring_dir(),
        ] {
            fs::create_dir_all(&dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        }
        Ok(())
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    pub fn deployments_dir(&self) -> PathBuf {
        self.base.join("deployments")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.base.join("backups")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.base.join("archive")
    }

    pub fn monitoring_dir(&self) -> PathBuf {
        self.base.join("monitoring")
    }

    pub fn deployment_path(&self, stack_name: &str) -> PathBuf {
        self.deployments_dir().join(format!("{stack_name}.json"))
    }

    // ── Save ──────────────────────────────────────────────────────────────────

    /// Persist atomically: lock, back up the previous file, write `.tmp`,
    /// rename over. Stamps `updated_at` and the runtime schema version.
    pub fn save_sync(&self, state: &mut DeploymentState) -> Result<(), StoreError> {
        state.updated_at = Utc::now();
        state.schema_version = STATE_SCHEMA_VERSION;
        let path = self.deployment_path(&state.stack_name);
        self.write_state_file(&path, state)?;
        info!(stack = %state.stack_name, path = %path.display(), "saved deployment state");
        Ok(())
    }

    pub async fn save(&self, state: &mut DeploymentState) -> Result<(), StoreError> {
        state.updated_at = Utc::now();
        state.schema_version = STATE_SCHEMA_VERSION;
        let this = self.clone();
        let snapshot = state.clone();
        let path = self.deployment_path(&state.stack_name);
        tokio::task::spawn_blocking(move || this.write_state_file(&path, &snapshot))
            .await
            .map_err(|e| StoreError::Corruption(format!("state write task failed: {e}")))??;
        info!(stack = %state.stack_name, "saved deployment state");
        Ok(())
    }

    fn write_state_file(&self, path: &Path, state: &DeploymentState) -> Result<(), StoreError> {
        let serialized = serde_json::to_string_pretty(state)?;
        let _guard = acquire_lock(path)?;
        if path.exists() {
            self.write_backup(path, None)?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, serialized).map_err(|e| StoreError::io(tmp.display().to_string(), e))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::io(path.display().to_string(), e))?;
        Ok(())
    }

    // ── Load ──────────────────────────────────────────────────────────────────

    /// Load a deployment if it exists, applying migrations and validation.
    /// With `recover`, parse/migration/validation failures restore the most
    /// recent backup into place instead of surfacing an error.
    pub fn load_sync(
        &self,
        stack_name: &str,
        recover: bool,
    ) -> Result<Option<DeploymentState>, StoreError> {
        let path = self.deployment_path(stack_name);
        if !path.exists() {
            return Ok(None);
        }

        let raw = {
            let _guard = acquire_lock(&path)?;
            fs::read_to_string(&path).map_err(|e| StoreError::io(path.display().to_string(), e))?
        };

        let data: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                error!(stack = stack_name, error = %e, "corrupted state file");
                if recover {
                    return self.recover_from_backup(stack_name);
                }
                return Err(StoreError::Corruption(path.display().to_string()));
            }
        };

        let version = MigrationRunner::extract_version(&data);
        let (data, steps) = if version != STATE_SCHEMA_VERSION {
            match self.runner.upgrade(data, version, STATE_SCHEMA_VERSION) {
                Ok(migrated) => migrated,
                Err(e) => {
                    error!(stack = stack_name, error = %e, "state migration failed");
                    if recover {
                        return self.recover_from_backup(stack_name);
                    }
                    return Err(e);
                }
            }
        } else {
            (data, Vec::new())
        };

        let state = serde_json::from_value::<DeploymentState>(data)
            .map_err(|e| StoreError::Validation(e.to_string()))
            .and_then(|s| {
                s.validate().map_err(|e| StoreError::Validation(e.to_string()))?;
                Ok(s)
            });
        let mut state = match state {
            Ok(s) => s,
            Err(e) => {
                error!(stack = stack_name, error = %e, "state validation failed");
                if recover {
                    return self.recover_from_backup(stack_name);
                }
                return Err(e);
            }
        };

        if !steps.is_empty() {
            state
                .migration_history
                .extend(steps.iter().map(|s| s.name.to_string()));
            self.save_sync(&mut state)?;
        }

        Ok(Some(state))
    }

    pub async fn load(
        &self,
        stack_name: &str,
        recover: bool,
    ) -> Result<Option<DeploymentState>, StoreError> {
        let this = self.clone();
        let stack = stack_name.to_string();
        tokio::task::spawn_blocking(move || this.load_sync(&stack, recover))
            .await
            .map_err(|e| StoreError::Corruption(format!("state read task failed: {e}")))?
    }

    fn recover_from_backup(&self, stack_name: &str) -> Result<Option<DeploymentState>, StoreError> {
        let backups = self.list_backups(Some(stack_name))?;
        let Some(latest) = backups.first() else {
            error!(stack = stack_name, "no backups available for recovery");
            return Ok(None);
        };
        warn!(stack = stack_name, backup = %latest.display(), "recovering deployment from backup");
        self.restore_from_backup(stack_name, latest).map(Some)
    }

    // ── List / query ──────────────────────────────────────────────────────────

    /// All deployments sorted by `updated_at` descending; unreadable records
    /// are skipped with a warning.
    pub fn list_sync(&self) -> Result<Vec<DeploymentState>, StoreError> {
        let dir = self.deployments_dir();
        let mut states = Vec::new();
        let entries =
            fs::read_dir(&dir).map_err(|e| StoreError::io(dir.display().to_string(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir.display().to_string(), e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stack) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load_sync(stack, true) {
                Ok(Some(state)) => states.push(state),
                Ok(None) => {}
                Err(e) => warn!(stack, error = %e, "skipping invalid state file"),
            }
        }
        states.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(states)
    }

    pub async fn list(&self) -> Result<Vec<DeploymentState>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.list_sync())
            .await
            .map_err(|e| StoreError::Corruption(format!("state list task failed: {e}")))?
    }

    pub fn query_sync(&self, filters: &QueryFilters) -> Result<Vec<DeploymentState>, StoreError> {
        Ok(self
            .list_sync()?
            .into_iter()
            .filter(|s| filters.matches(s))
            .collect())
    }

    pub async fn query(&self, filters: QueryFilters) -> Result<Vec<DeploymentState>, StoreError> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.query_sync(&filters))
            .await
            .map_err(|e| StoreError::Corruption(format!("state query task failed: {e}")))?
    }

    // ── Delete / archive ──────────────────────────────────────────────────────

    /// Remove the live record and its lock file. Returns false when absent.
    pub fn delete_sync(&self, stack_name: &str) -> Result<bool, StoreError> {
        let path = self.deployment_path(stack_name);
        if !path.exists() {
            return Ok(false);
        }
        {
            let _guard = acquire_lock(&path)?;
            fs::remove_file(&path).map_err(|e| StoreError::io(path.display().to_string(), e))?;
        }
        let lock_path = PathBuf::from(format!("{}.lock", path.display()));
        let _ = fs::remove_file(lock_path);
        Ok(true)
    }

    pub async fn delete(&self, stack_name: &str) -> Result<bool, StoreError> {
        let this = self.clone();
        let stack = stack_name.to_string();
        tokio::task::spawn_blocking(move || this.delete_sync(&stack))
            .await
            .map_err(|e| StoreError::Corruption(format!("state delete task failed: {e}")))?
    }

    /// Write a terminal snapshot under `archive/<stack>-<unix>.json`.
    pub fn archive_sync(&self, state: &mut DeploymentState) -> Result<PathBuf, StoreError> {
        state.updated_at = Utc::now();
        state.schema_version = STATE_SCHEMA_VERSION;
        let archive_file = self
            .archive_dir()
            .join(format!("{}-{}.json", state.stack_name, state.updated_at.timestamp()));
        let serialized = serde_json::to_string_pretty(state)?;
        let tmp = archive_file.with_extension("tmp");
        fs::write(&tmp, serialized).map_err(|e| StoreError::io(tmp.display().to_string(), e))?;
        fs::rename(&tmp, &archive_file)
            .map_err(|e| StoreError::io(archive_file.display().to_string(), e))?;
        info!(stack = %state.stack_name, path = %archive_file.display(), "archived deployment state");
        Ok(archive_file)
    }

    pub async fn archive(&self, state: &mut DeploymentState) -> Result<PathBuf, StoreError> {
        let this = self.clone();
        let mut snapshot = state.clone();
        let path = tokio::task::spawn_blocking(move || this.archive_sync(&mut snapshot))
            .await
            .map_err(|e| StoreError::Corruption(format!("state archive task failed: {e}")))??;
        Ok(path)
    }

    // ── Backups ───────────────────────────────────────────────────────────────

    /// Create a compressed backup of the live record, optionally labelled.
    pub fn backup(&self, stack_name: &str, label: Option<&str>) -> Result<PathBuf, StoreError> {
        let path = self.deployment_path(stack_name);
        if !path.exists() {
            return Err(StoreError::NotFound(stack_name.to_string()));
        }
        let _guard = acquire_lock(&path)?;
        self.write_backup(&path, label)
    }

    /// Available backups, newest first. Without a stack, spans all stacks.
    pub fn list_backups(&self, stack_name: Option<&str>) -> Result<Vec<PathBuf>, StoreError> {
        let mut found: Vec<PathBuf> = Vec::new();
        let roots: Vec<PathBuf> = match stack_name {
            Some(stack) => vec![self.backups_dir().join(stack)],
            None => {
                let dir = self.backups_dir();
                match fs::read_dir(&dir) {
                    Ok(entries) => entries
                        .filter_map(|e| e.ok())
                        .map(|e| e.path())
                        .filter(|p| p.is_dir())
                        .collect(),
                    Err(_) => vec![],
                }
            }
        };
        for root in roots {
            let Ok(entries) = fs::read_dir(&root) else {
                continue;
            };
            for entry in entries.filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.to_string_lossy().ends_with(".json.gz") {
                    found.push(path);
                }
            }
        }
        found.sort_by_key(|p| {
            std::cmp::Reverse(
                p.metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH),
            )
        });
        Ok(found)
    }

    /// Restore a state file from a backup archive: migrate the backup's
    /// content, validate, and replace the live record atomically.
    pub fn restore_from_backup(
        &self,
        stack_name: &str,
        backup_path: &Path,
    ) -> Result<DeploymentState, StoreError> {
        if !backup_path.exists() {
            return Err(StoreError::BackupNotFound(
                backup_path.display().to_string(),
            ));
        }

        let file = File::open(backup_path)
            .map_err(|e| StoreError::io(backup_path.display().to_string(), e))?;
        let mut decoder = GzDecoder::new(file);
        let mut raw = String::new();
        decoder
            .read_to_string(&mut raw)
            .map_err(|e| StoreError::io(backup_path.display().to_string(), e))?;

        let data: Value = serde_json::from_str(&raw)
            .map_err(|_| StoreError::Corruption(backup_path.display().to_string()))?;

        let version = MigrationRunner::extract_version(&data);
        let (data, steps) = if version != STATE_SCHEMA_VERSION {
            self.runner.upgrade(data, version, STATE_SCHEMA_VERSION)?
        } else {
            (data, Vec::new())
        };

        let mut state: DeploymentState =
            serde_json::from_value(data).map_err(|e| StoreError::Validation(e.to_string()))?;
        state
            .migration_history
            .extend(steps.iter().map(|s| s.name.to_string()));
        state
            .validate()
            .map_err(|e| StoreError::Validation(e.to_string()))?;

        self.save_sync(&mut state)?;
        info!(stack = stack_name, backup = %backup_path.display(), "restored deployment from backup");
        Ok(state)
    }

    /// Gzip-copy the current file into `backups/<stack>/`, appending a numeric
    /// suffix on timestamp collision, then prune beyond the retention bound.
    fn write_backup(&self, file_path: &Path, label: Option<&str>) -> Result<PathBuf, StoreError> {
        let stack = file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown");
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%6fZ").to_string();
        let label_suffix = label.map(|l| format!("-{l}")).unwrap_or_default();
        let target_dir = self.backups_dir().join(stack);
        fs::create_dir_all(&target_dir)
            .map_err(|e| StoreError::io(target_dir.display().to_string(), e))?;

        let mut backup_path =
            target_dir.join(format!("{stack}{label_suffix}-{timestamp}.json.gz"));
        let mut counter = 1;
        while backup_path.exists() {
            backup_path =
                target_dir.join(format!("{stack}{label_suffix}-{timestamp}-{counter}.json.gz"));
            counter += 1;
        }

        let contents =
            fs::read(file_path).map_err(|e| StoreError::io(file_path.display().to_string(), e))?;
        let out = File::create(&backup_path)
            .map_err(|e| StoreError::io(backup_path.display().to_string(), e))?;
        let mut encoder = GzEncoder::new(out, Compression::default());
        encoder
            .write_all(&contents)
            .and_then(|_| encoder.finish().map(|_| ()))
            .map_err(|e| StoreError::io(backup_path.display().to_string(), e))?;

        self.enforce_retention(&target_dir)?;
        info!(stack, backup = %backup_path.display(), "created state backup");
        Ok(backup_path)
    }

    fn enforce_retention(&self, backup_dir: &Path) -> Result<(), StoreError> {
        if self.backup_retention == 0 {
            return Ok(());
        }
        let mut backups: Vec<PathBuf> = fs::read_dir(backup_dir)
            .map_err(|e| StoreError::io(backup_dir.display().to_string(), e))?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.to_string_lossy().ends_with(".json.gz"))
            .collect();
        backups.sort_by_key(|p| {
            std::cmp::Reverse(
                p.metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(std::time::UNIX_EPOCH),
            )
        });
        for stale in backups.iter().skip(self.backup_retention) {
            let _ = fs::remove_file(stale);
        }
        Ok(())
    }

    // ── Export ────────────────────────────────────────────────────────────────

    pub fn export_json(&self, state: &DeploymentState, pretty: bool) -> Result<String, StoreError> {
        if pretty {
            Ok(serde_json::to_string_pretty(state)?)
        } else {
            Ok(serde_json::to_string(state)?)
        }
    }

    pub fn export_yaml(&self, state: &DeploymentState) -> Result<String, StoreError> {
        Ok(serde_yaml::to_string(state)?)
    }

    /// Export to a file; format inferred from the extension (`.yaml`/`.yml` vs
    /// everything else = JSON).
    pub fn export_to_file(
        &self,
        state: &DeploymentState,
        destination: &Path,
    ) -> Result<(), StoreError> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StoreError::io(parent.display().to_string(), e))?;
        }
        let rendered = match destination
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
        {
            Some(ref ext) if ext == "yaml" || ext == "yml" => self.export_yaml(state)?,
            _ => self.export_json(state, true)?,
        };
        fs::write(destination, rendered)
            .map_err(|e| StoreError::io(destination.display().to_string(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geuse_domain::{
        CostTracking, DeploymentConfig, Provenance, ResourceKind,
    };
    use rust_decimal::Decimal;
    use tempfile::TempDir;

    fn sample_state(stack: &str) -> DeploymentState {
        let config = DeploymentConfig::new(stack, Tier::Dev, "us-east-1").unwrap();
        let cost = CostTracking::from_selection(
            "t3.medium",
            false,
            Decimal::new(416, 4),
            Decimal::new(416, 4),
            None,
        );
        let mut state = DeploymentState::new(config, cost, DeploymentStatus::Running);
        state.vpc_id = "vpc-1".into();
        state.subnet_ids = vec!["subnet-1".into(), "subnet-2".into()];
        state.security_group_id = "sg-1".into();
        state.efs_id = "fs-1".into();
        state.efs_mount_target_id = "fsmt-1".into();
        state.instance_id = "i-1".into();
        state.private_ip = "10.0.0.5".into();
        state.n8n_url = "https://10.0.0.5".into();
        state
            .resource_provenance
            .set(ResourceKind::Vpc, Provenance::Created);
        state
    }

    fn open_store(dir: &TempDir) -> StateStore {
        StateStore::open(Some(dir.path().to_path_buf())).unwrap()
    }

    #[test]
    fn save_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("demo");
        store.save_sync(&mut state).unwrap();

        let loaded = store.load_sync("demo", true).unwrap().unwrap();
        // updated_at is refreshed on save; everything else must survive.
        assert_eq!(loaded.stack_name, state.stack_name);
        assert_eq!(loaded.vpc_id, state.vpc_id);
        assert_eq!(loaded.schema_version, STATE_SCHEMA_VERSION);
        assert_eq!(loaded.resource_provenance, state.resource_provenance);
        assert_eq!(loaded.cost, state.cost);
        assert_eq!(loaded.config, state.config);
    }

    #[test]
    fn load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.load_sync("absent", true).unwrap().is_none());
    }

    #[test]
    fn backup_count_tracks_writes_up_to_retention() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).with_retention(3);
        let mut state = sample_state("demo");

        for writes in 1..=6usize {
            store.save_sync(&mut state).unwrap();
            let backups = store.list_backups(Some("demo")).unwrap();
            assert_eq!(backups.len(), (writes - 1).min(3), "after {writes} writes");
        }
    }

    #[test]
    fn corrupted_file_recovers_from_latest_backup() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("demo");
        store.save_sync(&mut state).unwrap();
        state.instance_id = "i-2".into();
        store.save_sync(&mut state).unwrap();

        fs::write(store.deployment_path("demo"), "{ not json").unwrap();
        let recovered = store.load_sync("demo", true).unwrap().unwrap();
        // Latest backup was taken before the second write, so it holds i-1.
        assert_eq!(recovered.instance_id, "i-1");
        // The live record was replaced with the recovered content.
        let reloaded = store.load_sync("demo", true).unwrap().unwrap();
        assert_eq!(reloaded.instance_id, "i-1");
    }

    #[test]
    fn corrupted_file_without_recover_is_a_typed_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("demo");
        store.save_sync(&mut state).unwrap();
        fs::write(store.deployment_path("demo"), "garbage").unwrap();
        let err = store.load_sync("demo", false).unwrap_err();
        assert!(matches!(err, StoreError::Corruption(_)));
    }

    #[test]
    fn v1_record_is_migrated_and_rewritten_on_read() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("legacy");
        store.save_sync(&mut state).unwrap();

        // Rewrite the file as a v1 record: strip version and provenance.
        let raw = fs::read_to_string(store.deployment_path("legacy")).unwrap();
        let mut value: Value = serde_json::from_str(&raw).unwrap();
        let map = value.as_object_mut().unwrap();
        map.remove("schema_version");
        map.remove("resource_provenance");
        map.remove("migration_history");
        fs::write(
            store.deployment_path("legacy"),
            serde_json::to_string(&value).unwrap(),
        )
        .unwrap();

        let loaded = store.load_sync("legacy", false).unwrap().unwrap();
        assert_eq!(loaded.schema_version, STATE_SCHEMA_VERSION);
        assert_eq!(
            loaded.migration_history,
            vec!["v1_to_v2_add_schema_version".to_string()]
        );

        // The file on disk was rewritten at the current version.
        let raw = fs::read_to_string(store.deployment_path("legacy")).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["schema_version"], 2);
    }

    #[test]
    fn future_schema_version_fails() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("future");
        store.save_sync(&mut state).unwrap();

        let raw = fs::read_to_string(store.deployment_path("future")).unwrap();
        let mut value: Value = serde_json::from_str(&raw).unwrap();
        value["schema_version"] = Value::from(99);
        fs::write(
            store.deployment_path("future"),
            serde_json::to_string(&value).unwrap(),
        )
        .unwrap();

        let err = store.load_sync("future", false).unwrap_err();
        assert!(matches!(err, StoreError::Migration(_)));
    }

    #[test]
    fn query_filters_by_status_and_region() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut a = sample_state("stack-a");
        store.save_sync(&mut a).unwrap();
        let mut b = sample_state("stack-b");
        b.status = DeploymentStatus::Failed;
        store.save_sync(&mut b).unwrap();

        let running = store
            .query_sync(&QueryFilters {
                status: Some(DeploymentStatus::Running),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].stack_name, "stack-a");

        let elsewhere = store
            .query_sync(&QueryFilters {
                region: Some("eu-west-1".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(elsewhere.is_empty());
    }

    #[test]
    fn export_round_trips_json_and_yaml() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let state = sample_state("export");

        let json = store.export_json(&state, true).unwrap();
        let from_json: DeploymentState = serde_json::from_str(&json).unwrap();
        assert_eq!(from_json, state);

        let yaml = store.export_yaml(&state).unwrap();
        let from_yaml: DeploymentState = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(from_yaml, state);
    }

    #[test]
    fn labelled_backup_lands_in_stack_directory() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("demo");
        store.save_sync(&mut state).unwrap();

        let backup = store.backup("demo", Some("pre-upgrade")).unwrap();
        let name = backup.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("demo-pre-upgrade-"));
        assert!(name.ends_with(".json.gz"));
        assert_eq!(backup.parent().unwrap(), store.backups_dir().join("demo"));
    }

    #[test]
    fn restore_replaces_live_record() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("demo");
        store.save_sync(&mut state).unwrap();
        let backup = store.backup("demo", None).unwrap();

        state.instance_id = "i-new".into();
        store.save_sync(&mut state).unwrap();

        let restored = store.restore_from_backup("demo", &backup).unwrap();
        assert_eq!(restored.instance_id, "i-1");
        let loaded = store.load_sync("demo", true).unwrap().unwrap();
        assert_eq!(loaded.instance_id, "i-1");
    }

    #[test]
    fn delete_removes_record_and_lock() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("demo");
        store.save_sync(&mut state).unwrap();
        assert!(store.delete_sync("demo").unwrap());
        assert!(!store.deployment_path("demo").exists());
        assert!(!store.delete_sync("demo").unwrap());
    }

    #[test]
    fn archive_writes_unix_stamped_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("demo");
        state.status = DeploymentStatus::Terminated;
        let path = store.archive_sync(&mut state).unwrap();
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("demo-"));
        assert!(name.ends_with(".json"));
    }

    #[tokio::test]
    async fn async_surface_wraps_the_sync_primitives() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let mut state = sample_state("async-demo");
        store.save(&mut state).await.unwrap();
        let loaded = store.load("async-demo", true).await.unwrap().unwrap();
        assert_eq!(loaded.stack_name, "async-demo");
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.delete("async-demo").await.unwrap());
    }
}
