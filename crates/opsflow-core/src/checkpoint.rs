//! Checkpoint stores.
//!
//! `InMemoryCheckpointStore` keeps snapshots until they are deleted or
//! pruned; finished instances stay readable until
//! [`CheckpointStore::prune_finished`] runs. `FileCheckpointStore` writes
//! one JSON document per instance so a suspended run survives a restart;
//! writes go to a temp file that is then renamed over the old snapshot.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    run::{Checkpoint, CheckpointStatus},
};

use crate::traits::CheckpointStore;

fn not_found(instance_id: &str) -> OpsflowError {
    OpsflowError::InstanceNotFound {
        instance_id: instance_id.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> OpsflowResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.instance_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> OpsflowResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(instance_id).cloned())
    }

    async fn delete(&self, instance_id: &str) -> OpsflowResult<bool> {
        Ok(self.checkpoints.write().await.remove(instance_id).is_some())
    }

    async fn list_suspended(&self) -> OpsflowResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .checkpoints
            .read()
            .await
            .values()
            .filter(|c| c.status == CheckpointStatus::Suspended)
            .map(|c| c.instance_id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn claim(&self, instance_id: &str, request_id: &str) -> OpsflowResult<Checkpoint> {
        let mut checkpoints = self.checkpoints.write().await;
        let checkpoint = checkpoints
            .get_mut(instance_id)
            .ok_or_else(|| not_found(instance_id))?;
        checkpoint.check_claim(request_id)?;
        checkpoint.status = CheckpointStatus::Running;
        checkpoint.updated_at = Utc::now();
        Ok(checkpoint.clone())
    }

    async fn prune_finished(&self) -> OpsflowResult<usize> {
        let mut checkpoints = self.checkpoints.write().await;
        let before = checkpoints.len();
        checkpoints.retain(|_, c| !matches!(c.status, CheckpointStatus::Finished(_)));
        Ok(before - checkpoints.len())
    }
}

/// One `<instance_id>.json` file per instance under `dir`.
///
/// A claim holds `<instance_id>.lock`, created exclusively, while it flips
/// the snapshot to `Running`. A process that dies inside that window leaves
/// the lock behind and the instance cannot be resumed until it is removed.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Create the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> OpsflowResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| OpsflowError::CheckpointFailed {
            reason: format!("cannot create checkpoint dir '{}': {}", dir.display(), e),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, instance_id: &str) -> OpsflowResult<PathBuf> {
        let valid = !instance_id.is_empty()
            && instance_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(OpsflowError::CheckpointFailed {
                reason: format!("invalid instance id '{}'", instance_id),
            });
        }
        Ok(self.dir.join(format!("{}.json", instance_id)))
    }

    async fn read(path: &Path) -> OpsflowResult<Option<Checkpoint>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OpsflowError::CheckpointFailed {
                    reason: format!("read '{}': {}", path.display(), e),
                })
            }
        };
        let checkpoint = serde_json::from_slice(&bytes).map_err(|e| OpsflowError::CheckpointFailed {
            reason: format!("decode '{}': {}", path.display(), e),
        })?;
        Ok(Some(checkpoint))
    }

    /// Every snapshot in the directory with its path.
    async fn read_all(&self) -> OpsflowResult<Vec<(PathBuf, Checkpoint)>> {
        let list_failed = |e: std::io::Error| OpsflowError::CheckpointFailed {
            reason: format!("list '{}': {}", self.dir.display(), e),
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(list_failed)?;

        let mut out = vec![];
        while let Some(entry) = entries.next_entry().await.map_err(list_failed)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(checkpoint) = Self::read(&path).await? {
                out.push((path, checkpoint));
            }
        }
        Ok(out)
    }

    async fn claim_locked(
        &self,
        path: &Path,
        instance_id: &str,
        request_id: &str,
    ) -> OpsflowResult<Checkpoint> {
        let mut checkpoint = Self::read(path).await?.ok_or_else(|| not_found(instance_id))?;
        checkpoint.check_claim(request_id)?;
        checkpoint.status = CheckpointStatus::Running;
        checkpoint.updated_at = Utc::now();
        self.save(&checkpoint).await?;
        Ok(checkpoint)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> OpsflowResult<()> {
        let path = self.path_for(&checkpoint.instance_id)?;
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(checkpoint).map_err(|e| OpsflowError::CheckpointFailed {
            reason: format!("encode checkpoint: {}", e),
        })?;

        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| OpsflowError::CheckpointFailed {
                reason: format!("write '{}': {}", tmp.display(), e),
            })?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| OpsflowError::CheckpointFailed {
                reason: format!("rename into '{}': {}", path.display(), e),
            })?;

        debug!(instance_id = %checkpoint.instance_id, path = %path.display(), "checkpoint saved");
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> OpsflowResult<Option<Checkpoint>> {
        Self::read(&self.path_for(instance_id)?).await
    }

    async fn delete(&self, instance_id: &str) -> OpsflowResult<bool> {
        let path = self.path_for(instance_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(OpsflowError::CheckpointFailed {
                reason: format!("delete '{}': {}", path.display(), e),
            }),
        }
    }

    async fn list_suspended(&self) -> OpsflowResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .read_all()
            .await?
            .into_iter()
            .filter(|(_, c)| c.status == CheckpointStatus::Suspended)
            .map(|(_, c)| c.instance_id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn claim(&self, instance_id: &str, request_id: &str) -> OpsflowResult<Checkpoint> {
        let path = self.path_for(instance_id)?;
        let lock = path.with_extension("lock");
        let opened = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&lock)
            .await;
        match opened {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(instance_id = %instance_id, "instance already claimed");
                return Err(OpsflowError::NotSuspended {
                    instance_id: instance_id.to_string(),
                });
            }
            Err(e) => {
                return Err(OpsflowError::CheckpointFailed {
                    reason: format!("lock '{}': {}", lock.display(), e),
                })
            }
        }

        let claimed = self.claim_locked(&path, instance_id, request_id).await;
        if let Err(e) = tokio::fs::remove_file(&lock).await {
            warn!(instance_id = %instance_id, error = %e, "could not release checkpoint lock");
        }
        claimed
    }

    async fn prune_finished(&self) -> OpsflowResult<usize> {
        let mut removed = 0;
        for (path, checkpoint) in self.read_all().await? {
            if !matches!(checkpoint.status, CheckpointStatus::Finished(_)) {
                continue;
            }
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(OpsflowError::CheckpointFailed {
                        reason: format!("delete '{}': {}", path.display(), e),
                    })
                }
            }
        }
        Ok(removed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
