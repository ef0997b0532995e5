//! JSON-lines implementation of `AuditWriter`.
//!
//! Each instance's chain lives in `<dir>/<instance_id>.audit.jsonl`, one
//! `AuditEvent` per line. A chain is read back and verified the first time
//! an instance is touched, so an instance resumed in a new process keeps
//! extending the same chain.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use opsflow_contracts::{
    error::{OpsflowError, OpsflowResult},
    run::TransitionRecord,
};
use opsflow_core::traits::AuditWriter;

use crate::{
    chain::verify_chain,
    event::{AuditEvent, AuditLog},
    memory::Chain,
};

#[derive(Debug)]
pub struct FileAuditWriter {
    dir: PathBuf,
    chains: Mutex<HashMap<String, Chain>>,
}

fn failed(reason: String) -> OpsflowError {
    OpsflowError::AuditWriteFailed { reason }
}

impl FileAuditWriter {
    /// Create the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> OpsflowResult<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| failed(format!("cannot create audit dir '{}': {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            chains: Mutex::new(HashMap::new()),
        })
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
            return Err(failed(format!("invalid instance id '{}'", instance_id)));
        }
        Ok(self.dir.join(format!("{}.audit.jsonl", instance_id)))
    }

    fn lock(&self) -> OpsflowResult<MutexGuard<'_, HashMap<String, Chain>>> {
        self.chains
            .lock()
            .map_err(|e| failed(format!("audit state lock poisoned: {}", e)))
    }

    fn read_events(&self, instance_id: &str) -> OpsflowResult<Vec<AuditEvent>> {
        let path = self.path_for(instance_id)?;
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(failed(format!("read '{}': {}", path.display(), e))),
        };
        contents
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line)
                    .map_err(|e| failed(format!("'{}' line {}: {}", path.display(), n + 1, e)))
            })
            .collect()
    }

    /// Read and verify the stored chain. A missing file is an empty chain.
    fn load(&self, instance_id: &str) -> OpsflowResult<Chain> {
        let events = self.read_events(instance_id)?;
        if !verify_chain(&events) {
            return Err(failed(format!(
                "stored audit chain for '{}' fails verification",
                instance_id
            )));
        }
        let mut chain = Chain::new();
        for event in events {
            chain.push(event);
        }
        debug!(instance_id = %instance_id, events = chain.events.len(), "audit chain loaded");
        Ok(chain)
    }

    fn with_chain<T>(
        &self,
        instance_id: &str,
        f: impl FnOnce(&mut Chain) -> OpsflowResult<T>,
    ) -> OpsflowResult<T> {
        let mut chains = self.lock()?;
        if !chains.contains_key(instance_id) {
            let chain = self.load(instance_id)?;
            chains.insert(instance_id.to_string(), chain);
        }
        match chains.get_mut(instance_id) {
            Some(chain) => f(chain),
            None => Err(failed(format!("chain for '{}' vanished", instance_id))),
        }
    }

    pub fn export_log(&self, instance_id: &str) -> OpsflowResult<AuditLog> {
        self.with_chain(instance_id, |chain| Ok(chain.export(instance_id)))
    }

    /// Re-read the file and verify it, ignoring anything cached.
    pub fn verify_integrity(&self, instance_id: &str) -> OpsflowResult<bool> {
        Ok(verify_chain(&self.read_events(instance_id)?))
    }
}

impl AuditWriter for FileAuditWriter {
    fn write(&self, record: &TransitionRecord) -> OpsflowResult<()> {
        let path = self.path_for(&record.instance_id)?;
        self.with_chain(&record.instance_id, |chain| {
            let event = chain.next_event(record)?;
            let mut line = serde_json::to_string(&event)
                .map_err(|e| failed(format!("encode audit event: {}", e)))?;
            line.push('\n');

            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(line.as_bytes()))
                .map_err(|e| failed(format!("append '{}': {}", path.display(), e)))?;

            chain.push(event);
            Ok(())
        })
    }

    fn finalize(&self, instance_id: &str) -> OpsflowResult<()> {
        self.with_chain(instance_id, |chain| {
            chain.finalized = true;
            info!(
                instance_id = %instance_id,
                event_count = chain.events.len(),
                terminal_hash = %chain.last_hash,
                "audit log finalized"
            );
            Ok(())
        })
    }
}
