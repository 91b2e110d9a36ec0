//! Ephemeral-registration tracking and session-recovery replay.
//!
//! The coordination service removes a session's ephemeral nodes when the
//! session ends, and drops its watches. This manager retains every
//! ephemeral registration made through the client so that, when a fresh
//! session is established, the registrations can be replayed and every
//! live view re-primed. Replay is best-effort and at-least-once: a single
//! failed registration is logged and does not abort the rest.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::capability::{Coordination, CoordError, CreateMode};
use crate::core::AclEntry;

/// Everything needed to re-issue one ephemeral registration.
#[derive(Debug, Clone)]
pub(crate) struct RegistrationRecord {
    pub data: String,
    pub acl: Vec<AclEntry>,
}

pub(crate) struct RecoveryManager {
    coord: Arc<dyn Coordination>,
    registrations: Mutex<BTreeMap<String, RegistrationRecord>>,
}

impl RecoveryManager {
    pub(crate) fn new(coord: Arc<dyn Coordination>) -> Self {
        Self {
            coord,
            registrations: Mutex::new(BTreeMap::new()),
        }
    }

    fn table(&self) -> MutexGuard<'_, BTreeMap<String, RegistrationRecord>> {
        self.registrations.lock().expect("registration table poisoned")
    }

    pub(crate) fn record_create(&self, path: &str, data: &str, acl: &[AclEntry]) {
        self.table().insert(
            path.to_string(),
            RegistrationRecord {
                data: data.to_string(),
                acl: acl.to_vec(),
            },
        );
    }

    /// Keep the retained payload current so replay recreates the latest
    /// state, not the state at registration time.
    pub(crate) fn record_set(&self, path: &str, data: &str) {
        if let Some(record) = self.table().get_mut(path) {
            record.data = data.to_string();
        }
    }

    pub(crate) fn record_set_acl(&self, path: &str, acl: &[AclEntry]) {
        if let Some(record) = self.table().get_mut(path) {
            record.acl = acl.to_vec();
        }
    }

    pub(crate) fn record_delete(&self, path: &str) {
        self.table().remove(path);
    }

    pub(crate) fn registration_count(&self) -> usize {
        self.table().len()
    }

    /// Re-issue every retained registration on the new session. An
    /// "already exists" outcome counts as success, making replay
    /// idempotent when the service kept the node alive after all.
    pub(crate) fn replay(&self) {
        let records: Vec<(String, RegistrationRecord)> = self
            .table()
            .iter()
            .map(|(path, record)| (path.clone(), record.clone()))
            .collect();
        for (path, record) in records {
            match self
                .coord
                .create(&path, &record.data, &record.acl, CreateMode::Ephemeral)
            {
                Ok(()) => info!(path, "re-registered ephemeral node"),
                Err(CoordError::NodeExists(_)) => {}
                Err(err) => {
                    warn!(path, %err, "failed to replay ephemeral registration");
                }
            }
        }
    }
}
