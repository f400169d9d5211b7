//! In-process run registry and cooperative cancellation.
//!
//! Each running invocation holds a [`CancellationToken`] here. Stop requests
//! also set a flag in the state database so that a run started by another
//! process sees them at its next unit boundary.

use std::collections::HashMap;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use medialens_shared::{MediaLensError, Result, RunRecord};
use medialens_storage::Storage;

/// Fresh run identifier.
pub fn new_run_id() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Default)]
pub struct RunRegistry {
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `run_id` as running. Refused if it is already running here.
    pub async fn register(&self, run_id: &str) -> Result<CancellationToken> {
        let mut active = self.active.lock().await;
        if active.contains_key(run_id) {
            return Err(MediaLensError::validation(format!(
                "run '{run_id}' is already running"
            )));
        }
        let token = CancellationToken::new();
        active.insert(run_id.to_string(), token.clone());
        Ok(token)
    }

    pub async fn unregister(&self, run_id: &str) {
        self.active.lock().await.remove(run_id);
    }

    pub async fn is_active(&self, run_id: &str) -> bool {
        self.active.lock().await.contains_key(run_id)
    }

    /// Request a stop. Returns whether a running run was found, here or in `state`.
    pub async fn stop(&self, state: &Storage, run_id: &str) -> Result<bool> {
        let local = match self.active.lock().await.get(run_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        };
        let persisted = state.request_stop(run_id).await?;
        if local || persisted {
            info!(run_id, "stop requested");
        }
        Ok(local || persisted)
    }
}

/// Status registry entry for `run_id`.
pub async fn run_status(state: &Storage, run_id: &str) -> Result<RunRecord> {
    state
        .get_run(run_id)
        .await?
        .ok_or_else(|| MediaLensError::not_found(format!("run {run_id}")))
}
