//! In-memory thread store.
//!
//! Each thread's history sits behind its own async mutex; a run holds that
//! lock from admission to its terminal event. Threads live for the lifetime
//! of the process.

use std::collections::HashMap;
use std::sync::Arc;

use infrapilot_config::BusyPolicy;
use infrapilot_core::error::{Error, Result};
use infrapilot_core::message::{MessageHistory, ThreadId};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::debug;

type SharedHistory = Arc<Mutex<MessageHistory>>;

/// Exclusive access to one thread's history for the duration of a run.
pub type ThreadGuard = OwnedMutexGuard<MessageHistory>;

pub struct ThreadStore {
    threads: RwLock<HashMap<ThreadId, SharedHistory>>,
    policy: BusyPolicy,
}

impl ThreadStore {
    pub fn new(policy: BusyPolicy) -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> BusyPolicy {
        self.policy
    }

    async fn get_or_create(&self, id: &ThreadId) -> SharedHistory {
        if let Some(history) = self.threads.read().await.get(id) {
            return history.clone();
        }
        self.threads
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| {
                debug!(thread_id = %id, "Creating thread");
                Arc::new(Mutex::new(MessageHistory::new(id.clone())))
            })
            .clone()
    }

    /// Take the thread for a run, creating it on first use.
    ///
    /// Under [`BusyPolicy::Reject`] a thread that already has a run fails with
    /// [`Error::ThreadBusy`]; under [`BusyPolicy::Queue`] this waits.
    pub async fn acquire(&self, id: &ThreadId) -> Result<ThreadGuard> {
        let history = self.get_or_create(id).await;
        match self.policy {
            BusyPolicy::Reject => history.try_lock_owned().map_err(|_| Error::ThreadBusy {
                thread_id: id.to_string(),
            }),
            BusyPolicy::Queue => Ok(history.lock_owned().await),
        }
    }

    /// A copy of a thread's history; `None` for unknown threads.
    ///
    /// Fails with [`Error::ThreadBusy`] while a run holds the thread.
    pub async fn snapshot(&self, id: &ThreadId) -> Result<Option<MessageHistory>> {
        let Some(history) = self.threads.read().await.get(id).cloned() else {
            return Ok(None);
        };
        let guard = history.try_lock().map_err(|_| Error::ThreadBusy {
            thread_id: id.to_string(),
        })?;
        Ok(Some(guard.clone()))
    }

    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Forget every thread.
    pub async fn clear(&self) {
        self.threads.write().await.clear();
    }
}
