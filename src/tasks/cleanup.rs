//! Expiry Sweep Task
//!
//! The in-memory backend drops expired keys lazily, when they are read. Keys
//! that expire and are never touched again stay in memory until this task
//! sweeps them.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::MemoryBackend;

/// Spawns a task that removes expired keys from `backend` every `interval`.
///
/// The backend is shared: pass a clone of the handle the mappings use. Abort
/// the returned handle to stop the sweep.
///
/// # Example
/// ```no_run
/// use std::time::Duration;
/// use redis_dict::{spawn_cleanup_task, MemoryBackend};
///
/// # async fn run() {
/// let backend = MemoryBackend::new();
/// let sweep = spawn_cleanup_task(backend.clone(), Duration::from_secs(1));
/// // Later, during shutdown:
/// sweep.abort();
/// # }
/// ```
pub fn spawn_cleanup_task(backend: MemoryBackend, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting expiry sweep with interval of {:?}", interval);

        loop {
            tokio::time::sleep(interval).await;

            let removed = backend.cleanup_expired();
            if removed > 0 {
                info!("Expiry sweep: removed {} expired keys", removed);
            } else {
                debug!("Expiry sweep: no expired keys found");
            }

            match serde_json::to_string(&backend.stats()) {
                Ok(stats) => debug!("Backend stats: {}", stats),
                Err(err) => debug!("Backend stats unavailable: {}", err),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;

    #[tokio::test]
    async fn test_sweep_removes_expired_keys() {
        let backend = MemoryBackend::new();
        backend
            .set("main:soon", "int:1", Some(Duration::from_millis(50)))
            .unwrap();

        let handle = spawn_cleanup_task(backend.clone(), Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(400)).await;

        // Nothing read the key, so only the sweep can have removed it
        assert_eq!(backend.key_count(), 0);
        assert!(backend.stats().expired >= 1);

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_keeps_live_keys() {
        let backend = MemoryBackend::new();
        backend.set("main:forever", "int:1", None).unwrap();
        backend
            .set("main:later", "int:2", Some(Duration::from_secs(3600)))
            .unwrap();

        let handle = spawn_cleanup_task(backend.clone(), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(backend.key_count(), 2);
        assert_eq!(backend.get("main:later").unwrap(), Some("int:2".to_string()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_sweep_can_be_aborted() {
        let handle = spawn_cleanup_task(MemoryBackend::new(), Duration::from_secs(1));

        handle.abort();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }
}
