use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

struct Entry {
    id: u64,
    handle: JoinHandle<()>,
}

struct Slots<K> {
    next_id: u64,
    entries: HashMap<K, Entry>,
}

/// At most one running task per key.  Starting a task under a key aborts the
/// one already there; finished tasks remove their own entry.
pub struct TaskRegistry<K> {
    slots: Arc<Mutex<Slots<K>>>,
}

impl<K> Clone for TaskRegistry<K> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<K> Default for TaskRegistry<K> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<K> TaskRegistry<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns `task` under `key`.  Returns `true` when a still-running task
    /// was aborted to make room.
    pub async fn replace<F>(&self, key: K, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Held across spawn and insert so the new task cannot clear its slot
        // before the slot exists.
        let mut slots = self.slots.lock().await;
        let superseded = match slots.entries.remove(&key) {
            Some(previous) if !previous.handle.is_finished() => {
                previous.handle.abort();
                debug!(?key, "superseded running task");
                true
            }
            _ => false,
        };

        slots.next_id += 1;
        let id = slots.next_id;
        let registry = Arc::clone(&self.slots);
        let owned_key = key.clone();
        let handle = tokio::spawn(async move {
            task.await;
            let mut slots = registry.lock().await;
            if slots.entries.get(&owned_key).is_some_and(|entry| entry.id == id) {
                slots.entries.remove(&owned_key);
            }
        });
        slots.entries.insert(key, Entry { id, handle });
        superseded
    }

    pub async fn is_active(&self, key: &K) -> bool {
        self.slots
            .lock()
            .await
            .entries
            .get(key)
            .is_some_and(|entry| !entry.handle.is_finished())
    }

    /// Aborts the task under `key`, if any.
    pub async fn cancel(&self, key: &K) -> bool {
        match self.slots.lock().await.entries.remove(key) {
            Some(entry) => {
                entry.handle.abort();
                true
            }
            None => false,
        }
    }

    pub async fn cancel_all(&self) {
        let mut slots = self.slots.lock().await;
        for (_, entry) in slots.entries.drain() {
            entry.handle.abort();
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.lock().await.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct FlagOnDrop(Arc<AtomicBool>);

    impl Drop for FlagOnDrop {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    fn pending_task(dropped: &Arc<AtomicBool>) -> impl Future<Output = ()> + Send + 'static {
        let flag = FlagOnDrop(Arc::clone(dropped));
        async move {
            let _flag = flag;
            std::future::pending::<()>().await;
        }
    }

    async fn wait_until_empty(registry: &TaskRegistry<&'static str>) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while registry.len().await > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("registry should drain");
    }

    #[tokio::test]
    async fn replacing_aborts_the_running_task() {
        let registry = TaskRegistry::new();
        let first_dropped = Arc::new(AtomicBool::new(false));
        let second_dropped = Arc::new(AtomicBool::new(false));

        assert!(!registry.replace("shutdown", pending_task(&first_dropped)).await);
        tokio::task::yield_now().await;
        assert!(registry.replace("shutdown", pending_task(&second_dropped)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(first_dropped.load(Ordering::SeqCst));
        assert!(!second_dropped.load(Ordering::SeqCst));
        assert!(registry.is_active(&"shutdown").await);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let registry = TaskRegistry::new();
        let shutdown_dropped = Arc::new(AtomicBool::new(false));
        let sleep_dropped = Arc::new(AtomicBool::new(false));

        registry.replace("shutdown", pending_task(&shutdown_dropped)).await;
        assert!(!registry.replace("sleep", pending_task(&sleep_dropped)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!shutdown_dropped.load(Ordering::SeqCst));
        assert_eq!(registry.len().await, 2);
        registry.cancel_all().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(shutdown_dropped.load(Ordering::SeqCst));
        assert!(sleep_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn finished_tasks_clear_their_slot() {
        let registry = TaskRegistry::new();
        let (tx, rx) = oneshot::channel();
        registry
            .replace("sleep", async move {
                let _ = tx.send(());
            })
            .await;
        rx.await.unwrap();

        wait_until_empty(&registry).await;
        assert!(!registry.is_active(&"sleep").await);
        assert!(!registry.replace("sleep", async {}).await);
    }

    #[tokio::test]
    async fn cancel_reports_whether_anything_ran() {
        let registry = TaskRegistry::new();
        let dropped = Arc::new(AtomicBool::new(false));
        assert!(!registry.cancel(&"shutdown").await);

        registry.replace("shutdown", pending_task(&dropped)).await;
        assert!(registry.cancel(&"shutdown").await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(dropped.load(Ordering::SeqCst));
        assert_eq!(registry.len().await, 0);
    }
}
