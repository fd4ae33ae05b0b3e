use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::repository::ObjectRepository;

/// Host-owned periodic `save_changes`
///
/// The repository never flushes on its own; a host that wants a cadence
/// spawns one of these. Dropping the scheduler stops it.
#[derive(Debug)]
pub struct SaveScheduler {
    task: JoinHandle<()>,
}

impl SaveScheduler {
    pub fn spawn(repository: ObjectRepository, every: Duration) -> Self {
        let runtime = repository.runtime().clone();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Some(flush) = repository.save_changes() {
                    let _ = flush.await;
                }
            }
        });
        Self { task }
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for SaveScheduler {
    fn drop(&mut self) {
        self.task.abort();
    }
}
