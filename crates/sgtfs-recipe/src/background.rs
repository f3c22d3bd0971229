//! Background hashing worker.
//!
//! Sweeps the pending-recipe set on a fixed interval. Each recipe is hashed on
//! the blocking pool; shutdown is checked between recipes so a long cycle
//! stops at the next item boundary.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use sgtfs_meta::Timestamp;

use crate::engine::{HashCycleReport, HashOutcome, RecipeEngine};

/// Cumulative worker statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashWorkerStats {
    /// Completed sweeps
    pub cycles: u64,
    /// Recipes promoted to complete
    pub completed: u64,
    /// Failed attempts (retried later)
    pub failed: u64,
    /// Recipes parked as `HashingFailed`
    pub abandoned: u64,
    /// Recipes dropped because the resource vanished
    pub removed: u64,
    /// Counts of the last sweep
    pub last_cycle: HashCycleReport,
}

impl HashWorkerStats {
    fn absorb(&mut self, report: HashCycleReport) {
        self.cycles += 1;
        self.completed += report.completed;
        self.failed += report.failed;
        self.abandoned += report.abandoned;
        self.removed += report.removed;
        self.last_cycle = report;
    }
}

/// Handle to a running worker.
pub struct HashWorkerHandle {
    stats: watch::Receiver<HashWorkerStats>,
    task: JoinHandle<()>,
}

impl HashWorkerHandle {
    /// Snapshot of the stats.
    pub fn stats(&self) -> HashWorkerStats {
        self.stats.borrow().clone()
    }

    /// Waits until at least `cycles` sweeps have finished.
    pub async fn wait_for_cycles(&mut self, cycles: u64) -> HashWorkerStats {
        loop {
            if self.stats.borrow().cycles >= cycles {
                return self.stats.borrow().clone();
            }
            if self.stats.changed().await.is_err() {
                return self.stats.borrow().clone();
            }
        }
    }

    /// True until the worker loop exits.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Waits for the worker loop to exit.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!(error = %e, "hash worker task failed");
        }
    }
}

/// Periodic sweeper over the pending set of a [`RecipeEngine`].
pub struct HashWorker {
    engine: Arc<RecipeEngine>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
    stats_tx: watch::Sender<HashWorkerStats>,
    stats: HashWorkerStats,
}

impl HashWorker {
    /// Spawns the worker on the current runtime. The first sweep runs
    /// immediately; later ones every `interval`.
    pub fn start(
        engine: Arc<RecipeEngine>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> HashWorkerHandle {
        let (stats_tx, stats_rx) = watch::channel(HashWorkerStats::default());
        let worker = HashWorker {
            engine,
            interval: interval.max(Duration::from_millis(1)),
            shutdown,
            stats_tx,
            stats: HashWorkerStats::default(),
        };
        let task = tokio::spawn(worker.run());
        HashWorkerHandle {
            stats: stats_rx,
            task,
        }
    }

    async fn run(mut self) {
        info!(interval_ms = self.interval.as_millis() as u64, "hash worker started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if self.stopping() {
                break;
            }
            let report = self.cycle().await;
            if report.scanned > 0 {
                debug!(
                    completed = report.completed,
                    failed = report.failed,
                    deferred = report.deferred,
                    abandoned = report.abandoned,
                    "hash cycle finished"
                );
            }
            self.stats.absorb(report);
            let _ = self.stats_tx.send(self.stats.clone());
        }
        info!("hash worker stopped");
    }

    fn stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    async fn cycle(&mut self) -> HashCycleReport {
        let mut report = HashCycleReport::default();
        let engine = self.engine.clone();
        let paths = match tokio::task::spawn_blocking(move || engine.pending_paths()).await {
            Ok(Ok(paths)) => paths,
            Ok(Err(e)) => {
                warn!(error = %e, "cannot list pending recipes");
                return report;
            }
            Err(e) => {
                warn!(error = %e, "pending scan task failed");
                return report;
            }
        };
        let now = Timestamp::now();
        for path in paths {
            if self.stopping() {
                break;
            }
            let engine = self.engine.clone();
            let target = path.clone();
            let outcome =
                tokio::task::spawn_blocking(move || engine.hash_pending_at(&target, now)).await;
            match outcome {
                Ok(Ok(outcome)) => report.record(&outcome),
                Ok(Err(e)) => {
                    warn!(path = %path, error = %e, "hashing attempt errored");
                    report.record(&HashOutcome::Failed { attempts: 0 });
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "hashing task failed");
                    report.record(&HashOutcome::Failed { attempts: 0 });
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RecipeConfig, RecipeState};
    use crate::exports::ExportTable;
    use crate::source::{MemorySource, ResourceLocator, SourceRegistry};
    use sgtfs_meta::{KvStore, MemoryKvStore, NamespaceTree, RecipeIndex, VirtualPath};

    fn engine(source: Arc<MemorySource>) -> Arc<RecipeEngine> {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let mut sources = SourceRegistry::new();
        sources.register("mem", source);
        let mut exports = ExportTable::new("east");
        exports
            .add("data", ResourceLocator::parse("mem:///").unwrap())
            .unwrap();
        Arc::new(
            RecipeEngine::new(
                kv.clone(),
                Arc::new(RecipeIndex::new(kv.clone())),
                Arc::new(NamespaceTree::new(kv.clone())),
                exports,
                sources,
                RecipeConfig {
                    chunk_size: 16,
                    ..RecipeConfig::default()
                },
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn worker_completes_pending_recipes() {
        let source = Arc::new(MemorySource::new());
        source.put("/a", vec![3u8; 100], Timestamp::from_secs(1));
        source.put("/b", vec![4u8; 40], Timestamp::from_secs(1));
        let engine = engine(source);
        let a = VirtualPath::parse("/east/data/a").unwrap();
        let b = VirtualPath::parse("/east/data/b").unwrap();
        engine.generate_incomplete(&a).unwrap();
        engine.generate_incomplete(&b).unwrap();

        let (tx, rx) = watch::channel(false);
        let mut handle = HashWorker::start(engine.clone(), Duration::from_millis(10), rx);
        let stats = handle.wait_for_cycles(1).await;
        assert_eq!(stats.completed, 2);
        assert_eq!(engine.status(&a).unwrap(), Some(RecipeState::Complete));
        assert_eq!(engine.status(&b).unwrap(), Some(RecipeState::Complete));

        tx.send(true).unwrap();
        handle.join().await;
    }

    #[tokio::test]
    async fn worker_stops_on_shutdown() {
        let engine = engine(Arc::new(MemorySource::new()));
        let (tx, rx) = watch::channel(false);
        let mut handle = HashWorker::start(engine, Duration::from_secs(3600), rx);
        handle.wait_for_cycles(1).await;
        assert!(handle.is_running());
        tx.send(true).unwrap();
        handle.join().await;
    }
}
