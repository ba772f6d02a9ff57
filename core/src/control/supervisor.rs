use std::sync::Arc;

use anyhow::Result;
use fleetguard_relay::{ProcessSupervisor, RelayAddress, ShardId};
use fleetguard_util::FastHashMap;
use fleetguard_util::futures::JoinTask;
use parking_lot::Mutex;

use crate::bot::BotInstance;

/// Builds the instance of a worker shard.
pub type WorkerFactory = Arc<dyn Fn(ShardId) -> Result<BotInstance> + Send + Sync>;

/// Runs worker shards as tasks of the control process.
///
/// Every worker gets its own platform session and talks to the control
/// instance only through the relay socket. Dropping the supervisor stops
/// all workers.
pub struct WorkerSupervisor {
    shards: Vec<ShardId>,
    factory: WorkerFactory,
    workers: Mutex<FastHashMap<ShardId, Worker>>,
}

struct Worker {
    instance: BotInstance,
    task: JoinTask<()>,
}

impl WorkerSupervisor {
    pub fn new(shards: Vec<ShardId>, factory: WorkerFactory) -> Self {
        Self {
            shards,
            factory,
            workers: Default::default(),
        }
    }

    /// Instance of a running worker.
    pub fn instance(&self, shard_id: ShardId) -> Option<BotInstance> {
        self.workers
            .lock()
            .get(&shard_id)
            .map(|worker| worker.instance.clone())
    }

    pub fn running_workers(&self) -> Vec<ShardId> {
        let mut shards = self
            .workers
            .lock()
            .iter()
            .filter(|(_, worker)| !worker.task.is_finished())
            .map(|(shard_id, _)| *shard_id)
            .collect::<Vec<_>>();
        shards.sort_unstable();
        shards
    }
}

impl ProcessSupervisor for WorkerSupervisor {
    fn worker_shards(&self) -> Vec<ShardId> {
        self.shards.clone()
    }

    fn spawn_worker(&self, shard_id: ShardId, address: &RelayAddress) -> Result<()> {
        let instance = (self.factory)(shard_id)?;
        anyhow::ensure!(
            instance.shard_id() == shard_id,
            "worker factory built shard {} instead of {shard_id}",
            instance.shard_id()
        );

        let task = JoinTask::new({
            let instance = instance.clone();
            let address = address.clone();
            async move {
                if let Err(e) = instance.run_worker(address).await {
                    tracing::error!(shard_id, "worker shard failed: {e:?}");
                }
            }
        });

        tracing::info!(shard_id, "spinning up worker shard");
        self.workers.lock().insert(shard_id, Worker {
            instance,
            task,
        });
        Ok(())
    }

    fn terminate_worker(&self, shard_id: ShardId) -> Result<()> {
        if self.workers.lock().remove(&shard_id).is_some() {
            tracing::info!(shard_id, "worker shard terminated");
        }
        Ok(())
    }
}
