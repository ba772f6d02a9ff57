use anyhow::Result;

use crate::message::ShardId;
use crate::transport::RelayAddress;

/// Manages worker shard processes on behalf of the relay.
pub trait ProcessSupervisor: Send + Sync {
    /// Worker shards which must be running.
    fn worker_shards(&self) -> Vec<ShardId>;

    /// Starts a worker which connects to the relay at `address`.
    fn spawn_worker(&self, shard: ShardId, address: &RelayAddress) -> Result<()>;

    /// Stops a worker. Stopping a worker which is not running is not an error.
    fn terminate_worker(&self, shard: ShardId) -> Result<()>;

    /// Restarts every worker shard.
    fn relaunch_workers(&self, address: &RelayAddress) -> Result<()> {
        for shard in self.worker_shards() {
            self.terminate_worker(shard)?;
            self.spawn_worker(shard, address)?;
        }
        Ok(())
    }
}
