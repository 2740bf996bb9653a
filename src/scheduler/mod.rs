pub mod asset;
pub mod partition;
pub mod runner;
pub mod schedule;
pub mod sensor;
pub mod state;

pub use asset::{
    AssetCatalog, AssetCheck, AssetDef, FreshnessPolicy, JobDef, Producer, ProducerFuture,
    RunContext,
};
pub use partition::{Cadence, PartitionSpec};
pub use runner::Scheduler;
pub use sensor::{RunRequest, SensorContext, SensorDef, SensorResult};
pub use state::{RunRow, RunStateDb, RunStatus};
