pub mod job;
pub mod launcher;
pub mod repository;

pub use job::{Job, JobResult};
pub use launcher::{JobLauncher, LaunchOutcome};
pub use repository::{
    DefinitionStateUpdate, ExecutionRepository, JobDefinitionRepository, NodeRepository,
    StatsRepository, TriggerRepository,
};
