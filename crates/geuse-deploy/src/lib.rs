pub mod alb;
pub mod cdn;
pub mod cleanup;
pub mod destruction;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod rollback;
pub mod stages;
pub mod update;
pub mod userdata;

pub use cleanup::OrphanDetector;
pub use destruction::{DestroyOptions, DestructionService};
pub use error::{DeployError, StageFailure};
pub use orchestrator::Orchestrator;
pub use pipeline::{DeployContext, Pipeline, Services, Stage};
pub use rollback::RollbackService;
pub use update::UpdateOrchestrator;
