//! Orchestrator core: assembles the pipeline for a config and decides what
//! happens when a stage fails.

use std::sync::Arc;

use geuse_aws::AwsClient;
use geuse_domain::{DeploymentState, DeploymentStatus, InstanceSelection};
use tracing::{error, info, warn};

use crate::alb::AlbStage;
use crate::cdn::CdnStage;
use crate::destruction::{DestroyOptions, DestructionService};
use crate::error::DeployError;
use crate::pipeline::{DeployContext, Pipeline, Services};
use crate::stages::tier1_stages;

pub struct Orchestrator {
    services: Services,
    client: Arc<AwsClient>,
}

impl Orchestrator {
    pub fn new(client: Arc<AwsClient>, services: Services) -> Self {
        Self { services, client }
    }

    /// Stage list for a config: the fixed Tier-1 run, extended by composition
    /// with the load-balancer and CDN stages when the config asks for them.
    pub fn pipeline_for(config: &geuse_domain::DeploymentConfig) -> Pipeline {
        let mut stages = tier1_stages();
        if config.enable_alb {
            stages.push(Box::new(AlbStage));
        }
        if config.enable_cdn {
            stages.push(Box::new(CdnStage));
        }
        Pipeline::new(stages)
    }

    /// Provision the stack. On failure after the checkpoint with rollback
    /// enabled, compensating cleanup destroys whatever this run created,
    /// archives the record, and the original failure is re-raised wrapped.
    pub async fn deploy(
        &self,
        config: geuse_domain::DeploymentConfig,
        enable_rollback: bool,
        preselected: Option<InstanceSelection>,
    ) -> Result<DeploymentState, DeployError> {
        config.validate()?;
        let pipeline = Self::pipeline_for(&config);
        info!(
            stack = %config.stack_name,
            stages = ?pipeline.stage_names(),
            "starting deployment"
        );

        let mut cx = DeployContext::new(config.clone());
        cx.selection = preselected;

        let failure = match pipeline.run(&self.services, &mut cx).await {
            Ok(()) => {
                return cx.state.take().ok_or_else(|| {
                    DeployError::MissingPrecondition(
                        "pipeline finished without building a final state".into(),
                    )
                })
            }
            Err(failure) => failure,
        };
        error!(
            stage = failure.stage,
            error = %failure.error,
            "deployment failed"
        );

        // A record only exists once the checkpoint stage ran; without one
        // there is nothing to compensate.
        let partial = self
            .services
            .store
            .load(&config.stack_name, true)
            .await
            .ok()
            .flatten();

        let outcome = match partial {
            Some(partial) if enable_rollback && config.auto_rollback_on_failure => {
                warn!(stack = %config.stack_name, "initiating automatic cleanup of partial deployment");
                self.cleanup_partial(&partial).await
            }
            Some(mut partial) => {
                warn!(stack = %config.stack_name, "rollback disabled, saving failed state for manual recovery");
                partial.status = DeploymentStatus::Failed;
                if let Err(e) = self.services.store.save(&mut partial).await {
                    format!("No cleanup performed; failed-state save also failed: {e}.")
                } else {
                    "No cleanup performed.".to_string()
                }
            }
            None => "No cleanup performed.".to_string(),
        };

        Err(DeployError::Failed {
            stage: failure.stage,
            outcome,
            source: Box::new(failure.error),
        })
    }

    /// Compensating cleanup: a best-effort destruction pass scoped by the
    /// recorded provenance. Its own errors are reported alongside the
    /// original failure, never instead of it.
    async fn cleanup_partial(&self, partial: &DeploymentState) -> String {
        let destruction = DestructionService::new(self.client.clone(), self.services.store.clone());
        match destruction.destroy(partial, DestroyOptions::default()).await {
            Ok(result) if result.success => {
                info!(
                    deleted = result.deleted_resources.len(),
                    preserved = result.preserved_resources.len(),
                    "cleanup completed"
                );
                "Cleanup completed.".to_string()
            }
            Ok(result) => {
                warn!(errors = ?result.errors, "cleanup finished with errors");
                format!(
                    "Cleanup encountered errors: {}. Manual cleanup may be required; check for resources tagged Stack={}.",
                    result.errors.join("; "),
                    partial.stack_name
                )
            }
            Err(e) => {
                warn!(error = %e, "cleanup failed");
                format!(
                    "Cleanup failed: {e}. Manual cleanup may be required; check for resources tagged Stack={}.",
                    partial.stack_name
                )
            }
        }
    }
}
