//! In-place updates: instance-type change and container image rollout.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use geuse_aws::{AwsClient, Ec2Service, SsmService};
use geuse_domain::{DeploymentState, DeploymentStatus, UpdateRequest, UpdateResult};
use geuse_store::StateStore;
use tracing::{info, warn};

use crate::error::DeployError;

/// Remote rollout budget.
const ROLLOUT_TIMEOUT_SECONDS: u32 = 900;

pub struct UpdateOrchestrator {
    ec2: Ec2Service,
    ssm: SsmService,
    store: StateStore,
}

impl UpdateOrchestrator {
    pub fn new(client: Arc<AwsClient>, store: StateStore) -> Self {
        Self {
            ec2: Ec2Service::new(client.clone()),
            ssm: SsmService::new(client),
            store,
        }
    }

    /// Apply the requested changes. The pre-update state is snapshotted onto
    /// the previous-states ring first; on failure the record stays in
    /// `updating` and the caller is expected to roll back.
    pub async fn update(&self, request: &UpdateRequest) -> Result<UpdateResult, DeployError> {
        let start = Instant::now();
        let mut state = self
            .store
            .load(&request.deployment_name, true)
            .await?
            .ok_or_else(|| {
                DeployError::InvalidUpdate(format!(
                    "deployment '{}' not found",
                    request.deployment_name
                ))
            })?;

        self.validate_request(&state, request)?;

        let snapshot = serde_json::to_value(&state)
            .map_err(|e| DeployError::InvalidUpdate(format!("state snapshot failed: {e}")))?;
        state.last_healthy_state = Some(snapshot.clone());
        state.push_previous(snapshot);
        state.status = DeploymentStatus::Updating;
        self.store.save(&mut state).await?;

        let mut changes: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        if let Some(new_type) = request.instance_type.as_deref() {
            if new_type == state.config.instance_type {
                warnings.push("Instance type unchanged; skipping instance update.".into());
            } else {
                changes.extend(self.change_instance_type(&mut state, new_type).await?);
            }
        }

        if !request.container_images.is_empty() {
            let changed: BTreeMap<String, String> = request
                .container_images
                .iter()
                .filter(|(name, reference)| {
                    state.container_images.get(*name) != Some(*reference)
                })
                .map(|(n, r)| (n.clone(), r.clone()))
                .collect();
            if changed.is_empty() {
                warnings.push("Container images unchanged; skipping container update.".into());
            } else {
                changes.extend(self.rollout_images(&mut state, &changed).await?);
            }
        }

        if changes.is_empty() {
            return Err(DeployError::InvalidUpdate("No update actions to apply.".into()));
        }

        state.status = DeploymentStatus::Running;
        self.store.save(&mut state).await?;
        info!(stack = %state.stack_name, ?changes, "update applied");

        Ok(UpdateResult {
            success: true,
            changes_applied: changes,
            duration_seconds: start.elapsed().as_secs_f64(),
            warnings,
        })
    }

    fn validate_request(
        &self,
        state: &DeploymentState,
        request: &UpdateRequest,
    ) -> Result<(), DeployError> {
        let mut errors: Vec<String> = Vec::new();

        if request.instance_type.is_none() && request.container_images.is_empty() {
            errors.push("At least one update option (--instance-type or --image) is required.".into());
        }
        if let Some(instance_type) = request.instance_type.as_deref() {
            if instance_type.len() < 2 || !instance_type.contains('.') {
                errors.push(format!(
                    "Instance type '{instance_type}' is not a valid instance family and size."
                ));
            }
        }
        for (name, reference) in &request.container_images {
            if name.is_empty() || reference.is_empty() {
                errors.push("Container image overrides must include a name and reference.".into());
            }
        }
        // Data preservation precondition: updates never run against a
        // deployment without its filesystem.
        if state.efs_id.is_empty() {
            errors.push("Deployment has no filesystem id; cannot ensure data preservation.".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(DeployError::InvalidUpdate(errors.join("; ")))
        }
    }

    /// Stop, modify the attribute, start, and wait for running.
    async fn change_instance_type(
        &self,
        state: &mut DeploymentState,
        new_type: &str,
    ) -> Result<Vec<String>, DeployError> {
        if state.instance_id.is_empty() {
            return Err(DeployError::InvalidUpdate(
                "deployment state is missing an instance id".into(),
            ));
        }
        info!(instance_id = %state.instance_id, new_type, "changing instance type");
        self.ec2.stop_instance(&state.instance_id).await?;
        self.ec2.wait_for_stopped(&state.instance_id).await?;
        self.ec2
            .modify_instance_type(&state.instance_id, new_type)
            .await?;
        self.ec2.start_instance(&state.instance_id).await?;
        self.ec2.wait_for_running(&state.instance_id).await?;

        state.config.instance_type = new_type.to_string();
        state.cost.instance_type = new_type.to_string();
        Ok(vec![format!("instance_type:{new_type}")])
    }

    /// Compile one shell script that rewrites the compose file's image fields,
    /// pulls images in parallel with per-image logs, then brings the stack up.
    async fn rollout_images(
        &self,
        state: &mut DeploymentState,
        images: &BTreeMap<String, String>,
    ) -> Result<Vec<String>, DeployError> {
        let script = build_rollout_script(images);
        let outcome = self
            .ssm
            .run_shell_script(
                &state.instance_id,
                &script,
                &format!("GeuseMaker update: {}", state.stack_name),
                ROLLOUT_TIMEOUT_SECONDS,
            )
            .await?;
        if !outcome.succeeded() {
            warn!(
                status = %outcome.status,
                details = %outcome.status_details,
                "container rollout failed"
            );
            return Err(DeployError::RemoteCommandFailed(format!(
                "container update failed: {} ({})",
                outcome.status, outcome.status_details
            )));
        }

        for (name, reference) in images {
            state
                .container_images
                .insert(name.clone(), reference.clone());
        }
        Ok(images
            .iter()
            .map(|(name, reference)| format!("{name} -> {reference}"))
            .collect())
    }
}

/// Shell for the remote rollout. Image fields are rewritten in place per
/// service, pulls run in parallel each with its own log file, and failures
/// abort before the stack restart.
pub(crate) fn build_rollout_script(images: &BTreeMap<String, String>) -> String {
    let mut script = String::from(
        r#"set -euo pipefail
COMPOSE_FILE="/opt/geusemaker/docker-compose.yml"
WORKDIR="/opt/geusemaker"
if [ ! -f "$COMPOSE_FILE" ]; then echo "compose file missing at $COMPOSE_FILE"; exit 1; fi
ts() { date -u +"%Y-%m-%dT%H:%M:%SZ"; }
LOG_DIR=$(mktemp -d)
cleanup() { rm -rf "$LOG_DIR"; }
trap cleanup EXIT

update_image() {
  service="$1"; image="$2"
  awk -v svc="$service" -v img="$image" '
    $0 ~ "^  "svc":$" { in_svc=1; print; next }
    in_svc && /^  [A-Za-z0-9_-]+:/ { in_svc=0 }
    in_svc && /^    image:/ { print "    image: " img; next }
    { print }
  ' "$COMPOSE_FILE" > "$COMPOSE_FILE.tmp" && mv "$COMPOSE_FILE.tmp" "$COMPOSE_FILE"
}
"#,
    );

    for (service, image) in images {
        script.push_str(&format!("update_image '{service}' '{image}'\n"));
    }

    script.push_str("IMAGES_TO_PULL=\"");
    let unique: Vec<&String> = {
        let mut seen = Vec::new();
        for image in images.values() {
            if !seen.contains(&image) {
                seen.push(image);
            }
        }
        seen
    };
    script.push_str(
        &unique
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(" "),
    );
    script.push_str("\"\n");

    script.push_str(
        r#"cd "$WORKDIR"
pids=()
images=()
logs=()
for image in $IMAGES_TO_PULL; do
  log_file="$LOG_DIR/$(echo "$image" | tr '/:' '__').log"
  echo "$(ts) [pull-start] $image (log: $log_file)"
  (docker pull "$image" >"$log_file" 2>&1) &
  pids+=($!)
  images+=("$image")
  logs+=("$log_file")
done
pull_failed=0
for i in "${!pids[@]}"; do
  pid=${pids[$i]}
  image=${images[$i]}
  log_file=${logs[$i]}
  if wait "$pid"; then
    echo "$(ts) [pull-success] $image"
    rm -f "$log_file"
  else
    echo "$(ts) [pull-failed] $image (see $log_file)"
    sed -e 's/^/    /' "$log_file" || true
    pull_failed=1
  fi
done
if [ "$pull_failed" -ne 0 ]; then
  echo "$(ts) image pull failures detected"
  exit 1
fi
echo "$(ts) starting docker compose up -d"
docker compose up -d || docker-compose up -d
"#,
    );
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use geuse_aws::creds::StaticCredentialsProvider;
    use geuse_aws::{AwsCredentials, BaseUrls};
    use geuse_domain::{CostTracking, DeploymentConfig, Tier};
    use rust_decimal::Decimal;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn orchestrator(url: &str, dir: &TempDir) -> UpdateOrchestrator {
        let client = Arc::new(AwsClient::with_base_urls(
            "us-east-1",
            reqwest::Client::new(),
            Arc::new(StaticCredentialsProvider(AwsCredentials {
                access_key_id: "AKID".into(),
                secret_access_key: "secret".into(),
                session_token: None,
            })),
            BaseUrls::single(url),
        ));
        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
        UpdateOrchestrator::new(client, store)
    }

    fn saved_state(dir: &TempDir, images: &[(&str, &str)]) -> DeploymentState {
        let config = DeploymentConfig::new("demo", Tier::Dev, "us-east-1").unwrap();
        let cost = CostTracking::from_selection(
            "t3.medium",
            false,
            Decimal::new(416, 4),
            Decimal::new(416, 4),
            None,
        );
        let mut state = DeploymentState::new(config, cost, DeploymentStatus::Running);
        state.vpc_id = "vpc-1".into();
        state.subnet_ids = vec!["subnet-1".into()];
        state.security_group_id = "sg-1".into();
        state.efs_id = "fs-1".into();
        state.efs_mount_target_id = "fsmt-1".into();
        state.instance_id = "i-1".into();
        state.private_ip = "10.0.0.5".into();
        state.n8n_url = "https://10.0.0.5".into();
        for (name, reference) in images {
            state
                .container_images
                .insert(name.to_string(), reference.to_string());
        }
        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
        store.save_sync(&mut state).unwrap();
        state
    }

    #[tokio::test]
    async fn empty_request_is_rejected() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        saved_state(&dir, &[]);

        let err = orchestrator(&server.uri(), &dir)
            .update(&UpdateRequest {
                deployment_name: "demo".into(),
                instance_type: None,
                container_images: BTreeMap::new(),
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::InvalidUpdate(_)));
        assert!(err.to_string().contains("At least one update option"));
    }

    #[tokio::test]
    async fn image_rollout_updates_state_and_snapshots_previous() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        saved_state(&dir, &[("n8n", "n8nio/n8n:old")]);

        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AmazonSSM.SendCommand"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Command": { "CommandId": "cmd-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AmazonSSM.GetCommandInvocation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Status": "Success",
                "StatusDetails": "Success"
            })))
            .mount(&server)
            .await;

        let mut images = BTreeMap::new();
        images.insert("n8n".to_string(), "n8nio/n8n:new".to_string());
        let result = orchestrator(&server.uri(), &dir)
            .update(&UpdateRequest {
                deployment_name: "demo".into(),
                instance_type: None,
                container_images: images,
                force: false,
            })
            .await
            .unwrap();

        assert!(result.success);
        assert_eq!(result.changes_applied, vec!["n8n -> n8nio/n8n:new"]);

        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
        let state = store.load_sync("demo", true).unwrap().unwrap();
        assert_eq!(state.status, DeploymentStatus::Running);
        assert_eq!(
            state.container_images.get("n8n").map(String::as_str),
            Some("n8nio/n8n:new")
        );
        // The pre-update snapshot sits at the front of the ring.
        assert_eq!(state.previous_states.len(), 1);
        assert_eq!(
            state.previous_states[0]["container_images"]["n8n"],
            "n8nio/n8n:old"
        );
    }

    #[tokio::test]
    async fn failed_rollout_leaves_status_updating() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        saved_state(&dir, &[]);

        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AmazonSSM.SendCommand"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Command": { "CommandId": "cmd-1" }
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("X-Amz-Target", "AmazonSSM.GetCommandInvocation"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Status": "Failed",
                "StatusDetails": "NonZeroExitCode"
            })))
            .mount(&server)
            .await;

        let mut images = BTreeMap::new();
        images.insert("n8n".to_string(), "n8nio/n8n:new".to_string());
        let err = orchestrator(&server.uri(), &dir)
            .update(&UpdateRequest {
                deployment_name: "demo".into(),
                instance_type: None,
                container_images: images,
                force: false,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeployError::RemoteCommandFailed(_)));

        let store = StateStore::open(Some(dir.path().to_path_buf())).unwrap();
        let state = store.load_sync("demo", true).unwrap().unwrap();
        assert_eq!(state.status, DeploymentStatus::Updating);
    }

    #[test]
    fn rollout_script_rewrites_pulls_and_restarts() {
        let mut images = BTreeMap::new();
        images.insert("n8n".to_string(), "n8nio/n8n:1.2".to_string());
        images.insert("qdrant".to_string(), "qdrant/qdrant:latest".to_string());
        let script = build_rollout_script(&images);

        assert!(script.contains("set -euo pipefail"));
        assert!(script.contains("update_image 'n8n' 'n8nio/n8n:1.2'"));
        assert!(script.contains("update_image 'qdrant' 'qdrant/qdrant:latest'"));
        assert!(script.contains("docker pull \"$image\""));
        assert!(script.contains("docker compose up -d || docker-compose up -d"));
        // Per-image logs aggregate into pass/fail accounting.
        assert!(script.contains("[pull-failed]"));
        assert!(script.contains("pull_failed=1"));
    }
}
