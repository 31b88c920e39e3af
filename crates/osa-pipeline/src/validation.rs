//! Validation domain: runs a deposition's hooks and reports a verdict.
//!
//! Zero hooks is an instant pass. Hook containers read the deposition's
//! files dir and write their artifacts into the hook output dir: an
//! optional `result.json` verdict (`{"status": "rejected", "reason": ...}`)
//! and an optional `features.json` consumed later by the feature domain.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use osa_domain::hook::HookSnapshot;
use osa_domain::identity::{AuthPolicy, Identity};
use osa_domain::ports::FileStorage;
use osa_events::events::{
    DepositionSubmitted, ValidationCompleted, ValidationFailed, ValidationStatus,
};
use osa_events::handler::{HandlerResult, Handles};
use osa_events::outbox::Outbox;
use osa_events::worker_config::WorkerConfig;
use osa_events::DomainEvent;
use osa_srn::{DepositionSrn, ValidationRunSrn};

use crate::runner::{ContainerRunner, ContainerSpec, RunnerInputs};

// ---------------------------------------------------------------------------
// Hook results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookRunStatus {
    Completed,
    Failed,
    Rejected,
}

/// Outcome of one hook run; carried on `ValidationCompleted.hook_results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookResult {
    pub hook_name: String,
    pub status: HookRunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl HookResult {
    fn reason(&self) -> Option<String> {
        self.error_message
            .clone()
            .or_else(|| self.rejection_reason.clone())
    }
}

// ---------------------------------------------------------------------------
// ValidationService
// ---------------------------------------------------------------------------

pub struct ValidationService {
    storage: Arc<dyn FileStorage>,
    runner: Arc<dyn ContainerRunner>,
    node_domain: String,
}

impl ValidationService {
    pub fn new(
        storage: Arc<dyn FileStorage>,
        runner: Arc<dyn ContainerRunner>,
        node_domain: String,
    ) -> Self {
        ValidationService {
            storage,
            runner,
            node_domain,
        }
    }

    /// Run every hook against the deposition's files.
    ///
    /// A runner error yields a `Failed` result for that hook instead of
    /// aborting the run; the aggregate verdict is computed over all hooks.
    pub async fn run_hooks(
        &self,
        deposition: &DepositionSrn,
        hooks: &[HookSnapshot],
        files_dir: &str,
    ) -> Result<(ValidationRunSrn, ValidationStatus, Vec<HookResult>)> {
        let run_srn = ValidationRunSrn::new(&self.node_domain, &Uuid::new_v4().to_string())?;

        let mut results = Vec::with_capacity(hooks.len());
        for hook in hooks {
            let result = self.run_one_hook(deposition, hook, files_dir).await;
            debug!(
                deposition = %deposition,
                hook = %hook.name,
                status = ?result.status,
                "hook finished"
            );
            results.push(result);
        }

        let status = if results
            .iter()
            .any(|r| matches!(r.status, HookRunStatus::Failed | HookRunStatus::Rejected))
        {
            // Rejected hooks dominate failed ones only in the reasons text;
            // either way the run did not pass.
            if results.iter().any(|r| r.status == HookRunStatus::Rejected) {
                ValidationStatus::Rejected
            } else {
                ValidationStatus::Failed
            }
        } else {
            ValidationStatus::Completed
        };

        Ok((run_srn, status, results))
    }

    async fn run_one_hook(
        &self,
        deposition: &DepositionSrn,
        hook: &HookSnapshot,
        files_dir: &str,
    ) -> HookResult {
        let work_dir = self.storage.hook_output_dir(deposition, &hook.name);
        let inputs = RunnerInputs {
            config: hook.config.clone(),
            ..RunnerInputs::default()
        };

        if let Err(err) = self
            .runner
            .run(&ContainerSpec::for_hook(hook), &inputs, Path::new(files_dir), &work_dir)
            .await
        {
            return HookResult {
                hook_name: hook.name.clone(),
                status: HookRunStatus::Failed,
                error_message: Some(format!("{err:#}")),
                rejection_reason: None,
            };
        }

        // The container may leave an explicit verdict; absence means pass.
        match self.storage.read_hook_result(deposition, &hook.name).await {
            Ok(Some(verdict)) => Self::interpret_verdict(hook, &verdict),
            Ok(None) => HookResult {
                hook_name: hook.name.clone(),
                status: HookRunStatus::Completed,
                error_message: None,
                rejection_reason: None,
            },
            Err(err) => HookResult {
                hook_name: hook.name.clone(),
                status: HookRunStatus::Failed,
                error_message: Some(format!("unreadable hook result: {err:#}")),
                rejection_reason: None,
            },
        }
    }

    fn interpret_verdict(hook: &HookSnapshot, verdict: &Value) -> HookResult {
        let status = verdict.get("status").and_then(Value::as_str).unwrap_or("completed");
        let reason = verdict
            .get("reason")
            .and_then(Value::as_str)
            .map(str::to_string);
        match status {
            "rejected" => HookResult {
                hook_name: hook.name.clone(),
                status: HookRunStatus::Rejected,
                error_message: None,
                rejection_reason: reason,
            },
            "failed" => HookResult {
                hook_name: hook.name.clone(),
                status: HookRunStatus::Failed,
                error_message: reason,
                rejection_reason: None,
            },
            _ => HookResult {
                hook_name: hook.name.clone(),
                status: HookRunStatus::Completed,
                error_message: None,
                rejection_reason: None,
            },
        }
    }
}


// ---------------------------------------------------------------------------
// ValidateDeposition
// ---------------------------------------------------------------------------

/// Handles `DepositionSubmitted`: zero hooks pass immediately; otherwise the
/// hook verdicts decide between `ValidationCompleted` and
/// `ValidationFailed`.
pub struct ValidateDeposition {
    pub service: Arc<ValidationService>,
    pub outbox: Arc<Outbox>,
}

impl ValidateDeposition {
    pub fn worker_config() -> WorkerConfig {
        let mut config = WorkerConfig::single("ValidateDeposition", DepositionSubmitted::EVENT_TYPE);
        // Hook containers may run for minutes.
        config.claim_timeout = Duration::from_secs(900);
        config
    }

    pub fn auth() -> AuthPolicy {
        AuthPolicy::Custom(Identity::is_system)
    }
}

#[async_trait]
impl Handles<DepositionSubmitted> for ValidateDeposition {
    async fn handle(&self, event: DepositionSubmitted) -> HandlerResult {
        debug!(deposition = %event.deposition_srn, hooks = event.hooks.len(), "validating");

        let (run_srn, status, results) = self
            .service
            .run_hooks(&event.deposition_srn, &event.hooks, &event.files_dir)
            .await?;

        if status == ValidationStatus::Completed {
            let hook_results = results
                .iter()
                .map(serde_json::to_value)
                .collect::<Result<Vec<_>, _>>()
                .map_err(anyhow::Error::from)?;
            self.outbox
                .append(&ValidationCompleted {
                    id: Uuid::new_v4(),
                    validation_run_srn: run_srn,
                    deposition_srn: event.deposition_srn.clone(),
                    convention_srn: event.convention_srn.clone(),
                    status,
                    hook_results,
                    metadata: event.metadata.clone(),
                    hooks: event.hooks.clone(),
                    files_dir: event.files_dir.clone(),
                })
                .await?;
            info!(deposition = %event.deposition_srn, "validation completed");
        } else {
            let reasons: Vec<String> = results
                .iter()
                .filter_map(HookResult::reason)
                .collect();
            self.outbox
                .append(&ValidationFailed {
                    id: Uuid::new_v4(),
                    deposition_srn: event.deposition_srn.clone(),
                    convention_srn: event.convention_srn.clone(),
                    status,
                    reasons,
                })
                .await?;
            warn!(deposition = %event.deposition_srn, "validation failed");
        }
        Ok(())
    }
}
