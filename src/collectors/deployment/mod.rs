use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::devops::models::Project;
use crate::labels;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{debug, instrument, warn};

/// Deployments of every release definition started within the release
/// history window.
#[derive(Clone)]
pub struct DeploymentCollector {
    deployment_info: GaugeVec,
    deployment_status: GaugeVec,
}

impl DeploymentCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        Self {
            deployment_info: GaugeVec::new(
                Opts::new("azure_devops_deployment_info", "Azure DevOps release deployment"),
                &[
                    "projectID",
                    "deploymentID",
                    "releaseID",
                    "releaseDefinitionID",
                    "requestedBy",
                    "deploymentName",
                    "deploymentStatus",
                    "operationStatus",
                    "reason",
                    "attempt",
                    "environmentID",
                    "environmentName",
                ],
            )
            .expect("azure_devops_deployment_info"),
            deployment_status: GaugeVec::new(
                Opts::new(
                    "azure_devops_deployment_status",
                    "Azure DevOps deployment timestamps and duration",
                ),
                &["projectID", "deploymentID", "type"],
            )
            .expect("azure_devops_deployment_status"),
        }
    }
}

impl Default for DeploymentCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for DeploymentCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "deployment"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "deployment"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.deployment_info.clone()))?;
        registry.register(Box::new(self.deployment_status.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.deployment_info.reset();
        self.deployment_status.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "deployment", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let definitions = ctx.api.list_release_definitions(&project.id).await?;
            let min_time = Utc::now()
                .checked_sub_signed(ctx.settings.release_history)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);

            let fetches: Vec<_> = definitions
                .iter()
                .map(|definition| async move {
                    let deployments = ctx
                        .api
                        .list_deployments(&project.id, definition.id, min_time)
                        .await;
                    (definition, deployments)
                })
                .collect();
            let outcomes: Vec<_> = stream::iter(fetches)
                .buffer_unordered(ctx.settings.fanout.max(1))
                .collect()
                .await;

            let mut per_definition = Vec::with_capacity(outcomes.len());
            for (definition, outcome) in outcomes {
                match outcome {
                    Ok(deployments) => per_definition.push(deployments),
                    Err(err) => warn!(
                        project = %project.name,
                        release_definition = definition.id,
                        "skipping deployments: {err}"
                    ),
                }
            }

            let mut info = MetricList::new();
            let mut status = MetricList::new();
            let mut count = 0;
            for deployment in per_definition.iter().flatten() {
                count += 1;
                info.add_info(labels!(
                    "projectID" => project.id,
                    "deploymentID" => deployment.id,
                    "releaseID" => deployment.release.id,
                    "releaseDefinitionID" => deployment.release_definition.id,
                    "requestedBy" => deployment.requested_by.display_name,
                    "deploymentName" => deployment.release.name,
                    "deploymentStatus" => deployment.deployment_status,
                    "operationStatus" => deployment.operation_status,
                    "reason" => deployment.reason,
                    "attempt" => deployment.attempt,
                    "environmentID" => deployment.release_environment.id,
                    "environmentName" => deployment.release_environment.name,
                ));

                let ids = labels!(
                    "projectID" => project.id,
                    "deploymentID" => deployment.id,
                );
                status.add_time(ids.with("type", "queued"), deployment.queued_on);
                status.add_time(ids.with("type", "started"), deployment.started_on);
                status.add_time(ids.with("type", "finished"), deployment.completed_on);
                if let Some(duration) = deployment.duration() {
                    status.add_duration(ids.with("type", "duration"), duration);
                }
            }

            debug!(
                project = %project.name,
                definitions = definitions.len(),
                deployments = count,
                "collected deployments"
            );

            publisher.gauge(info, &self.deployment_info);
            publisher.gauge(status, &self.deployment_status);
            Ok(())
        })
    }
}
