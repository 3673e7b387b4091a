use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::devops::models::Project;
use crate::labels;
use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{debug, instrument};

/// Release definitions and the releases created within the release history
/// window, with their artifacts and environments.
#[derive(Clone)]
pub struct ReleaseCollector {
    release_info: GaugeVec,
    release_status: GaugeVec,
    release_artifact: GaugeVec,
    release_environment: GaugeVec,
    release_environment_status: GaugeVec,
    release_definition_info: GaugeVec,
    release_definition_environment: GaugeVec,
}

impl ReleaseCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let gvec = |name: &str, help: &str, labels: &[&str]| {
            GaugeVec::new(Opts::new(name, help), labels).expect("valid release metric")
        };

        Self {
            release_info: gvec(
                "azure_devops_release_info",
                "Azure DevOps release",
                &[
                    "projectID",
                    "releaseID",
                    "releaseDefinitionID",
                    "requestedBy",
                    "releaseName",
                    "status",
                    "reason",
                    "url",
                ],
            ),
            release_status: gvec(
                "azure_devops_release_status",
                "Azure DevOps release timestamps",
                &["projectID", "releaseID", "releaseDefinitionID", "type"],
            ),
            release_artifact: gvec(
                "azure_devops_release_artifact",
                "Artifacts of an Azure DevOps release",
                &[
                    "projectID",
                    "releaseID",
                    "releaseDefinitionID",
                    "sourceId",
                    "repositoryID",
                    "branch",
                    "type",
                    "alias",
                    "version",
                ],
            ),
            release_environment: gvec(
                "azure_devops_release_environment",
                "Environments of an Azure DevOps release",
                &[
                    "projectID",
                    "releaseID",
                    "releaseDefinitionID",
                    "environmentID",
                    "environmentName",
                    "status",
                    "triggerReason",
                    "rank",
                ],
            ),
            release_environment_status: gvec(
                "azure_devops_release_environment_status",
                "Timestamps and deploy duration of release environments",
                &[
                    "projectID",
                    "releaseID",
                    "releaseDefinitionID",
                    "environmentID",
                    "type",
                ],
            ),
            release_definition_info: gvec(
                "azure_devops_release_definition_info",
                "Azure DevOps release definition",
                &[
                    "projectID",
                    "releaseDefinitionID",
                    "releaseNameFormat",
                    "releaseDefinitionName",
                    "path",
                    "url",
                ],
            ),
            release_definition_environment: gvec(
                "azure_devops_release_definition_environment",
                "Environments of an Azure DevOps release definition",
                &[
                    "projectID",
                    "releaseDefinitionID",
                    "environmentID",
                    "environmentName",
                    "rank",
                    "owner",
                ],
            ),
        }
    }
}

impl Default for ReleaseCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ReleaseCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "release"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "release"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.release_info.clone()))?;
        registry.register(Box::new(self.release_status.clone()))?;
        registry.register(Box::new(self.release_artifact.clone()))?;
        registry.register(Box::new(self.release_environment.clone()))?;
        registry.register(Box::new(self.release_environment_status.clone()))?;
        registry.register(Box::new(self.release_definition_info.clone()))?;
        registry.register(Box::new(self.release_definition_environment.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.release_info.reset();
        self.release_status.reset();
        self.release_artifact.reset();
        self.release_environment.reset();
        self.release_environment_status.reset();
        self.release_definition_info.reset();
        self.release_definition_environment.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "release", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let definitions = ctx.api.list_release_definitions(&project.id).await?;

            let mut definition_info = MetricList::new();
            let mut definition_environment = MetricList::new();
            for definition in &definitions {
                definition_info.add_info(labels!(
                    "projectID" => project.id,
                    "releaseDefinitionID" => definition.id,
                    "releaseNameFormat" => definition.release_name_format,
                    "releaseDefinitionName" => definition.name,
                    "path" => definition.path,
                    "url" => definition.links.web.href,
                ));

                for environment in &definition.environments {
                    definition_environment.add_info(labels!(
                        "projectID" => project.id,
                        "releaseDefinitionID" => definition.id,
                        "environmentID" => environment.id,
                        "environmentName" => environment.name,
                        "rank" => environment.rank,
                        "owner" => environment.owner.display_name,
                    ));
                }
            }

            let min_time = Utc::now()
                .checked_sub_signed(ctx.settings.release_history)
                .unwrap_or(DateTime::<Utc>::MIN_UTC);
            let releases = ctx.api.list_releases(&project.id, min_time).await?;

            let mut info = MetricList::new();
            let mut status = MetricList::new();
            let mut artifact = MetricList::new();
            let mut environment_info = MetricList::new();
            let mut environment_status = MetricList::new();

            for release in &releases {
                let ids = labels!(
                    "projectID" => project.id,
                    "releaseID" => release.id,
                    "releaseDefinitionID" => release.release_definition.id,
                );

                info.add_info(labels!(
                    "projectID" => project.id,
                    "releaseID" => release.id,
                    "releaseDefinitionID" => release.release_definition.id,
                    "requestedBy" => release.created_by.display_name,
                    "releaseName" => release.name,
                    "status" => release.status,
                    "reason" => release.reason,
                    "url" => release.links.web.href,
                ));
                status.add_time(ids.with("type", "created"), release.created_on);

                for item in &release.artifacts {
                    let reference = &item.definition_reference;
                    artifact.add_info(
                        ids.with("sourceId", &item.source_id)
                            .with("repositoryID", &reference.repository.id)
                            .with("branch", &reference.branch.name)
                            .with("type", &item.artifact_type)
                            .with("alias", &item.alias)
                            .with("version", &reference.version.name),
                    );
                }

                for environment in &release.environments {
                    let env = ids.with("environmentID", environment.id);
                    environment_info.add_info(
                        env.with("environmentName", &environment.name)
                            .with("status", &environment.status)
                            .with("triggerReason", &environment.trigger_reason)
                            .with("rank", environment.rank),
                    );

                    environment_status.add_time(env.with("type", "created"), environment.created_on);
                    environment_status.add_time(env.with("type", "modified"), environment.modified_on);
                    environment_status.add_if_greater_zero(
                        env.with("type", "duration"),
                        environment.time_to_deploy * 60.0,
                    );
                }
            }

            debug!(
                project = %project.name,
                definitions = definitions.len(),
                releases = releases.len(),
                "collected releases"
            );

            publisher.gauge(definition_info, &self.release_definition_info);
            publisher.gauge(definition_environment, &self.release_definition_environment);
            publisher.gauge(info, &self.release_info);
            publisher.gauge(status, &self.release_status);
            publisher.gauge(artifact, &self.release_artifact);
            publisher.gauge(environment_info, &self.release_environment);
            publisher.gauge(environment_status, &self.release_environment_status);
            Ok(())
        })
    }
}
