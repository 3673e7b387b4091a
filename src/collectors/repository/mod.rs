use crate::collectors::metric_list::to_f64;
use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::devops::ApiError;
use crate::devops::models::Project;
use crate::labels;
use anyhow::Result;
use chrono::{TimeDelta, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use prometheus::{CounterVec, GaugeVec, Opts, Registry};
use tracing::{debug, instrument, warn};

/// Repositories of a project, their size and commit/push activity.
#[derive(Clone)]
pub struct RepositoryCollector {
    repository_info: GaugeVec,
    repository_stats: GaugeVec,
    repository_commits: CounterVec,
    repository_pushes: CounterVec,
}

impl RepositoryCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let ids = ["projectID", "repositoryID"];

        Self {
            repository_info: GaugeVec::new(
                Opts::new("azure_devops_repository_info", "Azure DevOps git repository"),
                &["projectID", "repositoryID", "repositoryName"],
            )
            .expect("azure_devops_repository_info"),
            repository_stats: GaugeVec::new(
                Opts::new("azure_devops_repository_stats", "Azure DevOps repository statistics"),
                &["projectID", "repositoryID", "type"],
            )
            .expect("azure_devops_repository_stats"),
            repository_commits: CounterVec::new(
                Opts::new("azure_devops_repository_commits", "Commits pushed to the repository"),
                &ids,
            )
            .expect("azure_devops_repository_commits"),
            repository_pushes: CounterVec::new(
                Opts::new("azure_devops_repository_pushes", "Pushes to the repository"),
                &ids,
            )
            .expect("azure_devops_repository_pushes"),
        }
    }
}

impl Default for RepositoryCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for RepositoryCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "repository"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "repository"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.repository_info.clone()))?;
        registry.register(Box::new(self.repository_stats.clone()))?;
        registry.register(Box::new(self.repository_commits.clone()))?;
        registry.register(Box::new(self.repository_pushes.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.repository_info.reset();
        self.repository_stats.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "repository", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // Activity counters cover the time since the previous pass.
            let window = TimeDelta::from_std(ctx.runner.interval).unwrap_or(TimeDelta::MAX);
            let since = Utc::now()
                .checked_sub_signed(window)
                .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

            let mut info = MetricList::new();
            let mut stats = MetricList::new();
            for repository in &project.repositories {
                let repo = labels!(
                    "projectID" => project.id,
                    "repositoryID" => repository.id,
                );
                info.add_info(repo.with("repositoryName", &repository.name));
                stats.add_if_not_nil(repo.with("type", "size"), repository.size.map(to_f64));
            }

            let fetches: Vec<_> = project
                .repositories
                .iter()
                .filter(|r| !r.is_disabled)
                .map(|repository| async move {
                    let activity = async {
                        let commits = ctx
                            .api
                            .count_commits(&project.id, &repository.id, since)
                            .await?;
                        let pushes = ctx
                            .api
                            .count_pushes(&project.id, &repository.id, since)
                            .await?;
                        Ok::<_, ApiError>((commits, pushes))
                    };
                    (repository, activity.await)
                })
                .collect();
            let outcomes: Vec<_> = stream::iter(fetches)
                .buffer_unordered(ctx.settings.fanout.max(1))
                .collect()
                .await;

            // Counters of a repository whose activity failed are not advanced.
            let mut commits = MetricList::new();
            let mut pushes = MetricList::new();
            for (repository, outcome) in outcomes {
                let (commit_count, push_count) = match outcome {
                    Ok(counts) => counts,
                    Err(err) => {
                        warn!(
                            project = %project.name,
                            repository = %repository.name,
                            "skipping repository activity: {err}"
                        );
                        continue;
                    }
                };
                let repo = labels!(
                    "projectID" => project.id,
                    "repositoryID" => repository.id,
                );
                #[allow(clippy::cast_precision_loss)]
                commits.add(repo.clone(), commit_count as f64);
                #[allow(clippy::cast_precision_loss)]
                pushes.add(repo, push_count as f64);
            }

            debug!(
                project = %project.name,
                repositories = project.repositories.len(),
                "collected repositories"
            );

            publisher.gauge(info, &self.repository_info);
            publisher.gauge(stats, &self.repository_stats);
            publisher.counter(commits, &self.repository_commits);
            publisher.counter(pushes, &self.repository_pushes);
            Ok(())
        })
    }
}
