use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::devops::models::Project;
use crate::labels;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{instrument, warn};

/// Active pull requests of every repository of a project.
#[derive(Clone)]
pub struct PullRequestCollector {
    pullrequest_info: GaugeVec,
    pullrequest_status: GaugeVec,
    pullrequest_label: GaugeVec,
}

impl PullRequestCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let gvec = |name: &str, help: &str, labels: &[&str]| {
            GaugeVec::new(Opts::new(name, help), labels).expect("valid pullrequest metric")
        };

        Self {
            pullrequest_info: gvec(
                "azure_devops_pullrequest_info",
                "Azure DevOps pull request",
                &[
                    "projectID",
                    "repositoryID",
                    "pullrequestID",
                    "pullrequestTitle",
                    "sourceBranch",
                    "targetBranch",
                    "status",
                    "isDraft",
                    "voteStatus",
                    "creator",
                ],
            ),
            pullrequest_status: gvec(
                "azure_devops_pullrequest_status",
                "Azure DevOps pull request timestamps",
                &["projectID", "pullrequestID", "type"],
            ),
            pullrequest_label: gvec(
                "azure_devops_pullrequest_label",
                "Azure DevOps pull request labels",
                &["projectID", "pullrequestID", "label", "active"],
            ),
        }
    }
}

impl Default for PullRequestCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PullRequestCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "pullrequest"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "pullrequest"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.pullrequest_info.clone()))?;
        registry.register(Box::new(self.pullrequest_status.clone()))?;
        registry.register(Box::new(self.pullrequest_label.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.pullrequest_info.reset();
        self.pullrequest_status.reset();
        self.pullrequest_label.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "pullrequest", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let fetches: Vec<_> = project
                .repositories
                .iter()
                .filter(|r| !r.is_disabled)
                .map(|repository| async move {
                    let pull_requests = ctx
                        .api
                        .list_pull_requests(&project.id, &repository.id)
                        .await;
                    (repository, pull_requests)
                })
                .collect();
            let outcomes: Vec<_> = stream::iter(fetches)
                .buffer_unordered(ctx.settings.fanout.max(1))
                .collect()
                .await;

            let mut info = MetricList::new();
            let mut status = MetricList::new();
            let mut label = MetricList::new();

            for (repository, outcome) in outcomes {
                let pull_requests = match outcome {
                    Ok(pull_requests) => pull_requests,
                    Err(err) => {
                        warn!(
                            project = %project.name,
                            repository = %repository.name,
                            "skipping pull requests: {err}"
                        );
                        continue;
                    }
                };
                for pr in pull_requests {
                    info.add_info(labels!(
                        "projectID" => project.id,
                        "repositoryID" => repository.id,
                        "pullrequestID" => pr.pull_request_id,
                        "pullrequestTitle" => pr.title,
                        "sourceBranch" => pr.source_ref_name,
                        "targetBranch" => pr.target_ref_name,
                        "status" => pr.status,
                        "isDraft" => pr.is_draft,
                        "voteStatus" => pr.vote_status(),
                        "creator" => pr.created_by.display_name,
                    ));

                    let ids = labels!(
                        "projectID" => project.id,
                        "pullrequestID" => pr.pull_request_id,
                    );
                    status.add_time(ids.with("type", "created"), pr.creation_date);

                    for pr_label in &pr.labels {
                        label.add_info(
                            ids.with("label", &pr_label.name)
                                .with("active", pr_label.active),
                        );
                    }
                }
            }

            publisher.gauge(info, &self.pullrequest_info);
            publisher.gauge(status, &self.pullrequest_status);
            publisher.gauge(label, &self.pullrequest_label);
            Ok(())
        })
    }
}
