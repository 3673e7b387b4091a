use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::devops::models::Project;
use crate::labels;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::instrument;

/// Project directory, one info series per discovered project.
#[derive(Clone)]
pub struct ProjectCollector {
    project_info: GaugeVec,
}

impl ProjectCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        Self {
            project_info: GaugeVec::new(
                Opts::new("azure_devops_project_info", "Azure DevOps project"),
                &["projectID", "projectName"],
            )
            .expect("azure_devops_project_info"),
        }
    }
}

impl Default for ProjectCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ProjectCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "project"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "project"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.project_info.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.project_info.reset();
    }

    // Served from the discovery snapshot, no upstream call.
    #[instrument(skip_all, level = "info", err, fields(collector = "project", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        _ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut info = MetricList::new();
            info.add_info(labels!(
                "projectID" => project.id,
                "projectName" => project.name,
            ));
            publisher.gauge(info, &self.project_info);
            Ok(())
        })
    }
}
