use crate::collectors::build::{
    BUILD_INFO_LABELS, BUILD_STATUS_LABELS, add_build_status, build_info_labels,
};
use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::devops::models::Project;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::instrument;

/// Most recent finished build of every build definition.
#[derive(Clone)]
pub struct LatestBuildCollector {
    build_latest_info: GaugeVec,
    build_latest_status: GaugeVec,
}

impl LatestBuildCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        Self {
            build_latest_info: GaugeVec::new(
                Opts::new(
                    "azure_devops_build_latest_info",
                    "Latest finished build of each definition",
                ),
                BUILD_INFO_LABELS,
            )
            .expect("azure_devops_build_latest_info"),
            build_latest_status: GaugeVec::new(
                Opts::new(
                    "azure_devops_build_latest_status",
                    "Timestamps and results of the latest build of each definition",
                ),
                BUILD_STATUS_LABELS,
            )
            .expect("azure_devops_build_latest_status"),
        }
    }
}

impl Default for LatestBuildCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for LatestBuildCollector {
    type Unit = Project;

    fn name(&self) -> &'static str {
        "latestbuild"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "latestbuild"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.build_latest_info.clone()))?;
        registry.register(Box::new(self.build_latest_status.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.build_latest_info.reset();
        self.build_latest_status.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "latestbuild", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        project: &'a Project,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let builds = ctx.api.list_latest_builds(&project.id).await?;

            let mut info = MetricList::new();
            let mut status = MetricList::new();
            for build in &builds {
                info.add_info(build_info_labels(project, build));
                add_build_status(&mut status, project, build);
            }

            publisher.gauge(info, &self.build_latest_info);
            publisher.gauge(status, &self.build_latest_status);
            Ok(())
        })
    }
}
