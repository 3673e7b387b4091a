use crate::collectors::metric_list::to_f64;
use crate::collectors::{CollectContext, MetricList, Processor, Publisher};
use crate::labels;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::instrument;

/// Organization-wide build and agent resource consumption.
#[derive(Clone)]
pub struct ResourceUsageCollector {
    resourceusage_build: GaugeVec,
    resourceusage_agent: GaugeVec,
}

impl ResourceUsageCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        Self {
            resourceusage_build: GaugeVec::new(
                Opts::new("azure_devops_resourceusage_build", "Build resource usage"),
                &["name"],
            )
            .expect("azure_devops_resourceusage_build"),
            resourceusage_agent: GaugeVec::new(
                Opts::new("azure_devops_resourceusage_agent", "Agent resource usage"),
                &["name"],
            )
            .expect("azure_devops_resourceusage_agent"),
        }
    }
}

impl Default for ResourceUsageCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for ResourceUsageCollector {
    type Unit = ();

    fn name(&self) -> &'static str {
        "resourceusage"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "resourceusage"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.resourceusage_build.clone()))?;
        registry.register(Box::new(self.resourceusage_agent.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.resourceusage_build.reset();
        self.resourceusage_agent.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "resourceusage", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        _unit: &'a (),
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (build, agent) = futures::try_join!(
                ctx.api.build_resource_usage(),
                ctx.api.agent_resource_usage(),
            )?;

            let mut build_list = MetricList::new();
            for (name, value) in [
                ("DistributedTaskAgents", build.distributed_task_agents),
                ("PaidPrivateAgentSlots", build.paid_private_agent_slots),
                ("TotalUsage", build.total_usage),
                ("XamlControllers", build.xaml_controllers),
            ] {
                build_list.add_if_not_nil(labels!("name" => name), value.map(to_f64));
            }

            let mut agent_list = MetricList::new();
            for (name, value) in [
                ("ResourceLimit.TotalCount", agent.resource_limit.total_count),
                ("ResourceLimit.TotalMinutes", agent.resource_limit.total_minutes),
                ("UsedCount", agent.used_count),
                ("UsedMinutes", agent.used_minutes),
            ] {
                agent_list.add_if_not_nil(labels!("name" => name), value.map(to_f64));
            }
            #[allow(clippy::cast_precision_loss)]
            agent_list.add(
                labels!("name" => "RunningRequests"),
                agent.running_requests.len() as f64,
            );

            publisher.gauge(build_list, &self.resourceusage_build);
            publisher.gauge(agent_list, &self.resourceusage_agent);
            Ok(())
        })
    }
}
