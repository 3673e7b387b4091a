use crate::collectors::metric_list::to_f64;
use crate::collectors::{AgentPoolId, CollectContext, MetricList, Processor, Publisher};
use crate::labels;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::{GaugeVec, Opts, Registry};
use tracing::{debug, instrument};

/// Agent pool composition, agent status and queued jobs.
#[derive(Clone)]
pub struct AgentPoolCollector {
    agentpool_info: GaugeVec,
    agentpool_size: GaugeVec,
    agentpool_usage: GaugeVec,
    agentpool_queue_length: GaugeVec,
    agentpool_agent: GaugeVec,
    agentpool_agent_status: GaugeVec,
    agentpool_agent_job: GaugeVec,
}

impl AgentPoolCollector {
    #[must_use]
    #[allow(clippy::expect_used)]
    ///
    /// # Panics
    ///
    /// Panics if metric creation fails.
    pub fn new() -> Self {
        let gvec = |name: &str, help: &str, labels: &[&str]| {
            GaugeVec::new(Opts::new(name, help), labels).expect("valid agentpool metric")
        };

        Self {
            agentpool_info: gvec(
                "azure_devops_agentpool_info",
                "Azure DevOps agent pool",
                &["agentPoolID", "agentPoolName", "agentPoolType", "isHosted"],
            ),
            agentpool_size: gvec(
                "azure_devops_agentpool_size",
                "Number of agents in the pool",
                &["agentPoolID"],
            ),
            agentpool_usage: gvec(
                "azure_devops_agentpool_usage",
                "Share of enabled online agents running a job",
                &["agentPoolID"],
            ),
            agentpool_queue_length: gvec(
                "azure_devops_agentpool_queue_length",
                "Job requests waiting for an agent",
                &["agentPoolID"],
            ),
            agentpool_agent: gvec(
                "azure_devops_agentpool_agent",
                "Agent of an Azure DevOps agent pool",
                &[
                    "agentPoolID",
                    "agentPoolAgentID",
                    "agentPoolAgentName",
                    "agentPoolAgentVersion",
                    "provisioningState",
                    "maxParallelism",
                    "agentPoolAgentOs",
                    "enabled",
                    "status",
                    "hasAssignedRequest",
                ],
            ),
            agentpool_agent_status: gvec(
                "azure_devops_agentpool_agent_status",
                "Agent timestamps",
                &["agentPoolAgentID", "type"],
            ),
            agentpool_agent_job: gvec(
                "azure_devops_agentpool_agent_job",
                "Job currently assigned to an agent",
                &[
                    "agentPoolAgentID",
                    "jobRequestId",
                    "definitionID",
                    "definitionName",
                    "planType",
                    "scopeID",
                ],
            ),
        }
    }
}

impl Default for AgentPoolCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for AgentPoolCollector {
    type Unit = AgentPoolId;

    fn name(&self) -> &'static str {
        "agentpool"
    }

    #[instrument(skip(self, registry), level = "info", err, fields(collector = "agentpool"))]
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(self.agentpool_info.clone()))?;
        registry.register(Box::new(self.agentpool_size.clone()))?;
        registry.register(Box::new(self.agentpool_usage.clone()))?;
        registry.register(Box::new(self.agentpool_queue_length.clone()))?;
        registry.register(Box::new(self.agentpool_agent.clone()))?;
        registry.register(Box::new(self.agentpool_agent_status.clone()))?;
        registry.register(Box::new(self.agentpool_agent_job.clone()))?;
        Ok(())
    }

    fn reset(&self) {
        self.agentpool_info.reset();
        self.agentpool_size.reset();
        self.agentpool_usage.reset();
        self.agentpool_queue_length.reset();
        self.agentpool_agent.reset();
        self.agentpool_agent_status.reset();
        self.agentpool_agent_job.reset();
    }

    #[instrument(skip_all, level = "info", err, fields(collector = "agentpool", otel.kind = "internal"))]
    fn collect<'a>(
        &'a self,
        ctx: &'a CollectContext,
        pool_id: &'a AgentPoolId,
        publisher: &'a Publisher,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let AgentPoolId(id) = *pool_id;
            let (pool, agents, job_requests) = futures::try_join!(
                ctx.api.get_agent_pool(id),
                ctx.api.list_agents(id),
                ctx.api.list_job_requests(id),
            )?;

            let pool_labels = labels!("agentPoolID" => id);

            let mut info = MetricList::new();
            info.add_info(labels!(
                "agentPoolID" => id,
                "agentPoolName" => pool.name,
                "agentPoolType" => pool.pool_type,
                "isHosted" => pool.is_hosted,
            ));

            let mut size = MetricList::new();
            size.add(pool_labels.clone(), to_f64(pool.size));

            let mut agent_info = MetricList::new();
            let mut agent_status = MetricList::new();
            let mut agent_job = MetricList::new();
            let mut online = 0_u32;
            let mut busy = 0_u32;

            for agent in &agents {
                agent_info.add_info(labels!(
                    "agentPoolID" => id,
                    "agentPoolAgentID" => agent.id,
                    "agentPoolAgentName" => agent.name,
                    "agentPoolAgentVersion" => agent.version,
                    "provisioningState" => agent.provisioning_state,
                    "maxParallelism" => agent.max_parallelism,
                    "agentPoolAgentOs" => agent.os_description,
                    "enabled" => agent.enabled,
                    "status" => agent.status,
                    "hasAssignedRequest" => agent.assigned_request.is_some(),
                ));
                agent_status.add_time(
                    labels!("agentPoolAgentID" => agent.id, "type" => "created"),
                    agent.created_on,
                );

                if agent.enabled && agent.status == "online" {
                    online += 1;
                    if agent.assigned_request.is_some() {
                        busy += 1;
                    }
                }

                if let Some(job) = &agent.assigned_request {
                    agent_job.add_time(
                        labels!(
                            "agentPoolAgentID" => agent.id,
                            "jobRequestId" => job.request_id,
                            "definitionID" => job.definition.id,
                            "definitionName" => job.definition.name,
                            "planType" => job.plan_type,
                            "scopeID" => job.scope_id,
                        ),
                        job.assign_time.or(job.queue_time),
                    );
                }
            }

            let mut usage = MetricList::new();
            if online > 0 {
                usage.add(pool_labels.clone(), f64::from(busy) / f64::from(online));
            } else {
                usage.add(pool_labels.clone(), 0.0);
            }

            let queued = job_requests.iter().filter(|job| job.is_queued()).count();
            let mut queue_length = MetricList::new();
            #[allow(clippy::cast_precision_loss)]
            queue_length.add(pool_labels, queued as f64);

            debug!(pool = id, agents = agents.len(), queued, "collected agent pool");

            publisher.gauge(info, &self.agentpool_info);
            publisher.gauge(size, &self.agentpool_size);
            publisher.gauge(usage, &self.agentpool_usage);
            publisher.gauge(queue_length, &self.agentpool_queue_length);
            publisher.gauge(agent_info, &self.agentpool_agent);
            publisher.gauge(agent_status, &self.agentpool_agent_status);
            publisher.gauge(agent_job, &self.agentpool_agent_job);
            Ok(())
        })
    }

    fn live(&self) -> bool {
        true
    }
}
