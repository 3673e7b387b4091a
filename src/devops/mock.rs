//! In-memory `DevopsApi` used by unit tests.

use super::error::{ApiError, Result};
use super::gate::RequestGate;
use super::models::{
    Agent, AgentPool, AgentResourceUsage, Build, BuildDefinition, BuildResourceUsage, Deployment,
    JobRequest, Project, PullRequest, Release, ReleaseDefinition, Repository, Timeline,
    WiqlResult,
};
use super::{BuildFilter, DevopsApi};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Default)]
pub struct MockApi {
    pub projects: Mutex<Vec<Project>>,
    pub repositories: HashMap<String, Vec<Repository>>,
    pub builds: HashMap<String, Vec<Build>>,
    pub latest_builds: HashMap<String, Vec<Build>>,
    pub definitions: HashMap<String, Vec<BuildDefinition>>,
    pub timelines: HashMap<i64, Timeline>,
    pub releases: HashMap<String, Vec<Release>>,
    pub release_definitions: HashMap<String, Vec<ReleaseDefinition>>,
    pub deployments: HashMap<i64, Vec<Deployment>>,
    pub pools: Vec<AgentPool>,
    pub agents: HashMap<i64, Vec<Agent>>,
    pub job_requests: HashMap<i64, Vec<JobRequest>>,
    pub pull_requests: HashMap<String, Vec<PullRequest>>,
    pub commits: u64,
    pub pushes: u64,
    pub queries: HashMap<String, WiqlResult>,
    pub build_usage: BuildResourceUsage,
    pub agent_usage: AgentResourceUsage,
    /// Project ids whose project-scoped calls fail.
    pub failing: HashSet<String>,
    /// Sub-resources whose calls fail: `timeline/<buildID>`,
    /// `repository/<repositoryID>` or `deployments/<definitionID>`.
    pub failing_resources: HashSet<String>,
    pub fail_project_listing: AtomicBool,
    pub delay: Duration,
    pub calls: AtomicU64,
    pub project_listings: AtomicU64,
    pub gate: Option<RequestGate>,
    active: AtomicUsize,
    pub peak: AtomicUsize,
}

fn unavailable(what: &str) -> ApiError {
    ApiError::Status {
        url: format!("mock://{what}"),
        status: 500,
        body: "mock failure".to_string(),
    }
}

impl MockApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_projects(self, projects: Vec<Project>) -> Self {
        if let Ok(mut guard) = self.projects.lock() {
            *guard = projects;
        }
        self
    }

    pub fn set_projects(&self, projects: Vec<Project>) {
        if let Ok(mut guard) = self.projects.lock() {
            *guard = projects;
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn call<T>(&self, project: Option<&str>, value: T) -> Result<T>
    where
        T: Clone + Send + Sync,
    {
        self.call_resource(project, None, value).await
    }

    async fn call_resource<T>(
        &self,
        project: Option<&str>,
        resource: Option<String>,
        value: T,
    ) -> Result<T>
    where
        T: Clone + Send + Sync,
    {
        let value = &value;
        let resource = resource
            .as_deref()
            .filter(|r| self.failing_resources.contains(*r));
        let body = move || async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            match project {
                Some(p) if self.failing.contains(p) => Err(unavailable(p)),
                _ => match resource {
                    Some(r) => Err(unavailable(r)),
                    None => Ok(value.clone()),
                },
            }
        };

        match &self.gate {
            Some(gate) => gate.execute(body).await,
            None => body().await,
        }
    }

    fn lookup<K, T>(map: &HashMap<K, T>, key: &K) -> T
    where
        K: std::hash::Hash + Eq,
        T: Clone + Default,
    {
        map.get(key).cloned().unwrap_or_default()
    }
}

impl DevopsApi for MockApi {
    fn list_projects(&self) -> BoxFuture<'_, Result<Vec<Project>>> {
        Box::pin(async move {
            self.project_listings.fetch_add(1, Ordering::SeqCst);
            if self.fail_project_listing.load(Ordering::SeqCst) {
                return Err(unavailable("projects"));
            }
            let projects = self.projects.lock().map(|p| p.clone()).unwrap_or_default();
            self.call(None, projects).await
        })
    }

    fn list_repositories<'a>(&'a self, project: &'a str) -> BoxFuture<'a, Result<Vec<Repository>>> {
        Box::pin(self.call(
            Some(project),
            Self::lookup(&self.repositories, &project.to_string()),
        ))
    }

    fn list_builds<'a>(
        &'a self,
        project: &'a str,
        _filter: &'a BuildFilter,
    ) -> BoxFuture<'a, Result<Vec<Build>>> {
        Box::pin(self.call(Some(project), Self::lookup(&self.builds, &project.to_string())))
    }

    fn list_latest_builds<'a>(&'a self, project: &'a str) -> BoxFuture<'a, Result<Vec<Build>>> {
        Box::pin(self.call(
            Some(project),
            Self::lookup(&self.latest_builds, &project.to_string()),
        ))
    }

    fn list_build_definitions<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BuildDefinition>>> {
        Box::pin(self.call(
            Some(project),
            Self::lookup(&self.definitions, &project.to_string()),
        ))
    }

    fn get_build_timeline<'a>(
        &'a self,
        project: &'a str,
        build_id: i64,
    ) -> BoxFuture<'a, Result<Timeline>> {
        Box::pin(self.call_resource(
            Some(project),
            Some(format!("timeline/{build_id}")),
            Self::lookup(&self.timelines, &build_id),
        ))
    }

    fn list_releases<'a>(
        &'a self,
        project: &'a str,
        _min_time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<Release>>> {
        Box::pin(self.call(Some(project), Self::lookup(&self.releases, &project.to_string())))
    }

    fn list_release_definitions<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ReleaseDefinition>>> {
        Box::pin(self.call(
            Some(project),
            Self::lookup(&self.release_definitions, &project.to_string()),
        ))
    }

    fn list_deployments<'a>(
        &'a self,
        project: &'a str,
        definition_id: i64,
        _min_time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<Deployment>>> {
        Box::pin(self.call_resource(
            Some(project),
            Some(format!("deployments/{definition_id}")),
            Self::lookup(&self.deployments, &definition_id),
        ))
    }

    fn list_agent_pools(&self) -> BoxFuture<'_, Result<Vec<AgentPool>>> {
        Box::pin(self.call(None, self.pools.clone()))
    }

    fn get_agent_pool(&self, pool_id: i64) -> BoxFuture<'_, Result<AgentPool>> {
        let pool = self
            .pools
            .iter()
            .find(|p| p.id == pool_id)
            .cloned()
            .unwrap_or_default();
        Box::pin(self.call(None, pool))
    }

    fn list_agents(&self, pool_id: i64) -> BoxFuture<'_, Result<Vec<Agent>>> {
        Box::pin(self.call(None, Self::lookup(&self.agents, &pool_id)))
    }

    fn list_job_requests(&self, pool_id: i64) -> BoxFuture<'_, Result<Vec<JobRequest>>> {
        Box::pin(self.call(None, Self::lookup(&self.job_requests, &pool_id)))
    }

    fn list_pull_requests<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
        Box::pin(self.call_resource(
            Some(project),
            Some(format!("repository/{repository}")),
            Self::lookup(&self.pull_requests, &repository.to_string()),
        ))
    }

    fn count_commits<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
        _since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(self.call_resource(
            Some(project),
            Some(format!("repository/{repository}")),
            self.commits,
        ))
    }

    fn count_pushes<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
        _since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(self.call_resource(
            Some(project),
            Some(format!("repository/{repository}")),
            self.pushes,
        ))
    }

    fn run_query<'a>(
        &'a self,
        project: &'a str,
        query: &'a str,
    ) -> BoxFuture<'a, Result<WiqlResult>> {
        Box::pin(self.call(Some(project), Self::lookup(&self.queries, &query.to_string())))
    }

    fn build_resource_usage(&self) -> BoxFuture<'_, Result<BuildResourceUsage>> {
        Box::pin(self.call(None, self.build_usage.clone()))
    }

    fn agent_resource_usage(&self) -> BoxFuture<'_, Result<AgentResourceUsage>> {
        Box::pin(self.call(None, self.agent_usage.clone()))
    }

    fn request_count(&self) -> u64 {
        self.gate
            .as_ref()
            .map_or_else(|| self.calls(), RequestGate::request_count)
    }

    fn current_concurrency(&self) -> i64 {
        self.gate
            .as_ref()
            .map_or(0, RequestGate::current_concurrency)
    }
}
