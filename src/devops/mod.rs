//! Azure DevOps REST boundary.
//!
//! Collectors only see the [`DevopsApi`] trait. [`DevopsClient`] is the
//! reqwest implementation; tests substitute their own.

pub mod client;
pub mod error;
pub mod gate;
pub mod models;
pub mod time;

#[cfg(test)]
pub mod mock;

pub use client::{DevopsClient, Limits};
pub use error::{ApiError, Result};
pub use gate::RequestGate;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use models::{
    Agent, AgentPool, AgentResourceUsage, Build, BuildDefinition, BuildResourceUsage, Deployment,
    JobRequest, Project, PullRequest, Release, ReleaseDefinition, Repository, Timeline,
    WiqlResult,
};

/// Filter for build listings.
#[derive(Clone, Debug, Default)]
pub struct BuildFilter {
    /// Only builds queued (or, with `finished_only`, finished) after this instant.
    pub min_time: Option<DateTime<Utc>>,
    /// Restrict to completed builds ordered by finish time.
    pub finished_only: bool,
}

/// Every upstream call the collectors make.
pub trait DevopsApi: Send + Sync {
    fn list_projects(&self) -> BoxFuture<'_, Result<Vec<Project>>>;

    fn list_repositories<'a>(&'a self, project: &'a str) -> BoxFuture<'a, Result<Vec<Repository>>>;

    fn list_builds<'a>(
        &'a self,
        project: &'a str,
        filter: &'a BuildFilter,
    ) -> BoxFuture<'a, Result<Vec<Build>>>;

    /// Most recent finished build of every definition.
    fn list_latest_builds<'a>(&'a self, project: &'a str) -> BoxFuture<'a, Result<Vec<Build>>>;

    fn list_build_definitions<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BuildDefinition>>>;

    fn get_build_timeline<'a>(
        &'a self,
        project: &'a str,
        build_id: i64,
    ) -> BoxFuture<'a, Result<Timeline>>;

    fn list_releases<'a>(
        &'a self,
        project: &'a str,
        min_time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<Release>>>;

    fn list_release_definitions<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ReleaseDefinition>>>;

    fn list_deployments<'a>(
        &'a self,
        project: &'a str,
        definition_id: i64,
        min_time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<Deployment>>>;

    fn list_agent_pools(&self) -> BoxFuture<'_, Result<Vec<AgentPool>>>;

    fn get_agent_pool(&self, pool_id: i64) -> BoxFuture<'_, Result<AgentPool>>;

    fn list_agents(&self, pool_id: i64) -> BoxFuture<'_, Result<Vec<Agent>>>;

    fn list_job_requests(&self, pool_id: i64) -> BoxFuture<'_, Result<Vec<JobRequest>>>;

    fn list_pull_requests<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>>;

    fn count_commits<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>>;

    fn count_pushes<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>>;

    fn run_query<'a>(&'a self, project: &'a str, query: &'a str)
    -> BoxFuture<'a, Result<WiqlResult>>;

    fn build_resource_usage(&self) -> BoxFuture<'_, Result<BuildResourceUsage>>;

    fn agent_resource_usage(&self) -> BoxFuture<'_, Result<AgentResourceUsage>>;

    /// Total upstream requests issued since start.
    fn request_count(&self) -> u64;

    /// Upstream requests currently in flight.
    fn current_concurrency(&self) -> i64;
}
