//! Typed payloads of the Azure DevOps REST API.
//!
//! Only the fields the collectors label or measure are mapped. Every struct
//! defaults missing fields so a schema drift upstream degrades to empty labels
//! instead of a decode failure.

use super::time::lenient;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Standard `{ "count": n, "value": [...] }` envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ListResponse<T> {
    pub count: u64,
    pub value: Vec<T>,
}

impl<T> Default for ListResponse<T> {
    fn default() -> Self {
        Self {
            count: 0,
            value: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct IdentityRef {
    pub id: String,
    pub display_name: String,
    pub unique_name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Link {
    pub href: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Links {
    pub web: Link,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: String,
    pub state: String,
    pub visibility: String,
    #[serde(deserialize_with = "lenient")]
    pub last_update_time: Option<DateTime<Utc>>,
    /// Filled by service discovery, not part of the project payload.
    #[serde(skip)]
    pub repositories: Vec<Repository>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub url: String,
    pub default_branch: String,
    pub size: Option<i64>,
    pub is_disabled: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefinitionRef {
    pub id: i64,
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolRef {
    pub id: i64,
    pub name: String,
    pub is_hosted: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QueueRef {
    pub id: i64,
    pub name: String,
    pub pool: PoolRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Build {
    pub id: i64,
    pub build_number: String,
    pub status: String,
    pub result: String,
    pub reason: String,
    pub source_branch: String,
    pub source_version: String,
    pub definition: DefinitionRef,
    pub queue: QueueRef,
    pub requested_by: IdentityRef,
    #[serde(deserialize_with = "lenient")]
    pub queue_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub finish_time: Option<DateTime<Utc>>,
    #[serde(rename = "_links")]
    pub links: Links,
}

impl Build {
    /// Time between start and finish, when both are known.
    #[must_use]
    pub fn job_duration(&self) -> Option<chrono::Duration> {
        Some(self.finish_time? - self.start_time?)
    }

    /// Time the build waited in the queue, when it started.
    #[must_use]
    pub fn wait_duration(&self) -> Option<chrono::Duration> {
        Some(self.start_time? - self.queue_time?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildDefinition {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub url: String,
    pub build_number_format: String,
    #[serde(rename = "_links")]
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Timeline {
    pub id: String,
    pub records: Vec<TimelineRecord>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimelineRecord {
    pub id: String,
    pub parent_id: Option<String>,
    #[serde(rename = "type")]
    pub record_type: String,
    pub name: String,
    pub identifier: Option<String>,
    pub state: String,
    pub result: Option<String>,
    pub error_count: i64,
    pub warning_count: i64,
    #[serde(deserialize_with = "lenient")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub finish_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Release {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub reason: String,
    pub release_definition: DefinitionRef,
    pub created_by: IdentityRef,
    #[serde(deserialize_with = "lenient")]
    pub created_on: Option<DateTime<Utc>>,
    pub environments: Vec<ReleaseEnvironment>,
    pub artifacts: Vec<ReleaseArtifact>,
    #[serde(rename = "_links")]
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReleaseEnvironment {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub rank: i64,
    pub trigger_reason: String,
    /// Minutes spent deploying.
    pub time_to_deploy: f64,
    #[serde(deserialize_with = "lenient")]
    pub created_on: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub modified_on: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArtifactSourceRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArtifactReference {
    pub branch: ArtifactSourceRef,
    pub version: ArtifactSourceRef,
    pub repository: ArtifactSourceRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReleaseArtifact {
    pub source_id: String,
    #[serde(rename = "type")]
    pub artifact_type: String,
    pub alias: String,
    pub definition_reference: ArtifactReference,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReleaseDefinition {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub url: String,
    pub release_name_format: String,
    pub environments: Vec<ReleaseDefinitionEnvironment>,
    #[serde(rename = "_links")]
    pub links: Links,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReleaseDefinitionEnvironment {
    pub id: i64,
    pub name: String,
    pub rank: i64,
    pub owner: IdentityRef,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NamedRef {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Deployment {
    pub id: i64,
    pub release: NamedRef,
    pub release_definition: NamedRef,
    pub release_environment: NamedRef,
    pub requested_by: IdentityRef,
    pub deployment_status: String,
    pub operation_status: String,
    pub reason: String,
    pub attempt: i64,
    #[serde(deserialize_with = "lenient")]
    pub queued_on: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub started_on: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub completed_on: Option<DateTime<Utc>>,
}

impl Deployment {
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_on? - self.started_on?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentPool {
    pub id: i64,
    pub name: String,
    pub pool_type: String,
    pub is_hosted: bool,
    pub size: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Agent {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub os_description: String,
    pub enabled: bool,
    pub status: String,
    pub provisioning_state: String,
    pub max_parallelism: i64,
    #[serde(deserialize_with = "lenient")]
    pub created_on: Option<DateTime<Utc>>,
    pub assigned_request: Option<JobRequest>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct JobRequest {
    pub request_id: i64,
    pub plan_type: String,
    pub scope_id: String,
    pub result: Option<String>,
    pub definition: NamedRef,
    #[serde(deserialize_with = "lenient")]
    pub queue_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub assign_time: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient")]
    pub finish_time: Option<DateTime<Utc>>,
}

impl JobRequest {
    /// Waiting for an agent: neither assigned nor finished.
    #[must_use]
    pub const fn is_queued(&self) -> bool {
        self.assign_time.is_none() && self.finish_time.is_none() && self.result.is_none()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Reviewer {
    pub display_name: String,
    pub vote: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequestLabel {
    pub name: String,
    pub active: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PullRequest {
    pub pull_request_id: i64,
    pub title: String,
    pub status: String,
    pub is_draft: bool,
    pub source_ref_name: String,
    pub target_ref_name: String,
    pub created_by: IdentityRef,
    #[serde(deserialize_with = "lenient")]
    pub creation_date: Option<DateTime<Utc>>,
    pub reviewers: Vec<Reviewer>,
    pub labels: Vec<PullRequestLabel>,
}

impl PullRequest {
    /// Aggregate reviewer vote; a rejection outranks everything else.
    #[must_use]
    pub fn vote_status(&self) -> &'static str {
        let votes = || self.reviewers.iter().map(|r| r.vote);
        if votes().any(|v| v <= -10) {
            "rejected"
        } else if votes().any(|v| v == -5) {
            "waitingForAuthor"
        } else if votes().any(|v| v >= 10) {
            "approved"
        } else if votes().any(|v| v == 5) {
            "approvedWithSuggestions"
        } else {
            "none"
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkItemRef {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkItemLink {
    pub target: Option<WorkItemRef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WiqlResult {
    pub query_type: String,
    pub work_items: Vec<WorkItemRef>,
    pub work_item_relations: Vec<WorkItemLink>,
}

impl WiqlResult {
    /// Number of work items returned, for flat and tree queries alike.
    #[must_use]
    pub fn result_count(&self) -> usize {
        if self.work_items.is_empty() {
            self.work_item_relations
                .iter()
                .filter(|r| r.target.is_some())
                .count()
        } else {
            self.work_items.len()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BuildResourceUsage {
    pub distributed_task_agents: Option<i64>,
    pub paid_private_agent_slots: Option<i64>,
    pub total_usage: Option<i64>,
    pub xaml_controllers: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ResourceLimit {
    pub total_count: Option<i64>,
    pub total_minutes: Option<i64>,
    pub is_hosted: bool,
    pub parallelism_tag: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentResourceUsage {
    pub resource_limit: ResourceLimit,
    pub used_count: Option<i64>,
    pub used_minutes: Option<i64>,
    pub running_requests: Vec<JobRequest>,
}
