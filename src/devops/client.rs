use super::error::{ApiError, Result};
use super::gate::RequestGate;
use super::models::{
    Agent, AgentPool, AgentResourceUsage, Build, BuildDefinition, BuildResourceUsage, Deployment,
    JobRequest, ListResponse, Project, PullRequest, Release, ReleaseDefinition, Repository,
    Timeline, WiqlResult,
};
use super::{BuildFilter, DevopsApi, time};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info_span, instrument};
use tracing_futures::Instrument as _;
use url::Url;

const API_VERSION: &str = "5.1";
const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";
const PAGE_SIZE: usize = 100;
const ERROR_BODY_LIMIT: usize = 512;

/// Per-resource listing limits.
#[derive(Clone, Debug)]
pub struct Limits {
    pub builds_per_definition: u32,
    pub releases_per_definition: u32,
    pub deployments_per_definition: u32,
    pub release_definitions_per_project: u32,
    pub releases_per_project: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            builds_per_definition: 10,
            releases_per_definition: 100,
            deployments_per_definition: 100,
            release_definitions_per_project: 100,
            releases_per_project: 100,
        }
    }
}

struct Page<T> {
    body: T,
    continuation: Option<String>,
}

/// Authenticated Azure DevOps client.
pub struct DevopsClient {
    http: reqwest::Client,
    base: Url,
    release_base: Url,
    authorization: HeaderValue,
    gate: Arc<RequestGate>,
    limits: Limits,
}

impl DevopsClient {
    /// Build a client for `{url}/{organisation}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the token is not a valid header
    /// value or the HTTP client cannot be built.
    pub fn new(
        url: &str,
        organisation: &str,
        token: &SecretString,
        gate: Arc<RequestGate>,
        limits: Limits,
    ) -> anyhow::Result<Self> {
        let base = organisation_url(url, organisation)?;
        let release_base = release_url(&base)?;

        let credentials = base64::engine::general_purpose::STANDARD
            .encode(format!(":{}", token.expose_secret()));
        let mut authorization = HeaderValue::from_str(&format!("Basic {credentials}"))?;
        authorization.set_sensitive(true);

        let http = reqwest::Client::builder()
            .user_agent(concat!("azure_devops_exporter/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(60))
            .build()?;

        Ok(Self {
            http,
            base,
            release_base,
            authorization,
            gate,
            limits,
        })
    }

    #[must_use]
    pub const fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }

    fn endpoint(base: &Url, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = base.join(path)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("api-version", API_VERSION);
        }
        Ok(url)
    }

    fn api(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        Self::endpoint(&self.base, path, query)
    }

    fn release_api(&self, path: &str, query: &[(&str, String)]) -> Result<Url> {
        Self::endpoint(&self.release_base, path, query)
    }

    async fn send<T: DeserializeOwned>(&self, url: &Url) -> Result<Page<T>> {
        let transport = |source| ApiError::Transport {
            url: url.to_string(),
            source,
        };

        let response = self
            .http
            .get(url.clone())
            .header(AUTHORIZATION, self.authorization.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let continuation = response
            .headers()
            .get(CONTINUATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let bytes = response.bytes().await.map_err(transport)?;

        if !status.is_success() {
            let body = bytes.get(..ERROR_BODY_LIMIT).unwrap_or(&*bytes);
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(body).into_owned(),
            });
        }

        let body = serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode {
            url: url.to_string(),
            source,
        })?;

        Ok(Page { body, continuation })
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let span = info_span!("http.request", http.method = "GET", url.path = %url.path(), otel.kind = "client");
        self.gate
            .execute(|| self.send::<T>(&url))
            .instrument(span)
            .await
            .map(|page| page.body)
    }

    async fn list<T: DeserializeOwned>(&self, url: Url) -> Result<Vec<T>> {
        self.get::<ListResponse<T>>(url).await.map(|list| list.value)
    }

    /// Follow continuation tokens until exhausted or `limit` items are read.
    async fn list_paged<T: DeserializeOwned>(&self, url: Url, limit: usize) -> Result<Vec<T>> {
        let mut items = Vec::new();
        let mut next = url.clone();

        loop {
            let page = self
                .gate
                .execute(|| self.send::<ListResponse<T>>(&next))
                .await?;
            items.extend(page.body.value);

            let Some(token) = page.continuation else {
                break;
            };
            if items.len() >= limit {
                break;
            }

            debug!(url = %url.path(), items = items.len(), "following continuation token");
            next = url.clone();
            next.query_pairs_mut().append_pair("continuationToken", &token);
        }

        items.truncate(limit);
        Ok(items)
    }
}

/// `https://dev.azure.com` + `org` -> `https://dev.azure.com/org/`
fn organisation_url(url: &str, organisation: &str) -> std::result::Result<Url, url::ParseError> {
    let root = Url::parse(&format!("{}/", url.trim_end_matches('/')))?;
    root.join(&format!("{}/", organisation.trim_matches('/')))
}

/// The release management API lives on `vsrm.dev.azure.com`; on-premise
/// servers serve it from the same host.
fn release_url(base: &Url) -> std::result::Result<Url, url::ParseError> {
    let mut url = base.clone();
    if let Some(host) = base.host_str()
        && host.ends_with("dev.azure.com")
        && !host.starts_with("vsrm.")
    {
        url.set_host(Some(&format!("vsrm.{host}")))?;
    }
    Ok(url)
}

impl DevopsApi for DevopsClient {
    #[instrument(skip(self), level = "debug", err)]
    fn list_projects(&self) -> BoxFuture<'_, Result<Vec<Project>>> {
        Box::pin(async move {
            let url = self.api("_apis/projects", &[("$top", PAGE_SIZE.to_string())])?;
            self.list_paged(url, usize::MAX).await
        })
    }

    fn list_repositories<'a>(&'a self, project: &'a str) -> BoxFuture<'a, Result<Vec<Repository>>> {
        Box::pin(async move {
            let url = self.api(&format!("{project}/_apis/git/repositories"), &[])?;
            self.list(url).await
        })
    }

    fn list_builds<'a>(
        &'a self,
        project: &'a str,
        filter: &'a BuildFilter,
    ) -> BoxFuture<'a, Result<Vec<Build>>> {
        Box::pin(async move {
            let mut query = vec![(
                "maxBuildsPerDefinition",
                self.limits.builds_per_definition.to_string(),
            )];
            if let Some(min_time) = &filter.min_time {
                query.push(("minTime", time::format(min_time)));
            }
            if filter.finished_only {
                query.push(("statusFilter", "completed".to_string()));
                query.push(("queryOrder", "finishTimeDescending".to_string()));
            }
            let url = self.api(&format!("{project}/_apis/build/builds"), &query)?;
            self.list(url).await
        })
    }

    fn list_latest_builds<'a>(&'a self, project: &'a str) -> BoxFuture<'a, Result<Vec<Build>>> {
        Box::pin(async move {
            let url = self.api(
                &format!("{project}/_apis/build/builds"),
                &[
                    ("maxBuildsPerDefinition", "1".to_string()),
                    ("statusFilter", "completed".to_string()),
                    ("queryOrder", "finishTimeDescending".to_string()),
                ],
            )?;
            self.list(url).await
        })
    }

    fn list_build_definitions<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<BuildDefinition>>> {
        Box::pin(async move {
            let url = self.api(&format!("{project}/_apis/build/definitions"), &[])?;
            self.list(url).await
        })
    }

    fn get_build_timeline<'a>(
        &'a self,
        project: &'a str,
        build_id: i64,
    ) -> BoxFuture<'a, Result<Timeline>> {
        Box::pin(async move {
            let url = self.api(&format!("{project}/_apis/build/builds/{build_id}/timeline"), &[])?;
            self.get(url).await
        })
    }

    fn list_releases<'a>(
        &'a self,
        project: &'a str,
        min_time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<Release>>> {
        Box::pin(async move {
            let url = self.release_api(
                &format!("{project}/_apis/release/releases"),
                &[
                    ("minCreatedTime", time::format(&min_time)),
                    ("$expand", "environments,artifacts".to_string()),
                    ("$top", PAGE_SIZE.to_string()),
                ],
            )?;
            let limit = usize::try_from(self.limits.releases_per_project).unwrap_or(usize::MAX);
            self.list_paged(url, limit).await
        })
    }

    fn list_release_definitions<'a>(
        &'a self,
        project: &'a str,
    ) -> BoxFuture<'a, Result<Vec<ReleaseDefinition>>> {
        Box::pin(async move {
            let url = self.release_api(
                &format!("{project}/_apis/release/definitions"),
                &[
                    ("$expand", "environments".to_string()),
                    (
                        "$top",
                        self.limits.release_definitions_per_project.to_string(),
                    ),
                ],
            )?;
            self.list(url).await
        })
    }

    fn list_deployments<'a>(
        &'a self,
        project: &'a str,
        definition_id: i64,
        min_time: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<Vec<Deployment>>> {
        Box::pin(async move {
            let url = self.release_api(
                &format!("{project}/_apis/release/deployments"),
                &[
                    ("definitionId", definition_id.to_string()),
                    ("minStartedTime", time::format(&min_time)),
                    ("queryOrder", "descending".to_string()),
                    ("$top", self.limits.deployments_per_definition.to_string()),
                ],
            )?;
            self.list(url).await
        })
    }

    fn list_agent_pools(&self) -> BoxFuture<'_, Result<Vec<AgentPool>>> {
        Box::pin(async move {
            let url = self.api("_apis/distributedtask/pools", &[])?;
            self.list(url).await
        })
    }

    fn get_agent_pool(&self, pool_id: i64) -> BoxFuture<'_, Result<AgentPool>> {
        Box::pin(async move {
            let url = self.api(&format!("_apis/distributedtask/pools/{pool_id}"), &[])?;
            self.get(url).await
        })
    }

    fn list_agents(&self, pool_id: i64) -> BoxFuture<'_, Result<Vec<Agent>>> {
        Box::pin(async move {
            let url = self.api(
                &format!("_apis/distributedtask/pools/{pool_id}/agents"),
                &[
                    ("includeCapabilities", "false".to_string()),
                    ("includeAssignedRequest", "true".to_string()),
                ],
            )?;
            self.list(url).await
        })
    }

    fn list_job_requests(&self, pool_id: i64) -> BoxFuture<'_, Result<Vec<JobRequest>>> {
        Box::pin(async move {
            let url = self.api(
                &format!("_apis/distributedtask/pools/{pool_id}/jobrequests"),
                &[],
            )?;
            self.list(url).await
        })
    }

    fn list_pull_requests<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
    ) -> BoxFuture<'a, Result<Vec<PullRequest>>> {
        Box::pin(async move {
            let url = self.api(
                &format!("{project}/_apis/git/repositories/{repository}/pullrequests"),
                &[("searchCriteria.status", "active".to_string())],
            )?;
            self.list(url).await
        })
    }

    fn count_commits<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let url = self.api(
                &format!("{project}/_apis/git/repositories/{repository}/commits"),
                &[("searchCriteria.fromDate", time::format(&since))],
            )?;
            self.get::<ListResponse<serde_json::Value>>(url)
                .await
                .map(|list| list.count)
        })
    }

    fn count_pushes<'a>(
        &'a self,
        project: &'a str,
        repository: &'a str,
        since: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<u64>> {
        Box::pin(async move {
            let url = self.api(
                &format!("{project}/_apis/git/repositories/{repository}/pushes"),
                &[("searchCriteria.fromDate", time::format(&since))],
            )?;
            self.get::<ListResponse<serde_json::Value>>(url)
                .await
                .map(|list| list.count)
        })
    }

    fn run_query<'a>(
        &'a self,
        project: &'a str,
        query: &'a str,
    ) -> BoxFuture<'a, Result<WiqlResult>> {
        Box::pin(async move {
            let url = self.api(&format!("{project}/_apis/wit/wiql/{query}"), &[])?;
            self.get(url).await
        })
    }

    fn build_resource_usage(&self) -> BoxFuture<'_, Result<BuildResourceUsage>> {
        Box::pin(async move {
            let mut url = self.base.join("_apis/build/resourceusage")?;
            url.query_pairs_mut()
                .append_pair("api-version", "5.1-preview.2");
            self.get(url).await
        })
    }

    fn agent_resource_usage(&self) -> BoxFuture<'_, Result<AgentResourceUsage>> {
        Box::pin(async move {
            let mut url = self.base.join("_apis/distributedtask/resourceusage")?;
            url.query_pairs_mut()
                .append_pair("parallelismTag", "Private")
                .append_pair("poolIsHosted", "true")
                .append_pair("includeRunningRequests", "true")
                .append_pair("api-version", "5.1-preview.1");
            self.get(url).await
        })
    }

    fn request_count(&self) -> u64 {
        self.gate.request_count()
    }

    fn current_concurrency(&self) -> i64 {
        self.gate.current_concurrency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_organisation_url() {
        let url = organisation_url("https://dev.azure.com/", "contoso").unwrap();
        assert_eq!(url.as_str(), "https://dev.azure.com/contoso/");

        let url = organisation_url("https://tfs.example.com/tfs", "/Default/").unwrap();
        assert_eq!(url.as_str(), "https://tfs.example.com/tfs/Default/");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_release_url_cloud() {
        let base = organisation_url("https://dev.azure.com", "contoso").unwrap();
        let url = release_url(&base).unwrap();
        assert_eq!(url.as_str(), "https://vsrm.dev.azure.com/contoso/");
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_release_url_on_premise() {
        let base = organisation_url("http://127.0.0.1:8081", "contoso").unwrap();
        let url = release_url(&base).unwrap();
        assert_eq!(url, base);
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_endpoint_appends_api_version() {
        let client = DevopsClient::new(
            "https://dev.azure.com",
            "contoso",
            &SecretString::from("token".to_string()),
            Arc::new(RequestGate::new(1, 0)),
            Limits::default(),
        )
        .unwrap();

        let url = client
            .api("p1/_apis/build/builds", &[("minTime", "x".to_string())])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://dev.azure.com/contoso/p1/_apis/build/builds?minTime=x&api-version=5.1"
        );
        assert!(client.authorization.is_sensitive());
    }
}
