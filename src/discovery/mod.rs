//! Service discovery cache.
//!
//! Projects and agent pools are shared by every runner. They are fetched
//! once per refresh interval, behind one lock per key, so a cache miss seen
//! by several runners at once costs a single upstream round trip.

use crate::collectors::AgentPoolId;
use crate::devops::DevopsApi;
use crate::devops::models::Project;
use anyhow::{Context, Result};
use arc_swap::ArcSwapOption;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

#[derive(Clone, Debug)]
pub struct DiscoveryConfig {
    /// Cache TTL, also the period of the background refresh loop.
    pub refresh: Duration,
    pub whitelist_projects: Vec<String>,
    pub blacklist_projects: Vec<String>,
    /// Static agent pool allow-list; replaces upstream listing when set.
    pub agent_pools: Vec<i64>,
    /// Concurrent repository listings while building the project list.
    pub fanout: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            refresh: Duration::from_secs(30 * 60),
            whitelist_projects: Vec::new(),
            blacklist_projects: Vec::new(),
            agent_pools: Vec::new(),
            fanout: 10,
        }
    }
}

struct CacheEntry<T> {
    value: Arc<T>,
    expires: Instant,
}

/// One cache key. The mutex is held across the upstream fetch.
struct Slot<T> {
    name: &'static str,
    entry: Mutex<Option<CacheEntry<T>>>,
}

impl<T> Slot<T> {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            entry: Mutex::new(None),
        }
    }

    async fn get<F, Fut>(&self, ttl: Duration, force: bool, fetch: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut entry = self.entry.lock().await;

        if !force
            && let Some(cached) = entry.as_ref()
            && cached.expires > Instant::now()
        {
            return Ok(Arc::clone(&cached.value));
        }

        match fetch().await {
            Ok(value) => {
                let value = Arc::new(value);
                *entry = Some(CacheEntry {
                    value: Arc::clone(&value),
                    expires: Instant::now() + ttl,
                });
                debug!(key = self.name, "service discovery refreshed");
                Ok(value)
            }
            Err(err) => match entry.as_mut() {
                Some(stale) => {
                    warn!(key = self.name, error = %err, "service discovery refresh failed, serving stale value");
                    stale.expires = Instant::now() + ttl;
                    Ok(Arc::clone(&stale.value))
                }
                None => Err(err),
            },
        }
    }
}

/// Cached, shared directory of projects and agent pools.
pub struct ServiceDiscovery {
    api: Arc<dyn DevopsApi>,
    config: DiscoveryConfig,
    projects: Slot<Vec<Project>>,
    agent_pools: Slot<Vec<AgentPoolId>>,
}

impl ServiceDiscovery {
    #[must_use]
    pub fn new(api: Arc<dyn DevopsApi>, config: DiscoveryConfig) -> Self {
        Self {
            api,
            config,
            projects: Slot::new("projects"),
            agent_pools: Slot::new("agentpools"),
        }
    }

    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        self.config.refresh
    }

    /// Filtered project list, each project carrying its repositories.
    ///
    /// # Errors
    ///
    /// Returns an error only when the list was never fetched successfully.
    pub async fn project_list(&self) -> Result<Arc<Vec<Project>>> {
        self.projects
            .get(self.config.refresh, false, || self.fetch_projects())
            .await
    }

    /// Agent pool ids, the configured allow-list when one is given.
    ///
    /// # Errors
    ///
    /// Returns an error only when the list was never fetched successfully.
    pub async fn agent_pool_list(&self) -> Result<Arc<Vec<AgentPoolId>>> {
        self.agent_pools
            .get(self.config.refresh, false, || self.fetch_agent_pools())
            .await
    }

    /// Force a refresh of both keys.
    ///
    /// # Errors
    ///
    /// Returns an error when a key has never been fetched and the refresh
    /// fails; failures with a cached value keep serving that value.
    #[instrument(skip(self), level = "info", err)]
    pub async fn update(&self) -> Result<Arc<Vec<Project>>> {
        let projects = self
            .projects
            .get(self.config.refresh, true, || self.fetch_projects())
            .await?;
        self.agent_pools
            .get(self.config.refresh, true, || self.fetch_agent_pools())
            .await?;

        info!(projects = projects.len(), "service discovery updated");
        Ok(projects)
    }

    async fn fetch_projects(&self) -> Result<Vec<Project>> {
        let upstream = self
            .api
            .list_projects()
            .await
            .context("failed to list projects")?;

        let filtered = filter_projects(
            upstream,
            &self.config.whitelist_projects,
            &self.config.blacklist_projects,
        );

        let api = &self.api;
        let projects = stream::iter(filtered)
            .map(|mut project| async move {
                let listed = api.list_repositories(&project.id).await;
                match listed {
                    Ok(repositories) => project.repositories = repositories,
                    Err(err) => {
                        warn!(project = %project.name, error = %err, "failed to list repositories");
                    }
                }
                project
            })
            .buffered(self.config.fanout.max(1))
            .collect::<Vec<_>>()
            .await;

        Ok(projects)
    }

    async fn fetch_agent_pools(&self) -> Result<Vec<AgentPoolId>> {
        if !self.config.agent_pools.is_empty() {
            return Ok(self
                .config
                .agent_pools
                .iter()
                .copied()
                .map(AgentPoolId)
                .collect());
        }

        let pools = self
            .api
            .list_agent_pools()
            .await
            .context("failed to list agent pools")?;

        Ok(pools.into_iter().map(|pool| AgentPoolId(pool.id)).collect())
    }
}

/// Whitelist first (when non-empty), then the blacklist has the final say.
#[must_use]
pub fn filter_projects(
    projects: Vec<Project>,
    whitelist: &[String],
    blacklist: &[String],
) -> Vec<Project> {
    let allow: HashSet<&str> = whitelist.iter().map(String::as_str).collect();
    let deny: HashSet<&str> = blacklist.iter().map(String::as_str).collect();

    projects
        .into_iter()
        .filter(|project| allow.is_empty() || allow.contains(project.id.as_str()))
        .filter(|project| !deny.contains(project.id.as_str()))
        .collect()
}

/// Project list currently visible to project-scoped runners.
///
/// The refresh loop is the only writer. Readers load the `Arc` once per
/// pass and keep it even if a newer snapshot is stored meanwhile.
#[derive(Clone, Default)]
pub struct ProjectSnapshot(Arc<ArcSwapOption<Vec<Project>>>);

impl ProjectSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn load(&self) -> Option<Arc<Vec<Project>>> {
        self.0.load_full()
    }

    pub fn store(&self, projects: Arc<Vec<Project>>) {
        self.0.store(Some(projects));
    }
}
