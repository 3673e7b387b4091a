//! Fan-out shapes.
//!
//! A runner asks its processor's unit type for the list of units to collect
//! in the current pass. `None` means the data the units derive from is not
//! known yet; the pass is skipped and nothing is reset.

use crate::devops::models::Project;
use crate::discovery::{ProjectSnapshot, ServiceDiscovery};
use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Shared sources every unit type resolves from.
pub struct Scope {
    pub discovery: Arc<ServiceDiscovery>,
    pub projects: ProjectSnapshot,
    pub queries: Arc<Vec<QueryRef>>,
}

pub trait FanOutUnit: Send + Sync + Sized + 'static {
    /// Units for the next pass, captured once and used for the whole pass.
    fn resolve(scope: &Scope) -> BoxFuture<'_, Option<Arc<Vec<Self>>>>;

    /// Short identification for logs.
    fn describe(&self) -> String;
}

/// General collectors run exactly one unit per pass.
impl FanOutUnit for () {
    fn resolve(_scope: &Scope) -> BoxFuture<'_, Option<Arc<Vec<Self>>>> {
        static SINGLE: OnceCell<Arc<Vec<()>>> = OnceCell::new();
        let single = Arc::clone(SINGLE.get_or_init(|| Arc::new(vec![()])));
        Box::pin(async move { Some(single) })
    }

    fn describe(&self) -> String {
        "general".to_string()
    }
}

/// One unit per project of the current snapshot.
impl FanOutUnit for Project {
    fn resolve(scope: &Scope) -> BoxFuture<'_, Option<Arc<Vec<Self>>>> {
        Box::pin(async move { scope.projects.load().filter(|projects| !projects.is_empty()) })
    }

    fn describe(&self) -> String {
        format!("project {} ({})", self.name, self.id)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AgentPoolId(pub i64);

impl fmt::Display for AgentPoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One unit per discovered (or allow-listed) agent pool.
impl FanOutUnit for AgentPoolId {
    fn resolve(scope: &Scope) -> BoxFuture<'_, Option<Arc<Vec<Self>>>> {
        Box::pin(async move {
            match scope.discovery.agent_pool_list().await {
                Ok(pools) => Some(pools),
                Err(e) => {
                    warn!(error = %e, "agent pool list unavailable, skipping pass");
                    None
                }
            }
        })
    }

    fn describe(&self) -> String {
        format!("agent pool {}", self.0)
    }
}

/// Saved work item query and the project it belongs to, `queryID@projectID`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRef {
    pub query_id: String,
    pub project_id: String,
}

impl FromStr for QueryRef {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        static RE: OnceCell<Regex> = OnceCell::new();
        let re = RE.get_or_init(|| {
            #[allow(clippy::expect_used)]
            Regex::new(r"^\s*([^@\s]+)@([^@\s]+)\s*$").expect("Invalid regex")
        });

        let caps = re
            .captures(value)
            .ok_or_else(|| anyhow!("invalid query '{value}', expected queryID@projectID"))?;
        let part = |i| caps.get(i).map_or("", |m| m.as_str()).to_string();

        Ok(Self {
            query_id: part(1),
            project_id: part(2),
        })
    }
}

/// One unit per configured query.
impl FanOutUnit for QueryRef {
    fn resolve(scope: &Scope) -> BoxFuture<'_, Option<Arc<Vec<Self>>>> {
        Box::pin(async move { Some(Arc::clone(&scope.queries)) })
    }

    fn describe(&self) -> String {
        format!("query {}@{}", self.query_id, self.project_id)
    }
}
