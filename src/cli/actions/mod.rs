pub mod run;

use crate::collectors::{CollectorConfig, QueryRef, Settings};
use crate::devops::Limits;
use crate::discovery::DiscoveryConfig;
use secrecy::SecretString;

/// Connection settings of the Azure DevOps client.
pub struct DevopsOptions {
    pub url: String,
    pub organisation: String,
    pub access_token: SecretString,
    pub concurrency: usize,
    pub retries: u32,
    pub limits: Limits,
}

pub enum Action {
    Run {
        port: u16,
        listen: Option<String>,
        devops: DevopsOptions,
        discovery: DiscoveryConfig,
        queries: Vec<QueryRef>,
        collectors: CollectorConfig,
        settings: Settings,
    },
}
