use crate::cli::actions::Action;
use crate::devops::{DevopsClient, RequestGate};
use crate::exporter::new;
use crate::scheduler::AppContext;
use anyhow::Result;
use prometheus::Registry;
use std::sync::Arc;
use tracing::info;

/// Handle the run action
///
/// # Errors
///
/// Returns an error if the client cannot be built or the exporter fails to start
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run {
            port,
            listen,
            devops,
            discovery,
            queries,
            collectors,
            settings,
        } => {
            info!(
                organisation = devops.organisation,
                concurrency = devops.concurrency,
                "connecting to Azure DevOps"
            );

            let gate = Arc::new(RequestGate::new(devops.concurrency, devops.retries));
            let client = DevopsClient::new(
                &devops.url,
                &devops.organisation,
                &devops.access_token,
                gate,
                devops.limits,
            )?;

            let app = AppContext::new(
                Arc::new(client),
                settings,
                discovery,
                queries,
                collectors,
                Registry::new(),
            );

            new(port, listen, app).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::actions::DevopsOptions;
    use crate::collectors::{CollectorConfig, Settings};
    use crate::devops::Limits;
    use crate::discovery::DiscoveryConfig;
    use secrecy::SecretString;

    fn action(url: &str) -> Action {
        Action::Run {
            port: 0,
            listen: Some("127.0.0.1".to_string()),
            devops: DevopsOptions {
                url: url.to_string(),
                organisation: "acme".to_string(),
                access_token: SecretString::from("secret"),
                concurrency: 2,
                retries: 0,
                limits: Limits::default(),
            },
            discovery: DiscoveryConfig::default(),
            queries: Vec::new(),
            collectors: CollectorConfig::new().with_enabled(&["project".to_string()]),
            settings: Settings::default(),
        }
    }

    #[tokio::test]
    async fn test_handle_fails_without_reachable_api() {
        // nothing listens on port 1, so the initial discovery fails
        let result = handle(action("http://127.0.0.1:1")).await;

        assert!(
            result.is_err(),
            "Should fail without a reachable Azure DevOps API"
        );
    }

    #[tokio::test]
    async fn test_handle_rejects_invalid_url() {
        let result = handle(action("not a url")).await;

        assert!(result.is_err());
    }
}
