use crate::{
    cli::actions::{Action, DevopsOptions},
    collectors::{COLLECTOR_NAMES, CollectorConfig, QueryRef, Settings, all_factories},
    devops::Limits,
    discovery::DiscoveryConfig,
};
use anyhow::{Context, Result, anyhow};
use chrono::TimeDelta;
use clap::ArgMatches;
use secrecy::SecretString;
use std::time::Duration;
use tracing::info;

/// # Errors
///
/// Returns an error if required arguments are missing or a value is invalid
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    // Get the port or return an error
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    // Get the listen address (None means auto-detect)
    let listen = matches
        .get_one::<String>("listen")
        .map(std::string::ToString::to_string);

    let concurrency = matches
        .get_one::<usize>("request.concurrency")
        .copied()
        .unwrap_or(10);

    let devops = DevopsOptions {
        url: string(matches, "azuredevops.url")?,
        organisation: string(matches, "azuredevops.organisation")?,
        access_token: SecretString::from(string(matches, "azuredevops.access-token")?),
        concurrency,
        retries: matches.get_one::<u32>("request.retries").copied().unwrap_or(3),
        limits: get_limits(matches),
    };

    let discovery = DiscoveryConfig {
        refresh: duration(matches, "servicediscovery.refresh")?,
        whitelist_projects: list(matches, "whitelist.project"),
        blacklist_projects: list(matches, "blacklist.project"),
        agent_pools: list(matches, "whitelist.agentpool")
            .iter()
            .map(|id| {
                id.parse::<i64>()
                    .with_context(|| format!("invalid agent pool id: {id}"))
            })
            .collect::<Result<_>>()?,
        fanout: concurrency,
    };

    let queries = list(matches, "list.query")
        .iter()
        .map(|query| query.parse::<QueryRef>())
        .collect::<Result<Vec<_>>>()?;

    let settings = Settings {
        build_history: history(matches, "limit.build-history-duration")?,
        release_history: history(matches, "limit.release-history-duration")?,
        fanout: concurrency,
    };

    let collectors = get_enabled_collectors(matches);
    info!("Enabled collectors: {:?}", collectors);

    Ok(Action::Run {
        port,
        listen,
        devops,
        discovery,
        queries,
        collectors: get_collector_config(matches, &collectors)?,
        settings,
    })
}

fn string(matches: &ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .ok_or_else(|| anyhow!("--{name} is required"))
}

fn duration(matches: &ArgMatches, name: &str) -> Result<Duration> {
    matches
        .get_one::<Duration>(name)
        .copied()
        .ok_or_else(|| anyhow!("--{name} is required"))
}

fn history(matches: &ArgMatches, name: &str) -> Result<TimeDelta> {
    TimeDelta::from_std(duration(matches, name)?).with_context(|| format!("--{name} is too large"))
}

fn list(matches: &ArgMatches, name: &str) -> Vec<String> {
    matches
        .get_many::<String>(name)
        .map(|vals| {
            vals.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn get_limits(matches: &ArgMatches) -> Limits {
    let defaults = Limits::default();
    let limit = |name: &str, default: u32| matches.get_one::<u32>(name).copied().unwrap_or(default);

    Limits {
        builds_per_definition: limit(
            "limit.builds-per-definition",
            defaults.builds_per_definition,
        ),
        releases_per_definition: limit(
            "limit.releases-per-definition",
            defaults.releases_per_definition,
        ),
        deployments_per_definition: limit(
            "limit.deployments-per-definition",
            defaults.deployments_per_definition,
        ),
        release_definitions_per_project: limit(
            "limit.releasedefinitions-per-project",
            defaults.release_definitions_per_project,
        ),
        releases_per_project: limit(
            "limit.releases-per-project",
            defaults.releases_per_project,
        ),
    }
}

fn get_collector_config(matches: &ArgMatches, enabled: &[String]) -> Result<CollectorConfig> {
    let mut config = CollectorConfig::new()
        .with_enabled(enabled)
        .with_scrape_time(duration(matches, "scrape.time")?, duration(matches, "scrape.time.live")?);

    for &name in COLLECTOR_NAMES {
        if let Some(interval) = matches.get_one::<Duration>(&format!("scrape.time.{name}")) {
            config = config.with_interval(name, *interval);
        }
    }

    Ok(config)
}

#[must_use]
pub fn get_enabled_collectors(matches: &ArgMatches) -> Vec<String> {
    let factories = all_factories();

    COLLECTOR_NAMES
        .iter()
        .filter(|&name| {
            let enable_flag = format!("collector.{name}");
            let disable_flag = format!("no-collector.{name}");

            // If explicitly disabled, skip it
            if matches.get_flag(&disable_flag) {
                return false;
            }

            // If explicitly enabled, include it
            if matches.get_flag(&enable_flag) {
                return true;
            }

            // Otherwise, check the collector's default setting
            factories.get(name).is_some_and(|factory| {
                let collector = factory();
                collector.enabled_by_default()
            })
        })
        .map(|&name| name.to_string())
        .collect()
}
