pub mod collectors;

use crate::collectors::util::parse_duration;
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let long_version: &'static str = Box::leak(
        format!(
            "{} - {}",
            env!("CARGO_PKG_VERSION"),
            crate::built_info::GIT_COMMIT_HASH.unwrap_or("unknown")
        )
        .into_boxed_str(),
    );

    let cmd = Command::new("azure_devops_exporter")
        .about("Azure DevOps metric exporter for Prometheus")
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version)
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .default_value("8080")
                .env("AZURE_DEVOPS_EXPORTER_PORT")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .help("IP address to bind to (default: [::]:<port>, fallback to 0.0.0.0:<port>)")
                .env("AZURE_DEVOPS_EXPORTER_LISTEN"),
        )
        .arg(
            Arg::new("azuredevops.url")
                .long("azuredevops.url")
                .help("Azure DevOps base url")
                .default_value("https://dev.azure.com")
                .env("AZURE_DEVOPS_URL"),
        )
        .arg(
            Arg::new("azuredevops.organisation")
                .long("azuredevops.organisation")
                .help("Azure DevOps organisation")
                .env("AZURE_DEVOPS_ORGANISATION")
                .required(true),
        )
        .arg(
            Arg::new("azuredevops.access-token")
                .long("azuredevops.access-token")
                .help("Azure DevOps personal access token")
                .env("AZURE_DEVOPS_ACCESS_TOKEN")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new("request.concurrency")
                .long("request.concurrency")
                .help("Maximum concurrent requests against the Azure DevOps API")
                .default_value("10")
                .env("REQUEST_CONCURRENCY")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("request.retries")
                .long("request.retries")
                .help("Retries of a failed Azure DevOps request")
                .default_value("3")
                .env("REQUEST_RETRIES")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("servicediscovery.refresh")
                .long("servicediscovery.refresh")
                .help("Refresh interval of the project and agent pool discovery")
                .default_value("30m")
                .env("SERVICEDISCOVERY_REFRESH")
                .value_parser(parse_duration),
        )
        .arg(
            Arg::new("whitelist.project")
                .long("whitelist.project")
                .help("Only collect these project ids (comma separated)")
                .env("AZURE_DEVOPS_FILTER_PROJECT")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("blacklist.project")
                .long("blacklist.project")
                .help("Skip these project ids (comma separated)")
                .env("AZURE_DEVOPS_BLACKLIST_PROJECT")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("whitelist.agentpool")
                .long("whitelist.agentpool")
                .help("Only collect these agent pool ids (comma separated)")
                .env("AZURE_DEVOPS_AGENTPOOL")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("list.query")
                .long("list.query")
                .help("Saved queries to run, as queryID@projectID (comma separated)")
                .env("AZURE_DEVOPS_QUERIES")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("scrape.time")
                .long("scrape.time")
                .help("Default collection interval")
                .default_value("30m")
                .env("SCRAPE_TIME")
                .value_parser(parse_duration),
        )
        .arg(
            Arg::new("scrape.time.live")
                .long("scrape.time.live")
                .help("Collection interval of the live collectors")
                .default_value("30s")
                .env("SCRAPE_TIME_LIVE")
                .value_parser(parse_duration),
        )
        .arg(limit(
            "limit.builds-per-definition",
            "Builds fetched per build definition",
            "10",
            Some("LIMIT_BUILDS_PER_DEFINITION"),
        ))
        .arg(limit(
            "limit.releases-per-definition",
            "Releases fetched per release definition",
            "100",
            Some("LIMIT_RELEASES_PER_DEFINITION"),
        ))
        .arg(limit(
            "limit.deployments-per-definition",
            "Deployments fetched per release definition",
            "100",
            Some("LIMIT_DEPLOYMENTS_PER_DEFINITION"),
        ))
        .arg(limit(
            "limit.releasedefinitions-per-project",
            "Release definitions fetched per project",
            "100",
            Some("LIMIT_RELEASEDEFINITION_PER_PROJECT"),
        ))
        .arg(limit(
            "limit.releases-per-project",
            "Releases fetched per project",
            "100",
            Some("LIMIT_RELEASES_PER_PROJECT"),
        ))
        .arg(
            Arg::new("limit.build-history-duration")
                .long("limit.build-history-duration")
                .help("Lookback window for builds")
                .default_value("48h")
                .env("LIMIT_BUILD_HISTORY_DURATION")
                .value_parser(parse_duration),
        )
        .arg(
            Arg::new("limit.release-history-duration")
                .long("limit.release-history-duration")
                .help("Lookback window for releases and deployments")
                .default_value("48h")
                .env("LIMIT_RELEASE_HISTORY_DURATION")
                .value_parser(parse_duration),
        )
        .arg(
            Arg::new("verbosity")
                .short('v')
                .long("verbose")
                .help("Verbosity level: ERROR, WARN, INFO, DEBUG, TRACE (default: ERROR)")
                .global(true)
                .action(ArgAction::Count),
        );

    collectors::add_collectors_args(cmd)
}

fn limit(
    name: &'static str,
    help: &'static str,
    default: &'static str,
    env: Option<&'static str>,
) -> Arg {
    let arg = Arg::new(name)
        .long(name)
        .help(help)
        .default_value(default)
        .value_parser(clap::value_parser!(u32));

    match env {
        Some(env) => arg.env(env),
        None => arg,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const REQUIRED: [&str; 5] = [
        "azure_devops_exporter",
        "--azuredevops.organisation",
        "acme",
        "--azuredevops.access-token",
        "secret",
    ];

    #[test]
    fn test_command_metadata() {
        let cmd = new();
        assert_eq!(cmd.get_name(), "azure_devops_exporter");
        assert_eq!(
            cmd.get_about().map(ToString::to_string),
            Some("Azure DevOps metric exporter for Prometheus".to_string())
        );
        cmd.debug_assert();
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_defaults() {
        temp_env::with_vars_unset(
            [
                "AZURE_DEVOPS_EXPORTER_PORT",
                "SCRAPE_TIME",
                "SCRAPE_TIME_LIVE",
                "REQUEST_CONCURRENCY",
            ],
            || {
                let matches = new().try_get_matches_from(REQUIRED).unwrap();

                assert_eq!(matches.get_one::<u16>("port").copied(), Some(8080));
                assert_eq!(
                    matches.get_one::<Duration>("scrape.time").copied(),
                    Some(Duration::from_secs(1800))
                );
                assert_eq!(
                    matches.get_one::<Duration>("scrape.time.live").copied(),
                    Some(Duration::from_secs(30))
                );
                assert_eq!(matches.get_one::<usize>("request.concurrency").copied(), Some(10));
                assert_eq!(
                    matches.get_one::<u32>("limit.builds-per-definition").copied(),
                    Some(10)
                );
            },
        );
    }

    #[test]
    fn test_organisation_is_required() {
        temp_env::with_vars_unset(
            ["AZURE_DEVOPS_ORGANISATION", "AZURE_DEVOPS_ACCESS_TOKEN"],
            || {
                let result = new().try_get_matches_from(["azure_devops_exporter"]);
                assert!(result.is_err());
            },
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_env_values() {
        temp_env::with_vars(
            [
                ("AZURE_DEVOPS_ORGANISATION", Some("acme")),
                ("AZURE_DEVOPS_ACCESS_TOKEN", Some("secret")),
                ("SCRAPE_TIME", Some("1h30m")),
                ("AZURE_DEVOPS_FILTER_PROJECT", Some("p1,p2")),
            ],
            || {
                let matches = new().try_get_matches_from(["azure_devops_exporter"]).unwrap();

                assert_eq!(
                    matches.get_one::<Duration>("scrape.time").copied(),
                    Some(Duration::from_secs(5400))
                );
                let projects: Vec<&String> = matches
                    .get_many::<String>("whitelist.project")
                    .unwrap()
                    .collect();
                assert_eq!(projects, ["p1", "p2"]);
            },
        );
    }

    #[test]
    fn test_invalid_duration_rejected() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--scrape.time", "soon"]);
        assert!(new().try_get_matches_from(args).is_err());
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_verbosity_count() {
        let mut args = REQUIRED.to_vec();
        args.push("-vvv");
        let matches = new().try_get_matches_from(args).unwrap();
        assert_eq!(matches.get_count("verbosity"), 3);
    }
}
