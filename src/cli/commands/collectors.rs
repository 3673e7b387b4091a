use crate::collectors::{COLLECTOR_NAMES, all_factories, util::parse_duration};
use clap::{Arg, Command};

pub fn add_collectors_args(mut cmd: Command) -> Command {
    let factories = all_factories();

    for &name in COLLECTOR_NAMES {
        let collector = factories.get(name).map(|factory| factory());
        let default_enabled = collector
            .as_ref()
            .is_some_and(crate::collectors::CollectorType::enabled_by_default);
        let live = collector
            .as_ref()
            .is_some_and(crate::collectors::CollectorType::live);

        let enable_flag: &'static str = Box::leak(format!("collector.{name}").into_boxed_str());
        let disable_flag: &'static str = Box::leak(format!("no-collector.{name}").into_boxed_str());
        let scrape_flag: &'static str = Box::leak(format!("scrape.time.{name}").into_boxed_str());
        let scrape_env: &'static str =
            Box::leak(format!("SCRAPE_TIME_{}", name.to_uppercase()).into_boxed_str());

        let default_indicator = if default_enabled {
            " [default: enabled]"
        } else {
            " [default: disabled]"
        };
        let enable_help: &'static str =
            Box::leak(format!("Enable the {name} collector{default_indicator}").into_boxed_str());
        let disable_help: &'static str =
            Box::leak(format!("Disable the {name} collector").into_boxed_str());
        let fallback = if live { "scrape.time.live" } else { "scrape.time" };
        let scrape_help: &'static str = Box::leak(
            format!("Collection interval of the {name} collector [default: --{fallback}]")
                .into_boxed_str(),
        );

        cmd = cmd
            .arg(
                Arg::new(enable_flag)
                    .long(enable_flag)
                    .help(enable_help)
                    .action(clap::ArgAction::SetTrue)
                    .default_value(if default_enabled { "true" } else { "false" }),
            )
            .arg(
                Arg::new(disable_flag)
                    .long(disable_flag)
                    .help(disable_help)
                    .action(clap::ArgAction::SetTrue)
                    .overrides_with(enable_flag),
            )
            .arg(
                Arg::new(scrape_flag)
                    .long(scrape_flag)
                    .help(scrape_help)
                    .env(scrape_env)
                    .value_parser(parse_duration),
            );
    }
    cmd
}
