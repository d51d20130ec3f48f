extern crate upkeep;

use anyhow::{bail, Context, Result};
use clap::{App, Arg};
use std::time::Duration;
use upkeep::app;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = App::new("upkeep")
        .version(upkeep::VERSION)
        .about("Unattended updater: stops a service, updates it and starts it again")
        .arg(
            Arg::with_name("config")
                .value_name("CONFIG")
                .short("c")
                .long("config")
                .default_value("./config.yaml")
                .help("path to the configuration file"),
        )
        .arg(
            Arg::with_name("cron")
                .value_name("EXPR")
                .long("cron")
                .help("cron expression, overrides the configuration file"),
        )
        .arg(
            Arg::with_name("update-now")
                .long("update-now")
                .help("run a single update immediately and print the result as JSON"),
        )
        .arg(
            Arg::with_name("timeout")
                .value_name("SECONDS")
                .long("timeout")
                .default_value("300")
                .help("deadline for --update-now, in seconds"),
        )
        .arg(
            Arg::with_name("log-dir")
                .value_name("DIR")
                .long("log-dir")
                .default_value("./logs")
                .help("directory for daily log files"),
        )
        .arg(
            Arg::with_name("debug")
                .short("d")
                .long("debug")
                .help("run in debug mode"),
        )
        .get_matches();

    let config = matches.value_of("config").unwrap();
    let log_dir = matches.value_of("log-dir").unwrap();
    let debug = matches.is_present("debug");

    if matches.is_present("update-now") {
        let timeout = matches
            .value_of("timeout")
            .unwrap()
            .parse::<u64>()
            .context("invalid --timeout value")?;
        if timeout == 0 {
            bail!("--timeout must be greater than 0");
        }

        let code = app::update_now(config, log_dir, Duration::from_secs(timeout), debug).await?;
        std::process::exit(code);
    }

    app::init(config, matches.value_of("cron"), log_dir, debug).await
}
