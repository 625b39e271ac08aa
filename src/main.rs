// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of TrustRoot Updater.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! TrustRoot Updater - Entry point
//!
//! Meant to be fired periodically from cron; the freshness gate keeps
//! actual server checks to roughly once a day per host. Exit code 0 on
//! success or a benign skip, non-zero on a fatal error.

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use std::path::PathBuf;
use trustroot_updater::config::{DEFAULT_CONFIG_PATH, UpdaterConfig, load_config};
use trustroot_updater::paths::{DEFAULT_ROOT, InstallPaths};
use trustroot_updater::run::{RunContext, RunOutcome, run};
use trustroot_updater::status::load_status;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

#[derive(Parser, Debug)]
#[command(name = "trustroot-updater", version, about = "Unattended trust-anchor bundle updater")]
struct Cli {
    /// Re-install even when the installed version matches
    #[arg(short, long)]
    force: bool,

    /// Print the last run status and exit
    #[arg(long)]
    status: bool,

    /// Only warnings and errors on the console
    #[arg(short, long)]
    quiet: bool,

    /// Verbose console logging
    #[arg(short, long)]
    debug: bool,

    /// Invoked by the periodic scheduler (implies --quiet and enables
    /// the scheduled-hour check)
    #[arg(long)]
    cron: bool,

    /// Create the bundle when none is installed yet
    #[arg(long)]
    bootstrap: bool,

    /// Sleep a random number of seconds below SECS before starting,
    /// to desynchronize a fleet
    #[arg(long, value_name = "SECS")]
    splay: Option<u64>,

    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Bundle root directory
    #[arg(long, value_name = "DIR", default_value = DEFAULT_ROOT)]
    root: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let quiet = cli.quiet || cli.cron;
    let paths = InstallPaths::new(&cli.root);

    if cli.status {
        return dump_status(&paths);
    }

    let config = load_config(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    init_logging(&config, quiet, cli.debug);

    if let Some(bound) = cli.splay.filter(|b| *b > 0) {
        let delay = rand::thread_rng().gen_range(0..bound);
        info!("Splay: sleeping {delay}s before starting");
        std::thread::sleep(std::time::Duration::from_secs(delay));
    }

    let ctx = RunContext {
        config,
        paths,
        forced: cli.force,
        scheduled: cli.cron,
        bootstrap: cli.bootstrap,
    };

    match run(&ctx)? {
        RunOutcome::Skipped => {
            if !quiet {
                println!("Trust bundle checked recently; nothing to do.");
            }
        }
        RunOutcome::UpToDate { version } => {
            if !quiet {
                println!("Trust bundle is up to date ({version}).");
            }
        }
        RunOutcome::Updated { version } => {
            if !quiet {
                println!("Installed trust bundle {version}.");
            }
        }
    }

    Ok(())
}

/// Console layer filtered by the flags, plus a durable file log that
/// always carries full detail.
fn init_logging(config: &UpdaterConfig, quiet: bool, debug: bool) {
    let console_level = if debug || config.debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let console = fmt::layer().with_target(false).with_filter(
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("trustroot_updater={console_level}"))),
    );

    let file = (!config.log_path.is_empty())
        .then(|| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&config.log_path)
                .ok()
        })
        .flatten()
        .map(|file| {
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .with_filter(EnvFilter::new("trustroot_updater=debug"))
        });

    tracing_subscriber::registry().with(console).with(file).init();
}

fn dump_status(paths: &InstallPaths) -> anyhow::Result<()> {
    let status = load_status(&paths.status_file())
        .with_context(|| format!("reading {}", paths.status_file().display()))?;

    match status.checked_at {
        Some(at) => println!("Last checked:   {at}"),
        None => println!("Last checked:   never"),
    }
    println!(
        "Last result:    {}",
        if status.success { "success" } else { "failure" }
    );
    if let Some(message) = status.error_message {
        println!("Last error:     {message}");
    }
    match status.last_update_at {
        Some(at) => println!("Last update:    {at}"),
        None => println!("Last update:    never"),
    }
    if let Some(hour) = status.scheduled_hour {
        println!("Check hour:     {hour:02}:00");
    }
    if !status.source_url.is_empty() {
        println!("Source:         {}", status.source_url);
    }

    Ok(())
}
