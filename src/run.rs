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

//! Update orchestration
//!
//! One sequential pass: freshness gate, lock, fetch description,
//! compare versions, fetch and verify the tarball, install, record.
//! Every fatal condition funnels through the single failure path that
//! writes a failure status; the next scheduled invocation is the retry.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::freshness::{self, Decision};
use crate::install::{self, InstallOutcome};
use crate::paths::{InstallPaths, SCRATCH_PREFIX};
use crate::status::{self, RunStatus};
use crate::verify::{self, Verdict};
use crate::{fetch, lock};
use chrono::{Local, Timelike, Utc};
use tracing::{debug, info, warn};

/// Everything one run needs, built once at startup and passed by
/// reference; components hold no global state.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: UpdaterConfig,
    pub paths: InstallPaths,
    /// Re-install even when nothing changed.
    pub forced: bool,
    /// Invoked by the periodic scheduler, not interactively.
    pub scheduled: bool,
    /// Create the bundle when none is installed yet.
    pub bootstrap: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Freshness gate said nothing to do; status and lock untouched.
    Skipped,
    /// Checked the server; the installed bundle is current.
    UpToDate { version: String },
    /// A new bundle is live.
    Updated { version: String },
}

pub fn run(ctx: &RunContext) -> Result<RunOutcome> {
    let status_path = ctx.paths.status_file();
    let mut run_status = match status::load_status(&status_path) {
        Ok(s) => s,
        Err(e) => {
            warn!("Unreadable status file, starting fresh: {e}");
            RunStatus::default()
        }
    };

    match freshness::should_run(
        &run_status,
        Utc::now(),
        Local::now().hour(),
        ctx.scheduled,
        ctx.forced,
    ) {
        Decision::Skip => {
            debug!("Bundle checked recently; nothing to do");
            return Ok(RunOutcome::Skipped);
        }
        Decision::Proceed(reason) => info!("Checking for updates ({reason})"),
    }

    lock::acquire(&ctx.paths);
    run_status.ensure_scheduled_hour();

    let result = attempt(ctx);

    // The status record always reflects the most recent attempt
    run_status.checked_at = Some(Utc::now());
    run_status.source_url = ctx.config.source_url.clone();
    match &result {
        Ok(outcome) => {
            run_status.success = true;
            run_status.error_message = None;
            if let RunOutcome::Updated { version } = outcome {
                run_status.last_update_at = Some(Utc::now());
                if let Err(e) =
                    status::append_history(&ctx.paths.history_file(), version, Utc::now())
                {
                    warn!("Could not append to update history: {e}");
                }
            }
        }
        Err(e) => {
            run_status.success = false;
            run_status.error_message = Some(e.to_string());
        }
    }
    if let Err(e) = status::save_status(&status_path, &run_status) {
        warn!("Could not record run status: {e}");
    }
    lock::release(&ctx.paths);

    result
}

fn attempt(ctx: &RunContext) -> Result<RunOutcome> {
    // Also enforces the symlink precondition before any network work
    let current = install::current_bundle(&ctx.paths)?;
    if current.is_none() && !ctx.bootstrap {
        return Err(UpdaterError::Precondition(
            "no trust bundle is installed on this host (bootstrap mode creates one)".to_owned(),
        ));
    }
    // The pointer may dangle if the bundle directory was removed
    // behind our back; that still satisfies the ownership precondition
    // but must not short-circuit the re-install below.
    let current = current.filter(|dir| dir.exists());

    // Scratch lives under the bundle root so every later rename stays
    // on one filesystem; the guard removes it on all exit paths.
    let scratch = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempdir_in(ctx.paths.root())?;

    let description = fetch::fetch_description(&ctx.config.source_url)?;
    description.validate()?;
    let version = description.certs_version.clone();

    let installed = install::read_marker(&ctx.paths);
    let fingerprint = ctx.config.patch_fingerprint();
    let config_changed =
        install::read_fingerprint(&ctx.paths).as_deref() != Some(fingerprint.as_str());
    info!(
        "Server offers {version}, installed {}",
        installed.as_deref().unwrap_or("unknown")
    );

    // Cheap comparison against the version marker saves the download
    if installed.as_deref() == Some(version.as_str())
        && current.is_some()
        && !ctx.forced
        && !config_changed
    {
        info!("Bundle is up to date");
        install::write_marker(&ctx.paths, &version)?;
        return Ok(RunOutcome::UpToDate { version });
    }

    let tarball_url = fetch::resolve_tarball_url(&ctx.config.source_url, &description.tarball_url);
    let tarball = fetch::fetch_tarball(&tarball_url, scratch.path())?;

    match verify::verify(&description, &tarball)? {
        Verdict::Good => {}
        Verdict::Corrupt {
            kind,
            expected,
            actual,
        } => {
            return Err(UpdaterError::ChecksumMismatch {
                kind,
                expected,
                actual,
            });
        }
    }

    let outcome = install::install(
        &ctx.paths,
        &ctx.config,
        &version,
        &tarball,
        scratch.path(),
        ctx.forced,
        config_changed,
    )?;

    install::write_marker(&ctx.paths, &version)?;
    install::write_fingerprint(&ctx.paths, &fingerprint)?;

    Ok(match outcome {
        InstallOutcome::Installed => RunOutcome::Updated { version },
        InstallOutcome::UpToDate => RunOutcome::UpToDate { version },
    })
}
