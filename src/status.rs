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

//! Run-status persistence and the append-only update history log
//!
//! The status file is plain text, one `key value` pair per line, so an
//! operator can read it with `cat`. It is rewritten atomically at the
//! end of every run and is not meant to be hand-edited.

use crate::error::{Result, UpdaterError};
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use std::fmt::Write as _;
use std::io::Write as _;
use std::path::Path;

const HEADER: &str = "# trustroot-updater run status. Machine-written, do not edit.";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStatus {
    /// When the last attempt ran, success or not.
    pub checked_at: Option<DateTime<Utc>>,

    /// Verdict of the last attempt.
    pub success: bool,

    /// Hour-of-day [0,23] for the once-a-day genuine check. Assigned
    /// randomly on first use and stable across runs thereafter.
    pub scheduled_hour: Option<u32>,

    /// Last time a bundle was actually installed.
    pub last_update_at: Option<DateTime<Utc>>,

    /// Source URL the last attempt used.
    pub source_url: String,

    /// Human-readable failure message, absent on success.
    pub error_message: Option<String>,
}

impl RunStatus {
    /// Returns the scheduled hour, assigning one uniformly in [0,23]
    /// the first time it is unset.
    pub fn ensure_scheduled_hour(&mut self) -> u32 {
        match self.scheduled_hour {
            Some(hour) => hour,
            None => {
                let hour = rand::thread_rng().gen_range(0..24);
                tracing::info!("Assigned scheduled check hour {hour}");
                self.scheduled_hour = Some(hour);
                hour
            }
        }
    }
}

/// Read the status file. A missing file yields the default record; a
/// malformed line fails the load so the caller can decide to start
/// fresh.
pub fn load_status(path: &Path) -> Result<RunStatus> {
    if !path.exists() {
        return Ok(RunStatus::default());
    }

    let content = std::fs::read_to_string(path)?;
    let mut status = RunStatus::default();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once(' ')
            .ok_or_else(|| UpdaterError::Status(format!("malformed line: {line}")))?;
        match key {
            "checked" => status.checked_at = Some(parse_timestamp(value)?),
            "success" => status.success = value == "yes",
            "hour" => {
                let hour: u32 = value
                    .parse()
                    .map_err(|_| UpdaterError::Status(format!("bad hour: {value}")))?;
                if hour > 23 {
                    return Err(UpdaterError::Status(format!("hour out of range: {hour}")));
                }
                status.scheduled_hour = Some(hour);
            }
            "updated" => status.last_update_at = Some(parse_timestamp(value)?),
            "source" => status.source_url = value.to_owned(),
            "error" => status.error_message = Some(value.to_owned()),
            _ => return Err(UpdaterError::Status(format!("unknown key: {key}"))),
        }
    }

    Ok(status)
}

/// Rewrite the status file atomically (write temp, rename over).
pub fn save_status(path: &Path, status: &RunStatus) -> Result<()> {
    let mut content = String::new();
    let _ = writeln!(content, "{HEADER}");
    if let Some(checked) = status.checked_at {
        let _ = writeln!(content, "checked {}", format_timestamp(checked));
    }
    let _ = writeln!(content, "success {}", if status.success { "yes" } else { "no" });
    if let Some(hour) = status.scheduled_hour {
        let _ = writeln!(content, "hour {hour}");
    }
    if let Some(updated) = status.last_update_at {
        let _ = writeln!(content, "updated {}", format_timestamp(updated));
    }
    if !status.source_url.is_empty() {
        let _ = writeln!(content, "source {}", status.source_url);
    }
    if let Some(ref message) = status.error_message {
        // The message must survive the line-oriented format
        let _ = writeln!(content, "error {}", message.replace('\n', " "));
    }

    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;

    Ok(())
}

/// Append one `{timestamp} {version}` line to the never-rotated history
/// log. Failures are the caller's to absorb; history is best-effort.
pub fn append_history(path: &Path, version: &str, at: DateTime<Utc>) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{} {version}", format_timestamp(at))?;
    Ok(())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| UpdaterError::Status(format!("bad timestamp {value}: {e}")))
}
