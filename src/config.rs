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

//! Configuration module for the updater

use crate::error::{Result, UpdaterError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/trustroot/updater.json";

fn default_log_path() -> String {
    "/var/log/trustroot-updater.log".to_owned()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdaterConfig {
    /// Where the bundle description document lives. Required.
    pub source_url: String,

    /// Durable log file; always written at full detail.
    #[serde(default = "default_log_path")]
    pub log_path: String,

    /// Raise log verbosity regardless of CLI flags.
    #[serde(default)]
    pub debug: bool,

    /// Files (plain paths or globs) copied into the bundle root after
    /// all exclusions have been applied.
    #[serde(default)]
    pub includes: Vec<String>,

    /// Deprecated path-based exclusions, kept for old configs.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Authority-hash exclusions; every file sharing the hash prefix
    /// is removed from the bundle before includes run.
    #[serde(default)]
    pub exclude_cas: Vec<String>,
}

impl UpdaterConfig {
    /// Digest over the patch-relevant fields. A changed fingerprint
    /// re-triggers installation even when the bundle version is
    /// unchanged.
    pub fn patch_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for entry in &self.excludes {
            hasher.update(b"exclude\0");
            hasher.update(entry.as_bytes());
            hasher.update(b"\0");
        }
        for entry in &self.exclude_cas {
            hasher.update(b"exclude_ca\0");
            hasher.update(entry.as_bytes());
            hasher.update(b"\0");
        }
        for entry in &self.includes {
            hasher.update(b"include\0");
            hasher.update(entry.as_bytes());
            hasher.update(b"\0");
        }
        format!("{:x}", hasher.finalize())
    }
}

pub fn load_config(path: &Path) -> Result<UpdaterConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        UpdaterError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let config: UpdaterConfig = serde_json::from_str(&content)
        .map_err(|e| UpdaterError::Config(format!("failed to parse {}: {e}", path.display())))?;

    if config.source_url.trim().is_empty() {
        return Err(UpdaterError::Config(
            "source_url is required but missing or empty".to_owned(),
        ));
    }

    Ok(config)
}
