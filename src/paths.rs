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

//! On-disk layout of the bundle root directory
//!
//! Everything the updater touches lives under one root so that renames
//! never cross a filesystem boundary. The root is overridable for tests.

use std::path::{Path, PathBuf};

pub const DEFAULT_ROOT: &str = "/var/lib/trustroot";

/// Prefix used for per-run scratch directories; the stale-instance
/// takeover sweeps leftovers by this prefix.
pub const SCRATCH_PREFIX: &str = ".trustroot-scratch-";

/// Name of the active bundle symlink.
pub const ANCHORS_LINK: &str = "anchors";

#[derive(Debug, Clone)]
pub struct InstallPaths {
    root: PathBuf,
}

impl InstallPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The active bundle symlink. Always a symlink when a bundle is
    /// installed; a real directory here is a fatal misconfiguration.
    pub fn anchors_link(&self) -> PathBuf {
        self.root.join(ANCHORS_LINK)
    }

    /// Versioned bundle directory name for `version`.
    pub fn bundle_dir(&self, version: &str) -> PathBuf {
        self.root.join(format!("bundle-{version}"))
    }

    /// Disambiguated directory used for a same-version forced
    /// re-install so the unpack never collides with the live bundle.
    pub fn forced_bundle_dir(&self, version: &str) -> PathBuf {
        self.root.join(format!("bundle-{version}.force"))
    }

    pub fn marker_file(&self) -> PathBuf {
        self.root.join("installed-version")
    }

    pub fn fingerprint_file(&self) -> PathBuf {
        self.root.join("applied-config")
    }

    pub fn status_file(&self) -> PathBuf {
        self.root.join("update-status")
    }

    pub fn history_file(&self) -> PathBuf {
        self.root.join("update-history.log")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.root.join("updater.pid")
    }
}

impl Default for InstallPaths {
    fn default() -> Self {
        Self::new(DEFAULT_ROOT)
    }
}
