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

//! TrustRoot Updater - Unattended trust-anchor bundle maintenance
//!
//! This crate keeps a host's certificate-authority trust bundle fresh:
//! it checks a server at most once a day, downloads and verifies a new
//! bundle when one exists, applies admin exclusions and inclusions, and
//! swaps it into place atomically so no reader ever observes a
//! half-written bundle.

pub mod config;
pub mod error;
pub mod fetch;
pub mod freshness;
pub mod install;
pub mod lock;
pub mod patch;
pub mod paths;
pub mod run;
pub mod status;
pub mod verify;

pub use config::UpdaterConfig;
pub use error::UpdaterError;
pub use fetch::BundleDescription;
pub use paths::InstallPaths;
pub use run::{RunContext, RunOutcome};
pub use status::RunStatus;
