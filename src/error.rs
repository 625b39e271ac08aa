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

//! Error types for the updater crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpdaterError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bundle description: {0}")]
    Description(String),

    #[error("fetch failed: {0}")]
    Fetch(String),

    #[error("{kind} mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        kind: &'static str,
        expected: String,
        actual: String,
    },

    #[error("unpack failed: {0}")]
    Unpack(String),

    #[error("install precondition violated: {0}")]
    Precondition(String),

    #[error("install failed: {0}")]
    Install(String),

    #[error("status file error: {0}")]
    Status(String),
}

pub type Result<T> = std::result::Result<T, UpdaterError>;
