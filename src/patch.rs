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

//! Admin patching of a freshly unpacked bundle
//!
//! Runs strictly between unpack and the pointer swap, while the bundle
//! is still private. All exclusions are applied before any includes, so
//! an admin can drop a shipped authority and include a replacement
//! under the same identifier. Missing targets are warnings, never
//! failures.

use crate::config::UpdaterConfig;
use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Apply excludes, authority excludes, the dangling-symlink sweep, and
/// includes, in that order.
pub fn apply(bundle_dir: &Path, config: &UpdaterConfig) -> Result<()> {
    for path in &config.excludes {
        exclude_path(bundle_dir, path);
    }
    for hash in &config.exclude_cas {
        exclude_authority(bundle_dir, hash);
    }
    sweep_dangling_symlinks(bundle_dir)?;
    for pattern in &config.includes {
        include(bundle_dir, pattern);
    }
    Ok(())
}

/// Legacy path-based exclude: remove the named file from the bundle,
/// resolving a symlink to its real target first so a shared-storage
/// alias does not survive the exclusion.
fn exclude_path(bundle_dir: &Path, path: &str) {
    let Some(name) = Path::new(path).file_name() else {
        warn!("Exclude entry '{path}' has no file name; skipping");
        return;
    };
    let entry = bundle_dir.join(name);

    let Ok(metadata) = std::fs::symlink_metadata(&entry) else {
        warn!("Exclude target {} not present in bundle", entry.display());
        return;
    };

    if metadata.file_type().is_symlink() {
        match std::fs::canonicalize(&entry) {
            Ok(real) => remove_file_logged(&real),
            Err(e) => debug!("Could not resolve {}: {e}", entry.display()),
        }
    }
    remove_file_logged(&entry);
}

/// Hash-keyed CA exclude: remove every file sharing the authority-hash
/// prefix. A symlinked hash entry is resolved and the hash re-derived
/// from the resolved name, so the real authority goes too.
fn exclude_authority(bundle_dir: &Path, hash: &str) {
    let hash = hash.to_lowercase();
    let mut removed = 0usize;

    // Pass 1: find aliases and collect the real hashes behind them.
    let mut real_hashes = Vec::new();
    for entry in hash_entries(bundle_dir, &hash) {
        let is_symlink = std::fs::symlink_metadata(&entry)
            .map(|m| m.file_type().is_symlink())
            .unwrap_or(false);
        if is_symlink {
            if let Ok(real) = std::fs::canonicalize(&entry) {
                if let Some(real_hash) = authority_hash_of(&real) {
                    if real_hash != hash && !real_hashes.contains(&real_hash) {
                        real_hashes.push(real_hash);
                    }
                }
            }
        }
    }

    for entry in hash_entries(bundle_dir, &hash) {
        remove_file_logged(&entry);
        removed += 1;
    }
    for real_hash in &real_hashes {
        for entry in hash_entries(bundle_dir, real_hash) {
            remove_file_logged(&entry);
            removed += 1;
        }
    }

    if removed == 0 {
        warn!("No bundle files matched excluded authority {hash}");
    } else {
        info!("Excluded authority {hash} ({removed} files)");
    }
}

/// Files named `<hash>.*` in the bundle root.
fn hash_entries(bundle_dir: &Path, hash: &str) -> Vec<PathBuf> {
    let pattern = bundle_dir.join(format!("{hash}.*"));
    let Some(pattern) = pattern.to_str() else {
        return Vec::new();
    };
    match glob::glob(pattern) {
        Ok(matches) => matches.flatten().collect(),
        Err(e) => {
            warn!("Bad authority pattern for {hash}: {e}");
            Vec::new()
        }
    }
}

/// Authority identifier of a bundle file: the name up to the first dot.
fn authority_hash_of(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    Some(name.split('.').next().unwrap_or(name).to_lowercase())
}

/// Exclusion must not leave broken references behind: delete any
/// symlink whose target no longer resolves.
fn sweep_dangling_symlinks(dir: &Path) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let metadata = std::fs::symlink_metadata(&path)?;
        if metadata.file_type().is_symlink() {
            if std::fs::metadata(&path).is_err() {
                info!("Removing dangling symlink {}", path.display());
                remove_file_logged(&path);
            }
        } else if metadata.is_dir() {
            sweep_dangling_symlinks(&path)?;
        }
    }
    Ok(())
}

/// Copy an admin-supplied file (or everything a glob matches) into the
/// bundle root.
fn include(bundle_dir: &Path, pattern: &str) {
    if pattern.contains(['*', '?', '[']) {
        let matches: Vec<PathBuf> = match glob::glob(pattern) {
            Ok(matches) => matches.flatten().collect(),
            Err(e) => {
                warn!("Bad include pattern '{pattern}': {e}");
                return;
            }
        };
        if matches.is_empty() {
            warn!("Include pattern '{pattern}' matched nothing");
            return;
        }
        for source in matches {
            copy_into(bundle_dir, &source);
        }
    } else {
        let source = Path::new(pattern);
        if source.is_file() {
            copy_into(bundle_dir, source);
        } else {
            warn!("Include file '{pattern}' not found");
        }
    }
}

fn copy_into(bundle_dir: &Path, source: &Path) {
    let Some(name) = source.file_name() else {
        return;
    };
    let dest = bundle_dir.join(name);
    match std::fs::copy(source, &dest) {
        Ok(_) => info!("Included {} into bundle", source.display()),
        Err(e) => warn!("Could not include {}: {e}", source.display()),
    }
}

fn remove_file_logged(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Removed {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove {}: {e}", path.display()),
    }
}
