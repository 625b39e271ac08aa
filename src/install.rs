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

//! Atomic bundle installation
//!
//! Rename is the only primitive relied on for atomicity: the new bundle
//! is populated out of sight, then a temporary symlink is renamed over
//! the active pointer. A concurrent reader resolving the pointer sees
//! the old complete bundle or the new complete bundle, never anything
//! in between. The pointer is only moved after the target is fully
//! populated and patched.

use crate::config::UpdaterConfig;
use crate::error::{Result, UpdaterError};
use crate::patch;
use crate::paths::InstallPaths;
use flate2::read::GzDecoder;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const BACKUP_SUFFIX: &str = ".old";

/// File extensions treated as revocation lists for carry-forward.
const REVOCATION_EXTENSIONS: [&str; 2] = ["crl", "r0"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// A new bundle directory is live behind the pointer.
    Installed,
    /// The exact version is already active; nothing was touched.
    UpToDate,
}

/// Install `version` from the downloaded tarball.
///
/// `scratch` is the per-run work directory on the same filesystem as
/// the bundle root; the unpacked tree is renamed out of it into place.
pub fn install(
    paths: &InstallPaths,
    config: &UpdaterConfig,
    version: &str,
    tarball: &Path,
    scratch: &Path,
    forced: bool,
    config_changed: bool,
) -> Result<InstallOutcome> {
    let link = paths.anchors_link();
    // A pointer whose target directory is gone counts as no current
    // bundle: re-installing the same version must not hop through a
    // directory that no longer exists.
    let current = current_bundle(paths)?.filter(|dir| dir.exists());

    // Target derivation. A leftover directory from a crashed run is
    // removed; the live directory never is.
    let standard = paths.bundle_dir(version);
    let same_version = current.as_deref() == Some(standard.as_path());
    let target = if standard.exists() {
        if !same_version {
            info!("Removing stale leftover {}", standard.display());
            std::fs::remove_dir_all(&standard).map_err(|e| {
                UpdaterError::Install(format!("cannot remove stale {}: {e}", standard.display()))
            })?;
            standard.clone()
        } else if !forced && !config_changed {
            info!("Version {version} already installed");
            return Ok(InstallOutcome::UpToDate);
        } else {
            // Re-installing the live version: unpack under a
            // disambiguated name so we never collide with the live
            // directory mid-install.
            let forced_dir = paths.forced_bundle_dir(version);
            if forced_dir.exists() {
                std::fs::remove_dir_all(&forced_dir)?;
            }
            forced_dir
        }
    } else {
        standard.clone()
    };

    let staged = unpack_tarball(tarball, scratch)?;
    std::fs::rename(&staged, &target).map_err(|e| {
        UpdaterError::Install(format!(
            "cannot move unpacked bundle into {}: {e}",
            target.display()
        ))
    })?;
    debug!("Unpacked bundle staged at {}", target.display());

    // The bundle is still private: patch it, then carry forward
    // revocation lists for authorities that survived into it.
    patch::apply(&target, config)?;
    if let Some(ref current_dir) = current {
        if current_dir.exists() {
            carry_revocation_lists(current_dir, &target);
        }
    }

    if same_version {
        reinstall_same_version(paths, version, &target, &standard)?;
    } else {
        swap_pointer(paths, &link, &standard)?;
        info!("Activated bundle {}", standard.display());

        // Backup rotation happens after the swap; a failure here is
        // logged but the new bundle is already live.
        if let Some(prev) = current {
            if prev != standard && prev.exists() {
                rotate_backup(paths, &prev);
            }
        }
    }

    Ok(InstallOutcome::Installed)
}

/// Resolve the active pointer, enforcing the symlink precondition.
///
/// Returns `None` when no bundle is installed yet. A real directory at
/// the pointer path makes the swap protocol impossible and is fatal.
pub fn current_bundle(paths: &InstallPaths) -> Result<Option<PathBuf>> {
    let link = paths.anchors_link();
    match std::fs::symlink_metadata(&link) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            let target = std::fs::read_link(&link)?;
            let resolved = if target.is_absolute() {
                target
            } else {
                paths.root().join(target)
            };
            Ok(Some(resolved))
        }
        Ok(_) => Err(UpdaterError::Precondition(format!(
            "{} exists but is not a symlink; refusing to touch it",
            link.display()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Last recorded installed version, or `None` before the first install.
pub fn read_marker(paths: &InstallPaths) -> Option<String> {
    let content = std::fs::read_to_string(paths.marker_file()).ok()?;
    let version = content.lines().next()?.trim();
    (!version.is_empty()).then(|| version.to_owned())
}

pub fn write_marker(paths: &InstallPaths, version: &str) -> Result<()> {
    atomic_write(&paths.marker_file(), format!("{version}\n").as_bytes())
}

/// Fingerprint of the patch config in effect at the last install.
pub fn read_fingerprint(paths: &InstallPaths) -> Option<String> {
    let content = std::fs::read_to_string(paths.fingerprint_file()).ok()?;
    let fingerprint = content.trim();
    (!fingerprint.is_empty()).then(|| fingerprint.to_owned())
}

pub fn write_fingerprint(paths: &InstallPaths, fingerprint: &str) -> Result<()> {
    atomic_write(&paths.fingerprint_file(), format!("{fingerprint}\n").as_bytes())
}

fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, content)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Extract the tarball into a staging directory under `scratch` and
/// return the root of the unpacked tree (unwrapping a single top-level
/// directory if the tarball ships one).
fn unpack_tarball(tarball: &Path, scratch: &Path) -> Result<PathBuf> {
    let stage = scratch.join("unpacked");
    std::fs::create_dir_all(&stage)?;

    let file = std::fs::File::open(tarball)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive
        .unpack(&stage)
        .map_err(|e| UpdaterError::Unpack(format!("{}: {e}", tarball.display())))?;

    let mut entries: Vec<PathBuf> = std::fs::read_dir(&stage)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .collect();

    if entries.is_empty() {
        return Err(UpdaterError::Unpack(format!(
            "{} unpacked to nothing",
            tarball.display()
        )));
    }
    if entries.len() == 1 && entries[0].is_dir() {
        return Ok(entries.remove(0));
    }
    Ok(stage)
}

/// Atomically redirect the active pointer at `target`.
///
/// The link is created under a temporary name and renamed over the
/// pointer; rename-over-symlink is atomic on the same filesystem. The
/// link target is relative so the root stays relocatable.
fn swap_pointer(paths: &InstallPaths, link: &Path, target: &Path) -> Result<()> {
    let name = target
        .file_name()
        .ok_or_else(|| UpdaterError::Install(format!("bad target {}", target.display())))?;
    let temp = paths
        .root()
        .join(format!(".anchors.new.{}", std::process::id()));

    if std::fs::symlink_metadata(&temp).is_ok() {
        std::fs::remove_file(&temp)?;
    }
    std::os::unix::fs::symlink(name, &temp)?;
    std::fs::rename(&temp, link).map_err(|e| {
        let _ = std::fs::remove_file(&temp);
        UpdaterError::Install(format!("pointer swap failed: {e}"))
    })?;
    Ok(())
}

/// Same-version forced re-install.
///
/// The freshly unpacked bundle sits under the disambiguated name but
/// must end up under the standard one, which the live bundle currently
/// occupies. Hop the pointer through a snapshot so it never dangles:
/// snapshot the live bundle, point at the snapshot, vacate the
/// standard name, rename the new bundle into it, point back. The
/// snapshot then becomes the single retained backup.
fn reinstall_same_version(
    paths: &InstallPaths,
    version: &str,
    new_bundle: &Path,
    standard: &Path,
) -> Result<()> {
    let link = paths.anchors_link();
    let snapshot = paths.root().join(format!("bundle-{version}.snapshot"));

    if snapshot.exists() {
        std::fs::remove_dir_all(&snapshot)?;
    }
    copy_dir_recursive(standard, &snapshot)?;

    swap_pointer(paths, &link, &snapshot)?;
    std::fs::remove_dir_all(standard).map_err(|e| {
        UpdaterError::Install(format!("cannot vacate {}: {e}", standard.display()))
    })?;
    std::fs::rename(new_bundle, standard).map_err(|e| {
        UpdaterError::Install(format!(
            "cannot move {} into place: {e}",
            new_bundle.display()
        ))
    })?;
    swap_pointer(paths, &link, standard)?;
    info!("Re-installed bundle {}", standard.display());

    // The pre-reinstall snapshot is the backup generation now.
    delete_existing_backups(paths);
    let backup = paths.root().join(format!("bundle-{version}{BACKUP_SUFFIX}"));
    if let Err(e) = std::fs::rename(&snapshot, &backup) {
        warn!("Could not keep snapshot as backup: {e}");
        let _ = std::fs::remove_dir_all(&snapshot);
    }

    Ok(())
}

/// Keep exactly one backup generation: drop the previous ones, then
/// rename the displaced bundle to its backup name.
fn rotate_backup(paths: &InstallPaths, prev: &Path) {
    delete_existing_backups(paths);

    let Some(name) = prev.file_name().and_then(|n| n.to_str()) else {
        return;
    };
    let backup = paths.root().join(format!("{name}{BACKUP_SUFFIX}"));
    match std::fs::rename(prev, &backup) {
        Ok(()) => info!("Kept previous bundle as {}", backup.display()),
        Err(e) => warn!("Backup rotation failed for {}: {e}", prev.display()),
    }
}

fn delete_existing_backups(paths: &InstallPaths) {
    let Ok(entries) = std::fs::read_dir(paths.root()) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name.ends_with(BACKUP_SUFFIX) && path.is_dir() {
            debug!("Dropping old backup {name}");
            if let Err(e) = std::fs::remove_dir_all(&path) {
                warn!("Could not remove old backup {name}: {e}");
            }
        }
    }
}

/// Copy revocation lists from the outgoing bundle for authorities that
/// still exist in the new one. A verifier that finds no list for an
/// authority may treat all its certificates as non-revoked, so dropping
/// carried lists across an update would be a security regression.
fn carry_revocation_lists(current_dir: &Path, new_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(current_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let is_revocation = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| REVOCATION_EXTENSIONS.contains(&e));
        if !is_revocation {
            continue;
        }

        let authority = name.split('.').next().unwrap_or(name);
        if !authority_present(new_dir, authority) {
            debug!("Authority {authority} gone from new bundle; dropping {name}");
            continue;
        }

        let dest = new_dir.join(name);
        if dest.exists() {
            // The server shipped a fresher list
            continue;
        }
        match std::fs::copy(&path, &dest) {
            Ok(_) => info!("Carried forward revocation list {name}"),
            Err(e) => warn!("Could not carry forward {name}: {e}"),
        }
    }
}

fn authority_present(dir: &Path, authority: &str) -> bool {
    let prefix = format!("{authority}.");
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    entries.flatten().any(|entry| {
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&prefix))
    })
}

/// Recursive copy preserving symlinks, for the pre-reinstall snapshot.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst)?;

    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = std::fs::read_link(&src_path)?;
            std::os::unix::fs::symlink(target, &dst_path)?;
        } else if file_type.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }

    Ok(())
}
