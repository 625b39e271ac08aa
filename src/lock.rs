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

//! Advisory single-instance guard
//!
//! Exclusivity is best-effort: a wedged prior instance is terminated and
//! its lock overwritten, and a failure to write our own lock degrades to
//! a warning rather than failing the run. A pid file whose pid now
//! belongs to an unrelated process (pid reuse) is discarded without
//! killing anything.

use crate::paths::{InstallPaths, SCRATCH_PREFIX};
use sysinfo::{Pid, System};
use tracing::{debug, info, warn};

/// Our process name as the kernel reports it. Linux truncates comm
/// names to 15 bytes, so matching tolerates truncation on both sides.
const PROCESS_NAME: &str = "trustroot-updater";

fn names_match(reported: &str) -> bool {
    // Exact name or the exact kernel truncation, nothing looser: a
    // recycled pid may belong to any process, and a shorter name that
    // merely prefixes ours must never be signalled.
    reported == PROCESS_NAME || reported == &PROCESS_NAME[..15]
}

/// Take the lock, displacing a stale prior instance if one is wedged.
///
/// Never fails the run: every error path is a logged warning.
pub fn acquire(paths: &InstallPaths) {
    let lock_path = paths.lock_file();

    if let Ok(content) = std::fs::read_to_string(&lock_path) {
        match content.trim().parse::<u32>() {
            Ok(pid) if pid != std::process::id() => takeover(pid),
            Ok(_) => debug!("Lock file already holds our own pid"),
            Err(_) => warn!("Ignoring unparseable lock file {}", lock_path.display()),
        }
    }

    sweep_scratch_dirs(paths);

    if let Err(e) = std::fs::remove_file(&lock_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove old lock file: {e}");
        }
    }
    if let Err(e) = std::fs::write(&lock_path, format!("{}\n", std::process::id())) {
        warn!(
            "Could not write lock file {}: {e}; continuing without exclusivity",
            lock_path.display()
        );
    }
}

/// Remove the lock at run end. Best effort.
pub fn release(paths: &InstallPaths) {
    let lock_path = paths.lock_file();
    if let Err(e) = std::fs::remove_file(&lock_path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Could not remove lock file: {e}");
        }
    }
}

/// Terminate a prior instance if the pid is still ours. The match is
/// on process name, never on pid alone.
fn takeover(pid: u32) {
    let mut system = System::new();
    system.refresh_processes();

    let Some(process) = system.process(Pid::from_u32(pid)) else {
        debug!("Previous lock holder {pid} is gone");
        return;
    };

    if !names_match(process.name()) {
        info!(
            "Pid {pid} from lock file now belongs to '{}'; leaving it alone",
            process.name()
        );
        return;
    }

    warn!("Terminating wedged prior instance (pid {pid})");
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid as NixPid;

        if let Err(e) = kill(NixPid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!("Failed to signal pid {pid}: {e}");
        }
    }
}

/// Remove orphaned scratch directories from prior runs. A crashed or
/// killed instance cannot clean up after itself, so the next run does.
fn sweep_scratch_dirs(paths: &InstallPaths) {
    let Ok(entries) = std::fs::read_dir(paths.root()) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(SCRATCH_PREFIX) {
            info!("Removing orphaned scratch directory {name}");
            if let Err(e) = std::fs::remove_dir_all(entry.path()) {
                warn!("Could not remove {name}: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> InstallPaths {
        InstallPaths::new(dir.path())
    }

    #[test]
    fn test_acquire_writes_own_pid() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);

        acquire(&paths);

        let content = std::fs::read_to_string(paths.lock_file()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_dead_pid_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        // Pid far above any default pid_max
        std::fs::write(paths.lock_file(), "999999999\n").unwrap();

        acquire(&paths);

        let content = std::fs::read_to_string(paths.lock_file()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_unrelated_live_pid_not_killed() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        // Pid 1 is alive but is never named like us
        std::fs::write(paths.lock_file(), "1\n").unwrap();

        acquire(&paths);

        let mut system = System::new();
        system.refresh_processes();
        assert!(system.process(Pid::from_u32(1)).is_some());
        let content = std::fs::read_to_string(paths.lock_file()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_garbage_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        std::fs::write(paths.lock_file(), "not-a-pid\n").unwrap();

        acquire(&paths);

        let content = std::fs::read_to_string(paths.lock_file()).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_orphaned_scratch_dirs_swept() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        let orphan = dir.path().join(format!("{SCRATCH_PREFIX}abc123"));
        std::fs::create_dir(&orphan).unwrap();
        std::fs::write(orphan.join("halfway.pem"), b"x").unwrap();
        let unrelated = dir.path().join("bundle-2.68");
        std::fs::create_dir(&unrelated).unwrap();

        acquire(&paths);

        assert!(!orphan.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn test_release_removes_lock() {
        let dir = TempDir::new().unwrap();
        let paths = paths(&dir);
        acquire(&paths);
        assert!(paths.lock_file().exists());
        release(&paths);
        assert!(!paths.lock_file().exists());
    }

    #[test]
    fn test_release_tolerates_missing_lock() {
        let dir = TempDir::new().unwrap();
        release(&paths(&dir));
    }

    #[test]
    fn test_name_matching_tolerates_truncation() {
        assert!(names_match("trustroot-updater"));
        assert!(names_match("trustroot-updat"));
        assert!(!names_match("systemd"));
        assert!(!names_match(""));
    }

    #[test]
    fn test_name_matching_rejects_shorter_prefixes() {
        // A recycled pid can land on any process; a name that merely
        // prefixes ours is not a prior instance
        assert!(!names_match("t"));
        assert!(!names_match("trust"));
        assert!(!names_match("trustroot"));
        assert!(!names_match("trustroot-updater2"));
    }
}
