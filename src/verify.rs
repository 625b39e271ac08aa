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

//! Downloaded-artifact integrity verification
//!
//! SHA-256 wins when the description carries it; MD5 is the legacy
//! fallback; with no digest at all the artifact is accepted with an
//! "unverified" notice. Availability over paranoia when the source
//! offers nothing to check against.

use crate::error::Result;
use crate::fetch::BundleDescription;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Good,
    Corrupt {
        kind: &'static str,
        expected: String,
        actual: String,
    },
}

/// Check the local artifact against the digests in the description.
pub fn verify(description: &BundleDescription, artifact: &Path) -> Result<Verdict> {
    if let Some(expected) = digest_value(&description.tarball_sha256) {
        let actual = file_digest::<Sha256>(artifact)?;
        return Ok(compare("SHA256", &expected, &actual));
    }

    if let Some(expected) = digest_value(&description.tarball_md5) {
        let actual = file_digest::<Md5>(artifact)?;
        return Ok(compare("MD5", &expected, &actual));
    }

    warn!(
        "No digest in description for {}; proceeding unverified",
        artifact.display()
    );
    Ok(Verdict::Good)
}

fn digest_value(field: &Option<String>) -> Option<String> {
    field
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
}

fn compare(kind: &'static str, expected: &str, actual: &str) -> Verdict {
    if expected == actual {
        info!("{kind} digest verified: {actual}");
        Verdict::Good
    } else {
        warn!("{kind} digest mismatch: expected {expected}, got {actual}");
        Verdict::Corrupt {
            kind,
            expected: expected.to_owned(),
            actual: actual.to_owned(),
        }
    }
}

fn file_digest<D: Digest + std::io::Write>(path: &Path) -> Result<String> {
    use std::fmt::Write as _;

    let mut file = std::fs::File::open(path)?;
    let mut hasher = D::new();
    std::io::copy(&mut file, &mut hasher)?;
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn description(sha256: Option<&str>, md5: Option<&str>) -> BundleDescription {
        BundleDescription {
            certs_version: "2.68".to_owned(),
            data_version: "2026.08.1".to_owned(),
            tarball_url: "t.tar.gz".to_owned(),
            tarball_md5: md5.map(str::to_owned),
            tarball_sha256: sha256.map(str::to_owned),
            timestamp: "2026-08-29T04:00:00Z".to_owned(),
        }
    }

    fn artifact(dir: &TempDir, content: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join("bundle.tar.gz");
        std::fs::write(&path, content).unwrap();
        path
    }

    fn sha256_of(content: &[u8]) -> String {
        format!("{:x}", Sha256::digest(content))
    }

    fn md5_of(content: &[u8]) -> String {
        format!("{:x}", Md5::digest(content))
    }

    #[test]
    fn test_sha256_match() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"bundle content");
        let description = description(Some(&sha256_of(b"bundle content")), None);
        assert_eq!(verify(&description, &path).unwrap(), Verdict::Good);
    }

    #[test]
    fn test_sha256_mismatch_is_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"tampered content");
        let description = description(Some(&sha256_of(b"bundle content")), None);
        assert!(matches!(
            verify(&description, &path).unwrap(),
            Verdict::Corrupt { kind: "SHA256", .. }
        ));
    }

    #[test]
    fn test_sha256_wins_over_matching_md5() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"bundle content");
        // MD5 matches, SHA256 does not: the strong hash decides
        let description = description(
            Some(&sha256_of(b"something else")),
            Some(&md5_of(b"bundle content")),
        );
        assert!(matches!(
            verify(&description, &path).unwrap(),
            Verdict::Corrupt { kind: "SHA256", .. }
        ));
    }

    #[test]
    fn test_md5_fallback_match() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"bundle content");
        let description = description(None, Some(&md5_of(b"bundle content")));
        assert_eq!(verify(&description, &path).unwrap(), Verdict::Good);
    }

    #[test]
    fn test_md5_fallback_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"tampered");
        let description = description(None, Some(&md5_of(b"bundle content")));
        assert!(matches!(
            verify(&description, &path).unwrap(),
            Verdict::Corrupt { kind: "MD5", .. }
        ));
    }

    #[test]
    fn test_no_digest_is_accepted_unverified() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"whatever");
        let description = description(None, None);
        assert_eq!(verify(&description, &path).unwrap(), Verdict::Good);
    }

    #[test]
    fn test_digest_comparison_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"bundle content");
        let upper = sha256_of(b"bundle content").to_uppercase();
        let description = description(Some(&upper), None);
        assert_eq!(verify(&description, &path).unwrap(), Verdict::Good);
    }

    #[test]
    fn test_file_digest_matches_concrete_hasher() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"bundle content");
        assert_eq!(
            file_digest::<Sha256>(&path).unwrap(),
            sha256_of(b"bundle content")
        );
        assert_eq!(file_digest::<Md5>(&path).unwrap(), md5_of(b"bundle content"));
    }

    #[test]
    fn test_blank_digest_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = artifact(&dir, b"whatever");
        let description = description(Some("  "), Some(""));
        assert_eq!(verify(&description, &path).unwrap(), Verdict::Good);
    }
}
