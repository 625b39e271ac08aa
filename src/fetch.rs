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

//! Bundle description and tarball retrieval
//!
//! Deliberately thin: fetch a document, return structured data or fail.
//! There is no retry here; a failed fetch fails the run and the next
//! scheduled invocation is the retry.

use crate::error::{Result, UpdaterError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const USER_AGENT: &str = "trustroot-updater/0.3.2";

/// What the server says about the current bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleDescription {
    pub certs_version: String,
    pub data_version: String,
    pub tarball_url: String,
    #[serde(default)]
    pub tarball_md5: Option<String>,
    #[serde(default)]
    pub tarball_sha256: Option<String>,
    pub timestamp: String,
}

impl BundleDescription {
    /// An incomplete description is a fatal precondition failure.
    pub fn validate(&self) -> Result<()> {
        if self.certs_version.trim().is_empty() {
            return Err(UpdaterError::Description("empty certs_version".to_owned()));
        }
        if self.tarball_url.trim().is_empty() {
            return Err(UpdaterError::Description("empty tarball_url".to_owned()));
        }
        Ok(())
    }
}

fn client() -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| UpdaterError::Fetch(format!("failed to build HTTP client: {e}")))
}

/// Fetch and parse the bundle description document at `source_url`.
pub fn fetch_description(source_url: &str) -> Result<BundleDescription> {
    let response = client()?
        .get(source_url)
        .send()
        .map_err(|e| UpdaterError::Fetch(format!("request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(UpdaterError::Fetch(format!(
            "description fetch failed with status {}",
            response.status()
        )));
    }

    response
        .json()
        .map_err(|e| UpdaterError::Description(format!("failed to parse description: {e}")))
}

/// Download the bundle tarball into `dest_dir`, returning the local
/// path. The body is streamed to disk, never buffered whole.
pub fn fetch_tarball(url: &str, dest_dir: &Path) -> Result<PathBuf> {
    let mut response = client()?
        .get(url)
        .send()
        .map_err(|e| UpdaterError::Fetch(format!("request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(UpdaterError::Fetch(format!(
            "tarball fetch failed with status {}",
            response.status()
        )));
    }

    let name = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("bundle.tar.gz");
    let dest = dest_dir.join(name);
    let mut file = std::fs::File::create(&dest)?;
    let copied = response
        .copy_to(&mut file)
        .map_err(|e| UpdaterError::Fetch(format!("failed to read tarball body: {e}")))?;

    tracing::debug!("Fetched {copied} bytes to {}", dest.display());
    Ok(dest)
}

/// Resolve a possibly-relative tarball URL against the description URL.
pub fn resolve_tarball_url(source_url: &str, tarball_url: &str) -> String {
    if tarball_url.contains("://") {
        return tarball_url.to_owned();
    }
    match source_url.rsplit_once('/') {
        Some((base, _)) => format!("{base}/{tarball_url}"),
        None => tarball_url.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn description_json() -> String {
        serde_json::json!({
            "certs_version": "2.68",
            "data_version": "2026.08.1",
            "tarball_url": "trust-bundle-2.68.tar.gz",
            "tarball_sha256": "ab".repeat(32),
            "timestamp": "2026-08-29T04:00:00Z",
        })
        .to_string()
    }

    #[test]
    fn test_fetch_description() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/bundle.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(description_json())
            .create();

        let url = format!("{}/bundle.json", server.url());
        let description = fetch_description(&url).unwrap();
        assert_eq!(description.certs_version, "2.68");
        assert_eq!(description.tarball_url, "trust-bundle-2.68.tar.gz");
        assert!(description.tarball_md5.is_none());
        description.validate().unwrap();

        mock.assert();
    }

    #[test]
    fn test_fetch_description_not_found() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/bundle.json")
            .with_status(404)
            .create();

        let url = format!("{}/bundle.json", server.url());
        let result = fetch_description(&url);
        assert!(matches!(result, Err(UpdaterError::Fetch(_))));

        mock.assert();
    }

    #[test]
    fn test_fetch_description_garbage_body() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/bundle.json")
            .with_status(200)
            .with_body("not json at all")
            .create();

        let url = format!("{}/bundle.json", server.url());
        assert!(matches!(
            fetch_description(&url),
            Err(UpdaterError::Description(_))
        ));
    }

    #[test]
    fn test_validate_rejects_incomplete() {
        let mut description: BundleDescription =
            serde_json::from_str(&description_json()).unwrap();
        description.certs_version = " ".to_owned();
        assert!(description.validate().is_err());

        let mut description: BundleDescription =
            serde_json::from_str(&description_json()).unwrap();
        description.tarball_url = String::new();
        assert!(description.validate().is_err());
    }

    #[test]
    fn test_fetch_tarball() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/trust-bundle-2.68.tar.gz")
            .with_status(200)
            .with_body(b"tarball bytes".as_slice())
            .create();

        let dir = TempDir::new().unwrap();
        let url = format!("{}/trust-bundle-2.68.tar.gz", server.url());
        let path = fetch_tarball(&url, dir.path()).unwrap();

        assert_eq!(path.file_name().unwrap(), "trust-bundle-2.68.tar.gz");
        assert_eq!(std::fs::read(&path).unwrap(), b"tarball bytes");

        mock.assert();
    }

    #[test]
    fn test_fetch_tarball_server_error_is_fatal() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", "/trust-bundle-2.68.tar.gz")
            .with_status(500)
            .create();

        let dir = TempDir::new().unwrap();
        let url = format!("{}/trust-bundle-2.68.tar.gz", server.url());
        assert!(matches!(
            fetch_tarball(&url, dir.path()),
            Err(UpdaterError::Fetch(_))
        ));
    }

    #[test]
    fn test_resolve_tarball_url() {
        assert_eq!(
            resolve_tarball_url("https://trust.example.com/pub/bundle.json", "t.tar.gz"),
            "https://trust.example.com/pub/t.tar.gz"
        );
        assert_eq!(
            resolve_tarball_url(
                "https://trust.example.com/pub/bundle.json",
                "https://mirror.example.org/t.tar.gz"
            ),
            "https://mirror.example.org/t.tar.gz"
        );
    }
}
