//! Settings file
//!
//! A [`CacheConfig`] can live in a JSON file owned by the host application.
//! Saving stages the new settings in a hidden sibling file and renames it
//! over the target, so readers see either the old or the new settings.

use anyhow::{Context, Result};
use std::ffi::{OsStr, OsString};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::CacheConfig;

impl CacheConfig {
    /// Read settings from `path`. Keys the file omits keep their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read(path)
            .with_context(|| format!("reading settings from {}", path.display()))?;
        let config: CacheConfig = serde_json::from_slice(&raw)
            .with_context(|| format!("parsing settings in {}", path.display()))?;

        tracing::debug!(path = %path.display(), ?config, "loaded settings");
        Ok(config)
    }

    /// Like [`CacheConfig::load`], but a file that does not exist yields the
    /// defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match path.try_exists() {
            Ok(true) => Self::load(path),
            Ok(false) => {
                tracing::debug!(path = %path.display(), "no settings file; using defaults");
                Ok(Self::default())
            }
            Err(err) => Err(err).with_context(|| format!("checking {}", path.display())),
        }
    }

    /// Save as pretty JSON, replacing any previous file in one rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(self).context("encoding settings")?;
        let staging = staging_path(path);

        if let Err(err) = stage(&staging, &encoded) {
            let _ = fs::remove_file(&staging);
            return Err(err);
        }
        if let Err(err) = fs::rename(&staging, path) {
            let _ = fs::remove_file(&staging);
            return Err(err).with_context(|| format!("replacing {}", path.display()));
        }

        tracing::debug!(path = %path.display(), "saved settings");
        Ok(())
    }
}

/// `dir/.name.<pid>.partial` next to `path`
fn staging_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(path.file_name().unwrap_or_else(|| OsStr::new("settings")));
    name.push(format!(".{}.partial", std::process::id()));
    path.with_file_name(name)
}

fn stage(staging: &Path, data: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(staging)
        .with_context(|| format!("creating {}", staging.display()))?;
    file.write_all(data)
        .with_context(|| format!("writing {}", staging.display()))?;
    file.sync_data()
        .with_context(|| format!("flushing {}", staging.display()))
}
