//! Server settings.
//!
//! Settings come from a JSON file found at the first existing standard
//! location (or a path given on the command line). When no settings
//! file exists anywhere, a default one is written so there is something
//! to edit.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Where project definitions live; watched under `enabled/`.
    pub project_dir: PathBuf,
    /// Root of all per-project data directories.
    pub data_dir: PathBuf,
    /// Listen address, e.g. "0.0.0.0:8026".
    pub address: String,
    /// TLS is enabled when both of these are set.
    pub cert_file: String,
    pub key_file: String,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            project_dir: PathBuf::from("./projects"),
            data_dir: PathBuf::from("./data"),
            address: "0.0.0.0:8026".to_string(),
            cert_file: String::new(),
            key_file: String::new(),
        }
    }
}

impl Config {
    /// Candidate settings locations, in priority order: the per-OS
    /// config directory, `/etc/ironsmith`, then the working directory.
    pub fn standard_locations() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dirs) = directories::ProjectDirs::from("", "", "ironsmith") {
            paths.push(dirs.config_dir().join(SETTINGS_FILE));
        }
        paths.push(Path::new("/etc/ironsmith").join(SETTINGS_FILE));
        paths.push(PathBuf::from("ironsmith.settings.json"));
        paths
    }

    /// Loads settings from `explicit` if given, otherwise from the
    /// first standard location that exists; failing that, writes the
    /// defaults to the preferred location. Returns the settings and the
    /// path they came from.
    pub fn load_or_create(explicit: Option<&Path>) -> anyhow::Result<(Config, PathBuf)> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, path.to_path_buf()));
        }

        let candidates = Self::standard_locations();
        for path in &candidates {
            if path.exists() {
                return Ok((Self::load(path)?, path.clone()));
            }
        }

        let path = candidates
            .first()
            .cloned()
            .unwrap_or_else(|| PathBuf::from("ironsmith.settings.json"));
        let config = Config::default();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating settings directory {}", parent.display()))?;
        }
        fs::write(&path, serde_json::to_vec_pretty(&config)?)
            .with_context(|| format!("writing default settings to {}", path.display()))?;

        Ok((config, path))
    }

    fn load(path: &Path) -> anyhow::Result<Config> {
        let data = fs::read(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing settings file {}", path.display()))
    }

    pub fn tls_enabled(&self) -> bool {
        !self.cert_file.is_empty() && !self.key_file.is_empty()
    }
}
