//! Layered environment for hookrelay.
//!
//! Values come from three places and are written into the process environment
//! with priority **existing env > project `.env` > `$XDG_CONFIG_HOME/<app>/config.toml` `[env]`**.
//! The binary then reads its settings from the environment (clap `env = ...`).

mod dotenv;
mod xdg_toml;

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use thiserror::Error;

pub use xdg_toml::{config_home, config_path};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("xdg config [env] {key} must be a string, number or boolean, found {kind}")]
    XdgValue { key: String, kind: &'static str },
    #[error("read {}: {message}", path.display())]
    Dotenv { path: PathBuf, message: String },
}

/// Where an applied value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Dotenv,
    Xdg,
}

/// Keys written into the environment by [`load_and_apply`], with their source.
/// Values are not kept: they may be secrets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    pub keys: BTreeMap<String, Source>,
}

impl Applied {
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn source(&self, key: &str) -> Option<Source> {
        self.keys.get(key).copied()
    }
}

/// Loads `.env` and the XDG config for `app_name` and sets every key not already
/// present in the process environment.
///
/// * `app_name`: XDG sub-directory, e.g. `"hookrelay"`.
/// * `override_dir`: look for `.env` here instead of the current directory.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<Applied, LoadError> {
    let xdg_map = xdg_toml::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir)?;
    Ok(apply(merge(dotenv_map, xdg_map)))
}

/// `.env` wins over XDG for the same key.
fn merge(
    dotenv_map: HashMap<String, String>,
    xdg_map: HashMap<String, String>,
) -> BTreeMap<String, (String, Source)> {
    let mut merged: BTreeMap<String, (String, Source)> = xdg_map
        .into_iter()
        .map(|(k, v)| (k, (v, Source::Xdg)))
        .collect();
    merged.extend(dotenv_map.into_iter().map(|(k, v)| (k, (v, Source::Dotenv))));
    merged
}

fn apply(merged: BTreeMap<String, (String, Source)>) -> Applied {
    let mut applied = Applied::default();
    for (key, (value, source)) in merged {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        std::env::set_var(&key, value);
        applied.keys.insert(key, source);
    }
    applied
}
