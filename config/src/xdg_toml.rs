//! `[env]` table from `$XDG_CONFIG_HOME/<app>/config.toml`.
//!
//! Scalar values are accepted and stringified, so `HOOKRELAY_TIMEOUT = 10`
//! works as well as `"10"`.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::LoadError;

/// `$XDG_CONFIG_HOME` when set and absolute, else the platform config dir.
pub fn config_home() -> Option<PathBuf> {
    std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .or_else(dirs::config_dir)
}

pub fn config_path(app_name: &str) -> Option<PathBuf> {
    config_home().map(|dir| dir.join(app_name).join("config.toml"))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: toml::Table,
}

/// Missing file or missing `[env]` returns an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let Some(path) = config_path(app_name).filter(|p| p.is_file()) else {
        return Ok(HashMap::new());
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let file: ConfigFile = toml::from_str(&content)?;

    let mut out = HashMap::with_capacity(file.env.len());
    for (key, value) in file.env {
        let value = match value {
            toml::Value::String(s) => s,
            toml::Value::Integer(i) => i.to_string(),
            toml::Value::Float(f) => f.to_string(),
            toml::Value::Boolean(b) => b.to_string(),
            other => {
                return Err(LoadError::XdgValue {
                    key,
                    kind: other.type_str(),
                })
            }
        };
        out.insert(key, value);
    }
    Ok(out)
}
