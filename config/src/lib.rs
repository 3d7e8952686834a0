//! Loads deepresearch settings from `$XDG_CONFIG_HOME/<app>/config.toml` and a project `.env`,
//! then exports them into the process environment with priority
//! **existing env > .env > XDG**.
//!
//! Typed settings are read from the environment afterwards (`ResearchConfig::from_env`
//! in the core crate), so every source ends up behind the same `DEEPRESEARCH_*` keys.

mod dotenv;
mod xdg_toml;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use xdg_toml::config_file_path;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("xdg config path: {0}")]
    XdgPath(String),
    #[error("read xdg config: {0}")]
    XdgRead(std::io::Error),
    #[error("parse xdg toml: {0}")]
    XdgParse(#[from] toml::de::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Merges the file sources without touching the environment: `.env` entries win over
/// the XDG `[env]` table.
///
/// * `xdg_home`: base config directory; `None` resolves `$XDG_CONFIG_HOME` or the platform default.
/// * `dotenv_dir`: directory holding `.env`; `None` uses the current directory.
pub fn resolve_env(
    app_name: &str,
    xdg_home: Option<&Path>,
    dotenv_dir: Option<&Path>,
) -> Result<BTreeMap<String, String>, LoadError> {
    let xdg_home: PathBuf = match xdg_home {
        Some(p) => p.to_path_buf(),
        None => xdg_toml::config_home()?,
    };
    let mut merged: BTreeMap<String, String> =
        xdg_toml::load_env_map(&xdg_home, app_name)?.into_iter().collect();
    merged.extend(dotenv::load_env_map(dotenv_dir).map_err(LoadError::DotenvRead)?);
    Ok(merged)
}

/// Sets every key of `values` that is not already present in the environment.
/// Returns the keys that were set.
pub fn apply_missing(values: BTreeMap<String, String>) -> Vec<String> {
    let mut applied = Vec::new();
    for (key, value) in values {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        std::env::set_var(&key, value);
        applied.push(key);
    }
    applied
}

/// Resolves `.env` and XDG config for `app_name` and applies the keys missing from the
/// process environment. `override_dir` replaces the current directory as `.env` location.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<Vec<String>, LoadError> {
    let values = resolve_env(app_name, None, override_dir)?;
    Ok(apply_missing(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn write_xdg(home: &Path, app: &str, body: &str) {
        let dir = home.join(app);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.toml"), body).unwrap();
    }

    /// **Scenario**: A key already in the environment is never overwritten.
    #[test]
    fn existing_env_wins() {
        env::set_var("DEEPRESEARCH_CFG_TEST_EXISTING", "from_env");
        let applied = apply_missing(BTreeMap::from([(
            "DEEPRESEARCH_CFG_TEST_EXISTING".to_string(),
            "from_file".to_string(),
        )]));
        assert!(applied.is_empty());
        assert_eq!(
            env::var("DEEPRESEARCH_CFG_TEST_EXISTING").as_deref(),
            Ok("from_env")
        );
        env::remove_var("DEEPRESEARCH_CFG_TEST_EXISTING");
    }

    #[test]
    fn missing_key_is_applied() {
        env::remove_var("DEEPRESEARCH_CFG_TEST_MISSING");
        let applied = apply_missing(BTreeMap::from([(
            "DEEPRESEARCH_CFG_TEST_MISSING".to_string(),
            "7".to_string(),
        )]));
        assert_eq!(applied, vec!["DEEPRESEARCH_CFG_TEST_MISSING".to_string()]);
        assert_eq!(env::var("DEEPRESEARCH_CFG_TEST_MISSING").as_deref(), Ok("7"));
        env::remove_var("DEEPRESEARCH_CFG_TEST_MISSING");
    }

    /// **Scenario**: No config file and no `.env` resolve to nothing.
    #[test]
    fn no_sources_resolve_empty() {
        let xdg = tempfile::tempdir().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let values = resolve_env("deepresearch", Some(xdg.path()), Some(cwd.path())).unwrap();
        assert!(values.is_empty());
    }

    /// **Scenario**: The same key in both files resolves to the `.env` value.
    #[test]
    fn dotenv_overrides_xdg() {
        let xdg = tempfile::tempdir().unwrap();
        write_xdg(
            xdg.path(),
            "deepresearch",
            "[env]\nDEEPRESEARCH_MAX_ITERATIONS = \"5\"\nDEEPRESEARCH_USER_ID = \"xdg_user\"\n",
        );
        let cwd = tempfile::tempdir().unwrap();
        std::fs::write(cwd.path().join(".env"), "DEEPRESEARCH_MAX_ITERATIONS=9\n").unwrap();

        let values = resolve_env("deepresearch", Some(xdg.path()), Some(cwd.path())).unwrap();
        assert_eq!(values.get("DEEPRESEARCH_MAX_ITERATIONS").map(String::as_str), Some("9"));
        assert_eq!(values.get("DEEPRESEARCH_USER_ID").map(String::as_str), Some("xdg_user"));
    }

    #[test]
    fn invalid_xdg_toml_is_parse_error() {
        let xdg = tempfile::tempdir().unwrap();
        write_xdg(xdg.path(), "deepresearch", "invalid [[[\n");
        let cwd = tempfile::tempdir().unwrap();
        let result = resolve_env("deepresearch", Some(xdg.path()), Some(cwd.path()));
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
