//! `[env]` table of `<config home>/<app>/config.toml`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::LoadError;

/// `$XDG_CONFIG_HOME` when set and absolute, otherwise the platform config directory.
pub(crate) fn config_home() -> Result<PathBuf, LoadError> {
    if let Some(home) = std::env::var_os("XDG_CONFIG_HOME").map(PathBuf::from) {
        if home.is_absolute() {
            return Ok(home);
        }
    }
    dirs::config_dir().ok_or_else(|| LoadError::XdgPath("no config directory for this platform".into()))
}

/// Where `app_name` keeps its config file, whether or not it exists.
pub fn config_file_path(app_name: &str) -> Result<PathBuf, LoadError> {
    Ok(config_home()?.join(app_name).join("config.toml"))
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Missing file or missing `[env]` section yields an empty map.
pub(crate) fn load_env_map(
    config_home: &Path,
    app_name: &str,
) -> Result<HashMap<String, String>, LoadError> {
    let path = config_home.join(app_name).join("config.toml");
    if !path.is_file() {
        return Ok(HashMap::new());
    }
    let content = std::fs::read_to_string(&path).map_err(LoadError::XdgRead)?;
    let file: ConfigFile = toml::from_str(&content)?;
    Ok(file.env)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn home_with(app: &str, body: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let app_dir = dir.path().join(app);
        std::fs::create_dir_all(&app_dir).unwrap();
        std::fs::write(app_dir.join("config.toml"), body).unwrap();
        dir
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_map(dir.path(), "deepresearch").unwrap().is_empty());
    }

    #[test]
    fn reads_env_table() {
        let home = home_with(
            "deepresearch",
            "[env]\nDEEPRESEARCH_DB = \"/tmp/r.db\"\nDEEPRESEARCH_USER_ID = \"ana\"\n",
        );
        let map = load_env_map(home.path(), "deepresearch").unwrap();
        assert_eq!(map.get("DEEPRESEARCH_DB").map(String::as_str), Some("/tmp/r.db"));
        assert_eq!(map.get("DEEPRESEARCH_USER_ID").map(String::as_str), Some("ana"));
    }

    /// **Scenario**: Other tables are ignored; only `[env]` is exported.
    #[test]
    fn other_sections_ignored() {
        let home = home_with("deepresearch", "[research]\nmax_iterations = 3\n");
        assert!(load_env_map(home.path(), "deepresearch").unwrap().is_empty());
    }

    #[test]
    fn bad_toml_is_parse_error() {
        let home = home_with("deepresearch", "not valid toml [[[\n");
        let result = load_env_map(home.path(), "deepresearch");
        assert!(matches!(result, Err(LoadError::XdgParse(_))));
    }
}
