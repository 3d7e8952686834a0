//! `.env` parsing. Applying to the environment happens in the crate root.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn dotenv_path(dir: Option<&Path>) -> Option<PathBuf> {
    let dir = match dir {
        Some(d) => d.to_path_buf(),
        None => std::env::current_dir().ok()?,
    };
    let path = dir.join(".env");
    path.is_file().then_some(path)
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        return value[1..value.len() - 1].replace("\\\"", "\"");
    }
    if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
        return value[1..value.len() - 1].to_string();
    }
    value.to_string()
}

/// `KEY=VALUE` per line. Blank lines and `#` lines are skipped, an `export ` prefix is
/// accepted, values may be single- or double-quoted. No multi-line values.
fn parse_dotenv(content: &str) -> HashMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (key, value) = line.split_once('=')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), unquote(value.trim())))
        })
        .collect()
}

/// Missing `.env` yields an empty map.
pub(crate) fn load_env_map(dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    match dotenv_path(dir) {
        Some(path) => Ok(parse_dotenv(&std::fs::read_to_string(path)?)),
        None => Ok(HashMap::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get<'a>(m: &'a HashMap<String, String>, k: &str) -> Option<&'a str> {
        m.get(k).map(String::as_str)
    }

    #[test]
    fn parses_pairs_and_skips_noise() {
        let m = parse_dotenv("\n# db\nDEEPRESEARCH_DB=run.db\nNO_EQUALS\n=orphan\n  \nA=1\n");
        assert_eq!(m.len(), 2);
        assert_eq!(get(&m, "DEEPRESEARCH_DB"), Some("run.db"));
        assert_eq!(get(&m, "A"), Some("1"));
    }

    /// **Scenario**: Quoted values lose their quotes; escaped double quotes survive.
    #[test]
    fn quoted_values() {
        let m = parse_dotenv(
            "A=\"hello world\"\nB='single'\nC=\"say \\\"hi\\\"\"\nD=\"\"\nE=\n",
        );
        assert_eq!(get(&m, "A"), Some("hello world"));
        assert_eq!(get(&m, "B"), Some("single"));
        assert_eq!(get(&m, "C"), Some("say \"hi\""));
        assert_eq!(get(&m, "D"), Some(""));
        assert_eq!(get(&m, "E"), Some(""));
    }

    #[test]
    fn export_prefix_accepted() {
        let m = parse_dotenv("export DEEPRESEARCH_USER_ID=ana\n");
        assert_eq!(get(&m, "DEEPRESEARCH_USER_ID"), Some("ana"));
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_env_map(Some(dir.path())).unwrap().is_empty());
    }

    #[test]
    fn reads_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".env"), "A=1\nB=2\n").unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(get(&m, "A"), Some("1"));
        assert_eq!(get(&m, "B"), Some("2"));
    }
}
