//! Child process environment construction
//!
//! Builds the environment for a spawn from a snapshot of the parent's
//! variables. The snapshot is copied, never mutated, so building is a pure
//! function of its inputs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Locale used when the parent has none
pub const DEFAULT_LANG: &str = "en_US.UTF-8";

/// Variables that would redirect the agent's own package manager lookups
const STRIPPED_VARIABLES: &[&str] = &["npm_config_prefix", "NPM_CONFIG_PREFIX"];

/// Tool directories relative to the user's home
const HOME_RELATIVE_ENTRIES: &[&[&str]] = &[
    &["Library", "pnpm"],
    &[".local", "share", "pnpm"],
    &[".local", "bin"],
    &[".cargo", "bin"],
    &[".bun", "bin"],
    &[".npm-global", "bin"],
    &[".nvm", "versions", "node", "current", "bin"],
];

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

/// Agent-specific home directory exported to the child
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHome {
    /// Variable name, e.g. `CODEX_HOME`
    pub variable: String,
    pub directory: PathBuf,
}

/// Snapshot of the current process environment
pub fn current_environment() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// The user's home directory as seen by the snapshot
pub fn user_home(env: &HashMap<String, String>) -> Option<PathBuf> {
    env.get("HOME")
        .or_else(|| env.get("USERPROFILE"))
        .filter(|home| !home.is_empty())
        .map(PathBuf::from)
}

/// Directories where user-installed tools usually live
///
/// GUI-launched parents often start with a minimal PATH that misses these.
pub fn extra_path_entries(home: Option<&Path>) -> Vec<PathBuf> {
    let mut entries = vec![
        PathBuf::from("/usr/local/bin"),
        PathBuf::from("/opt/homebrew/bin"),
        PathBuf::from("/opt/homebrew/sbin"),
    ];

    if let Some(home) = home {
        entries.extend(HOME_RELATIVE_ENTRIES.iter().map(|parts| {
            parts
                .iter()
                .fold(home.to_path_buf(), |path, part| path.join(part))
        }));
    }

    entries
}

/// Append `extras` to `current`, keeping the first occurrence of each entry
pub fn merge_path(current: &str, extras: &[PathBuf]) -> String {
    let mut merged: Vec<String> = Vec::new();

    let existing = current
        .split(PATH_SEPARATOR)
        .map(str::to_string)
        .filter(|entry| !entry.is_empty());
    let additional = extras
        .iter()
        .map(|entry| entry.to_string_lossy().into_owned());

    for entry in existing.chain(additional) {
        if !merged.contains(&entry) {
            merged.push(entry);
        }
    }

    merged.join(&PATH_SEPARATOR.to_string())
}

/// Build the child's environment from a parent snapshot
pub fn build_child_environment(
    parent: &HashMap<String, String>,
    agent_home: Option<&AgentHome>,
) -> HashMap<String, String> {
    let mut env = parent.clone();

    if !cfg!(windows) {
        let home = user_home(parent);
        let current = parent.get("PATH").map(String::as_str).unwrap_or_default();
        env.insert(
            "PATH".to_string(),
            merge_path(current, &extra_path_entries(home.as_deref())),
        );
    }

    for variable in STRIPPED_VARIABLES {
        env.remove(*variable);
    }

    let lang = parent
        .get("LANG")
        .filter(|lang| !lang.is_empty())
        .cloned()
        .unwrap_or_else(|| DEFAULT_LANG.to_string());
    let lc_all = parent
        .get("LC_ALL")
        .filter(|lc_all| !lc_all.is_empty())
        .cloned()
        .unwrap_or_else(|| lang.clone());
    env.insert("LANG".to_string(), lang);
    env.insert("LC_ALL".to_string(), lc_all);

    if let Some(agent_home) = agent_home {
        env.insert(
            agent_home.variable.clone(),
            agent_home.directory.to_string_lossy().into_owned(),
        );
    }

    env
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_locale_defaults() {
        let env = build_child_environment(&snapshot(&[]), None);
        assert_eq!(env.get("LANG").map(String::as_str), Some(DEFAULT_LANG));
        assert_eq!(env.get("LC_ALL").map(String::as_str), Some(DEFAULT_LANG));

        let env = build_child_environment(&snapshot(&[("LANG", "de_DE.UTF-8")]), None);
        assert_eq!(env["LANG"], "de_DE.UTF-8");
        assert_eq!(env["LC_ALL"], "de_DE.UTF-8");

        let env = build_child_environment(
            &snapshot(&[("LANG", "de_DE.UTF-8"), ("LC_ALL", "C")]),
            None,
        );
        assert_eq!(env["LC_ALL"], "C");
    }

    #[test]
    fn test_npm_prefix_removed_and_parent_untouched() {
        let parent = snapshot(&[
            ("npm_config_prefix", "/tmp/a"),
            ("NPM_CONFIG_PREFIX", "/tmp/b"),
            ("OPENAI_API_KEY", "sk-test"),
        ]);
        let env = build_child_environment(&parent, None);

        assert!(!env.contains_key("npm_config_prefix"));
        assert!(!env.contains_key("NPM_CONFIG_PREFIX"));
        assert_eq!(env["OPENAI_API_KEY"], "sk-test");
        assert_eq!(parent.len(), 3);
    }

    #[test]
    fn test_agent_home_exported() {
        let home = AgentHome {
            variable: "CODEX_HOME".to_string(),
            directory: PathBuf::from("/data/codex"),
        };
        let env = build_child_environment(&snapshot(&[]), Some(&home));
        assert_eq!(env["CODEX_HOME"], "/data/codex");
    }

    #[cfg(not(windows))]
    #[test]
    fn test_path_augmented_without_duplicates() {
        let parent = snapshot(&[("PATH", "/usr/bin:/usr/local/bin"), ("HOME", "/home/dev")]);
        let env = build_child_environment(&parent, None);
        let entries: Vec<&str> = env["PATH"].split(':').collect();

        assert_eq!(&entries[..3], &["/usr/bin", "/usr/local/bin", "/opt/homebrew/bin"]);
        assert_eq!(
            entries.iter().filter(|entry| **entry == "/usr/local/bin").count(),
            1
        );
        assert!(entries.contains(&"/home/dev/.cargo/bin"));
        assert!(entries.contains(&"/home/dev/.nvm/versions/node/current/bin"));
        assert_eq!(entries.len(), 11);
    }

    #[test]
    fn test_extra_entries_without_home() {
        let entries = extra_path_entries(None);
        assert_eq!(entries.len(), 3);
    }

    #[cfg(not(windows))]
    #[test]
    fn test_merge_path_skips_empty_segments() {
        assert_eq!(
            merge_path("::/bin:", &[PathBuf::from("/bin"), PathBuf::from("/sbin")]),
            "/bin:/sbin"
        );
    }
}
