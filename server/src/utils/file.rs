//! Path helpers for config and database files

use std::path::PathBuf;

/// Expand a user-supplied path to an absolute path.
///
/// `~` and `~/...` resolve against the home directory; relative paths
/// resolve against the current working directory.
pub fn expand_path(path: &str) -> PathBuf {
    let path = path.trim();

    if path.is_empty() {
        return std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    }

    let expanded = if path == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(path))
    } else if let Some(rest) = path.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        }
    } else {
        PathBuf::from(path)
    };

    if expanded.is_relative() {
        std::env::current_dir()
            .map(|cwd| cwd.join(&expanded))
            .unwrap_or(expanded)
    } else {
        expanded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_path_absolute_unix() {
        assert_eq!(expand_path("/var/lib/comet"), PathBuf::from("/var/lib/comet"));
    }

    #[test]
    fn test_expand_path_relative() {
        let result = expand_path("./comet.db");
        assert!(result.is_absolute());
        assert!(result.ends_with("comet.db"));
    }

    #[test]
    fn test_expand_path_tilde() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_path("~/comet.json"), home.join("comet.json"));
        }
    }

    #[test]
    fn test_expand_path_empty_is_cwd() {
        assert_eq!(expand_path("  "), std::env::current_dir().unwrap());
    }
}
