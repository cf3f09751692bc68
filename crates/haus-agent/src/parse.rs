//! Package-file and custom-descriptor line parsing
//!
//! One package per line; `#` starts a comment (whole-line or trailing);
//! blank lines are ignored. Names failing validation are logged and skipped,
//! never passed to the underlying tool.

use std::time::Duration;

pub use haus_config::{is_valid_package_name, strip_version};

/// Parse the lines of a package file into validated package names
pub fn parse_package_lines(content: &str) -> Vec<String> {
    let mut names = Vec::new();
    for raw in content.lines() {
        let line = match raw.split_once('#') {
            Some((before, _)) => before.trim(),
            None => raw.trim(),
        };
        if line.is_empty() {
            continue;
        }
        if !is_valid_package_name(line) {
            tracing::warn!("Skipping invalid package name: {:?}", line);
            continue;
        }
        names.push(line.to_string());
    }
    names
}

/// A parsed custom package descriptor line
#[derive(Debug, Clone, PartialEq)]
pub struct CustomEntry {
    pub name: String,
    pub check_cmd: String,
    pub install_cmd: String,
    pub timeout: Duration,
}

/// Parse custom descriptor lines: `name|check_cmd|install_cmd[|timeout_seconds]`.
///
/// Lines with an empty name, check, or install are rejected with a warning.
pub fn parse_custom_lines(content: &str, default_timeout: Duration) -> Vec<CustomEntry> {
    let mut entries = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('|').map(str::trim).collect();
        if fields.len() < 3 || fields.len() > 4 {
            tracing::warn!("Skipping malformed custom line: {:?}", line);
            continue;
        }
        if fields[..3].iter().any(|f| f.is_empty()) {
            tracing::warn!("Skipping custom line with empty field: {:?}", line);
            continue;
        }

        let timeout = match fields.get(3) {
            Some(raw_timeout) => match raw_timeout.parse::<u64>() {
                Ok(seconds) => Duration::from_secs(seconds),
                Err(_) => {
                    tracing::warn!(
                        "Skipping custom line with invalid timeout {:?}: {:?}",
                        raw_timeout,
                        line
                    );
                    continue;
                }
            },
            None => default_timeout,
        };

        entries.push(CustomEntry {
            name: fields[0].to_string(),
            check_cmd: fields[1].to_string(),
            install_cmd: fields[2].to_string(),
            timeout,
        });
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT: Duration = Duration::from_secs(300);

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let content = "# header\ncurl\n\ngit  # vcs\n";
        assert_eq!(parse_package_lines(content), vec!["curl", "git"]);
    }

    #[test]
    fn test_parse_rejects_invalid_names() {
        let content = "good-pkg\nbad pkg\nrm;-rf\nok_2\n";
        assert_eq!(parse_package_lines(content), vec!["good-pkg", "ok_2"]);
    }

    #[test]
    fn test_valid_names_allow_version_constraints() {
        assert!(is_valid_package_name("nodejs=24.*"));
        assert!(is_valid_package_name("@scope/pkg"));
        assert!(is_valid_package_name("python3.11"));
        assert!(!is_valid_package_name("pkg name"));
        assert!(!is_valid_package_name("pkg;true"));
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("nodejs=24.*"), "nodejs");
        assert_eq!(strip_version("libfoo>=2.0"), "libfoo");
        assert_eq!(strip_version("plain"), "plain");
    }

    #[test]
    fn test_parse_custom_entry_with_timeout() {
        let content = "docker|command -v docker|apt-get install -y docker.io|600\n";
        let entries = parse_custom_lines(content, DEFAULT);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "docker");
        assert_eq!(entries[0].check_cmd, "command -v docker");
        assert_eq!(entries[0].timeout, Duration::from_secs(600));
    }

    #[test]
    fn test_parse_custom_default_timeout() {
        let entries = parse_custom_lines("tool|check|install\n", DEFAULT);
        assert_eq!(entries[0].timeout, DEFAULT);
    }

    #[test]
    fn test_parse_custom_rejects_empty_fields() {
        let entries = parse_custom_lines("|check|install\nname||install\nname|check|\n", DEFAULT);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_parse_custom_rejects_wrong_arity() {
        let entries = parse_custom_lines("justname\na|b\na|b|c|5|extra\n", DEFAULT);
        assert!(entries.is_empty());
    }

    #[test]
    fn test_parse_custom_rejects_bad_timeout() {
        let entries = parse_custom_lines("a|b|c|soon\n", DEFAULT);
        assert!(entries.is_empty());
    }
}
