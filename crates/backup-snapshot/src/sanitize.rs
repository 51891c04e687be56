//! Env-file sanitization
//!
//! Env files are inlined into snapshots for reference, but snapshots are
//! not encrypted - so variables whose names look sensitive have their
//! values replaced with a placeholder before inclusion.

use regex::Regex;

/// Placeholder written in place of redacted values
pub const REDACTED_PLACEHOLDER: &str = "<REDACTED>";

/// Line-oriented env sanitizer with a compiled sensitive-name pattern
#[derive(Debug, Clone)]
pub struct EnvSanitizer {
    sensitive: Regex,
}

impl Default for EnvSanitizer {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvSanitizer {
    pub fn new() -> Self {
        Self {
            sensitive: Regex::new("PASSWORD|SECRET|KEY|TOKEN").expect("static pattern compiles"),
        }
    }

    /// Redact the value of every `KEY=value` line whose key matches the
    /// sensitive pattern. Comments and non-assignment lines pass through.
    pub fn sanitize(&self, content: &str) -> String {
        content
            .lines()
            .map(|line| {
                if line.starts_with('#') {
                    return line.to_string();
                }
                match line.split_once('=') {
                    Some((key, _)) if self.sensitive.is_match(key) => {
                        format!("{key}={REDACTED_PLACEHOLDER}")
                    }
                    _ => line.to_string(),
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn sensitive_values_are_redacted() {
        let sanitizer = EnvSanitizer::new();
        let content = "DB_PASSWORD=hunter2\nJWT_SECRET=abc\nAPI_KEY=xyz\nAUTH_TOKEN=t\nPORT=3001";
        let sanitized = sanitizer.sanitize(content);

        assert_eq!(
            sanitized,
            "DB_PASSWORD=<REDACTED>\nJWT_SECRET=<REDACTED>\nAPI_KEY=<REDACTED>\nAUTH_TOKEN=<REDACTED>\nPORT=3001"
        );
    }

    #[test]
    fn comments_and_plain_lines_pass_through() {
        let sanitizer = EnvSanitizer::new();
        let content = "# SECRET stuff below\nNAME=dashboard\n\nDEBUG=true";
        assert_eq!(sanitizer.sanitize(content), content);
    }
}
