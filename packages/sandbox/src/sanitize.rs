// ABOUTME: Allow-list validators for every value that reaches a sandbox command line
// ABOUTME: Repository URLs, branch names, in-sandbox paths, project ids, and env vars

use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::warn;

/// Characters that never appear in a URL, ref name, or path we hand to a subprocess
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '$', '`', '(', ')', '{', '}', '[', ']', '<', '>', '!', '\n', '\r', '\'', '"',
    '\\', '*', '?', '#', '~', '^',
];

const MAX_URL_LENGTH: usize = 2048;
const MAX_BRANCH_LENGTH: usize = 255;
const MAX_PATH_LENGTH: usize = 4096;

pub const DEFAULT_BRANCH: &str = "main";

static HTTP_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9][A-Za-z0-9.-]*(:[0-9]{1,5})?(/[A-Za-z0-9._~%/@+=:,-]*)?$")
        .expect("valid http url pattern")
});

static SSH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^git@[A-Za-z0-9][A-Za-z0-9.-]*:[A-Za-z0-9._/-]+$").expect("valid ssh url pattern")
});

static BRANCH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._/-]+$").expect("valid branch pattern"));

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,63}$").expect("valid identifier pattern")
});

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._][A-Za-z0-9._-]{0,127}$").expect("valid name pattern"));

static ENV_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid env key pattern"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SanitizeError {
    #[error("{0} must not be empty")]
    Empty(&'static str),
    #[error("{field} contains forbidden character {character:?}")]
    ForbiddenCharacter { field: &'static str, character: char },
    #[error("{field} exceeds maximum length of {max}")]
    TooLong { field: &'static str, max: usize },
    #[error("Unsupported repository URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid branch name: {0}")]
    InvalidBranch(String),
    #[error("Path traversal attempt detected")]
    PathTraversal,
    #[error("Path escapes sandbox root {root}: {path}")]
    OutsideRoot { path: String, root: String },
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),
    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

pub type Result<T> = std::result::Result<T, SanitizeError>;

fn reject_forbidden(field: &'static str, value: &str) -> Result<()> {
    if let Some(character) = value
        .chars()
        .find(|c| SHELL_METACHARACTERS.contains(c) || c.is_control() || c.is_whitespace())
    {
        warn!(field, audit = true, "Rejected value with forbidden character");
        return Err(SanitizeError::ForbiddenCharacter { field, character });
    }
    Ok(())
}

/// Validate a repository URL: http(s) or `git@host:path`, no metacharacters
pub fn sanitize_repo_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(SanitizeError::Empty("repo_url"));
    }
    if url.len() > MAX_URL_LENGTH {
        return Err(SanitizeError::TooLong {
            field: "repo_url",
            max: MAX_URL_LENGTH,
        });
    }

    reject_forbidden("repo_url", url)?;

    if HTTP_URL.is_match(url) || SSH_URL.is_match(url) {
        Ok(url.to_string())
    } else {
        Err(SanitizeError::InvalidUrl(url.to_string()))
    }
}

/// Validate a git ref name; an empty branch means the default branch
pub fn sanitize_branch(branch: &str) -> Result<String> {
    let branch = branch.trim();
    if branch.is_empty() {
        return Ok(DEFAULT_BRANCH.to_string());
    }
    if branch.len() > MAX_BRANCH_LENGTH {
        return Err(SanitizeError::TooLong {
            field: "branch",
            max: MAX_BRANCH_LENGTH,
        });
    }

    reject_forbidden("branch", branch)?;

    let invalid = |reason: &str| Err(SanitizeError::InvalidBranch(format!("{branch}: {reason}")));

    if !BRANCH.is_match(branch) {
        return invalid("only letters, digits and -_./ are allowed");
    }
    if branch.contains("..") {
        return invalid("must not contain '..'");
    }
    if branch.contains("//") {
        return invalid("must not contain '//'");
    }
    if branch.starts_with('.') || branch.ends_with('.') {
        return invalid("must not start or end with '.'");
    }
    if branch.starts_with('/') || branch.ends_with('/') {
        return invalid("must not start or end with '/'");
    }
    // git would read a leading dash as an option
    if branch.starts_with('-') {
        return invalid("must not start with '-'");
    }

    Ok(branch.to_string())
}

/// Undo up to two layers of percent-encoding for the characters used in traversal
fn decode_traversal_sequences(path: &str) -> String {
    let mut decoded = path.to_ascii_lowercase();
    for _ in 0..2 {
        decoded = decoded.replace("%25", "%");
    }
    decoded.replace("%2e", ".").replace("%2f", "/").replace("%5c", "\\")
}

/// Resolve `path` against `root`, rejecting traversal, metacharacters, and escapes
///
/// Relative paths are joined onto `root`; absolute paths must already lie inside it.
/// The returned path is normalized (no empty or `.` segments, no trailing slash).
pub fn sanitize_path(path: &str, root: &str) -> Result<String> {
    if path.trim().is_empty() {
        return Err(SanitizeError::Empty("path"));
    }
    if path.len() > MAX_PATH_LENGTH {
        return Err(SanitizeError::TooLong {
            field: "path",
            max: MAX_PATH_LENGTH,
        });
    }

    if decode_traversal_sequences(path).contains("..") {
        warn!(path, audit = true, "Path traversal attempt detected");
        return Err(SanitizeError::PathTraversal);
    }

    if let Some(character) = path
        .chars()
        .find(|c| SHELL_METACHARACTERS.contains(c) || c.is_control())
    {
        warn!(path, audit = true, "Rejected path with forbidden character");
        return Err(SanitizeError::ForbiddenCharacter {
            field: "path",
            character,
        });
    }

    let root = normalize(root);
    let candidate = if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{}/{}", root, path))
    };

    let inside = candidate == root || candidate.starts_with(&format!("{}/", root));
    if !inside {
        warn!(path, root = %root, audit = true, "Path escapes sandbox root");
        return Err(SanitizeError::OutsideRoot {
            path: path.to_string(),
            root,
        });
    }

    Ok(candidate)
}

fn normalize(path: &str) -> String {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect();
    format!("/{}", segments.join("/"))
}

/// Validate an identifier that becomes part of a container name or host path
pub fn validate_identifier(id: &str) -> Result<()> {
    if IDENTIFIER.is_match(id) {
        Ok(())
    } else {
        Err(SanitizeError::InvalidIdentifier(id.to_string()))
    }
}

/// Validate a bare file name used as a `find -name` exclusion
pub fn validate_exclude_pattern(pattern: &str) -> Result<()> {
    if NAME_PATTERN.is_match(pattern) && pattern != "." && pattern != ".." {
        Ok(())
    } else {
        Err(SanitizeError::InvalidIdentifier(pattern.to_string()))
    }
}

/// Validate environment variables injected into a sandbox at creation time
pub fn validate_env(env: &HashMap<String, String>) -> Result<()> {
    for (key, value) in env {
        if !ENV_KEY.is_match(key) {
            return Err(SanitizeError::InvalidEnv(format!("invalid name '{}'", key)));
        }
        if value.chars().any(|c| c == '\0' || c == '\n' || c == '\r') {
            return Err(SanitizeError::InvalidEnv(format!(
                "value of '{}' contains a control character",
                key
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    const ROOT: &str = "/workspace";

    #[rstest]
    #[case("https://github.com/user/repo.git")]
    #[case("http://gitlab.example.com/group/sub/repo")]
    #[case("https://example.com:8443/a/b.git")]
    #[case("git@github.com:user/repo.git")]
    fn test_valid_repo_urls(#[case] url: &str) {
        assert_eq!(sanitize_repo_url(url).unwrap(), url);
    }

    #[rstest]
    #[case("")]
    #[case("ftp://example.com/repo.git")]
    #[case("file:///etc/passwd")]
    #[case("-uhttps://example.com/repo.git")]
    #[case("https://example.com/repo.git --upload-pack=touch")]
    fn test_invalid_repo_urls(#[case] url: &str) {
        assert!(sanitize_repo_url(url).is_err());
    }

    #[test]
    fn test_every_metacharacter_rejected_in_url_and_branch() {
        for meta in [
            ";", "&", "|", "$", "`", "(", ")", "{", "}", "[", "]", "<", ">", "!", "\n", "\r",
        ] {
            let url = format!("https://example.com/a{}b.git", meta);
            assert!(sanitize_repo_url(&url).is_err(), "url accepted {:?}", meta);

            let branch = format!("feature{}x", meta);
            assert!(sanitize_branch(&branch).is_err(), "branch accepted {:?}", meta);
        }
    }

    #[test]
    fn test_branch_scenarios() {
        assert!(matches!(
            sanitize_branch("main; rm -rf /"),
            Err(SanitizeError::ForbiddenCharacter { .. })
        ));
        assert_eq!(sanitize_branch("feature/x").unwrap(), "feature/x");
    }

    #[rstest]
    #[case("feature/new-feature")]
    #[case("release-1.0")]
    #[case("hotfix_urgent")]
    #[case("v1.0.0")]
    fn test_valid_branches_unchanged(#[case] branch: &str) {
        assert_eq!(sanitize_branch(branch).unwrap(), branch);
    }

    #[rstest]
    #[case("feature/../main")]
    #[case("feature//x")]
    #[case(".hidden")]
    #[case("branch.")]
    #[case("/leading")]
    #[case("trailing/")]
    #[case("--upload-pack")]
    fn test_invalid_branches(#[case] branch: &str) {
        assert!(matches!(
            sanitize_branch(branch),
            Err(SanitizeError::InvalidBranch(_))
        ));
    }

    #[test]
    fn test_empty_branch_defaults_to_main() {
        assert_eq!(sanitize_branch("").unwrap(), "main");
        assert_eq!(sanitize_branch("   ").unwrap(), "main");
    }

    #[test]
    fn test_relative_and_absolute_paths_inside_root() {
        assert_eq!(
            sanitize_path("repo/src/main.py", ROOT).unwrap(),
            "/workspace/repo/src/main.py"
        );
        assert_eq!(
            sanitize_path("/workspace/repo/README.md", ROOT).unwrap(),
            "/workspace/repo/README.md"
        );
        assert_eq!(sanitize_path("./repo//src/", ROOT).unwrap(), "/workspace/repo/src");
        assert_eq!(sanitize_path("/workspace", ROOT).unwrap(), "/workspace");
    }

    #[rstest]
    #[case("../etc/passwd")]
    #[case("repo/../../etc")]
    #[case("%2e%2e/etc/passwd")]
    #[case("%2E%2E/etc/passwd")]
    #[case("repo/%2e%2E/secret")]
    #[case("%252e%252e/etc/passwd")]
    #[case("%252E%252E/etc")]
    #[case("%2e./etc")]
    fn test_traversal_rejected_in_any_encoding(#[case] path: &str) {
        assert_eq!(sanitize_path(path, ROOT), Err(SanitizeError::PathTraversal));
    }

    #[rstest]
    #[case("repo;ls")]
    #[case("repo`id`")]
    #[case("repo'x")]
    #[case("repo\"x")]
    #[case("repo\nx")]
    #[case("repo$(id)")]
    fn test_path_metacharacters_rejected(#[case] path: &str) {
        assert!(matches!(
            sanitize_path(path, ROOT),
            Err(SanitizeError::ForbiddenCharacter { .. })
        ));
    }

    #[test]
    fn test_absolute_path_outside_root_rejected() {
        assert!(matches!(
            sanitize_path("/etc/passwd", ROOT),
            Err(SanitizeError::OutsideRoot { .. })
        ));
        assert!(matches!(
            sanitize_path("/workspace-other/file", ROOT),
            Err(SanitizeError::OutsideRoot { .. })
        ));
        assert_eq!(sanitize_path("", ROOT), Err(SanitizeError::Empty("path")));
    }

    #[test]
    fn test_identifier_and_env_validation() {
        assert!(validate_identifier("abc123").is_ok());
        assert!(validate_identifier("../x").is_err());
        assert!(validate_identifier("").is_err());

        let mut env = HashMap::new();
        env.insert("ANTHROPIC_API_KEY".to_string(), "sk-1".to_string());
        assert!(validate_env(&env).is_ok());

        env.insert("BAD KEY".to_string(), "x".to_string());
        assert!(validate_env(&env).is_err());

        let mut env = HashMap::new();
        env.insert("KEY".to_string(), "line\nbreak".to_string());
        assert!(validate_env(&env).is_err());
    }

    #[test]
    fn test_exclude_patterns() {
        for pattern in ["node_modules", "__pycache__", ".venv", ".git", "agent"] {
            assert!(validate_exclude_pattern(pattern).is_ok(), "{}", pattern);
        }
        for pattern in ["-delete", "..", "a/b", "*.py", "x;rm"] {
            assert!(validate_exclude_pattern(pattern).is_err(), "{}", pattern);
        }
    }
}
