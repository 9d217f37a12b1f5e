//! Input validation for repository identifiers and commit refs.
//!
//! Both end up as git arguments and path components, so shell
//! metacharacters, `..` traversal and leading `-` (flag injection) are
//! rejected before any command runs.

use crate::error::CheckoutError;

const MAX_LEN: usize = 256;

/// Validate a git ref (commit SHA, branch or tag name).
///
/// Accepts hex SHAs (short or full) and standard ref names made of
/// alphanumerics plus `/`, `.`, `-`, `_`, `~`, `^`.
pub fn validate_git_ref(s: &str) -> Result<(), CheckoutError> {
    let invalid = |reason: String| CheckoutError::InvalidCommit {
        commit: s.to_string(),
        reason,
    };
    if s.is_empty() {
        return Err(invalid("git ref is empty".to_string()));
    }
    if s.len() > MAX_LEN {
        return Err(invalid(format!("too long ({} chars, max {MAX_LEN})", s.len())));
    }
    if s.starts_with('-') {
        return Err(invalid("must not start with '-'".to_string()));
    }
    if s.contains("..") {
        return Err(invalid("must not contain '..'".to_string()));
    }
    if let Some(ch) = s
        .chars()
        .find(|ch| !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '/' | '.' | '-' | '_' | '~' | '^'))
    {
        return Err(invalid(format!("invalid character '{ch}'")));
    }
    Ok(())
}

/// Validate a repository identifier in `owner/name` form.
pub fn validate_repo_name(s: &str) -> Result<(), CheckoutError> {
    let invalid = |reason: String| CheckoutError::InvalidRepo {
        repo: s.to_string(),
        reason,
    };
    if s.is_empty() {
        return Err(invalid("repository name is empty".to_string()));
    }
    if s.len() > MAX_LEN {
        return Err(invalid(format!("too long ({} chars, max {MAX_LEN})", s.len())));
    }
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() != 2 {
        return Err(invalid("expected 'owner/name' format".to_string()));
    }
    for part in parts {
        if part.is_empty() {
            return Err(invalid("owner and name must be non-empty".to_string()));
        }
        if part.starts_with('.') || part.starts_with('-') {
            return Err(invalid("parts must not start with '.' or '-'".to_string()));
        }
        if let Some(ch) = part
            .chars()
            .find(|ch| !matches!(ch, 'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.'))
        {
            return Err(invalid(format!("invalid character '{ch}'")));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_git_ref_accepts_shas_and_refs() {
        assert!(validate_git_ref("abc123def456").is_ok());
        assert!(validate_git_ref("a1b2c3d4e5f6a1b2c3d4e5f6a1b2c3d4e5f6a1b2").is_ok());
        assert!(validate_git_ref("main").is_ok());
        assert!(validate_git_ref("HEAD~1").is_ok());
        assert!(validate_git_ref("v1.2.3").is_ok());
    }

    #[test]
    fn validate_git_ref_rejects_injection() {
        assert!(validate_git_ref("").is_err());
        assert!(validate_git_ref("abc; rm -rf /").is_err());
        assert!(validate_git_ref("$(whoami)").is_err());
        assert!(validate_git_ref("--exec=id").is_err());
        assert!(validate_git_ref("main..HEAD").is_err());
        assert!(validate_git_ref(&"a".repeat(257)).is_err());
    }

    #[test]
    fn validate_repo_name_accepts_valid() {
        assert!(validate_repo_name("django/django").is_ok());
        assert!(validate_repo_name("scikit-learn/scikit-learn").is_ok());
        assert!(validate_repo_name("pylint-dev/astroid").is_ok());
        assert!(validate_repo_name("Org_Name/repo.js").is_ok());
    }

    #[test]
    fn validate_repo_name_rejects_invalid() {
        assert!(validate_repo_name("").is_err());
        assert!(validate_repo_name("noslash").is_err());
        assert!(validate_repo_name("a/b/c").is_err());
        assert!(validate_repo_name("owner/").is_err());
        assert!(validate_repo_name("../repo").is_err());
        assert!(validate_repo_name("owner/-repo").is_err());
        assert!(validate_repo_name("owner/repo && echo").is_err());
    }

    #[test]
    fn validation_errors_carry_input() {
        match validate_repo_name("bad name") {
            Err(CheckoutError::InvalidRepo { repo, .. }) => assert_eq!(repo, "bad name"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
