//! Branch and tag naming.
//!
//! Every name that reaches a git command is built here and validated against
//! an allowlist plus git's own reference-format rules. Invalid names are
//! rejected with a reason; they are never rewritten into something else.

use crate::errors::BranchError;
use regex::Regex;
use std::sync::LazyLock;

pub const MAX_BRANCH_LEN: usize = 200;

static BRANCH_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").expect("valid branch regex"));

/// Lowercase, hyphen-separated slug of at most `max_len` bytes.
pub fn slugify(title: &str, max_len: usize) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    if slug.len() > max_len {
        slug[..max_len].trim_end_matches('-').to_string()
    } else {
        slug
    }
}

fn reject(name: &str, reason: impl Into<String>) -> BranchError {
    BranchError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a branch name before it is handed to git.
pub fn validate_branch_name(name: &str) -> Result<(), BranchError> {
    if name.is_empty() {
        return Err(reject(name, "name is empty"));
    }
    if name.len() > MAX_BRANCH_LEN {
        return Err(reject(
            name,
            format!("longer than {} characters", MAX_BRANCH_LEN),
        ));
    }
    if !BRANCH_RE.is_match(name) {
        let bad = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '/' | '-')));
        return Err(match bad {
            Some(c) => reject(name, format!("contains disallowed character {:?}", c)),
            None => reject(name, "must start with a letter or digit"),
        });
    }
    for (pattern, reason) in [
        ("..", "contains '..'"),
        ("//", "contains '//'"),
        ("@{", "contains '@{'"),
        ("/.", "has a component starting with '.'"),
    ] {
        if name.contains(pattern) {
            return Err(reject(name, reason));
        }
    }
    if name.ends_with(".lock") {
        return Err(reject(name, "ends with '.lock'"));
    }
    if name.ends_with('/') || name.ends_with('.') {
        return Err(reject(name, "ends with '/' or '.'"));
    }
    if !git2::Reference::is_valid_name(&format!("refs/heads/{}", name)) {
        return Err(reject(name, "not a valid git reference name"));
    }
    Ok(())
}

/// Validate a tag name the same way, against `refs/tags/`.
pub fn validate_tag_name(name: &str) -> Result<(), BranchError> {
    validate_branch_name(name)?;
    if !git2::Reference::is_valid_name(&format!("refs/tags/{}", name)) {
        return Err(reject(name, "not a valid git tag name"));
    }
    Ok(())
}

/// `<prefix>/<slug(title)>`.
pub fn feature_branch_name(prefix: &str, title: &str) -> Result<String, BranchError> {
    let slug = slugify(title, 60);
    let slug = if slug.is_empty() { "plan".to_string() } else { slug };
    let prefix = prefix.trim_end_matches('/');
    let name = if prefix.is_empty() {
        slug
    } else {
        format!("{}/{}", prefix, slug)
    };
    validate_branch_name(&name)?;
    Ok(name)
}

/// `<feature>--<seq>-<slug(stem)>`. A stem that already begins with the seq
/// does not repeat it.
pub fn child_branch_name(feature: &str, seq: &str, stem: &str) -> Result<String, BranchError> {
    let stem_slug = slugify(stem, 60);
    let seq_prefix = format!("{}-", seq.trim());
    let stem_slug = stem_slug
        .strip_prefix(&seq_prefix)
        .map(str::to_string)
        .unwrap_or(stem_slug);

    let name = if stem_slug.is_empty() {
        format!("{}--{}", feature, seq.trim())
    } else {
        format!("{}--{}-{}", feature, seq.trim(), stem_slug)
    };
    validate_branch_name(&name)?;
    Ok(name)
}

/// `cascade/<slug(feature)>/wave-<n>`.
pub fn checkpoint_tag_name(feature: &str, wave: usize) -> Result<String, BranchError> {
    let name = format!("cascade/{}/wave-{}", slugify(feature, 80), wave);
    validate_tag_name(&name)?;
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("User Authentication", 40), "user-authentication");
        assert_eq!(slugify("  Fix: the $(bug) ", 40), "fix-the-bug");
        assert_eq!(slugify("Ünïcode stays out", 40), "n-code-stays-out");
        assert_eq!(slugify("a very long title indeed", 8), "a-very-l");
        assert_eq!(slugify("abc def", 4), "abc");
    }

    #[test]
    fn test_accepts_ordinary_names() {
        for name in ["feat/user-auth", "main", "release/1.2.0", "feat/x--01-model"] {
            assert!(validate_branch_name(name).is_ok(), "rejected {name}");
        }
    }

    #[test]
    fn test_rejects_shell_metacharacters() {
        for name in [
            "feat;rm -rf /",
            "feat/$(whoami)",
            "feat/`id`",
            "feat|cat",
            "feat&&x",
            "feat/a b",
            "feat>out",
            "-delete",
        ] {
            let err = validate_branch_name(name).unwrap_err();
            assert!(matches!(err, BranchError::InvalidName { .. }), "{name}");
        }
    }

    #[test]
    fn test_rejects_ref_format_violations() {
        for name in [
            "feat..x",
            "feat//x",
            "feat@{1}",
            "feat.lock",
            "feat/",
            "feat.",
            "feat/.hidden",
        ] {
            assert!(validate_branch_name(name).is_err(), "accepted {name}");
        }
        assert!(validate_branch_name(&"a".repeat(MAX_BRANCH_LEN + 1)).is_err());
    }

    #[test]
    fn test_rejection_carries_reason() {
        let err = validate_branch_name("feat;x").unwrap_err();
        assert!(err.to_string().contains("';'"));
    }

    #[test]
    fn test_feature_and_child_names() {
        let feature = feature_branch_name("feat", "User Authentication").unwrap();
        assert_eq!(feature, "feat/user-authentication");

        let child = child_branch_name(&feature, "01", "01-user-model").unwrap();
        assert_eq!(child, "feat/user-authentication--01-user-model");

        let child = child_branch_name(&feature, "2", "auth-api").unwrap();
        assert_eq!(child, "feat/user-authentication--2-auth-api");

        assert_eq!(feature_branch_name("feat/", "").unwrap(), "feat/plan");
    }

    #[test]
    fn test_child_name_rejects_injected_seq() {
        assert!(child_branch_name("feat/x", "1;rm", "model").is_err());
    }

    #[test]
    fn test_checkpoint_tag_name() {
        let tag = checkpoint_tag_name("feat/user-auth", 2).unwrap();
        assert_eq!(tag, "cascade/feat-user-auth/wave-2");
    }
}
