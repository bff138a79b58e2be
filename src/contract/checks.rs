//! Pattern-based existence checks for typed artifacts.
//!
//! These are static searches, not language analysis: an export exists if some
//! source file contains a declaration or re-export that looks like one.

use crate::config::VerificationSection;
use crate::plan::path::validate_relative_path;
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const HTTP_METHODS: &str = "get|post|put|patch|delete|head|options|all";

static IDENT_RE: std::sync::LazyLock<Regex> = std::sync::LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$]*$").expect("valid identifier regex")
});

/// Source files under a root, filtered by extension, directory and size.
pub struct SourceSet {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl SourceSet {
    pub fn collect(root: &Path, settings: &VerificationSection) -> Self {
        let files = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                if e.depth() == 0 || !e.file_type().is_dir() {
                    return true;
                }
                let name = e.file_name().to_string_lossy();
                !settings.exclude_dirs.iter().any(|d| d == name.as_ref())
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| {
                        let ext = ext.to_string_lossy();
                        settings.source_extensions.iter().any(|s| s == ext.as_ref())
                    })
                    .unwrap_or(false)
            })
            .filter(|e| {
                e.metadata()
                    .map(|m| m.len() <= settings.max_file_bytes)
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();

        Self {
            root: root.to_path_buf(),
            files,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// First file (relative to the root) whose content matches `pattern`.
    pub fn find(&self, pattern: &Regex) -> Option<String> {
        self.files.iter().find_map(|path| {
            let content = std::fs::read_to_string(path).ok()?;
            if pattern.is_match(&content) {
                Some(relative(&self.root, path))
            } else {
                None
            }
        })
    }
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .to_string()
}

/// Last segment of a qualified name (`models::User` or `models.User`).
fn bare_identifier(name: &str) -> Result<&str, String> {
    let bare = name
        .trim()
        .rsplit("::")
        .next()
        .and_then(|s| s.rsplit('.').next())
        .unwrap_or("")
        .trim();
    if IDENT_RE.is_match(bare) {
        Ok(bare)
    } else {
        Err(format!("'{}' is not an identifier", name))
    }
}

/// Declarations and re-exports that make `name` importable.
pub fn export_pattern(name: &str) -> Result<Regex, String> {
    let n = regex::escape(bare_identifier(name)?);
    let forms = [
        // TS/JS declarations
        format!(
            r"^\s*export\s+(?:default\s+)?(?:declare\s+)?(?:abstract\s+)?(?:async\s+)?(?:const|let|var|function\*?|class|interface|type|enum)\s+{n}\b"
        ),
        // TS/JS re-exports
        format!(r"export\s*(?:type\s*)?\{{[^}}]*\b{n}\b[^}}]*\}}"),
        format!(r"export\s*\*\s*as\s+{n}\b"),
        // Rust
        format!(
            r"^\s*pub(?:\([^)]*\))?\s+(?:async\s+)?(?:unsafe\s+)?(?:fn|struct|enum|trait|type|const|static|mod|union)\s+{n}\b"
        ),
        format!(r"^\s*pub(?:\([^)]*\))?\s+use\s+[^;]*\b{n}\b[^;]*;"),
        // Python top level
        format!(r"^(?:async\s+)?(?:def|class)\s+{n}\b"),
        format!(r"^{n}\s*(?::[^=]+)?="),
    ];
    Regex::new(&format!("(?m){}", forms.join("|"))).map_err(|e| e.to_string())
}

/// Type-like declarations named `name`.
pub fn type_pattern(name: &str) -> Result<Regex, String> {
    let n = regex::escape(bare_identifier(name)?);
    Regex::new(&format!(
        r"(?m)\b(?:interface|type|class|enum|struct|trait)\s+{n}\b"
    ))
    .map_err(|e| e.to_string())
}

/// Split `METHOD /path` into an optional lowercase method and a path.
pub fn split_endpoint(name: &str) -> (Option<String>, String) {
    let trimmed = name.trim();
    if let Some((first, rest)) = trimmed.split_once(char::is_whitespace) {
        let lower = first.to_lowercase();
        if HTTP_METHODS.split('|').any(|m| m == lower) {
            return (Some(lower), rest.trim().to_string());
        }
    }
    (None, trimmed.to_string())
}

/// Route registrations for an endpoint in common web frameworks.
pub fn endpoint_pattern(name: &str) -> Result<Regex, String> {
    let (method, path) = split_endpoint(name);
    if path.is_empty() {
        return Err(format!("endpoint '{}' has no path", name));
    }
    let p = regex::escape(&path);
    let m = match &method {
        Some(m) => regex::escape(m),
        None => HTTP_METHODS.to_string(),
    };
    let q = r#"['"`]"#;

    let mut forms = vec![
        // Express / Fastify / Flask / FastAPI: app.get('/path'  @app.post("/path"
        format!(r"\.(?i:{m})\s*\(\s*{q}{p}{q}"),
        // Decorators: @Get('/path')
        format!(r"@(?i:{m})\s*\(\s*{q}{p}{q}"),
        // axum: .route("/path", get(handler))
        format!(r#"\.route\s*\(\s*"{p}"\s*,[^;]*?\b(?i:{m})\s*\("#),
    ];
    match &method {
        // Flask: @app.route("/path", methods=["POST"])
        Some(m) => forms.push(format!(
            r#"\.route\s*\(\s*{q}{p}{q}[^)]*methods\s*=\s*\[[^\]]*{q}(?i:{m}){q}"#
        )),
        None => forms.push(format!(r"\.route\s*\(\s*{q}{p}{q}")),
    }

    Regex::new(&forms.join("|")).map_err(|e| e.to_string())
}

/// A file under one of the migration directories whose name contains `name`.
pub fn find_migration(root: &Path, migration_dirs: &[String], name: &str) -> Option<String> {
    let needle = name.trim().to_lowercase();
    if needle.is_empty() {
        return None;
    }
    let root_pattern = glob::Pattern::escape(&root.to_string_lossy());

    for dir in migration_dirs {
        if validate_relative_path(dir).is_err() {
            tracing::warn!(dir = %dir, "Skipping invalid migration directory");
            continue;
        }
        let pattern = format!("{}/{}/**/*", root_pattern, glob::Pattern::escape(dir));
        let Ok(paths) = glob::glob(&pattern) else {
            continue;
        };
        for path in paths.filter_map(|p| p.ok()) {
            let matches = path
                .file_name()
                .map(|f| f.to_string_lossy().to_lowercase().contains(&needle))
                .unwrap_or(false);
            if matches {
                return Some(relative(root, &path));
            }
        }
    }
    None
}

/// A plain file or directory relative to the root.
pub fn find_file(root: &Path, name: &str) -> Result<Option<String>, String> {
    validate_relative_path(name)?;
    let path = root.join(name);
    Ok(path.exists().then(|| name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_export_pattern_languages() {
        let re = export_pattern("UserModel").unwrap();
        assert!(re.is_match("export const UserModel = {}"));
        assert!(re.is_match("export default class UserModel {}"));
        assert!(re.is_match("export interface UserModel {"));
        assert!(re.is_match("export { Foo, UserModel } from './user'"));
        assert!(re.is_match("export * as UserModel from './user'"));
        assert!(re.is_match("pub struct UserModel {"));
        assert!(re.is_match("pub(crate) fn UserModel() {}"));
        assert!(re.is_match("pub use crate::models::{UserModel, Other};"));
        assert!(re.is_match("class UserModel(Base):"));
        assert!(!re.is_match("const UserModel = {}"));
        assert!(!re.is_match("export const UserModelExtra = 1"));
        assert!(!re.is_match("    def UserModel(self):"));
    }

    #[test]
    fn test_export_name_must_be_identifier() {
        assert!(export_pattern("User Model").is_err());
        assert!(export_pattern("a(b").is_err());
        assert!(export_pattern("models::UserModel").is_ok());
    }

    #[test]
    fn test_type_pattern() {
        let re = type_pattern("Session").unwrap();
        assert!(re.is_match("export type Session = {"));
        assert!(re.is_match("pub struct Session {"));
        assert!(re.is_match("trait Session {"));
        assert!(!re.is_match("let Session = 1"));
    }

    #[test]
    fn test_split_endpoint() {
        assert_eq!(
            split_endpoint("POST /api/login"),
            (Some("post".to_string()), "/api/login".to_string())
        );
        assert_eq!(split_endpoint("/health"), (None, "/health".to_string()));
    }

    #[test]
    fn test_endpoint_pattern_frameworks() {
        let re = endpoint_pattern("POST /api/login").unwrap();
        assert!(re.is_match("router.post('/api/login', handler)"));
        assert!(re.is_match("@Post('/api/login')"));
        assert!(re.is_match("@app.post(\"/api/login\")"));
        assert!(re.is_match(".route(\"/api/login\", post(login))"));
        assert!(re.is_match(".route(\"/api/login\", get(show).post(login))"));
        assert!(re.is_match("@app.route('/api/login', methods=['POST'])"));
        assert!(!re.is_match("router.get('/api/login', handler)"));
        assert!(!re.is_match("router.post('/api/logout', handler)"));

        let any = endpoint_pattern("/health").unwrap();
        assert!(any.is_match("app.get(\"/health\", h)"));
    }

    #[test]
    fn test_source_set_respects_excludes_and_size() {
        let dir = tempdir().unwrap();
        let root = dir.path();
        write(root, "src/user.ts", "export const UserModel = 1;\n");
        write(root, "node_modules/pkg/index.ts", "export const Hidden = 1;\n");
        write(root, "notes.txt", "export const Notes = 1;\n");

        let mut settings = VerificationSection::default();
        let set = SourceSet::collect(root, &settings);
        assert_eq!(set.len(), 1);
        assert_eq!(
            set.find(&export_pattern("UserModel").unwrap()).as_deref(),
            Some("src/user.ts")
        );
        assert!(set.find(&export_pattern("Hidden").unwrap()).is_none());

        settings.max_file_bytes = 4;
        assert!(SourceSet::collect(root, &settings).is_empty());
    }

    #[test]
    fn test_find_migration() {
        let dir = tempdir().unwrap();
        write(dir.path(), "db/migrations/20260101_Add_Users.sql", "create table users;");
        let dirs = VerificationSection::default().migration_dirs;
        assert_eq!(
            find_migration(dir.path(), &dirs, "add_users").as_deref(),
            Some("db/migrations/20260101_Add_Users.sql")
        );
        assert!(find_migration(dir.path(), &dirs, "drop_users").is_none());
    }

    #[test]
    fn test_find_file_rejects_traversal() {
        let dir = tempdir().unwrap();
        write(dir.path(), "src/a.rs", "");
        assert_eq!(find_file(dir.path(), "src/a.rs").unwrap().as_deref(), Some("src/a.rs"));
        assert_eq!(find_file(dir.path(), "src/b.rs").unwrap(), None);
        assert!(find_file(dir.path(), "../etc/passwd").is_err());
    }
}
