//! Path cleanup and module-path derivation.
//!
//! Paths here are project-relative URIs with `/` separators; backslashes
//! are treated as separators on input and never produced on output.

const EXTENSION: &str = ".h64";

fn is_separator(c: char) -> bool {
    c == '/' || c == '\\'
}

/// Collapses repeated separators and strips a trailing separator (a lone
/// root `/` is kept).
pub fn remove_double_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_sep = false;
    for c in path.chars() {
        if is_separator(c) {
            if !last_was_sep {
                out.push('/');
            }
            last_was_sep = true;
        } else {
            out.push(c);
            last_was_sep = false;
        }
    }
    if out.len() > 1 && out.ends_with('/') {
        out.pop();
    }
    out
}

/// Normalizes a path: separator unification, `.` removal, `..` collapse
/// against preceding components (leading `..` components are kept since
/// there is nothing to collapse them into). Idempotent.
pub fn normalize(path: &str) -> String {
    let cleaned = remove_double_separators(path);
    let absolute = cleaned.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for comp in cleaned.split('/') {
        match comp {
            "" | "." => {}
            ".." => {
                if matches!(parts.last(), Some(&"..")) || parts.is_empty() {
                    if !absolute {
                        parts.push("..");
                    }
                } else {
                    parts.pop();
                }
            }
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else {
        joined
    }
}

/// Errors from turning a project-relative file path into a dotted module
/// path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModulePathError {
    /// A path component other than the extension contains a dot.
    HasDots(String),
    /// The path escapes the project root or is empty after cleanup.
    NotInProject(String),
}

/// Derives the dotted module path for a source file relative to its project
/// root: strips the `.h64` extension, normalizes, rejects stray dots, and
/// joins components with `.`. Deterministic for a given input.
pub fn module_path_from_relative(rel_path: &str) -> Result<String, ModulePathError> {
    let mut cleaned = normalize(rel_path);
    if let Some(stripped) = cleaned.strip_suffix(EXTENSION) {
        cleaned = stripped.to_string();
    }
    if cleaned.is_empty() || cleaned.starts_with('/') || cleaned.starts_with("..") {
        return Err(ModulePathError::NotInProject(rel_path.to_string()));
    }
    if cleaned.contains('.') {
        return Err(ModulePathError::HasDots(cleaned));
    }
    Ok(cleaned.replace('/', "."))
}

/// Relativizes `file_uri` against `project_root`, both separator-normalized
/// first. Returns `None` if the file is not under the root. The match is
/// component-wise: `/proj` does not cover `/project2/x`.
pub fn relative_to_root(project_root: &str, file_uri: &str) -> Option<String> {
    let root = normalize(project_root);
    let file = normalize(file_uri);
    if root.is_empty() {
        return Some(file);
    }
    let rest = file.strip_prefix(&root)?;
    let rest = if root.ends_with('/') {
        rest
    } else {
        rest.strip_prefix('/')?
    };
    if rest.is_empty() {
        return None;
    }
    Some(rest.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_dots_and_separators() {
        assert_eq!(normalize("u//abc/def/..u/../.."), "u/abc");
        assert_eq!(normalize("../abc/def/..u/../.."), "../abc");
        assert_eq!(normalize("./a/./b"), "a/b");
        assert_eq!(normalize("a\\b\\\\c"), "a/b/c");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in ["u//abc/def/..u/../..", "../abc/def/..u/../..", "/x/../y", "a/b/"] {
            let once = normalize(p);
            assert_eq!(normalize(&once), once);
        }
    }

    #[test]
    fn module_path_uses_dot_notation() {
        assert_eq!(module_path_from_relative("main.h64").unwrap(), "main");
        assert_eq!(
            module_path_from_relative("utils/math.h64").unwrap(),
            "utils.math"
        );
    }

    #[test]
    fn module_path_rejects_stray_dots() {
        assert!(matches!(
            module_path_from_relative("utils/ma.th.h64"),
            Err(ModulePathError::HasDots(_))
        ));
    }

    #[test]
    fn module_path_rejects_escaping_paths() {
        assert!(matches!(
            module_path_from_relative("../main.h64"),
            Err(ModulePathError::NotInProject(_))
        ));
    }

    #[test]
    fn relative_to_root_strips_prefix() {
        assert_eq!(
            relative_to_root("/proj", "/proj/sub/mod.h64").as_deref(),
            Some("sub/mod.h64")
        );
        assert_eq!(relative_to_root("/proj", "/other/mod.h64"), None);
    }

    #[test]
    fn relative_to_root_matches_whole_components() {
        assert_eq!(relative_to_root("/proj", "/project2/mod.h64"), None);
        assert_eq!(
            relative_to_root("/", "/mod.h64").as_deref(),
            Some("mod.h64")
        );
    }
}
