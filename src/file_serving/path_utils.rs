use std::borrow::Cow;
use std::path::{self, Path, PathBuf, MAIN_SEPARATOR};

use crate::error::ServeError;
use crate::logging::LoggingExt;

/// Prefixes `/` so every request path is rooted at the served directory.
pub fn with_leading_slash(path: &str) -> Cow<'_, str> {
    if path.starts_with('/') {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(format!("/{path}"))
    }
}

/// Lexically normalises a slash-separated path: collapses repeated
/// separators, drops `.` segments and resolves `..` against the preceding
/// segment. `..` cannot climb above the root of a rooted path.
pub fn clean(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|last| *last != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{joined}"),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

fn is_slash(c: char) -> bool {
    c == '/' || c == '\\'
}

/// True if any `/` or `\` separated field is exactly `..`.
pub fn contains_dot_dot(path: &str) -> bool {
    path.contains("..") && path.split(is_slash).any(|field| field == "..")
}

fn from_slash(path: &str) -> Cow<'_, str> {
    if MAIN_SEPARATOR == '/' {
        Cow::Borrowed(path)
    } else {
        Cow::Owned(path.replace('/', &MAIN_SEPARATOR.to_string()))
    }
}

/// Maps an untrusted, percent-decoded request path onto an absolute path
/// at or below `root`.
pub fn resolve_request_path(root: &Path, request_path: &str) -> Result<PathBuf, ServeError> {
    let upath = with_leading_slash(request_path);
    log::info!("Serving {}", upath);

    let cleaned = clean(&upath);

    // A native separator other than '/' would be interpreted by the
    // filesystem but never seen by `clean`.
    let smuggled_separator = MAIN_SEPARATOR != '/' && cleaned.contains(MAIN_SEPARATOR);
    if contains_dot_dot(&upath)
        || contains_dot_dot(&cleaned)
        || cleaned.contains('\0')
        || smuggled_separator
    {
        log::warn!("Rejecting request path {:?}", upath);
        return Err(ServeError::InvalidPath);
    }

    let relative = cleaned.trim_start_matches('/');
    let joined = if relative.is_empty() {
        root.to_path_buf()
    } else {
        root.join(&*from_slash(relative))
    };

    let resolved = joined.log_operation("absolute", || path::absolute(&joined))?;
    log::debug!("Resolved {} to {}", upath, resolved.display());
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_collapses_dots_and_separators() {
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("//a///b/"), "/a/b");
        assert_eq!(clean("/a/./b/."), "/a/b");
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean("/a/.."), "/");
    }

    #[test]
    fn clean_relative_paths() {
        assert_eq!(clean(""), ".");
        assert_eq!(clean("a/../.."), "..");
        assert_eq!(clean("../../a"), "../../a");
        assert_eq!(clean("a/./b"), "a/b");
    }

    #[test]
    fn dot_dot_fields() {
        assert!(contains_dot_dot(".."));
        assert!(contains_dot_dot("/a/../b"));
        assert!(contains_dot_dot("/a\\..\\b"));
        assert!(!contains_dot_dot("/a..b/c"));
        assert!(!contains_dot_dot("/...//.../x"));
        assert!(!contains_dot_dot("/plain/path"));
    }

    #[test]
    fn leading_slash_is_added_once() {
        assert_eq!(with_leading_slash("a/b"), "/a/b");
        assert_eq!(with_leading_slash("/a/b"), "/a/b");
        assert_eq!(with_leading_slash(""), "/");
    }

    #[cfg(unix)]
    #[test]
    fn resolves_under_root() {
        let root = Path::new("/var/logs");
        assert_eq!(
            resolve_request_path(root, "/2017-01-01/abc/console.log.gz").unwrap(),
            PathBuf::from("/var/logs/2017-01-01/abc/console.log.gz")
        );
        assert_eq!(
            resolve_request_path(root, "a//./b.log").unwrap(),
            PathBuf::from("/var/logs/a/b.log")
        );
        assert_eq!(resolve_request_path(root, "").unwrap(), PathBuf::from("/var/logs"));
        assert_eq!(resolve_request_path(root, "/").unwrap(), PathBuf::from("/var/logs"));
    }

    #[test]
    fn rejects_traversal() {
        let root = Path::new("/var/logs");
        for path in [
            "/../../etc/passwd",
            "..",
            "/a/../../b",
            "//..//..//etc/passwd",
            "/a/./../b",
            "/..\\..\\etc\\passwd",
            "a\\..\\b",
        ] {
            assert!(
                matches!(resolve_request_path(root, path), Err(ServeError::InvalidPath)),
                "{path:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_null_bytes() {
        assert!(matches!(
            resolve_request_path(Path::new("/var/logs"), "/a\0.log"),
            Err(ServeError::InvalidPath)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn dotted_names_are_not_traversal() {
        let root = Path::new("/var/logs");
        assert_eq!(
            resolve_request_path(root, "/a..b/...").unwrap(),
            PathBuf::from("/var/logs/a..b/...")
        );
    }

    #[cfg(unix)]
    #[test]
    fn backslash_passes_through_where_it_is_not_a_separator() {
        assert_eq!(
            resolve_request_path(Path::new("/var/logs"), "/a\\b.log").unwrap(),
            PathBuf::from("/var/logs/a\\b.log")
        );
    }

    #[cfg(unix)]
    #[test]
    fn resolved_paths_stay_under_root() {
        let root = Path::new("/srv/root");
        for path in ["/x/../y", "/./z", "////w", "/p/q/./../r", "v/w/", "/%2e%2e"] {
            if let Ok(resolved) = resolve_request_path(root, path) {
                assert!(resolved.starts_with(root), "{path:?} -> {resolved:?}");
            }
        }
    }
}
