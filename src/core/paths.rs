//! Shared path and ordering safety predicates.
//!
//! Artifact paths cross a trust boundary: they are produced by one process
//! and applied inside another's working tree. Every engine funnels its
//! path checks through these predicates so "safe" means the same thing in
//! a bundle output, a patch operation, and a runner write root.

/// A path an artifact may legitimately target inside a workspace.
///
/// Rejects: empty paths, absolute paths, Windows drive prefixes,
/// backslashes, embedded NUL, `..` traversal, `.` segments, and empty
/// segments (`a//b` is not normalized).
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.contains('\0') || path.contains('\\') {
        return false;
    }
    if path.starts_with('/') {
        return false;
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return false;
    }
    path.split('/')
        .all(|segment| !segment.is_empty() && segment != "." && segment != "..")
}

/// Human-readable reason a path failed [`is_safe_relative_path`], for
/// violation messages. Returns `None` for safe paths.
pub fn unsafe_path_reason(path: &str) -> Option<&'static str> {
    if path.is_empty() {
        return Some("path is empty");
    }
    if path.contains('\0') {
        return Some("path contains NUL");
    }
    if path.contains('\\') {
        return Some("path contains backslash");
    }
    if path.starts_with('/') {
        return Some("path is absolute");
    }
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Some("path has a drive prefix");
    }
    for segment in path.split('/') {
        if segment == ".." {
            return Some("path contains `..` traversal");
        }
        if segment == "." || segment.is_empty() {
            return Some("path is not normalized");
        }
    }
    None
}

/// Whether `items` is sorted by code-point order (ties allowed).
pub fn is_sorted<S: AsRef<str>>(items: &[S]) -> bool {
    items.windows(2).all(|w| w[0].as_ref() <= w[1].as_ref())
}

/// Whether `items` is strictly sorted by code-point order (no duplicates).
pub fn is_sorted_strict<S: AsRef<str>>(items: &[S]) -> bool {
    items.windows(2).all(|w| w[0].as_ref() < w[1].as_ref())
}

/// First element shared by two sorted lists, if any.
///
/// Used for allowlist/blocklist disjointness; a single merge walk keeps
/// the check linear without hashing.
pub fn first_overlap<'a>(a: &'a [String], b: &'a [String]) -> Option<&'a str> {
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => return Some(a[i].as_str()),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_paths() {
        assert!(is_safe_relative_path("src/lib.rs"));
        assert!(is_safe_relative_path("a"));
        assert!(is_safe_relative_path("deep/nested/file.txt"));
    }

    #[test]
    fn unsafe_paths() {
        for p in [
            "",
            "/etc/passwd",
            "../escape",
            "a/../b",
            "a/./b",
            "a//b",
            "C:stuff",
            "c:/stuff",
            "win\\style",
            "nul\0byte",
            "trailing/",
        ] {
            assert!(!is_safe_relative_path(p), "expected unsafe: {:?}", p);
            assert!(unsafe_path_reason(p).is_some(), "expected reason: {:?}", p);
        }
        assert_eq!(unsafe_path_reason("src/lib.rs"), None);
    }

    #[test]
    fn sortedness() {
        assert!(is_sorted(&["a", "a", "b"]));
        assert!(!is_sorted_strict(&["a", "a", "b"]));
        assert!(is_sorted_strict(&["a", "b", "c"]));
        assert!(!is_sorted(&["b", "a"]));
        let empty: [&str; 0] = [];
        assert!(is_sorted_strict(&empty));
    }

    #[test]
    fn overlap() {
        let a = vec!["curl".to_string(), "git".to_string(), "npm".to_string()];
        let b = vec!["bash".to_string(), "git".to_string()];
        assert_eq!(first_overlap(&a, &b), Some("git"));
        let c = vec!["zsh".to_string()];
        assert_eq!(first_overlap(&a, &c), None);
    }
}
