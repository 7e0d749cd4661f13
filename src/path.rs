//! Path Normaliser (§4.1).
//!
//! Translates every guest-visible path into a confined real path under the
//! kernel's immutable root prefix, collapsing `.` and `..` components.
//! Popping past the root is silently absorbed rather than erroring — the
//! guest can never observe or escape the prefix.

/// Normalise `raw` (possibly relative, possibly containing `.`/`..`) against
/// `cwd` (already-confined, root-prefixed) and `root_prefix`, producing a
/// confined real path that always begins with `root_prefix` followed by `/`.
pub fn normalise(root_prefix: &str, cwd: &str, raw: &str) -> String {
    let root_prefix = root_prefix.trim_end_matches('/');
    let root_components: Vec<&str> = root_prefix.split('/').filter(|s| !s.is_empty()).collect();
    let root_depth = root_components.len();

    // `cwd` is itself already a confined, root-prefixed real path (it was
    // produced by a prior call to this function), so a relative `raw`
    // starts from cwd's own components rather than being joined as a
    // string and re-prepended with `root_prefix` — doing the latter would
    // double the prefix every time a relative path resolved against a
    // non-root cwd.
    let mut stack: Vec<&str> = if raw.starts_with('/') {
        root_components
    } else {
        cwd.split('/').filter(|s| !s.is_empty()).collect()
    };

    for component in raw.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                if stack.len() > root_depth {
                    stack.pop();
                }
            }
            other => stack.push(other),
        }
    }

    let mut real = String::new();
    for part in &stack {
        real.push('/');
        real.push_str(part);
    }
    if stack.len() == root_depth {
        real.push('/');
    }
    real
}

/// Strip the root prefix off a real (confined) path, returning the
/// guest-visible view where `root_prefix` itself is `/`.
pub fn strip_root(root_prefix: &str, real: &str) -> String {
    let root_prefix = root_prefix.trim_end_matches('/');
    match real.strip_prefix(root_prefix) {
        Some(rest) if rest.is_empty() => "/".to_string(),
        Some(rest) => rest.to_string(),
        None => real.to_string(),
    }
}

/// Split `"/a/b/c"` into `("/a/b", "c")`. The parent of a root-level entry
/// is `"/"`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(pos) => {
            let parent = if pos == 0 { "/" } else { &path[..pos] };
            (parent, &path[pos + 1..])
        }
        None => ("/", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROOT: &str = "/persistent";

    #[test]
    fn absolute_path_is_confined() {
        assert_eq!(normalise(ROOT, ROOT, "/foo/bar"), "/persistent/foo/bar");
    }

    #[test]
    fn relative_path_resolves_against_cwd() {
        assert_eq!(
            normalise(ROOT, "/persistent/home", "data.txt"),
            "/persistent/home/data.txt"
        );
    }

    #[test]
    fn dot_components_are_dropped() {
        assert_eq!(normalise(ROOT, ROOT, "/a/./b/./c"), "/persistent/a/b/c");
    }

    #[test]
    fn dot_dot_pops_one_component() {
        assert_eq!(normalise(ROOT, ROOT, "/a/b/../c"), "/persistent/a/c");
    }

    #[test]
    fn escape_attempt_is_absorbed_not_erroring() {
        // §8 Testable Property 1 / seed scenario 4.
        assert_eq!(
            normalise(ROOT, ROOT, "../../../etc/passwd"),
            "/persistent/etc/passwd"
        );
    }

    #[test]
    fn root_itself_normalises_with_trailing_slash() {
        assert_eq!(normalise(ROOT, ROOT, "/"), "/persistent/");
        assert_eq!(normalise(ROOT, ROOT, "."), "/persistent/");
    }

    #[test]
    fn every_output_begins_with_root_prefix() {
        for raw in ["/a", "../a", "./a/../../b", "a/b/c", "../../../../../x"] {
            let out = normalise(ROOT, ROOT, raw);
            assert!(out.starts_with(ROOT));
        }
    }

    #[test]
    fn strip_root_hides_prefix_from_guest() {
        assert_eq!(strip_root(ROOT, "/persistent/a/b"), "/a/b");
        assert_eq!(strip_root(ROOT, "/persistent"), "/");
        assert_eq!(strip_root(ROOT, "/persistent/"), "/");
    }

    #[test]
    fn split_path_handles_root_level_entries() {
        assert_eq!(split_path("/foo"), ("/", "foo"));
        assert_eq!(split_path("/a/b/c"), ("/a/b", "c"));
    }
}
