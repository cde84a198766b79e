//! Boundary-aware prefix matching shared by the proxy matcher and RoleGuard.

/// `true` when `prefix` equals `path` or is a prefix of it ending on a
/// segment boundary. `/api` matches `/api` and `/api/x`, never `/apix`.
pub fn matches_prefix(path: &str, prefix: &str) -> bool {
    if path == prefix {
        return true;
    }
    if prefix.ends_with('/') {
        return path.starts_with(prefix);
    }
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Canonical form of a request path: empty and `.` segments dropped, `..`
/// resolved against its parent (never above the root), no trailing slash.
/// `//routes/`, `/a/../routes` and `/routes` all become `/routes`.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

/// Join an upstream base with the suffix left over after the matched prefix,
/// keeping exactly one `/` at the boundary.
pub fn join_upstream(target: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return target.to_string();
    }
    match (target.ends_with('/'), suffix.starts_with('/')) {
        (true, true) => format!("{target}{}", &suffix[1..]),
        (false, false) => format!("{target}/{suffix}"),
        _ => format!("{target}{suffix}"),
    }
}
