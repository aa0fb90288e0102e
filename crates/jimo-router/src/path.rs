//! Path normalization helpers shared by registration and lookup.

/// Iterate the non-empty `/`-separated segments of a path.
///
/// Leading, trailing and duplicate slashes produce no segments.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Canonical form of a path: a single leading slash, no trailing slash,
/// no empty segments. The root is `/`.
///
/// ```
/// use jimo_router::clean_path;
///
/// assert_eq!(clean_path(""), "/");
/// assert_eq!(clean_path("users//42/"), "/users/42");
/// ```
pub fn clean_path(path: &str) -> String {
    let mut out = String::with_capacity(path.len() + 1);
    for segment in segments(path) {
        out.push('/');
        out.push_str(segment);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Join a scope prefix and a route path into a canonical pattern.
///
/// ```
/// use jimo_router::join_path;
///
/// assert_eq!(join_path("/api/", "/users"), "/api/users");
/// assert_eq!(join_path("", ""), "/");
/// ```
pub fn join_path(prefix: &str, path: &str) -> String {
    let mut joined = String::with_capacity(prefix.len() + path.len() + 1);
    joined.push_str(prefix);
    joined.push('/');
    joined.push_str(path);
    clean_path(&joined)
}

/// Capture name of a `{name}` segment.
///
/// The inner text must be non-empty and contain none of `/`, `{`, `}`;
/// anything else is a literal segment and yields `None`.
pub fn param_name(segment: &str) -> Option<&str> {
    let name = segment.strip_prefix('{')?.strip_suffix('}')?;
    if name.is_empty() || name.contains(['/', '{', '}']) {
        return None;
    }
    Some(name)
}
