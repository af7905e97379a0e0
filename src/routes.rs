//! Route path utilities and the portal route plan
//! -----------------------------------------------
//! Single source of truth for path normalization, prefix matching and the
//! public/protected split used by the guard and the HTTP surface.

pub const LOGIN_PATH: &str = "/login";

/// Paths served without a session. Matching is segment-aware, so
/// "/reset-password" also covers "/reset-password/abc".
pub const PUBLIC_PATHS: &[&str] =
    &["/", "/login", "/pricing", "/register", "/forgot-password", "/reset-password"];

/// Top-level protected sections the navigation surface knows about.
/// Anything else outside the public list is a 404, authenticated or not.
pub const NAV_SECTIONS: &[&str] = &["dashboard", "agents", "conversations", "appointments", "reports", "admin"];

/// Normalize a request path: guarantee a leading slash and strip a trailing
/// slash (except for the root itself). No case folding; paths are
/// case-sensitive throughout.
pub fn normalize_path(raw: &str) -> String {
    let raw = raw.trim();
    let mut p = if raw.starts_with('/') { raw.to_string() } else { format!("/{}", raw) };
    while p.len() > 1 && p.ends_with('/') {
        p.pop();
    }
    p
}

/// Prefix match at a path-segment boundary: "/admin" covers "/admin" and
/// "/admin/users" but never "/administrator".
pub fn prefix_matches(prefix: &str, path: &str) -> bool {
    if prefix == "/" {
        return path == "/";
    }
    path == prefix || (path.starts_with(prefix) && path.as_bytes().get(prefix.len()) == Some(&b'/'))
}

pub fn is_public(path: &str) -> bool {
    PUBLIC_PATHS.iter().any(|p| prefix_matches(p, path))
}

/// Map a path to its protected section name, if it falls under one.
pub fn section_of(path: &str) -> Option<&'static str> {
    NAV_SECTIONS.iter().copied().find(|s| {
        let prefix = format!("/{}", s);
        prefix_matches(&prefix, path)
    })
}

/// Build the login redirect target carrying the originally requested path.
pub fn login_redirect_target(next: &str) -> String {
    format!("{}?next={}", LOGIN_PATH, urlencoding::encode(next))
}
