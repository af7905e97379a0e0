use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::routes::prefix_matches;

/// Closed role set. Every session binds exactly one role; there is no
/// per-subject override layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Operator,
    Viewer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Operator, Role::Viewer];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Operator => "operator",
            Role::Viewer => "viewer",
        }
    }

    /// Parse the storage/wire form. Case-sensitive: role identifiers are
    /// written lowercase everywhere.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "operator" => Some(Role::Operator),
            "viewer" => Some(Role::Viewer),
            _ => None,
        }
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable role -> route-prefix grant table. Built once at startup and
/// shared read-only behind an Arc; `permits` is the only query.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    grants: HashMap<Role, Vec<String>>,
}

impl RoleRegistry {
    /// The portal's built-in grant table. Admins see the admin subtree plus
    /// the full client surface; operators the full client surface; viewers a
    /// read-only subset.
    pub fn builtin() -> Self {
        Self::from_grants(&[
            (Role::Admin, &["/admin", "/dashboard", "/agents", "/conversations", "/appointments", "/reports"]),
            (Role::Operator, &["/dashboard", "/agents", "/conversations", "/appointments", "/reports"]),
            (Role::Viewer, &["/dashboard", "/conversations", "/reports"]),
        ])
    }

    pub fn from_grants(pairs: &[(Role, &[&str])]) -> Self {
        let mut grants: HashMap<Role, Vec<String>> = HashMap::new();
        for (role, prefixes) in pairs {
            let entry = grants.entry(*role).or_default();
            for p in prefixes.iter() {
                entry.push(crate::routes::normalize_path(p));
            }
        }
        Self { grants }
    }

    /// True iff `path` falls under one of the prefixes granted to `role`.
    /// Prefix matching is case-sensitive and segment-aware; a role absent
    /// from the table permits nothing.
    pub fn permits(&self, role: Role, path: &str) -> bool {
        let path = crate::routes::normalize_path(path);
        match self.grants.get(&role) {
            Some(prefixes) => prefixes.iter().any(|p| prefix_matches(p, &path)),
            None => false,
        }
    }

    pub fn prefixes(&self, role: Role) -> &[String] {
        self.grants.get(&role).map(|v| v.as_slice()).unwrap_or(&[])
    }
}
