use serde::{Deserialize, Serialize};

use super::authorizer::Role;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attrs {
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
}

/// The authenticated caller a session is bound to. The role is fixed for the
/// lifetime of any session minted for this principal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub subject_id: String,
    pub username: String,
    pub role: Role,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Principal {
    pub fn new(subject_id: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self { subject_id: subject_id.into(), username: username.into(), role, attrs: Attrs::default() }
    }
}
