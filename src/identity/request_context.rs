use super::Principal;

/// Carried by every authorized request so handlers and logs agree on who is
/// acting and which request they are part of.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub principal: Principal,
    pub request_id: String,
    pub path: String,
}

impl RequestContext {
    pub fn new(principal: Principal, path: impl Into<String>) -> Self {
        Self {
            principal,
            request_id: uuid::Uuid::new_v4().to_string(),
            path: path.into(),
        }
    }
}
