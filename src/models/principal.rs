use serde::{Deserialize, Serialize};

/// Verified caller identity, attached to the request by `auth::inject_principal`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    // email address carried in the token
    pub owner: String,
}
