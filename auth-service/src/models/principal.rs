use uuid::Uuid;

/// The authenticated caller, produced by the session middleware and passed
/// explicitly into every service call that needs an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: Uuid,
    pub name: String,
    pub email: String,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            name: String::new(),
            email: String::new(),
        }
    }
}
