use stride_models::presence::Identity;
use uuid::Uuid;

/// One authenticated gateway connection.
pub struct Session {
    pub session_id: Uuid,
    pub identity: Identity,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            identity,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.identity.user_id
    }
}
