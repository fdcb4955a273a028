use uuid::Uuid;

/// A user as resolved by the identity directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: Uuid,
    pub display_name: String,
    pub avatar_url: Option<String>,
}
