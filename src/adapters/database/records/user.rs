use crate::domain::identity::Identity;
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct UserRecord {
    pub(crate) id: Uuid,
    pub(crate) display_name: String,
    pub(crate) avatar_url: Option<String>,
}

impl From<UserRecord> for Identity {
    fn from(record: UserRecord) -> Self {
        Self { id: record.id, display_name: record.display_name, avatar_url: record.avatar_url }
    }
}
