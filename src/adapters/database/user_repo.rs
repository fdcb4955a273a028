use crate::adapters::database::DbPool;
use crate::adapters::database::records::UserRecord;
use crate::domain::identity::Identity;
use crate::error::Result;
use crate::services::store::IdentityDirectory;
use async_trait::async_trait;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct UserRepository {
    pool: DbPool,
}

impl UserRepository {
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityDirectory for UserRepository {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn resolve(&self, user_id: Uuid) -> Result<Option<Identity>> {
        let mut conn = self.pool.acquire().await?;
        let record = sqlx::query_as::<_, UserRecord>("SELECT id, display_name, avatar_url FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(record.map(Into::into))
    }
}
