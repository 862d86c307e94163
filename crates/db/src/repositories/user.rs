use async_trait::async_trait;
use chrono::Utc;

use perch_core::domain::entity::User;

use super::{user_from_row, RepositoryError, UserRepository};
use crate::DbPool;

pub struct SqlUserRepository {
    pool: DbPool,
}

impl SqlUserRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqlUserRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<User>, RepositoryError> {
        let row = sqlx::query("SELECT id, name FROM chat_user WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_or_create(&self, name: &str) -> Result<User, RepositoryError> {
        sqlx::query(
            "INSERT INTO chat_user (name, created_at) VALUES (?, ?) ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_name(name)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("user `{name}` vanished")))
    }

    async fn rename(&self, old_name: &str, new_name: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("UPDATE chat_user SET name = ? WHERE name = ?")
            .bind(new_name)
            .bind(old_name)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
