use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use perch_core::domain::entity::{Channel, ChannelId, ServerId, User, UserId};

use super::{column, user_from_row, ChannelRepository, RepositoryError};
use crate::DbPool;

pub struct SqlChannelRepository {
    pool: DbPool,
}

impl SqlChannelRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn channel_from_row(row: &SqliteRow) -> Result<Channel, RepositoryError> {
    Ok(Channel {
        id: ChannelId(column(row, "id")?),
        name: column(row, "name")?,
        mode: column(row, "mode")?,
        server_id: ServerId(column(row, "server_id")?),
    })
}

#[async_trait]
impl ChannelRepository for SqlChannelRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Channel>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, mode, server_id FROM channel WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(channel_from_row).transpose()
    }

    async fn find_or_create(
        &self,
        name: &str,
        server_id: ServerId,
    ) -> Result<Channel, RepositoryError> {
        sqlx::query(
            "INSERT INTO channel (name, server_id, created_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(name)
        .bind(server_id.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_name(name)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("channel `{name}` vanished")))
    }

    async fn set_mode(&self, id: ChannelId, mode: &str) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE channel SET mode = ? WHERE id = ?")
            .bind(mode)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_member(&self, id: ChannelId, user_id: UserId) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO channel_member (channel_id, user_id, joined_at) VALUES (?, ?, ?)
             ON CONFLICT(channel_id, user_id) DO NOTHING",
        )
        .bind(id.0)
        .bind(user_id.0)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_member(&self, id: ChannelId, user_id: UserId) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM channel_member WHERE channel_id = ? AND user_id = ?")
            .bind(id.0)
            .bind(user_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn members(&self, id: ChannelId) -> Result<Vec<User>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT u.id, u.name FROM chat_user u
             JOIN channel_member m ON m.user_id = u.id
             WHERE m.channel_id = ?
             ORDER BY u.name ASC",
        )
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(user_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use perch_core::domain::entity::NewServer;

    use super::SqlChannelRepository;
    use crate::repositories::{
        ChannelRepository, ServerRepository, SqlServerRepository, SqlUserRepository,
        UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn membership_is_added_once_and_removed() {
        let pool = setup().await;
        let server = SqlServerRepository::new(pool.clone())
            .find_or_create(NewServer::new("irc", 6667, false))
            .await
            .expect("server");
        let users = SqlUserRepository::new(pool.clone());
        let alice = users.find_or_create("alice").await.expect("alice");
        let bob = users.find_or_create("bob").await.expect("bob");

        let repo = SqlChannelRepository::new(pool);
        let channel = repo.find_or_create("#perch", server.id).await.expect("channel");
        assert_eq!(repo.find_or_create("#perch", server.id).await.expect("again").id, channel.id);

        repo.add_member(channel.id, alice.id).await.expect("add alice");
        repo.add_member(channel.id, alice.id).await.expect("add alice twice");
        repo.add_member(channel.id, bob.id).await.expect("add bob");
        let names: Vec<String> =
            repo.members(channel.id).await.expect("members").into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["alice", "bob"]);

        repo.remove_member(channel.id, alice.id).await.expect("remove");
        let names: Vec<String> =
            repo.members(channel.id).await.expect("members").into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["bob"]);
    }

    #[tokio::test]
    async fn channel_mode_is_stored() {
        let pool = setup().await;
        let server = SqlServerRepository::new(pool.clone())
            .find_or_create(NewServer::new("irc", 6667, false))
            .await
            .expect("server");
        let repo = SqlChannelRepository::new(pool);
        let channel = repo.find_or_create("#perch", server.id).await.expect("channel");

        repo.set_mode(channel.id, "+nt").await.expect("set mode");
        let found = repo.find_by_name("#perch").await.expect("find").expect("exists");
        assert_eq!(found.mode, "+nt");
    }
}
