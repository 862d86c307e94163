use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;

use perch_core::domain::entity::{NewServer, Server, ServerId};

use super::{column, RepositoryError, ServerRepository};
use crate::DbPool;

pub struct SqlServerRepository {
    pool: DbPool,
}

impl SqlServerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn server_from_row(row: &SqliteRow) -> Result<Server, RepositoryError> {
    let port: i64 = column(row, "port")?;
    Ok(Server {
        id: ServerId(column(row, "id")?),
        name: column(row, "name")?,
        hostname: column(row, "hostname")?,
        port: u16::try_from(port)
            .map_err(|_| RepositoryError::Decode(format!("port out of range: {port}")))?,
        tls: column(row, "tls")?,
        motd: column(row, "motd")?,
    })
}

#[async_trait]
impl ServerRepository for SqlServerRepository {
    async fn find_by_name(&self, name: &str) -> Result<Option<Server>, RepositoryError> {
        let row = sqlx::query("SELECT id, name, hostname, port, tls, motd FROM server WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(server_from_row).transpose()
    }

    async fn find_or_create(&self, server: NewServer) -> Result<Server, RepositoryError> {
        sqlx::query(
            "INSERT INTO server (name, hostname, port, tls, created_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&server.name)
        .bind(&server.hostname)
        .bind(i64::from(server.port))
        .bind(server.tls)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.find_by_name(&server.name)
            .await?
            .ok_or_else(|| RepositoryError::Decode(format!("server `{}` vanished", server.name)))
    }

    async fn update_motd(&self, id: ServerId, motd: &str) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE server SET motd = ? WHERE id = ?")
            .bind(motd)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use perch_core::domain::entity::NewServer;

    use super::SqlServerRepository;
    use crate::repositories::ServerRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let repo = SqlServerRepository::new(setup().await);

        let first = repo.find_or_create(NewServer::new("irc.example.net", 6697, true)).await.expect("create");
        let second = repo.find_or_create(NewServer::new("irc.example.net", 6697, true)).await.expect("find");

        assert_eq!(first.id, second.id);
        assert_eq!(first.name, "Server irc.example.net:6697");
        assert!(first.tls);
        assert_eq!(first.motd, "");
    }

    #[tokio::test]
    async fn motd_is_updated() {
        let repo = SqlServerRepository::new(setup().await);
        let server = repo.find_or_create(NewServer::new("irc", 6667, false)).await.expect("create");

        repo.update_motd(server.id, "welcome to irc").await.expect("update");
        let found = repo.find_by_name(&server.name).await.expect("find").expect("exists");
        assert_eq!(found.motd, "welcome to irc");
    }
}
