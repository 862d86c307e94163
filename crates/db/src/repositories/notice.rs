use async_trait::async_trait;
use chrono::Utc;

use perch_core::domain::entity::{NewNotice, NoticeSource, NoticeTarget};

use super::{column, NoticeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlNoticeRepository {
    pool: DbPool,
}

impl SqlNoticeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NoticeRepository for SqlNoticeRepository {
    async fn save(&self, notice: NewNotice) -> Result<i64, RepositoryError> {
        let (from_server, from_user) = match notice.from {
            NoticeSource::Server(id) => (Some(id.0), None),
            NoticeSource::User(id) => (None, Some(id.0)),
        };
        let (to_channel, to_user) = match notice.to {
            NoticeTarget::Channel(id) => (Some(id.0), None),
            NoticeTarget::User(id) => (None, Some(id.0)),
        };

        let result = sqlx::query(
            "INSERT INTO notice (content, from_server_id, from_user_id, to_channel_id, to_user_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&notice.content)
        .bind(from_server)
        .bind(from_user)
        .bind(to_channel)
        .bind(to_user)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn count(&self) -> Result<u64, RepositoryError> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM notice").fetch_one(&self.pool).await?;
        let count: i64 = column(&row, "count")?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use perch_core::domain::entity::{NewNotice, NewServer, NoticeSource, NoticeTarget};

    use super::SqlNoticeRepository;
    use crate::repositories::{
        NoticeRepository, ServerRepository, SqlServerRepository, SqlUserRepository,
        UserRepository,
    };
    use crate::{connect_with_settings, migrations};

    #[tokio::test]
    async fn server_notice_to_user_is_stored() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");

        let server = SqlServerRepository::new(pool.clone())
            .find_or_create(NewServer::new("irc", 6667, false))
            .await
            .expect("server");
        let perch = SqlUserRepository::new(pool.clone()).find_or_create("perch").await.expect("user");

        let notices = SqlNoticeRepository::new(pool.clone());
        notices
            .save(NewNotice {
                content: "*** Looking up your hostname".to_string(),
                from: NoticeSource::Server(server.id),
                to: NoticeTarget::User(perch.id),
            })
            .await
            .expect("save");

        assert_eq!(notices.count().await.expect("count"), 1);
    }
}
