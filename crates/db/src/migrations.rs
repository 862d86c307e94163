use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::{connect_with_settings, migrations::MIGRATOR};

    const MANAGED_TABLES: &[&str] = &[
        "server",
        "chat_user",
        "channel",
        "channel_member",
        "summary",
        "message",
        "notice",
        "topic",
        "server_event",
        "user_event",
        "channel_event",
    ];

    async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
        let mut names: Vec<String> = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE '_sqlx%'
             AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(pool)
        .await
        .expect("load tables")
        .into_iter()
        .map(|row| row.get::<String, _>("name"))
        .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn migrations_create_every_table() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        let mut expected: Vec<String> = MANAGED_TABLES.iter().map(|name| name.to_string()).collect();
        expected.sort();
        assert_eq!(table_names(&pool).await, expected);
    }

    #[tokio::test]
    async fn migrations_up_down_up() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        MIGRATOR.undo(&pool, 0).await.expect("undo migrations");
        assert!(table_names(&pool).await.is_empty());

        run_pending(&pool).await.expect("re-run migrations");
        assert_eq!(table_names(&pool).await.len(), MANAGED_TABLES.len());
    }

    #[tokio::test]
    async fn message_requires_exactly_one_target() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        sqlx::query("INSERT INTO chat_user (name, created_at) VALUES ('alice', '2026-01-01T00:00:00Z')")
            .execute(&pool)
            .await
            .expect("insert user");

        let neither = sqlx::query(
            "INSERT INTO message (content, sender_id, created_at)
             VALUES ('orphan', 1, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;
        assert!(neither.is_err());

        sqlx::query(
            "INSERT INTO server (name, hostname, port, created_at)
             VALUES ('Server irc:6667', 'irc', 6667, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert server");
        sqlx::query(
            "INSERT INTO channel (name, server_id, created_at)
             VALUES ('#perch', 1, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await
        .expect("insert channel");

        let both = sqlx::query(
            "INSERT INTO message (content, sender_id, channel_id, recipient_id, created_at)
             VALUES ('both', 1, 1, 1, '2026-01-01T00:00:00Z')",
        )
        .execute(&pool)
        .await;
        assert!(both.is_err());
    }
}
