use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS profiles (
            id          TEXT PRIMARY KEY,
            username    TEXT,
            avatar_url  TEXT,
            push_token  TEXT
        );

        CREATE TABLE IF NOT EXISTS posts (
            id          TEXT PRIMARY KEY,
            created_at  TEXT NOT NULL,
            caption     TEXT,
            image       TEXT,
            user_id     TEXT NOT NULL REFERENCES profiles(id)
        );

        CREATE INDEX IF NOT EXISTS idx_posts_created
            ON posts(created_at);

        CREATE INDEX IF NOT EXISTS idx_posts_user
            ON posts(user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
