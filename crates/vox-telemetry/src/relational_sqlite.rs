//! SQLite-backed relational sink.
//!
//! Stands in for the original platform's PostgreSQL client: same two
//! tables (`calls`, `scenarios`) and the same unique-key/upsert invariants
//! from §4.E, backed by a crate already in use elsewhere in this tree
//! rather than a hand-rolled Postgres wire client.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::sinks::{CallEnd, CallStart, RelationalSink};

pub struct SqliteRelationalSink {
    pool: SqlitePool,
}

impl SqliteRelationalSink {
    pub async fn connect(dsn: &str) -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new().max_connections(5).connect(dsn).await?;
        let sink = SqliteRelationalSink { pool };
        sink.migrate().await?;
        Ok(sink)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        SqliteRelationalSink { pool }
    }

    async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS calls (
                call_id TEXT PRIMARY KEY,
                uuid TEXT NOT NULL,
                caller TEXT NOT NULL,
                scenario_id TEXT,
                mode TEXT NOT NULL,
                robot_name TEXT NOT NULL,
                language TEXT NOT NULL,
                started_at TEXT NOT NULL DEFAULT (datetime('now')),
                ended_at TEXT,
                duration_sec REAL,
                turns INTEGER,
                barge_ins INTEGER,
                status TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS scenarios (
                name TEXT PRIMARY KEY,
                payload TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert a scenario by name, replacing its payload. Matches the
    /// "`scenarios.name` unique, upsert replaces non-identity fields"
    /// invariant.
    pub async fn upsert_scenario(&self, name: &str, payload: &str) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO scenarios (name, payload) VALUES (?, ?)
             ON CONFLICT(name) DO UPDATE SET payload = excluded.payload",
        )
        .bind(name)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[cfg(test)]
    async fn call_row_exists(&self, call_id: &str) -> anyhow::Result<bool> {
        let row = sqlx::query("SELECT call_id FROM calls WHERE call_id = ?")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    #[cfg(test)]
    async fn call_status(&self, call_id: &str) -> anyhow::Result<Option<String>> {
        let row = sqlx::query("SELECT status FROM calls WHERE call_id = ?")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("status")))
    }
}

#[async_trait]
impl RelationalSink for SqliteRelationalSink {
    async fn insert_call(&self, call: &CallStart) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT INTO calls (call_id, uuid, caller, scenario_id, mode, robot_name, language)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&call.call_id)
        .bind(&call.uuid)
        .bind(&call.caller)
        .bind(&call.scenario_id)
        .bind(&call.mode)
        .bind(&call.robot_name)
        .bind(&call.language)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_call(&self, call_id: &str, summary: &CallEnd) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE calls SET ended_at = datetime('now'), duration_sec = ?, turns = ?,
             barge_ins = ?, status = ? WHERE call_id = ?",
        )
        .bind(summary.duration_sec)
        .bind(summary.turns)
        .bind(summary.barge_ins)
        .bind(&summary.status)
        .bind(call_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn sink() -> SqliteRelationalSink {
        SqliteRelationalSink::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_call_then_finish_updates_status() {
        let sink = sink().await;
        let call = CallStart {
            call_id: "call-0001".into(),
            uuid: "uuid-a".into(),
            caller: "0099123456".into(),
            mode: "pipeline".into(),
            robot_name: "robot-1".into(),
            language: "ru".into(),
            scenario_id: None,
        };
        sink.insert_call(&call).await.unwrap();
        assert!(sink.call_row_exists("call-0001").await.unwrap());

        sink.finish_call(
            "call-0001",
            &CallEnd { duration_sec: 12.5, turns: 3, barge_ins: 1, status: "completed".into() },
        )
        .await
        .unwrap();
        assert_eq!(sink.call_status("call-0001").await.unwrap().as_deref(), Some("completed"));
    }

    #[tokio::test]
    async fn scenario_upsert_replaces_payload() {
        let sink = sink().await;
        sink.upsert_scenario("greeting", "v1").await.unwrap();
        sink.upsert_scenario("greeting", "v2").await.unwrap();
        let row = sqlx::query("SELECT payload FROM scenarios WHERE name = 'greeting'")
            .fetch_one(&sink.pool)
            .await
            .unwrap();
        let payload: String = row.get("payload");
        assert_eq!(payload, "v2");
    }
}
