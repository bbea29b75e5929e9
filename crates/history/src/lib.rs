use std::path::Path;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::debug;

pub type Result<T, E = HistoryError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRow {
    pub number: i64,
    pub title: String,
    pub merged: bool,
}

/// Pull request observations persisted to a single-table SQLite file.
/// Append-only, except that `merged` may transition from false to true.
#[derive(Clone)]
pub struct PullRequestHistory {
    pool: SqlitePool,
}

impl PullRequestHistory {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        Self::connect(options).await
    }

    pub async fn in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().in_memory(true)).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // A single connection serializes writes and keeps in-memory databases
        // coherent across calls.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS pull_requests(\
             id INTEGER PRIMARY KEY AUTOINCREMENT,\
             number INTEGER, title TEXT, merged INTEGER)",
        )
        .execute(&pool)
        .await?;
        debug!("history store initialized");
        Ok(Self { pool })
    }

    pub async fn insert(&self, number: i64, title: &str, merged: bool) -> Result<()> {
        sqlx::query("INSERT INTO pull_requests(number,title,merged) VALUES(?,?,?)")
            .bind(number)
            .bind(title)
            .bind(i64::from(merged))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_merged(&self, number: i64) -> Result<()> {
        sqlx::query("UPDATE pull_requests SET merged=1 WHERE number=?")
            .bind(number)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn rows(&self) -> Result<Vec<HistoryRow>> {
        let rows = sqlx::query("SELECT number,title,merged FROM pull_requests")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| HistoryRow {
                number: row.get::<i64, _>(0),
                title: row.get::<String, _>(1),
                merged: row.get::<i64, _>(2) != 0,
            })
            .collect())
    }

    pub async fn export_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let rows = self.rows().await?;
        let mut out = String::from("number,title,merged\n");
        for row in &rows {
            out.push_str(&escape_csv_field(&row.number.to_string()));
            out.push(',');
            out.push_str(&escape_csv_field(&row.title));
            out.push(',');
            out.push_str(&escape_csv_field(if row.merged { "1" } else { "0" }));
            out.push('\n');
        }
        std::fs::write(path.as_ref(), out)?;
        debug!(path = %path.as_ref().display(), "history exported as csv");
        Ok(())
    }

    pub async fn export_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let rows = self.rows().await?;
        let serialized = serde_json::to_string_pretty(&rows)?;
        std::fs::write(path.as_ref(), serialized)?;
        debug!(path = %path.as_ref().display(), "history exported as json");
        Ok(())
    }
}

/// Fields containing `,`, `"`, LF, or CR are wrapped in quotes with embedded
/// quotes doubled.
fn escape_csv_field(field: &str) -> String {
    let needs_wrap = field.contains([',', '"', '\n', '\r']);
    let escaped = field.replace('"', "\"\"");
    if needs_wrap {
        format!("\"{escaped}\"")
    } else {
        escaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("agpm-history-{}-{}", name, std::process::id()))
    }

    fn parse_csv(text: &str) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        let mut row = Vec::new();
        let mut field = String::new();
        let mut in_quotes = false;
        let mut chars = text.chars().peekable();
        while let Some(c) = chars.next() {
            if in_quotes {
                if c == '"' {
                    if chars.peek() == Some(&'"') {
                        field.push('"');
                        chars.next();
                    } else {
                        in_quotes = false;
                    }
                } else {
                    field.push(c);
                }
            } else {
                match c {
                    '"' => in_quotes = true,
                    ',' => row.push(std::mem::take(&mut field)),
                    '\n' => {
                        row.push(std::mem::take(&mut field));
                        rows.push(std::mem::take(&mut row));
                    }
                    '\r' => {}
                    _ => field.push(c),
                }
            }
        }
        if !field.is_empty() || !row.is_empty() {
            row.push(field);
            rows.push(row);
        }
        rows
    }

    #[tokio::test]
    async fn insert_and_read_back() {
        let history = PullRequestHistory::in_memory().await.unwrap();
        history.insert(1, "First", false).await.unwrap();
        history.insert(2, "Second", true).await.unwrap();
        let rows = history.rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, 1);
        assert!(!rows[0].merged);
        assert!(rows[1].merged);
    }

    #[tokio::test]
    async fn merged_transitions_false_to_true() {
        let history = PullRequestHistory::in_memory().await.unwrap();
        history.insert(7, "Pending", false).await.unwrap();
        history.update_merged(7).await.unwrap();
        let rows = history.rows().await.unwrap();
        assert!(rows[0].merged);
    }

    #[tokio::test]
    async fn csv_round_trips_awkward_titles() {
        let history = PullRequestHistory::in_memory().await.unwrap();
        history.insert(1, "Comma, Title", true).await.unwrap();
        history.insert(2, "Quote \"Title\"", false).await.unwrap();
        history.insert(3, "Line1\nLine2", true).await.unwrap();

        let path = temp_file("quotes.csv");
        history.export_csv(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let rows = parse_csv(&text);
        assert_eq!(rows[0], vec!["number", "title", "merged"]);
        assert_eq!(rows[1], vec!["1", "Comma, Title", "1"]);
        assert_eq!(rows[2], vec!["2", "Quote \"Title\"", "0"]);
        assert_eq!(rows[3], vec!["3", "Line1\nLine2", "1"]);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn json_export_round_trips() {
        let history = PullRequestHistory::in_memory().await.unwrap();
        history.insert(5, "Crafty \"one\", with LF\n", false).await.unwrap();

        let path = temp_file("export.json");
        history.export_json(&path).await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["number"], 5);
        assert_eq!(parsed[0]["title"], "Crafty \"one\", with LF\n");
        assert_eq!(parsed[0]["merged"], false);
        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn file_backed_store_persists_between_opens() {
        let path = temp_file("persist.db");
        let _ = std::fs::remove_file(&path);
        {
            let history = PullRequestHistory::open(&path).await.unwrap();
            history.insert(11, "Kept", false).await.unwrap();
        }
        let history = PullRequestHistory::open(&path).await.unwrap();
        let rows = history.rows().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "Kept");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn escaping_rules() {
        assert_eq!(escape_csv_field("plain"), "plain");
        assert_eq!(escape_csv_field("a,b"), "\"a,b\"");
        assert_eq!(escape_csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv_field("line\r\nbreak"), "\"line\r\nbreak\"");
    }
}
