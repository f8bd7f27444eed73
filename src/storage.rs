use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::alert::Alert;

/// Append-only alert index keyed by insertion order.
///
/// `append` is all-or-nothing per record: a reader never observes a partial
/// or corrupt record. A single writer is assumed.
pub trait AlertIndex: Send {
    /// Id the next appended alert will carry. Ids increase monotonically.
    fn next_id(&mut self) -> Result<u64>;

    fn append(&mut self, alert: &Alert) -> Result<()>;

    /// The last `limit` alerts, oldest first.
    fn recent(&mut self, limit: usize) -> Result<Vec<Alert>>;

    fn len(&mut self) -> Result<usize>;
}

// -------------------- JSON file --------------------

/// JSON array file, rewritten atomically (temp file + fsync + rename) on
/// every append.
pub struct JsonAlertIndex {
    path: PathBuf,
    alerts: Vec<Alert>,
}

impl JsonAlertIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let alerts = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("read alert index {}", path.display()))?;
            if raw.trim().is_empty() {
                Vec::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| anyhow!("corrupt alert index {}: {}", path.display(), e))?
            }
        } else {
            Vec::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            alerts,
        })
    }
}

impl AlertIndex for JsonAlertIndex {
    fn next_id(&mut self) -> Result<u64> {
        Ok(self.alerts.iter().map(|a| a.id).max().unwrap_or(0) + 1)
    }

    fn append(&mut self, alert: &Alert) -> Result<()> {
        let mut next = self.alerts.clone();
        next.push(alert.clone());
        let encoded = serde_json::to_vec_pretty(&next)?;
        write_atomic(&self.path, &encoded)
            .with_context(|| format!("write alert index {}", self.path.display()))?;
        self.alerts = next;
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<Alert>> {
        let start = self.alerts.len().saturating_sub(limit);
        Ok(self.alerts[start..].to_vec())
    }

    fn len(&mut self) -> Result<usize> {
        Ok(self.alerts.len())
    }
}

// -------------------- SQLite --------------------

pub struct SqliteAlertIndex {
    conn: Connection,
}

impl SqliteAlertIndex {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut index = Self { conn };
        index.ensure_schema()?;
        Ok(index)
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut index = Self {
            conn: Connection::open_in_memory()?,
        };
        index.ensure_schema()?;
        Ok(index)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS alerts (
              id INTEGER PRIMARY KEY,
              created_at TEXT NOT NULL,
              image_path TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

impl AlertIndex for SqliteAlertIndex {
    fn next_id(&mut self) -> Result<u64> {
        let sql = "SELECT COALESCE(MAX(id), 0) FROM alerts";
        let max: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
        Ok(max as u64 + 1)
    }

    fn append(&mut self, alert: &Alert) -> Result<()> {
        let id = i64::try_from(alert.id).map_err(|_| anyhow!("alert id exceeds i64 range"))?;
        let payload_json = serde_json::to_string(alert)?;
        self.conn.execute(
            r#"
            INSERT INTO alerts(id, created_at, image_path, payload_json)
            VALUES (?1, ?2, ?3, ?4)
            "#,
            params![id, alert.timestamp.to_rfc3339(), alert.image_path, payload_json],
        )?;
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<Alert>> {
        let payloads = {
            let mut stmt = self
                .conn
                .prepare("SELECT payload_json FROM alerts ORDER BY id DESC LIMIT ?1")?;
            let mut rows = stmt.query(params![limit as i64])?;
            let mut payloads = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: String = row.get(0)?;
                payloads.push(payload);
            }
            payloads
        };

        let mut out = Vec::with_capacity(payloads.len());
        for payload in payloads.into_iter().rev() {
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    fn len(&mut self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

// -------------------- In-memory --------------------

#[derive(Clone, Debug, Default)]
pub struct InMemoryAlertIndex {
    alerts: Vec<Alert>,
}

impl AlertIndex for InMemoryAlertIndex {
    fn next_id(&mut self) -> Result<u64> {
        Ok(self.alerts.last().map(|a| a.id).unwrap_or(0) + 1)
    }

    fn append(&mut self, alert: &Alert) -> Result<()> {
        self.alerts.push(alert.clone());
        Ok(())
    }

    fn recent(&mut self, limit: usize) -> Result<Vec<Alert>> {
        let start = self.alerts.len().saturating_sub(limit);
        Ok(self.alerts[start..].to_vec())
    }

    fn len(&mut self) -> Result<usize> {
        Ok(self.alerts.len())
    }
}

/// Write `data` to `path` so readers see either the old file or the complete
/// new one.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow!("invalid output path {}", path.display()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}
