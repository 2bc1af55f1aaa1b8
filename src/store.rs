//! SQLite persistence for stories, nodes and generation jobs.
//!
//! Every caller opens its own [`Connection`] through [`Database::connect`];
//! request handlers and background jobs never share one. Node ids come from
//! `last_insert_rowid()`, so they are known before the enclosing transaction
//! commits.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{StoryError, StoryResult};
use crate::schema::{GenerationJob, JobStatus, NarrativeNode, NewNode, NodeOption, StoryRecord};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the on-disk database. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct Database {
    path: PathBuf,
}

impl Database {
    /// Open (creating if needed) the database file and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> StoryResult<Self> {
        let db = Self {
            path: path.as_ref().to_path_buf(),
        };
        let conn = db.connect()?;
        migrate(&conn)?;
        info!("Database ready at {:?}", db.path);
        Ok(db)
    }

    /// Open a fresh connection.
    pub fn connect(&self) -> StoryResult<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(conn)
    }

    /// Run blocking store work on its own connection off the async runtime.
    pub async fn run<T, F>(&self, f: F) -> StoryResult<T>
    where
        F: FnOnce(&mut Connection) -> StoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            f(&mut conn)
        })
        .await?
    }
}

fn migrate(conn: &Connection) -> StoryResult<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;

        CREATE TABLE IF NOT EXISTS stories (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          title TEXT NOT NULL,
          session_id TEXT NOT NULL,
          created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_stories_session ON stories(session_id);

        CREATE TABLE IF NOT EXISTS story_nodes (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          story_id INTEGER NOT NULL REFERENCES stories(id),
          content TEXT NOT NULL,
          is_root INTEGER NOT NULL DEFAULT 0,
          is_ending INTEGER NOT NULL DEFAULT 0,
          is_winning_ending INTEGER NOT NULL DEFAULT 0,
          options TEXT NOT NULL DEFAULT '[]'
        );
        CREATE INDEX IF NOT EXISTS idx_story_nodes_story ON story_nodes(story_id);

        CREATE TABLE IF NOT EXISTS story_jobs (
          job_id TEXT PRIMARY KEY,
          session_id TEXT NOT NULL,
          theme TEXT NOT NULL,
          status TEXT NOT NULL,
          created_at TEXT NOT NULL,
          completed_at TEXT,
          error TEXT,
          story_id INTEGER
        );
        "#,
    )?;
    Ok(())
}

// ============================================================================
// Nodes
// ============================================================================

/// Write side of the node table, as needed by the tree builder.
pub trait NodeStore {
    /// Insert a node with an empty option list and return its id.
    fn insert_node(&self, node: NewNode<'_>) -> StoryResult<i64>;

    /// Replace the option list of an existing node.
    fn set_node_options(&self, node_id: i64, options: &[NodeOption]) -> StoryResult<()>;
}

impl NodeStore for Connection {
    fn insert_node(&self, node: NewNode<'_>) -> StoryResult<i64> {
        self.execute(
            "INSERT INTO story_nodes (story_id, content, is_root, is_ending, is_winning_ending, options)
             VALUES (?1, ?2, ?3, ?4, ?5, '[]')",
            params![
                node.story_id,
                node.content,
                node.is_root,
                node.is_ending,
                node.is_winning_ending
            ],
        )?;
        Ok(self.last_insert_rowid())
    }

    fn set_node_options(&self, node_id: i64, options: &[NodeOption]) -> StoryResult<()> {
        let json = serde_json::to_string(options)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        let changed = self.execute(
            "UPDATE story_nodes SET options = ?1 WHERE id = ?2",
            params![json, node_id],
        )?;
        if changed == 0 {
            return Err(StoryError::not_found("node", node_id));
        }
        Ok(())
    }
}

/// All nodes of a story, in insertion order.
pub fn list_story_nodes(conn: &Connection, story_id: i64) -> StoryResult<Vec<NarrativeNode>> {
    let mut stmt = conn.prepare(
        "SELECT id, story_id, content, is_root, is_ending, is_winning_ending, options
         FROM story_nodes WHERE story_id = ?1 ORDER BY id",
    )?;
    let nodes = stmt
        .query_map(params![story_id], node_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Loaded {} nodes for story {}", nodes.len(), story_id);
    Ok(nodes)
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<NarrativeNode> {
    let options_json: String = row.get(6)?;
    let options: Vec<NodeOption> = serde_json::from_str(&options_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
    Ok(NarrativeNode {
        id: row.get(0)?,
        story_id: row.get(1)?,
        content: row.get(2)?,
        is_root: row.get(3)?,
        is_ending: row.get(4)?,
        is_winning_ending: row.get(5)?,
        options,
    })
}

// ============================================================================
// Stories
// ============================================================================

pub fn insert_story(conn: &Connection, title: &str, session_id: &str) -> StoryResult<StoryRecord> {
    let created_at = Utc::now();
    conn.execute(
        "INSERT INTO stories (title, session_id, created_at) VALUES (?1, ?2, ?3)",
        params![title, session_id, created_at],
    )?;
    Ok(StoryRecord {
        id: conn.last_insert_rowid(),
        title: title.to_string(),
        session_id: session_id.to_string(),
        created_at,
    })
}

pub fn get_story(conn: &Connection, story_id: i64) -> StoryResult<Option<StoryRecord>> {
    let story = conn
        .query_row(
            "SELECT id, title, session_id, created_at FROM stories WHERE id = ?1",
            params![story_id],
            |row| {
                Ok(StoryRecord {
                    id: row.get(0)?,
                    title: row.get(1)?,
                    session_id: row.get(2)?,
                    created_at: row.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(story)
}

// ============================================================================
// Jobs
// ============================================================================

pub fn insert_job(conn: &Connection, job: &GenerationJob) -> StoryResult<()> {
    conn.execute(
        "INSERT INTO story_jobs (job_id, session_id, theme, status, created_at, completed_at, error, story_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            job.job_id,
            job.session_id,
            job.theme,
            job.status.as_str(),
            job.created_at,
            job.completed_at,
            job.error,
            job.story_id
        ],
    )?;
    debug!("Inserted job {} ({})", job.job_id, job.status);
    Ok(())
}

pub fn get_job(conn: &Connection, job_id: &str) -> StoryResult<Option<GenerationJob>> {
    let job = conn
        .query_row(
            "SELECT job_id, session_id, theme, status, created_at, completed_at, error, story_id
             FROM story_jobs WHERE job_id = ?1",
            params![job_id],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

/// Persist the mutable fields of a job (status and its outcome).
pub fn update_job(conn: &Connection, job: &GenerationJob) -> StoryResult<()> {
    let changed = conn.execute(
        "UPDATE story_jobs SET status = ?1, completed_at = ?2, error = ?3, story_id = ?4
         WHERE job_id = ?5",
        params![
            job.status.as_str(),
            job.completed_at,
            job.error,
            job.story_id,
            job.job_id
        ],
    )?;
    if changed == 0 {
        return Err(StoryError::not_found("job", &job.job_id));
    }
    debug!("Job {} -> {}", job.job_id, job.status);
    Ok(())
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<GenerationJob> {
    let status_text: String = row.get(3)?;
    let status = JobStatus::parse(&status_text).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            3,
            Type::Text,
            format!("unknown job status {:?}", status_text).into(),
        )
    })?;
    let completed_at: Option<DateTime<Utc>> = row.get(5)?;
    Ok(GenerationJob {
        job_id: row.get(0)?,
        session_id: row.get(1)?,
        theme: row.get(2)?,
        status,
        created_at: row.get(4)?,
        completed_at,
        error: row.get(6)?,
        story_id: row.get(7)?,
    })
}
