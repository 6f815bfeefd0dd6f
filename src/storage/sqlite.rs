use std::time::Duration;

use chrono::Utc;
use rand::seq::SliceRandom;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::errors::{ReelError, Result, Violation, constraint_violation};
use super::VideoStorage;
use super::models::{
    DestinationId, NewVideo, RandomSelection, TagCount, Video, VideoId, normalize_tag,
    normalize_tags,
};
use super::pool::{self, SqlitePool, StoreConn};

const BASE_SELECT: &str =
    "SELECT videos.id, videos.file_ref, videos.caption, videos.created_at FROM videos";

const VIDEO_TAGS: &str = "
    SELECT t.name FROM video_tags vt
    JOIN tags t ON t.id = vt.tag_id
    WHERE vt.video_id = ?1
    ORDER BY vt.rowid
";

const NEWEST_FIRST: &str = "ORDER BY videos.created_at DESC, videos.id DESC";

// Atomic get-or-create: the no-op update makes RETURNING yield the existing
// id on conflict.
const UPSERT_TAG: &str = "
    INSERT INTO tags (name) VALUES (?1)
    ON CONFLICT(name) DO UPDATE SET name = excluded.name
    RETURNING id
";

const LINK_TAG: &str = "
    INSERT INTO video_tags (video_id, tag_id) VALUES (?1, ?2)
    ON CONFLICT (video_id, tag_id) DO NOTHING
";

const UNDELIVERED: &str = "
    FROM videos v
    WHERE NOT EXISTS (
        SELECT 1 FROM sent_videos sv
        WHERE sv.video_id = v.id AND sv.chat_id = ?1
    )
";

const DEFAULT_POPULAR_LIMIT: i64 = 10;

pub struct SqliteStorage {
    pool: SqlitePool,
    selection: RandomSelection,
    statement_timeout: Option<Duration>,
}

fn row_to_video(row: &Row) -> rusqlite::Result<Video> {
    Ok(Video {
        id: row.get(0)?,
        file_ref: row.get(1)?,
        caption: row.get(2)?,
        created_at: row.get(3)?,
        tags: Vec::new(),
    })
}

// Insertion order, the same everywhere a video's tags are read.
fn load_tags(conn: &Connection, id: VideoId) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(VIDEO_TAGS)?;
    let tags = stmt
        .query_map(params![id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(tags)
}

fn with_tags(conn: &Connection, mut videos: Vec<Video>) -> Result<Vec<Video>> {
    for video in &mut videos {
        video.tags = load_tags(conn, video.id)?;
    }
    Ok(videos)
}

fn fetch_video(conn: &Connection, id: VideoId) -> Result<Video> {
    let sql = format!("{} WHERE videos.id = ?1", BASE_SELECT);
    let mut video = conn
        .query_row(&sql, params![id], row_to_video)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => missing_video(id),
            other => other.into(),
        })?;
    video.tags = load_tags(conn, id)?;
    Ok(video)
}

fn missing_video(id: VideoId) -> ReelError {
    ReelError::NotFound(format!("Video with id {} not found", id))
}

impl SqliteStorage {
    pub fn new(pool: SqlitePool, config: &StoreConfig) -> Self {
        Self {
            pool,
            selection: config.selection,
            statement_timeout: config.statement_timeout,
        }
    }

    pub fn in_memory() -> Result<Self> {
        pool::open(&StoreConfig::in_memory())
    }

    pub fn with_selection(mut self, selection: RandomSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn selection(&self) -> RandomSelection {
        self.selection
    }

    fn conn(&self) -> Result<StoreConn> {
        StoreConn::checkout(&self.pool, self.statement_timeout)
    }

    fn delivered(&self, destination: DestinationId, id: VideoId) -> Result<bool> {
        let conn = self.conn()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sent_videos WHERE chat_id = ?1 AND video_id = ?2)",
            params![destination, id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn pick_candidate(&self, conn: &Connection, destination: DestinationId) -> Result<Option<VideoId>> {
        match self.selection {
            RandomSelection::Store => {
                let sql = format!("SELECT v.id {} ORDER BY RANDOM() LIMIT 1", UNDELIVERED);
                Ok(conn
                    .query_row(&sql, params![destination], |row| row.get(0))
                    .optional()?)
            }
            RandomSelection::Client => {
                let sql = format!("SELECT v.id {}", UNDELIVERED);
                let mut stmt = conn.prepare(&sql)?;
                let ids = stmt
                    .query_map(params![destination], |row| row.get::<_, VideoId>(0))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(ids.choose(&mut rand::thread_rng()).copied())
            }
        }
    }
}

impl VideoStorage for SqliteStorage {
    fn save(&self, video: NewVideo) -> Result<VideoId> {
        if video.file_ref.trim().is_empty() {
            return Err(ReelError::InvalidInput("file reference is empty".to_string()));
        }
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO videos (file_ref, caption, created_at) VALUES (?1, ?2, ?3)",
            params![video.file_ref, video.caption, Utc::now()],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(Violation::Unique) => ReelError::DuplicateContent(format!(
                "video with reference {} already exists",
                video.file_ref
            )),
            _ => e.into(),
        })?;
        Ok(conn.last_insert_rowid())
    }

    fn get_by_id(&self, id: VideoId) -> Result<Video> {
        let conn = self.conn()?;
        fetch_video(&conn, id)
    }

    fn get_by_tag(&self, tag: &str) -> Result<Vec<Video>> {
        let Some(name) = normalize_tag(tag) else {
            return Ok(Vec::new());
        };
        let sql = format!(
            "{} WHERE videos.id IN (
                SELECT vt.video_id FROM video_tags vt
                JOIN tags t ON t.id = vt.tag_id
                WHERE t.name = ?1
             ) {}",
            BASE_SELECT, NEWEST_FIRST
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let videos = stmt
            .query_map(params![name], row_to_video)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        with_tags(&conn, videos)
    }

    fn add_tags(&self, id: VideoId, tags: &[&str]) -> Result<()> {
        let names = normalize_tags(tags);
        if names.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut upsert = tx.prepare_cached(UPSERT_TAG)?;
            let mut link = tx.prepare_cached(LINK_TAG)?;
            for name in &names {
                let tag_id: i64 = upsert.query_row(params![name], |row| row.get(0))?;
                link.execute(params![id, tag_id])
                    .map_err(|e| match constraint_violation(&e) {
                        Some(Violation::ForeignKey) => missing_video(id),
                        _ => e.into(),
                    })?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_tags(&self, id: VideoId) -> Result<Vec<String>> {
        let conn = self.conn()?;
        Ok(load_tags(&conn, id)?)
    }

    fn has_been_delivered(&self, destination: DestinationId, id: VideoId) -> bool {
        match self.delivered(destination, id) {
            Ok(sent) => sent,
            Err(e) => {
                warn!(destination, video_id = id, error = %e, "delivery lookup failed, assuming not delivered");
                false
            }
        }
    }

    fn mark_delivered(&self, destination: DestinationId, id: VideoId) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sent_videos (chat_id, video_id, sent_at) VALUES (?1, ?2, ?3)",
            params![destination, id, Utc::now()],
        )
        .map_err(|e| match constraint_violation(&e) {
            Some(Violation::Unique) => ReelError::DuplicateDelivery {
                destination,
                video_id: id,
            },
            Some(Violation::ForeignKey) => missing_video(id),
            None => e.into(),
        })?;
        Ok(())
    }

    fn pick_random_undelivered(&self, destination: DestinationId) -> Result<Video> {
        let mut conn = self.conn()?;
        // One read transaction so the chosen id cannot vanish before it is loaded.
        let tx = conn.transaction()?;
        let id = self
            .pick_candidate(&tx, destination)?
            .ok_or(ReelError::NoContentAvailable(destination))?;
        let video = fetch_video(&tx, id)?;
        tx.commit()?;
        debug!(destination, video_id = id, selection = self.selection.as_str(), "picked undelivered video");
        Ok(video)
    }

    fn list_all(&self) -> Result<Vec<Video>> {
        let sql = format!("{} {}", BASE_SELECT, NEWEST_FIRST);
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let videos = stmt
            .query_map([], row_to_video)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        with_tags(&conn, videos)
    }

    fn delete(&self, id: VideoId) -> Result<bool> {
        let conn = self.conn()?;
        let changes = conn.execute("DELETE FROM videos WHERE id = ?1", params![id])?;
        Ok(changes > 0)
    }

    fn exists(&self, id: VideoId) -> Result<bool> {
        let conn = self.conn()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM videos WHERE id = ?1)",
            params![id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn popular_tags(&self, limit: i64) -> Result<Vec<TagCount>> {
        let limit = if limit <= 0 { DEFAULT_POPULAR_LIMIT } else { limit };
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT t.name, COUNT(vt.video_id) AS videos
             FROM tags t
             JOIN video_tags vt ON vt.tag_id = t.id
             GROUP BY t.id
             ORDER BY videos DESC, t.name ASC
             LIMIT ?1",
        )?;
        let tags = stmt
            .query_map(params![limit], |row| {
                Ok(TagCount {
                    name: row.get(0)?,
                    videos: row.get(1)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tags)
    }
}
