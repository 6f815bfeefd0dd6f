#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub name: &'static str,
    pub statements: &'static [&'static str],
}

pub const CREATE_MIGRATIONS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS migrations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
";

pub const CREATE_VIDEOS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS videos (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        file_ref TEXT NOT NULL UNIQUE,
        caption TEXT,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
";

pub const CREATE_TAGS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
";

pub const CREATE_VIDEO_TAGS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS video_tags (
        video_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        PRIMARY KEY (video_id, tag_id),
        FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE,
        FOREIGN KEY (tag_id) REFERENCES tags(id) ON DELETE CASCADE
    )
";

pub const CREATE_SENT_VIDEOS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS sent_videos (
        chat_id INTEGER NOT NULL,
        video_id INTEGER NOT NULL,
        sent_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        PRIMARY KEY (chat_id, video_id),
        FOREIGN KEY (video_id) REFERENCES videos(id) ON DELETE CASCADE
    )
";

pub const CREATE_INDEX_VIDEO_TAGS_TAG: &str =
    "CREATE INDEX IF NOT EXISTS idx_video_tags_tag_id ON video_tags(tag_id)";

pub const CREATE_INDEX_SENT_VIDEO: &str =
    "CREATE INDEX IF NOT EXISTS idx_sent_videos_video_id ON sent_videos(video_id)";

pub const CREATE_INDEX_VIDEOS_CREATED_AT: &str =
    "CREATE INDEX IF NOT EXISTS idx_videos_created_at ON videos(created_at)";

// Names are never reused; append new units at the end.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "01_create_tables",
        statements: &[
            CREATE_VIDEOS_TABLE,
            CREATE_TAGS_TABLE,
            CREATE_VIDEO_TAGS_TABLE,
            CREATE_SENT_VIDEOS_TABLE,
        ],
    },
    Migration {
        name: "02_create_indexes",
        statements: &[
            CREATE_INDEX_VIDEO_TAGS_TAG,
            CREATE_INDEX_SENT_VIDEO,
            CREATE_INDEX_VIDEOS_CREATED_AT,
        ],
    },
];
