use sqlx::SqlitePool;

// Schema definitions
pub const LABEL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS label (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    -- Also the remote document key, so unique per user
    name TEXT NOT NULL UNIQUE,
    background_color TEXT NOT NULL,
    thumbnail TEXT NOT NULL DEFAULT ''
)
"#;

pub const PHOTO_DETAIL_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS photo_detail (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    label_id INTEGER NOT NULL,
    photo_uri TEXT NOT NULL,
    file_name TEXT NOT NULL UNIQUE,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    datetime DATETIME NOT NULL,
    FOREIGN KEY (label_id) REFERENCES label(id)
)
"#;

// One row per label: the album is a function label -> representative photo.
pub const ALBUM_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS album (
    label_id INTEGER PRIMARY KEY NOT NULL,
    photo_detail_id INTEGER NOT NULL,
    FOREIGN KEY (label_id) REFERENCES label(id),
    FOREIGN KEY (photo_detail_id) REFERENCES photo_detail(id)
)
"#;

pub const SCHEMA_SQL: &[&str] = &[
    LABEL_TABLE,
    PHOTO_DETAIL_TABLE,
    "CREATE INDEX IF NOT EXISTS idx_photo_detail_label_id ON photo_detail(label_id);",
    "CREATE INDEX IF NOT EXISTS idx_photo_detail_datetime ON photo_detail(datetime);",
    ALBUM_TABLE,
];

pub async fn initialize_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for sql in SCHEMA_SQL {
        sqlx::query(sql).execute(pool).await?;
    }
    Ok(())
}
