use async_trait::async_trait;
use log::debug;

use crate::db_pool::DbPool;
use crate::error::{SyncError, SyncResult};
use crate::models::{Album, Label, PhotoDetail};

/// On-device relational cache of labels, photos and albums.
#[async_trait]
pub trait LocalCache: Send + Sync {
    /// Upsert keyed by label name. Returns the row id, shared by every
    /// caller that inserts the same name.
    async fn insert_label(&self, label: &Label) -> SyncResult<i64>;

    /// Upsert keyed by file name. Returns the row id. A file name already
    /// stored under a different label is a `Validation` error.
    async fn insert_photo(&self, photo: &PhotoDetail) -> SyncResult<i64>;

    async fn get_albums_by_label_id(&self, label_id: i64) -> SyncResult<Vec<Album>>;

    /// Inserts the album unless the label already has one. Returns whether a row was inserted.
    async fn insert_album(&self, album: &Album) -> SyncResult<bool>;

    async fn update_album(&self, album: &Album) -> SyncResult<()>;

    async fn get_label(&self, id: i64) -> SyncResult<Option<Label>>;

    async fn get_label_by_name(&self, name: &str) -> SyncResult<Option<Label>>;

    async fn get_photo(&self, id: i64) -> SyncResult<Option<PhotoDetail>>;

    async fn list_labels(&self) -> SyncResult<Vec<Label>>;

    async fn list_photos(&self) -> SyncResult<Vec<PhotoDetail>>;
}

#[derive(Clone)]
pub struct SqliteCache {
    pool: DbPool,
}

impl SqliteCache {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const LABEL_COLUMNS: &str = "id, name, background_color, thumbnail";
const PHOTO_COLUMNS: &str =
    "id, label_id, photo_uri, file_name, latitude, longitude, description, datetime";

#[async_trait]
impl LocalCache for SqliteCache {
    async fn insert_label(&self, label: &Label) -> SyncResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO label (name, background_color, thumbnail)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(name) DO UPDATE SET
                background_color = excluded.background_color,
                thumbnail = excluded.thumbnail
            RETURNING id
            "#,
        )
        .bind(&label.name)
        .bind(&label.background_color)
        .bind(&label.thumbnail)
        .fetch_one(&self.pool)
        .await?;

        debug!("Label '{}' stored locally as {}", label.name, id);
        Ok(id)
    }

    async fn insert_photo(&self, photo: &PhotoDetail) -> SyncResult<i64> {
        // The conflict branch only applies under the same label; otherwise no row comes back.
        let id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO photo_detail (
                label_id, photo_uri, file_name, latitude, longitude, description, datetime
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(file_name) DO UPDATE SET
                photo_uri = excluded.photo_uri,
                latitude = excluded.latitude,
                longitude = excluded.longitude,
                description = excluded.description,
                datetime = excluded.datetime
            WHERE photo_detail.label_id = excluded.label_id
            RETURNING id
            "#,
        )
        .bind(photo.label_id)
        .bind(&photo.photo_uri)
        .bind(&photo.file_name)
        .bind(photo.latitude)
        .bind(photo.longitude)
        .bind(&photo.description)
        .bind(photo.datetime)
        .fetch_optional(&self.pool)
        .await?;

        let id = id.ok_or_else(|| {
            SyncError::Validation(format!(
                "file name '{}' already belongs to another label",
                photo.file_name
            ))
        })?;

        debug!("Photo '{}' stored locally as {}", photo.file_name, id);
        Ok(id)
    }

    async fn get_albums_by_label_id(&self, label_id: i64) -> SyncResult<Vec<Album>> {
        let albums = sqlx::query_as::<_, Album>(
            "SELECT label_id, photo_detail_id FROM album WHERE label_id = ?",
        )
        .bind(label_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(albums)
    }

    async fn insert_album(&self, album: &Album) -> SyncResult<bool> {
        let result = sqlx::query(
            "INSERT INTO album (label_id, photo_detail_id) VALUES (?, ?) ON CONFLICT(label_id) DO NOTHING",
        )
        .bind(album.label_id)
        .bind(album.photo_detail_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_album(&self, album: &Album) -> SyncResult<()> {
        let result = sqlx::query("UPDATE album SET photo_detail_id = ? WHERE label_id = ?")
            .bind(album.photo_detail_id)
            .bind(album.label_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SyncError::NotFound(format!(
                "album for label {}",
                album.label_id
            )));
        }
        Ok(())
    }

    async fn get_label(&self, id: i64) -> SyncResult<Option<Label>> {
        let label = sqlx::query_as::<_, Label>(&format!(
            "SELECT {} FROM label WHERE id = ?",
            LABEL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(label)
    }

    async fn get_label_by_name(&self, name: &str) -> SyncResult<Option<Label>> {
        let label = sqlx::query_as::<_, Label>(&format!(
            "SELECT {} FROM label WHERE name = ?",
            LABEL_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(label)
    }

    async fn get_photo(&self, id: i64) -> SyncResult<Option<PhotoDetail>> {
        let photo = sqlx::query_as::<_, PhotoDetail>(&format!(
            "SELECT {} FROM photo_detail WHERE id = ?",
            PHOTO_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(photo)
    }

    async fn list_labels(&self) -> SyncResult<Vec<Label>> {
        let labels = sqlx::query_as::<_, Label>(&format!(
            "SELECT {} FROM label ORDER BY id",
            LABEL_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(labels)
    }

    async fn list_photos(&self) -> SyncResult<Vec<PhotoDetail>> {
        let photos = sqlx::query_as::<_, PhotoDetail>(&format!(
            "SELECT {} FROM photo_detail ORDER BY datetime, id",
            PHOTO_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(photos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db_pool::create_in_memory_pool;
    use crate::models::capture_instant;

    async fn create_test_cache() -> SqliteCache {
        SqliteCache::new(create_in_memory_pool().await.unwrap())
    }

    fn create_test_photo(label_id: i64, file_name: &str) -> PhotoDetail {
        PhotoDetail {
            id: None,
            label_id,
            photo_uri: format!("memory://blobs/u1/Heron/{}", file_name),
            file_name: file_name.to_string(),
            latitude: 37.5665,
            longitude: 126.978,
            description: "by the river".to_string(),
            datetime: capture_instant(),
        }
    }

    #[tokio::test]
    async fn test_insert_label_is_upsert_by_name() {
        let cache = create_test_cache().await;

        let first = cache.insert_label(&Label::unsaved("Heron")).await.unwrap();
        let mut recolored = Label::unsaved("Heron");
        recolored.background_color = "00FF00".to_string();
        let second = cache.insert_label(&recolored).await.unwrap();

        assert_eq!(first, second);
        let stored = cache.get_label(first).await.unwrap().unwrap();
        assert_eq!(stored.id, Some(first));
        assert_eq!(stored.background_color, "00FF00");
        assert_eq!(cache.list_labels().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_photo_round_trip() {
        let cache = create_test_cache().await;
        let label_id = cache.insert_label(&Label::unsaved("Heron")).await.unwrap();
        let photo = create_test_photo(label_id, "p1.jpg");

        let id = cache.insert_photo(&photo).await.unwrap();
        let stored = cache.get_photo(id).await.unwrap().unwrap();

        assert_eq!(stored, PhotoDetail { id: Some(id), ..photo });
    }

    #[tokio::test]
    async fn test_insert_photo_retry_keeps_one_row() {
        let cache = create_test_cache().await;
        let label_id = cache.insert_label(&Label::unsaved("Heron")).await.unwrap();
        let photo = create_test_photo(label_id, "p1.jpg");

        let first = cache.insert_photo(&photo).await.unwrap();
        let second = cache.insert_photo(&photo).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cache.list_photos().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_album_is_one_row_per_label() {
        let cache = create_test_cache().await;
        let label_id = cache.insert_label(&Label::unsaved("Heron")).await.unwrap();
        let p1 = cache.insert_photo(&create_test_photo(label_id, "p1.jpg")).await.unwrap();
        let p2 = cache.insert_photo(&create_test_photo(label_id, "p2.jpg")).await.unwrap();

        assert!(cache
            .insert_album(&Album { label_id, photo_detail_id: p1 })
            .await
            .unwrap());
        assert!(!cache
            .insert_album(&Album { label_id, photo_detail_id: p2 })
            .await
            .unwrap());

        let albums = cache.get_albums_by_label_id(label_id).await.unwrap();
        assert_eq!(albums, vec![Album { label_id, photo_detail_id: p1 }]);

        cache
            .update_album(&Album { label_id, photo_detail_id: p2 })
            .await
            .unwrap();
        let albums = cache.get_albums_by_label_id(label_id).await.unwrap();
        assert_eq!(albums, vec![Album { label_id, photo_detail_id: p2 }]);
    }

    #[tokio::test]
    async fn test_update_missing_album_is_not_found() {
        let cache = create_test_cache().await;
        let result = cache
            .update_album(&Album { label_id: 42, photo_detail_id: 1 })
            .await;
        assert!(matches!(result, Err(SyncError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_photo_requires_existing_label() {
        let cache = create_test_cache().await;
        let result = cache.insert_photo(&create_test_photo(99, "orphan.jpg")).await;
        assert!(matches!(result, Err(SyncError::Write(_))));
    }

    #[tokio::test]
    async fn test_file_name_cannot_move_to_another_label() {
        let cache = create_test_cache().await;
        let heron = cache.insert_label(&Label::unsaved("Heron")).await.unwrap();
        let egret = cache.insert_label(&Label::unsaved("Egret")).await.unwrap();
        let id = cache.insert_photo(&create_test_photo(heron, "p1.jpg")).await.unwrap();
        cache
            .insert_album(&Album { label_id: heron, photo_detail_id: id })
            .await
            .unwrap();

        let result = cache.insert_photo(&create_test_photo(egret, "p1.jpg")).await;
        assert!(matches!(result, Err(SyncError::Validation(_))));

        let stored = cache.get_photo(id).await.unwrap().unwrap();
        assert_eq!(stored.label_id, heron);
        assert_eq!(cache.list_photos().await.unwrap().len(), 1);
    }
}
