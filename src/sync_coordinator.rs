use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;

use crate::classifier::LabelClassifier;
use crate::error::{SyncError, SyncResult};
use crate::local_cache::LocalCache;
use crate::models::{
    capture_instant, validate_key, Album, Label, LabelDocument, Location, PhotoDetail,
    PhotoDocument, Uid,
};
use crate::remote_store::{put_document, Collection, DocumentPath, RemoteStore};
use crate::upload_pipeline::MediaUploadPipeline;

/// Caller-supplied part of a captured photo.
#[derive(Debug, Clone)]
pub struct PhotoDraft {
    pub file_name: String,
    pub location: Location,
    pub description: String,
    pub is_representative: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumPlacement {
    /// First photo under the label, now its representative.
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedPhoto {
    pub label_id: i64,
    pub photo_id: i64,
    pub placement: AlbumPlacement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub labels: usize,
    pub photos: usize,
    pub albums: usize,
}

/// Write path that mirrors label, photo and album state into the local cache
/// and the remote store.
///
/// Steps are not one transaction. A failure surfaces as-is and leaves earlier
/// writes in place; every write is an upsert keyed by a stable name, so the
/// caller may simply retry (or run [`SyncCoordinator::push_local`]).
pub struct SyncCoordinator {
    local: Arc<dyn LocalCache>,
    remote: Arc<dyn RemoteStore>,
    pipeline: MediaUploadPipeline,
}

impl SyncCoordinator {
    pub fn new(
        local: Arc<dyn LocalCache>,
        remote: Arc<dyn RemoteStore>,
        pipeline: MediaUploadPipeline,
    ) -> Self {
        Self {
            local,
            remote,
            pipeline,
        }
    }

    /// Uploads the binary, then saves the photo pointing at the uploaded URL.
    pub async fn capture(
        &self,
        uid: &Uid,
        label: &Label,
        binary: Vec<u8>,
        draft: PhotoDraft,
    ) -> SyncResult<SavedPhoto> {
        validate_key("label name", &label.name)?;
        let file_name = draft.file_name.clone();

        self.pipeline
            .publish(uid, &label.name, &file_name, binary, |url| {
                self.save_captured_photo(uid, label, draft, url)
            })
            .await
    }

    pub async fn save_captured_photo(
        &self,
        uid: &Uid,
        label: &Label,
        draft: PhotoDraft,
        photo_uri: String,
    ) -> SyncResult<SavedPhoto> {
        validate_key("label name", &label.name)?;
        validate_key("file name", &draft.file_name)?;
        if photo_uri.is_empty() {
            return Err(SyncError::Validation("photo uri must not be empty".to_string()));
        }

        // Label first: the photo row references its id.
        let label_id = match label.id {
            Some(id) => id,
            None => self.local.insert_label(label).await?,
        };
        // Re-upserted on every save, so a retry repairs an earlier failed write.
        self.mirror_label(uid, label).await?;

        let photo = PhotoDetail {
            id: None,
            label_id,
            photo_uri,
            file_name: draft.file_name,
            latitude: draft.location.latitude,
            longitude: draft.location.longitude,
            description: draft.description,
            datetime: capture_instant(),
        };

        let (albums, photo_id) = tokio::try_join!(
            self.local.get_albums_by_label_id(label_id),
            self.store_photo(uid, &label.name, &photo),
        )?;

        let placement = self
            .place_in_album(label_id, photo_id, albums.first(), draft.is_representative)
            .await?;

        info!(
            "Saved photo '{}' under label '{}' ({:?})",
            photo.file_name, label.name, placement
        );
        Ok(SavedPhoto {
            label_id,
            photo_id,
            placement,
        })
    }

    /// Unconditional remote upsert keyed by name. Concurrent first captures
    /// of one name converge; the last remote write wins.
    async fn mirror_label(&self, uid: &Uid, label: &Label) -> SyncResult<()> {
        let path = DocumentPath::new(uid, Collection::Label, label.name.as_str());
        put_document(self.remote.as_ref(), &path, &LabelDocument::from(label))
            .await
            .map_err(SyncError::write)?;

        debug!("Label '{}' mirrored to {}", label.name, path);
        Ok(())
    }

    async fn store_photo(&self, uid: &Uid, label_name: &str, photo: &PhotoDetail) -> SyncResult<i64> {
        let photo_id = self.local.insert_photo(photo).await?;
        let path = DocumentPath::new(uid, Collection::Photos, photo.file_name.as_str());
        put_document(
            self.remote.as_ref(),
            &path,
            &PhotoDocument::from_photo(photo, label_name),
        )
        .await
        .map_err(SyncError::write)?;
        Ok(photo_id)
    }

    async fn place_in_album(
        &self,
        label_id: i64,
        photo_id: i64,
        existing: Option<&Album>,
        is_representative: bool,
    ) -> SyncResult<AlbumPlacement> {
        let album = Album {
            label_id,
            photo_detail_id: photo_id,
        };

        match existing {
            None => {
                if self.local.insert_album(&album).await? {
                    return Ok(AlbumPlacement::Created);
                }
                // Another capture created the album between our lookup and insert.
                if is_representative {
                    self.local.update_album(&album).await?;
                    Ok(AlbumPlacement::Updated)
                } else {
                    Ok(AlbumPlacement::Unchanged)
                }
            }
            Some(_) if is_representative => {
                self.local.update_album(&album).await?;
                Ok(AlbumPlacement::Updated)
            }
            Some(_) => Ok(AlbumPlacement::Unchanged),
        }
    }

    /// Turns a classifier answer into a label: the stored one with that name,
    /// otherwise a new unpersisted label.
    pub async fn suggest_label(
        &self,
        classifier: &dyn LabelClassifier,
        image: &[u8],
    ) -> SyncResult<Label> {
        let suggestion = classifier.classify(image).await?;
        let name = suggestion.trim();
        validate_key("suggested label", name)?;

        match self.local.get_label_by_name(name).await? {
            Some(label) => Ok(label),
            None => Ok(Label::unsaved(name)),
        }
    }

    pub async fn remote_labels(&self, uid: &Uid) -> SyncResult<Vec<(String, LabelDocument)>> {
        let documents = self
            .remote
            .list(uid, Collection::Label)
            .await
            .map_err(SyncError::write)?;

        documents
            .into_iter()
            .map(|(name, snapshot)| {
                let doc: LabelDocument = snapshot.decode().map_err(SyncError::write)?;
                Ok((name, doc))
            })
            .collect()
    }

    /// Re-sends every local label and photo to the remote partition.
    pub async fn push_local(&self, uid: &Uid) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        let labels = self.local.list_labels().await?;
        let mut names: HashMap<i64, String> = HashMap::new();

        for label in labels {
            let path = DocumentPath::new(uid, Collection::Label, label.name.as_str());
            put_document(self.remote.as_ref(), &path, &LabelDocument::from(&label))
                .await
                .map_err(SyncError::write)?;
            if let Some(id) = label.id {
                names.insert(id, label.name);
            }
            report.labels += 1;
        }

        for photo in self.local.list_photos().await? {
            let label_name = names.get(&photo.label_id).ok_or_else(|| {
                SyncError::NotFound(format!(
                    "label {} of photo '{}'",
                    photo.label_id, photo.file_name
                ))
            })?;
            let path = DocumentPath::new(uid, Collection::Photos, photo.file_name.as_str());
            put_document(
                self.remote.as_ref(),
                &path,
                &PhotoDocument::from_photo(&photo, label_name),
            )
            .await
            .map_err(SyncError::write)?;
            report.photos += 1;
        }

        info!(
            "Pushed {} labels and {} photos for {}",
            report.labels, report.photos, uid
        );
        Ok(report)
    }

    /// Restores the remote partition into the local cache. Labels without an
    /// album get one pointing at their earliest photo.
    pub async fn pull_remote(&self, uid: &Uid) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();
        let mut label_ids: HashMap<String, i64> = HashMap::new();

        for (name, doc) in self.remote_labels(uid).await? {
            let label = Label {
                id: None,
                name: name.clone(),
                background_color: doc.background_color,
                thumbnail: doc.thumbnail,
            };
            label_ids.insert(name, self.local.insert_label(&label).await?);
            report.labels += 1;
        }

        let documents = self
            .remote
            .list(uid, Collection::Photos)
            .await
            .map_err(SyncError::write)?;
        let mut earliest: HashMap<i64, (DateTime<Utc>, i64)> = HashMap::new();

        for (file_name, snapshot) in documents {
            let doc: PhotoDocument = snapshot.decode().map_err(SyncError::write)?;
            let label_id = match label_ids.get(&doc.label) {
                Some(id) => *id,
                None => {
                    // Photo whose label document never made it to the remote.
                    let id = self.local.insert_label(&Label::unsaved(doc.label.as_str())).await?;
                    label_ids.insert(doc.label.clone(), id);
                    report.labels += 1;
                    id
                }
            };

            let photo = doc.into_photo(file_name, label_id);
            let datetime = photo.datetime;
            let photo_id = self.local.insert_photo(&photo).await?;
            report.photos += 1;

            let entry = earliest.entry(label_id).or_insert((datetime, photo_id));
            if datetime < entry.0 {
                *entry = (datetime, photo_id);
            }
        }

        for (label_id, (_, photo_id)) in earliest {
            let album = Album {
                label_id,
                photo_detail_id: photo_id,
            };
            if self.local.insert_album(&album).await? {
                report.albums += 1;
            }
        }

        info!(
            "Pulled {} labels, {} photos, {} new albums for {}",
            report.labels, report.photos, report.albums, uid
        );
        Ok(report)
    }
}
