use super::{Reconciler, decode};
use crate::content::ContentStore;
use crate::error::{StoreError, SyncError};
use crate::models::{Image, NewImage, Position, RemoteImageList};
use crate::remote::Resource;
use serde_json::Value;
use tracing::{debug, info};

impl Reconciler {
    /// Fetches the position's first remote image (or the default asset), stores
    /// it once per distinct content and links the image record to the position.
    pub async fn resolve_image(&self, position: &Position) -> Result<Image, SyncError> {
        let resource = Resource::GoodImages {
            goods_id: position.remote_id,
        };
        let listing = self.fetch(&resource).await?;
        let bytes = match first_image_url(listing, &resource)? {
            Some(url) => {
                let url = image_request_url(&url, &self.config.logotype);
                self.fetch_asset(&url).await?
            }
            None => self.default_asset().await?,
        };

        let hash = ContentStore::digest(&bytes);
        let image = match self.store.image_by_hash(&hash).await? {
            Some(existing) => {
                debug!(target = "catalog.images", hash = %hash, position = position.remote_id, "image_reused");
                existing
            }
            None => self.store_new_image(&hash, &bytes).await?,
        };

        self.store.link_image(position.id, image.id).await?;
        Ok(image)
    }

    async fn store_new_image(&self, hash: &str, bytes: &[u8]) -> Result<Image, SyncError> {
        let blob = self
            .content
            .put(hash, bytes)
            .await
            .map_err(|err| SyncError::Storage(format!("writing blob {hash}: {err}")))?;
        let written = blob.written;
        let record = NewImage {
            hash: hash.to_string(),
            storage_path: blob.relative_path,
            original_name: blob.file_name,
        };
        match self.store.insert_image(record).await {
            Ok(image) => {
                info!(target = "catalog.images", hash = %hash, path = %image.storage_path, written, "image_stored");
                Ok(image)
            }
            // lost a race with a sibling position carrying the same content
            Err(StoreError::Conflict { .. }) => self
                .store
                .image_by_hash(hash)
                .await?
                .ok_or_else(|| SyncError::Storage(format!("image {hash} vanished after conflict"))),
            Err(err) => Err(err.into()),
        }
    }

    async fn default_asset(&self) -> Result<Vec<u8>, SyncError> {
        let path = &self.config.default_image;
        tokio::fs::read(path)
            .await
            .map_err(|err| SyncError::asset(path.display().to_string(), err.to_string()))
    }
}

fn first_image_url(listing: Value, resource: &Resource) -> Result<Option<String>, SyncError> {
    if listing.is_null() || listing.as_object().is_some_and(|o| o.is_empty()) {
        return Ok(None);
    }
    let listing: RemoteImageList = decode(listing, resource)?;
    Ok(listing
        .items
        .into_iter()
        .next()
        .map(|item| item.properties.url)
        .filter(|url| !url.trim().is_empty()))
}

/// Drops the last `&`-separated parameter of `url` and appends `logotype`.
pub fn image_request_url(url: &str, logotype: &str) -> String {
    let base = url.rsplit_once('&').map_or(url, |(head, _)| head);
    format!("{base}{logotype}")
}
