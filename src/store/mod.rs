//! Persistence boundary for the reconciler.
//!
//! Each method is one unit of work: a backend commits it on its own and
//! reports unique-constraint violations as [`StoreError::Conflict`].

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::models::{
    Category, Characteristic, Image, NewCategory, NewImage, NewPosition, Position, TaskRecord,
};
use async_trait::async_trait;
use std::sync::Arc;

/// Outcome of a create that may collide with an existing row.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateResult<T> {
    Created(T),
    Conflict(T),
    Failed(StoreError),
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn root_category(&self, dealer: &str) -> Result<Option<Category>, StoreError>;

    async fn insert_category(&self, category: NewCategory) -> Result<Category, StoreError>;

    async fn category_by_remote_id(
        &self,
        dealer: &str,
        remote_id: i64,
    ) -> Result<Option<Category>, StoreError>;

    /// All categories of a dealer scope, root included, in insertion order.
    async fn categories(&self, dealer: &str) -> Result<Vec<Category>, StoreError>;

    async fn enable_categories(&self, ids: &[i64]) -> Result<(), StoreError>;

    async fn set_leaf(&self, id: i64, is_leaf: bool) -> Result<(), StoreError>;

    async fn create_position(&self, position: NewPosition) -> CreateResult<Position>;

    async fn update_position(
        &self,
        id: i64,
        position: NewPosition,
    ) -> Result<Position, StoreError>;

    async fn position(&self, id: i64) -> Result<Option<Position>, StoreError>;

    async fn positions(&self, dealer: &str) -> Result<Vec<Position>, StoreError>;

    async fn insert_characteristic(
        &self,
        position_id: i64,
        key: &str,
        value: &str,
    ) -> Result<Characteristic, StoreError>;

    async fn characteristics(&self, position_id: i64) -> Result<Vec<Characteristic>, StoreError>;

    async fn image_by_hash(&self, hash: &str) -> Result<Option<Image>, StoreError>;

    async fn insert_image(&self, image: NewImage) -> Result<Image, StoreError>;

    async fn images(&self) -> Result<Vec<Image>, StoreError>;

    /// Appends `image_id` to the position's image set; linking twice is a no-op.
    async fn link_image(&self, position_id: i64, image_id: i64) -> Result<Position, StoreError>;

    async fn save_task(&self, task: &TaskRecord) -> Result<(), StoreError>;

    /// Audit records, newest first.
    async fn tasks(&self) -> Result<Vec<TaskRecord>, StoreError>;
}

pub type SharedStore = Arc<dyn CatalogStore>;
