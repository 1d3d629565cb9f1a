use super::{CatalogStore, CreateResult};
use crate::error::StoreError;
use crate::models::{
    Category, Characteristic, Image, NewCategory, NewImage, NewPosition, Position, TaskRecord,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::Mutex;

/// In-process backend enforcing the same unique keys as the relational schema:
/// category remote id per dealer, one root per dealer, position remote id per
/// dealer, characteristic key per position and image hash.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    next_id: i64,
    categories: BTreeMap<i64, Category>,
    category_keys: HashMap<(String, i64), i64>,
    roots: HashMap<String, i64>,
    positions: BTreeMap<i64, Position>,
    position_keys: HashMap<(String, i64), i64>,
    characteristics: BTreeMap<i64, Characteristic>,
    characteristic_keys: HashSet<(i64, String)>,
    images: BTreeMap<i64, Image>,
    image_keys: HashMap<String, i64>,
    tasks: Vec<TaskRecord>,
    faults: Faults,
}

#[derive(Default)]
struct Faults {
    characteristic_keys: HashSet<String>,
    position_updates: bool,
}

impl Tables {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every insert of a characteristic named `key` fail with a backend error.
    #[cfg(test)]
    pub async fn fail_characteristic(&self, key: &str) {
        self.tables
            .lock()
            .await
            .faults
            .characteristic_keys
            .insert(key.to_string());
    }

    #[cfg(test)]
    pub async fn fail_position_updates(&self) {
        self.tables.lock().await.faults.position_updates = true;
    }

    #[cfg(test)]
    pub async fn set_enabled(&self, id: i64, enabled: bool) {
        if let Some(category) = self.tables.lock().await.categories.get_mut(&id) {
            category.enabled = enabled;
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn root_category(&self, dealer: &str) -> Result<Option<Category>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .roots
            .get(dealer)
            .and_then(|id| tables.categories.get(id))
            .cloned())
    }

    async fn insert_category(&self, category: NewCategory) -> Result<Category, StoreError> {
        let mut tables = self.tables.lock().await;
        match category.parent_id {
            None if tables.roots.contains_key(&category.dealer) => {
                return Err(StoreError::Conflict {
                    entity: "root category",
                    key: category.dealer,
                });
            }
            Some(parent) if !tables.categories.contains_key(&parent) => {
                return Err(StoreError::NotFound {
                    entity: "category",
                    id: parent,
                });
            }
            _ => {}
        }
        if let Some(remote_id) = category.remote_id
            && tables
                .category_keys
                .contains_key(&(category.dealer.clone(), remote_id))
        {
            return Err(StoreError::Conflict {
                entity: "category",
                key: format!("{}:{remote_id}", category.dealer),
            });
        }

        let id = tables.allocate();
        let stored = Category {
            id,
            remote_id: category.remote_id,
            remote_parent_id: category.remote_parent_id,
            name: category.name,
            parent_id: category.parent_id,
            is_leaf: category.is_leaf,
            enabled: category.enabled,
            dealer: category.dealer,
        };
        if let Some(remote_id) = stored.remote_id {
            tables
                .category_keys
                .insert((stored.dealer.clone(), remote_id), id);
        }
        if stored.parent_id.is_none() {
            tables.roots.insert(stored.dealer.clone(), id);
        }
        tables.categories.insert(id, stored.clone());
        Ok(stored)
    }

    async fn category_by_remote_id(
        &self,
        dealer: &str,
        remote_id: i64,
    ) -> Result<Option<Category>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .category_keys
            .get(&(dealer.to_string(), remote_id))
            .and_then(|id| tables.categories.get(id))
            .cloned())
    }

    async fn categories(&self, dealer: &str) -> Result<Vec<Category>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .categories
            .values()
            .filter(|c| c.dealer == dealer)
            .cloned()
            .collect())
    }

    async fn enable_categories(&self, ids: &[i64]) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(missing) = ids.iter().find(|id| !tables.categories.contains_key(*id)) {
            return Err(StoreError::NotFound {
                entity: "category",
                id: *missing,
            });
        }
        for id in ids {
            if let Some(category) = tables.categories.get_mut(id) {
                category.enabled = true;
            }
        }
        Ok(())
    }

    async fn set_leaf(&self, id: i64, is_leaf: bool) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let category = tables
            .categories
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "category",
                id,
            })?;
        category.is_leaf = is_leaf;
        Ok(())
    }

    async fn create_position(&self, position: NewPosition) -> CreateResult<Position> {
        let mut tables = self.tables.lock().await;
        if !tables.categories.contains_key(&position.category_id) {
            return CreateResult::Failed(StoreError::NotFound {
                entity: "category",
                id: position.category_id,
            });
        }
        let key = (position.dealer.clone(), position.remote_id);
        if let Some(existing) = tables
            .position_keys
            .get(&key)
            .and_then(|id| tables.positions.get(id))
        {
            return CreateResult::Conflict(existing.clone());
        }

        let id = tables.allocate();
        let stored = Position {
            id,
            remote_id: position.remote_id,
            category_id: position.category_id,
            dealer: position.dealer,
            name: position.name,
            attributes: position.attributes,
            image_ids: Vec::new(),
        };
        tables.position_keys.insert(key, id);
        tables.positions.insert(id, stored.clone());
        CreateResult::Created(stored)
    }

    async fn update_position(
        &self,
        id: i64,
        position: NewPosition,
    ) -> Result<Position, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.faults.position_updates {
            return Err(StoreError::Backend("position update rejected".into()));
        }
        if !tables.categories.contains_key(&position.category_id) {
            return Err(StoreError::NotFound {
                entity: "category",
                id: position.category_id,
            });
        }
        let stored = tables
            .positions
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "position",
                id,
            })?;
        if stored.remote_id != position.remote_id || stored.dealer != position.dealer {
            return Err(StoreError::Conflict {
                entity: "position",
                key: format!("{}:{}", position.dealer, position.remote_id),
            });
        }
        stored.category_id = position.category_id;
        stored.name = position.name;
        stored.attributes = position.attributes;
        Ok(stored.clone())
    }

    async fn position(&self, id: i64) -> Result<Option<Position>, StoreError> {
        Ok(self.tables.lock().await.positions.get(&id).cloned())
    }

    async fn positions(&self, dealer: &str) -> Result<Vec<Position>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .positions
            .values()
            .filter(|p| p.dealer == dealer)
            .cloned()
            .collect())
    }

    async fn insert_characteristic(
        &self,
        position_id: i64,
        key: &str,
        value: &str,
    ) -> Result<Characteristic, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.faults.characteristic_keys.contains(key) {
            return Err(StoreError::Backend(format!(
                "characteristic `{key}` rejected"
            )));
        }
        if !tables.positions.contains_key(&position_id) {
            return Err(StoreError::NotFound {
                entity: "position",
                id: position_id,
            });
        }
        if !tables
            .characteristic_keys
            .insert((position_id, key.to_string()))
        {
            return Err(StoreError::Conflict {
                entity: "characteristic",
                key: format!("{position_id}:{key}"),
            });
        }
        let id = tables.allocate();
        let stored = Characteristic {
            id,
            position_id,
            key: key.to_string(),
            value: value.to_string(),
        };
        tables.characteristics.insert(id, stored.clone());
        Ok(stored)
    }

    async fn characteristics(&self, position_id: i64) -> Result<Vec<Characteristic>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .characteristics
            .values()
            .filter(|c| c.position_id == position_id)
            .cloned()
            .collect())
    }

    async fn image_by_hash(&self, hash: &str) -> Result<Option<Image>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .image_keys
            .get(hash)
            .and_then(|id| tables.images.get(id))
            .cloned())
    }

    async fn insert_image(&self, image: NewImage) -> Result<Image, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.image_keys.contains_key(&image.hash) {
            return Err(StoreError::Conflict {
                entity: "image",
                key: image.hash,
            });
        }
        let id = tables.allocate();
        let stored = Image {
            id,
            hash: image.hash,
            storage_path: image.storage_path,
            original_name: image.original_name,
        };
        tables.image_keys.insert(stored.hash.clone(), id);
        tables.images.insert(id, stored.clone());
        Ok(stored)
    }

    async fn images(&self) -> Result<Vec<Image>, StoreError> {
        Ok(self.tables.lock().await.images.values().cloned().collect())
    }

    async fn link_image(&self, position_id: i64, image_id: i64) -> Result<Position, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.images.contains_key(&image_id) {
            return Err(StoreError::NotFound {
                entity: "image",
                id: image_id,
            });
        }
        let position = tables
            .positions
            .get_mut(&position_id)
            .ok_or(StoreError::NotFound {
                entity: "position",
                id: position_id,
            })?;
        if !position.image_ids.contains(&image_id) {
            position.image_ids.push(image_id);
        }
        Ok(position.clone())
    }

    async fn save_task(&self, task: &TaskRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        match tables.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tables.tasks.push(task.clone()),
        }
        Ok(())
    }

    async fn tasks(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.tasks.iter().rev().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskName;
    use serde_json::Map;

    fn new_position(remote_id: i64, category_id: i64, name: &str) -> NewPosition {
        NewPosition {
            remote_id,
            category_id,
            dealer: "nl_dealer".into(),
            name: name.into(),
            attributes: Map::new(),
        }
    }

    async fn seeded() -> (MemoryStore, Category) {
        let store = MemoryStore::new();
        let root = store
            .insert_category(NewCategory::root("Catalog", "nl_dealer"))
            .await
            .expect("root");
        (store, root)
    }

    #[tokio::test]
    async fn second_root_is_a_conflict() {
        let (store, _) = seeded().await;
        let err = store
            .insert_category(NewCategory::root("Other", "nl_dealer"))
            .await
            .expect_err("duplicate root");
        assert!(matches!(err, StoreError::Conflict { .. }));
        store
            .insert_category(NewCategory::root("Catalog", "other_dealer"))
            .await
            .expect("roots are per dealer");
    }

    #[tokio::test]
    async fn child_requires_existing_parent() {
        let (store, _) = seeded().await;
        let mut orphan = NewCategory::root("Orphan", "nl_dealer");
        orphan.parent_id = Some(999);
        orphan.remote_id = Some(5);
        let err = store.insert_category(orphan).await.expect_err("orphan");
        assert_eq!(
            err,
            StoreError::NotFound {
                entity: "category",
                id: 999
            }
        );
    }

    #[tokio::test]
    async fn duplicate_position_reports_existing_row() {
        let (store, root) = seeded().await;
        let CreateResult::Created(first) = store
            .create_position(new_position(10, root.id, "Hammer"))
            .await
        else {
            panic!("expected create");
        };
        match store
            .create_position(new_position(10, root.id, "Hammer v2"))
            .await
        {
            CreateResult::Conflict(existing) => assert_eq!(existing.id, first.id),
            other => panic!("expected conflict, got {other:?}"),
        }
        assert_eq!(store.positions("nl_dealer").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn image_hash_is_unique_and_links_are_idempotent() {
        let (store, root) = seeded().await;
        let CreateResult::Created(position) =
            store.create_position(new_position(1, root.id, "Saw")).await
        else {
            panic!("expected create");
        };
        let image = store
            .insert_image(NewImage {
                hash: "ab12".into(),
                storage_path: "ab/ab12.jpg".into(),
                original_name: "ab12.jpg".into(),
            })
            .await
            .expect("image");
        let dup = store
            .insert_image(NewImage {
                hash: "ab12".into(),
                storage_path: "ab/ab12.jpg".into(),
                original_name: "ab12.jpg".into(),
            })
            .await;
        assert!(matches!(dup, Err(StoreError::Conflict { .. })));

        store.link_image(position.id, image.id).await.unwrap();
        let linked = store.link_image(position.id, image.id).await.unwrap();
        assert_eq!(linked.image_ids, vec![image.id]);
    }

    #[tokio::test]
    async fn tasks_are_listed_newest_first_and_updated_in_place() {
        let store = MemoryStore::new();
        let mut first = TaskRecord::start(TaskName::UpdatingPositions, "nl_dealer", "Start");
        store.save_task(&first).await.unwrap();
        let second = TaskRecord::start(TaskName::UpdatingStructureOfCatalog, "nl_dealer", "");
        store.save_task(&second).await.unwrap();
        first.succeed("Finish");
        store.save_task(&first).await.unwrap();

        let tasks = store.tasks().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].id, second.id);
        assert_eq!(tasks[1].success, Some(true));
    }
}
