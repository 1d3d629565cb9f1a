use super::{Reconciler, decode};
use crate::error::SyncError;
use crate::models::{
    Category, NewCategory, ROOT_PARENT_ID, RemoteCategory, RemoteCategoryList, TaskName,
    TaskRecord,
};
use crate::remote::Resource;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::{error, info, warn};

/// What one structure pass changed.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct CategoryDiff {
    /// Names of categories inserted in this pass.
    pub added: Vec<String>,
    /// `id:<remote id>,name:<name>` of local categories the remote no longer reports.
    pub removed: Vec<String>,
    /// Remote categories skipped because their parent was not materialized.
    pub skipped: Vec<String>,
    /// Local ids switched on by the top-level cascade.
    pub enabled: Vec<i64>,
}

impl CategoryDiff {
    pub fn message(&self, task_name: &str) -> String {
        let mut msg = format!(
            "TASK_NAME: {}, new_category: [{}], old_category [{}]",
            task_name,
            self.added.join("; "),
            self.removed.join("; "),
        );
        if !self.skipped.is_empty() {
            msg.push_str(&format!(", skipped_category: [{}]", self.skipped.join("; ")));
        }
        msg.push_str(", turn_on_main_categories: success");
        msg
    }
}

impl Reconciler {
    /// Runs the category structure pass and records it as one audit entry plus
    /// one notification, whatever the outcome.
    pub async fn update_categories(&self) -> TaskRecord {
        let started = Instant::now();
        let mut task = TaskRecord::start(TaskName::UpdatingStructureOfCatalog, self.dealer(), "");
        self.save_task(&task).await;

        match self.reconcile_categories().await {
            Ok(diff) => {
                let message = diff.message(&task.name);
                info!(target = "catalog.categories", dealer = %self.config.dealer, "{message}");
                task.mark_changes(!diff.added.is_empty(), !diff.removed.is_empty());
                task.succeed(message);
            }
            Err(err) => {
                error!(target = "catalog.categories", dealer = %self.config.dealer, error = %err, "{}: {err}", task.name);
                task.fail(err.to_string());
            }
        }

        self.save_task(&task).await;
        self.notify(&task).await;
        crate::metrics::stage_elapsed("update_categories", started.elapsed().as_millis());
        crate::metrics::run_outcome("update_categories", task.success == Some(true));
        task
    }

    /// Inserts categories the remote reports and the local tree lacks, lists
    /// local ones it no longer reports, then cascades `enabled` down from
    /// enabled top-level categories. Nothing is deleted.
    pub async fn reconcile_categories(&self) -> Result<CategoryDiff, SyncError> {
        let dealer = self.dealer();
        let payload = self.fetch(&Resource::Categories).await?;
        let remote: RemoteCategoryList = decode(payload, &Resource::Categories)?;
        let remote = order_parents_first(remote.category);

        let root = self.ensure_root().await?;
        let mut known: HashSet<i64> = self
            .store
            .categories(dealer)
            .await?
            .iter()
            .filter(|c| !c.is_root())
            .filter_map(|c| c.remote_id)
            .collect();
        let parents: HashSet<i64> = remote.iter().map(|c| c.parent_id).collect();

        let mut diff = CategoryDiff::default();
        for category in &remote {
            if known.contains(&category.id) {
                continue;
            }
            let parent = if category.parent_id == ROOT_PARENT_ID {
                root.clone()
            } else {
                match self
                    .store
                    .category_by_remote_id(dealer, category.parent_id)
                    .await?
                {
                    Some(parent) => parent,
                    None => {
                        let err = SyncError::DataConsistency {
                            remote_id: category.id,
                            parent_id: category.parent_id,
                        };
                        warn!(target = "catalog.categories", dealer, error = %err, "category_skipped");
                        diff.skipped.push(format!("id:{},name:{}", category.id, category.name));
                        continue;
                    }
                }
            };
            let is_leaf = category.leaf.unwrap_or(!parents.contains(&category.id));
            let inserted = self
                .store
                .insert_category(NewCategory::from_remote(category, &parent, is_leaf))
                .await?;
            known.insert(category.id);
            diff.added.push(inserted.name);
        }

        let reported: HashSet<i64> = remote.iter().map(|c| c.id).collect();
        let local = self.store.categories(dealer).await?;
        diff.removed = local
            .iter()
            .filter(|c| !c.is_root())
            .filter_map(|c| c.remote_id.map(|id| (id, c)))
            .filter(|(id, _)| !reported.contains(id))
            .map(|(id, c)| format!("id:{},name:{}", id, c.name))
            .collect();

        for (id, is_leaf) in leaf_changes(&local, &remote) {
            self.store.set_leaf(id, is_leaf).await?;
            info!(target = "catalog.categories", dealer, id, is_leaf, "category_leaf_changed");
        }

        diff.enabled = cascade_enabled(&local);
        if !diff.enabled.is_empty() {
            self.store.enable_categories(&diff.enabled).await?;
        }
        Ok(diff)
    }

    async fn ensure_root(&self) -> Result<Category, SyncError> {
        if let Some(root) = self.store.root_category(self.dealer()).await? {
            return Ok(root);
        }
        let root = self
            .store
            .insert_category(NewCategory::root(&self.config.root_name, self.dealer()))
            .await?;
        info!(target = "catalog.categories", dealer = %root.dealer, id = root.id, "root category created");
        Ok(root)
    }
}

/// Stable sort by remote parent id, so parents reported with a lower parent
/// reference are materialized before their children.
pub fn order_parents_first(mut categories: Vec<RemoteCategory>) -> Vec<RemoteCategory> {
    categories.sort_by_key(|c| c.parent_id);
    categories
}

/// Categories whose stored leaf flag disagrees with the current tree. The
/// remote `leaf` flag wins when reported; otherwise a category is a leaf when
/// neither the payload nor the local tree gives it children.
pub fn leaf_changes(local: &[Category], remote: &[RemoteCategory]) -> Vec<(i64, bool)> {
    let has_children: HashSet<i64> = local.iter().filter_map(|c| c.parent_id).collect();
    let remote_parents: HashSet<i64> = remote.iter().map(|c| c.parent_id).collect();
    let remote_flags: HashMap<i64, Option<bool>> = remote.iter().map(|c| (c.id, c.leaf)).collect();

    local
        .iter()
        .filter(|c| !c.is_root())
        .filter_map(|c| {
            let remote_id = c.remote_id?;
            let inferred = !has_children.contains(&c.id) && !remote_parents.contains(&remote_id);
            let is_leaf = remote_flags.get(&remote_id).copied().flatten().unwrap_or(inferred);
            (is_leaf != c.is_leaf).then_some((c.id, is_leaf))
        })
        .collect()
}

/// Ids of categories that must be switched on: every descendant of an enabled
/// top-level category (`remote_parent_id == 0`) that is not enabled yet.
pub fn cascade_enabled(categories: &[Category]) -> Vec<i64> {
    let mut children: HashMap<i64, Vec<&Category>> = HashMap::new();
    for category in categories {
        if let Some(parent) = category.parent_id {
            children.entry(parent).or_default().push(category);
        }
    }

    let mut visited = HashSet::new();
    let mut to_enable = Vec::new();
    let mut stack: Vec<i64> = categories
        .iter()
        .filter(|c| c.enabled && c.remote_parent_id == Some(ROOT_PARENT_ID))
        .map(|c| c.id)
        .collect();
    while let Some(id) = stack.pop() {
        if !visited.insert(id) {
            continue;
        }
        for child in children.get(&id).into_iter().flatten() {
            if !child.enabled {
                to_enable.push(child.id);
            }
            stack.push(child.id);
        }
    }
    to_enable.sort_unstable();
    to_enable
}
