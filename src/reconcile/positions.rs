use super::{Reconciler, decode};
use crate::error::SyncError;
use crate::models::{Category, NewPosition, RemotePosition, TaskName, TaskRecord};
use crate::remote::Resource;
use crate::store::CreateResult;
use futures::{StreamExt, stream};
use serde_json::Value;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use tracing::{error, info, warn};

/// Counters for one positions pass.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct PositionSummary {
    pub categories: usize,
    pub failed_categories: usize,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
    pub characteristics: usize,
    pub images: usize,
    /// `id:<remote id>,name:<name>` of local positions the remote no longer lists.
    pub stale: Vec<String>,
}

impl PositionSummary {
    fn absorb(&mut self, other: PositionSummary) {
        self.categories += other.categories;
        self.failed_categories += other.failed_categories;
        self.created += other.created;
        self.updated += other.updated;
        self.failed += other.failed;
        self.characteristics += other.characteristics;
        self.images += other.images;
        self.stale.extend(other.stale);
    }
}

impl fmt::Display for PositionSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "categories: {}, failed_categories: {}, created: {}, updated: {}, failed: {}, characteristics: {}, images: {}, old_position [{}]",
            self.categories,
            self.failed_categories,
            self.created,
            self.updated,
            self.failed,
            self.characteristics,
            self.images,
            self.stale.join("; "),
        )
    }
}

#[derive(Debug)]
enum PositionOutcome {
    Created {
        characteristics: usize,
        image: bool,
    },
    Updated,
    Failed,
}

impl Reconciler {
    /// Syncs positions of every enabled leaf category. The audit record is
    /// written when the pass starts and finalized when it ends.
    pub async fn update_positions(&self) -> TaskRecord {
        let started = Instant::now();
        let mut task = TaskRecord::start(
            TaskName::UpdatingPositions,
            self.dealer(),
            "Start update_position",
        );
        self.save_task(&task).await;

        match self.reconcile_positions().await {
            Ok(summary) => {
                let message = format!("Finish update_position: {summary}");
                info!(target = "catalog.positions", dealer = %self.config.dealer, "{message}");
                task.mark_changes(summary.created > 0, !summary.stale.is_empty());
                task.succeed(message);
            }
            Err(err) => {
                error!(target = "catalog.positions", dealer = %self.config.dealer, error = %err, "{}: {err}", task.name);
                task.fail(err.to_string());
            }
        }

        self.save_task(&task).await;
        crate::metrics::stage_elapsed("update_positions", started.elapsed().as_millis());
        crate::metrics::run_outcome("update_positions", task.success == Some(true));
        task
    }

    pub async fn reconcile_positions(&self) -> Result<PositionSummary, SyncError> {
        let targets: Vec<Category> = self
            .store
            .categories(self.dealer())
            .await?
            .into_iter()
            .filter(|c| !c.is_root() && c.enabled && c.is_leaf)
            .collect();

        let mut summary = PositionSummary::default();
        for category in &targets {
            match self.sync_positions(category).await {
                Ok(partial) => summary.absorb(partial),
                Err(err) => {
                    error!(target = "catalog.positions", category = %category.name, error = %err, "category_positions_failed");
                    summary.failed_categories += 1;
                }
            }
        }
        Ok(summary)
    }

    /// One category's positions. Each position runs its own
    /// create → characteristics → image pipeline; siblings run concurrently
    /// up to the configured limit and never abort each other.
    pub async fn sync_positions(&self, category: &Category) -> Result<PositionSummary, SyncError> {
        let category_id = category.remote_id.ok_or_else(|| {
            SyncError::Storage(format!("category {} has no remote id", category.id))
        })?;
        let resource = Resource::Goods { category_id };
        let payload = self.fetch(&resource).await?;
        let items: Vec<Value> = if payload.is_null() {
            Vec::new()
        } else {
            decode(payload, &resource)?
        };
        let mut malformed = 0;
        let remote: Vec<RemotePosition> = items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<RemotePosition>(item) {
                Ok(position) => Some(position),
                Err(err) => {
                    warn!(target = "catalog.positions", category = category_id, error = %err, "malformed_position_skipped");
                    malformed += 1;
                    None
                }
            })
            .collect();
        let reported: HashSet<i64> = remote.iter().map(|p| p.id).collect();

        let pipelines: Vec<_> = remote
            .into_iter()
            .map(|position| self.sync_position(category, position))
            .collect();
        let outcomes: Vec<PositionOutcome> = stream::iter(pipelines)
            .buffer_unordered(self.config.position_concurrency.max(1))
            .collect()
            .await;

        let mut summary = PositionSummary {
            categories: 1,
            failed: malformed,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                PositionOutcome::Created {
                    characteristics,
                    image,
                } => {
                    summary.created += 1;
                    summary.characteristics += characteristics;
                    summary.images += usize::from(image);
                }
                PositionOutcome::Updated => summary.updated += 1,
                PositionOutcome::Failed => summary.failed += 1,
            }
        }

        summary.stale = self
            .store
            .positions(self.dealer())
            .await?
            .into_iter()
            .filter(|p| p.category_id == category.id && !reported.contains(&p.remote_id))
            .map(|p| format!("id:{},name:{}", p.remote_id, p.name))
            .collect();
        Ok(summary)
    }

    async fn sync_position(&self, category: &Category, remote: RemotePosition) -> PositionOutcome {
        let remote_id = remote.id;
        let record = NewPosition::from_remote(remote, category);
        match self.store.create_position(record.clone()).await {
            CreateResult::Created(position) => {
                // updates skip this: their characteristics and images are assumed current
                let characteristics = self.ingest_characteristics(category, &position).await.len();
                let image = match self.resolve_image(&position).await {
                    Ok(_) => true,
                    Err(err) => {
                        warn!(target = "catalog.images", position = remote_id, error = %err, "image_resolution_failed");
                        false
                    }
                };
                PositionOutcome::Created {
                    characteristics,
                    image,
                }
            }
            CreateResult::Conflict(existing) => {
                match self.store.update_position(existing.id, record).await {
                    Ok(_) => PositionOutcome::Updated,
                    Err(err) => {
                        error!(target = "catalog.positions", position = remote_id, error = %err, "Update Position: {err}");
                        PositionOutcome::Failed
                    }
                }
            }
            CreateResult::Failed(err) => {
                error!(target = "catalog.positions", position = remote_id, error = %err, "Add Position: {err}");
                PositionOutcome::Failed
            }
        }
    }
}
