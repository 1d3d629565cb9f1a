//! Reconciliation of the local catalog against the remote source.
//!
//! A run is categories first (one sequential, all-or-nothing pass), then
//! positions of every enabled leaf category. Position pipelines are
//! independent of each other and run with bounded concurrency.

mod categories;
mod characteristics;
mod images;
mod positions;

use crate::config::SyncConfig;
use crate::content::ContentStore;
use crate::error::SyncError;
use crate::models::TaskRecord;
use crate::notify::{Notification, SharedNotifier};
use crate::remote::{Resource, SharedSource};
use crate::store::SharedStore;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Clone)]
pub struct Reconciler {
    pub config: Arc<SyncConfig>,
    source: SharedSource,
    store: SharedStore,
    notifier: SharedNotifier,
    content: ContentStore,
}

impl Reconciler {
    pub fn new(
        config: Arc<SyncConfig>,
        source: SharedSource,
        store: SharedStore,
        notifier: SharedNotifier,
    ) -> Self {
        let content = ContentStore::new(config.upload_folder.clone());
        Self {
            config,
            source,
            store,
            notifier,
            content,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn dealer(&self) -> &str {
        &self.config.dealer
    }

    /// Category structure pass followed by positions. Positions are skipped
    /// when the structure pass fails.
    pub async fn run_full(&self) -> Vec<TaskRecord> {
        let categories = self.update_categories().await;
        if categories.success != Some(true) {
            warn!(
                target = "catalog.sync",
                dealer = %self.config.dealer,
                "category pass failed; positions skipped",
            );
            return vec![categories];
        }
        let positions = self.update_positions().await;
        vec![categories, positions]
    }

    async fn fetch(&self, resource: &Resource) -> Result<Value, SyncError> {
        match timeout(self.config.fetch_timeout, self.source.fetch(resource)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::remote(
                resource.to_string(),
                format!("timed out after {}s", self.config.fetch_timeout.as_secs()),
            )),
        }
    }

    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        match timeout(self.config.fetch_timeout, self.source.fetch_asset(url)).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::asset(
                url,
                format!("timed out after {}s", self.config.fetch_timeout.as_secs()),
            )),
        }
    }

    async fn save_task(&self, task: &TaskRecord) {
        if let Err(err) = self.store.save_task(task).await {
            warn!(target = "catalog.audit", task = %task.name, error = %err, "audit_record_save_failed");
        }
    }

    async fn notify(&self, task: &TaskRecord) {
        let notification = Notification {
            subject: task.name.clone(),
            body: task.result_msg.clone(),
            sender: self.config.mail_sender.clone(),
            recipients: self.config.mail_recipients.clone(),
        };
        match self.notifier.send(&notification).await {
            Ok(()) => info!(target = "catalog.notify", subject = %notification.subject, "notification_sent"),
            Err(err) => warn!(target = "catalog.notify", subject = %notification.subject, error = %err, "notification_failed"),
        }
    }
}

fn decode<T: DeserializeOwned>(value: Value, resource: &Resource) -> Result<T, SyncError> {
    serde_json::from_value(value)
        .map_err(|err| SyncError::remote(resource.to_string(), format!("malformed payload: {err}")))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::notify::fake::RecordingNotifier;
    use crate::remote::fake::ScriptedSource;
    use crate::store::MemoryStore;
    use tempfile::TempDir;

    pub struct Harness {
        pub reconciler: Reconciler,
        pub source: Arc<ScriptedSource>,
        pub store: Arc<MemoryStore>,
        pub notifier: Arc<RecordingNotifier>,
        pub dir: TempDir,
    }

    pub fn harness() -> Harness {
        harness_with(RecordingNotifier::default())
    }

    pub fn harness_with(notifier: RecordingNotifier) -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Arc::new(SyncConfig::local("nl_dealer", dir.path()));
        let source = Arc::new(ScriptedSource::default());
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(notifier);
        let reconciler = Reconciler::new(
            config,
            source.clone(),
            store.clone(),
            notifier.clone(),
        );
        Harness {
            reconciler,
            source,
            store,
            notifier,
            dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Harness, harness};
    use crate::remote::Resource;
    use crate::store::CatalogStore;
    use serde_json::json;
    use std::time::Duration;

    /// Tools(1) is an enabled top-level leaf holding two positions that share
    /// one image.
    async fn enabled_leaf_with_goods() -> Harness {
        let h = harness();
        h.source.respond(
            Resource::Categories,
            json!({"category": [{"id": 1, "parentId": 0, "name": "Tools"}]}),
        );
        h.reconciler.update_categories().await;
        let tools = h.store.category_by_remote_id("nl_dealer", 1).await.unwrap().unwrap();
        h.store.set_enabled(tools.id, true).await;

        h.source.respond(
            Resource::Goods { category_id: 1 },
            json!([{"id": 100, "name": "Drill"}, {"id": 101, "name": "Driver"}]),
        );
        for id in [100, 101] {
            h.source.respond(
                Resource::GoodImages { goods_id: id },
                json!({"items": [{"properties": {"Url": format!("https://img.example.com/tools?v=1&pos={id}")}}]}),
            );
        }
        h.source.asset("https://img.example.com/tools?v=1&logo=1", b"tools-jpeg");
        h
    }

    #[tokio::test]
    async fn run_full_skips_positions_when_categories_fail() {
        let h = harness();
        h.source.fail(Resource::Categories, "HTTP 503 Service Unavailable");

        let tasks = h.reconciler.run_full().await;

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].success, Some(false));
        assert!(!h.source.calls().iter().any(|c| c.starts_with("goods")));
    }

    #[tokio::test]
    async fn run_full_records_both_passes() {
        let h = harness();
        h.source.respond(
            Resource::Categories,
            json!({"category": [{"id": 1, "parentId": 0, "name": "Tools"}]}),
        );

        let tasks = h.reconciler.run_full().await;

        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.success == Some(true)));
        assert_eq!(h.store.tasks().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn repeated_full_run_changes_nothing() {
        let h = enabled_leaf_with_goods().await;

        let first = h.reconciler.run_full().await;
        let second = h.reconciler.run_full().await;

        assert!(first[1].added);
        assert_eq!(second.len(), 2);
        for task in &second {
            assert_eq!(task.success, Some(true));
            assert!(!task.added && !task.removed && !task.changes, "{}", task.result_msg);
        }
        let positions = h.store.positions("nl_dealer").await.unwrap();
        assert_eq!(positions.len(), 2);
        let images = h.store.images().await.unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!(h.reconciler.content.blob_count().await.unwrap(), 1);
        for position in &positions {
            assert_eq!(position.image_ids, vec![images[0].id]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn category_fetch_timeout_fails_the_run() {
        let h = harness();
        h.source.respond(
            Resource::Categories,
            json!({"category": [{"id": 1, "parentId": 0, "name": "Tools"}]}),
        );
        h.source.delay(Resource::Categories, Duration::from_secs(60));

        let tasks = h.reconciler.run_full().await;

        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].success, Some(false));
        assert!(tasks[0].result_msg.contains("timed out after 5s"), "{}", tasks[0].result_msg);
        assert!(h.store.categories("nl_dealer").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn position_fetch_timeout_only_fails_that_step() {
        let h = enabled_leaf_with_goods().await;
        h.source
            .delay(Resource::GoodImages { goods_id: 100 }, Duration::from_secs(60));

        let task = h.reconciler.update_positions().await;

        assert_eq!(task.success, Some(true));
        assert!(task.result_msg.contains("created: 2"), "{}", task.result_msg);
        assert!(task.result_msg.contains("images: 1"), "{}", task.result_msg);
        let positions = h.store.positions("nl_dealer").await.unwrap();
        let drill = positions.iter().find(|p| p.remote_id == 100).unwrap();
        let driver = positions.iter().find(|p| p.remote_id == 101).unwrap();
        assert!(drill.image_ids.is_empty());
        assert_eq!(driver.image_ids.len(), 1);
    }
}
