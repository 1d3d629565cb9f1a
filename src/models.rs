use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{DisplayFromStr, PickFirst, serde_as, skip_serializing_none};
use uuid::Uuid;

/// Remote parent id marking a top-level category.
pub const ROOT_PARENT_ID: i64 = 0;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Category {
    pub id: i64,
    pub remote_id: Option<i64>,
    pub remote_parent_id: Option<i64>,
    pub name: String,
    pub parent_id: Option<i64>,
    pub is_leaf: bool,
    pub enabled: bool,
    pub dealer: String,
}

impl Category {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct NewCategory {
    pub remote_id: Option<i64>,
    pub remote_parent_id: Option<i64>,
    pub name: String,
    pub parent_id: Option<i64>,
    pub is_leaf: bool,
    pub enabled: bool,
    pub dealer: String,
}

impl NewCategory {
    pub fn root(name: &str, dealer: &str) -> Self {
        Self {
            remote_id: None,
            remote_parent_id: None,
            name: name.to_string(),
            parent_id: None,
            is_leaf: false,
            enabled: false,
            dealer: dealer.to_string(),
        }
    }

    pub fn from_remote(remote: &RemoteCategory, parent: &Category, is_leaf: bool) -> Self {
        Self {
            remote_id: Some(remote.id),
            remote_parent_id: Some(remote.parent_id),
            name: remote.name.clone(),
            parent_id: Some(parent.id),
            is_leaf,
            enabled: false,
            dealer: parent.dealer.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Position {
    pub id: i64,
    pub remote_id: i64,
    pub category_id: i64,
    pub dealer: String,
    pub name: String,
    pub attributes: Map<String, Value>,
    /// Ordered, shared references into the image table.
    pub image_ids: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPosition {
    pub remote_id: i64,
    pub category_id: i64,
    pub dealer: String,
    pub name: String,
    pub attributes: Map<String, Value>,
}

impl NewPosition {
    pub fn from_remote(remote: RemotePosition, category: &Category) -> Self {
        Self {
            remote_id: remote.id,
            category_id: category.id,
            dealer: category.dealer.clone(),
            name: remote
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| format!("position {}", remote.id)),
            attributes: remote.attributes,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Characteristic {
    pub id: i64,
    pub position_id: i64,
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Image {
    pub id: i64,
    pub hash: String,
    pub storage_path: String,
    pub original_name: String,
}

#[derive(Debug, Clone)]
pub struct NewImage {
    pub hash: String,
    pub storage_path: String,
    pub original_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskName {
    UpdatingStructureOfCatalog,
    UpdatingPositions,
}

impl TaskName {
    pub fn label(&self) -> &'static str {
        match self {
            TaskName::UpdatingStructureOfCatalog => "updating structure of catalog",
            TaskName::UpdatingPositions => "updating positions",
        }
    }
}

/// Audit entry for one run. `success` stays `None` until the run finishes.
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskRecord {
    pub id: Uuid,
    pub name: String,
    pub dealer: String,
    pub success: Option<bool>,
    pub result_msg: String,
    pub changes: bool,
    pub added: bool,
    pub removed: bool,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn start(name: TaskName, dealer: &str, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.label().to_string(),
            dealer: dealer.to_string(),
            success: None,
            result_msg: message.into(),
            changes: false,
            added: false,
            removed: false,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn succeed(&mut self, message: impl Into<String>) {
        self.success = Some(true);
        self.result_msg = message.into();
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.success = Some(false);
        self.result_msg = message.into();
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_changes(&mut self, added: bool, removed: bool) {
        self.added = added;
        self.removed = removed;
        self.changes = added || removed;
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// -------- Remote payloads --------

#[serde_as]
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCategory {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: i64,
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub parent_id: i64,
    pub name: String,
    #[serde(default)]
    pub leaf: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteCategoryList {
    #[serde(default)]
    pub category: Vec<RemoteCategory>,
}

#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePosition {
    #[serde_as(as = "PickFirst<(_, DisplayFromStr)>")]
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RemoteImageList {
    #[serde(default)]
    pub items: Vec<RemoteImageItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteImageItem {
    pub properties: RemoteImageProperties,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteImageProperties {
    #[serde(rename = "Url")]
    pub url: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn remote_category_accepts_string_ids() {
        let parsed: RemoteCategory =
            serde_json::from_value(json!({"id": "12", "parentId": 3, "name": "Drills"}))
                .expect("category");
        assert_eq!(parsed.id, 12);
        assert_eq!(parsed.parent_id, 3);
        assert_eq!(parsed.leaf, None);
    }

    #[test]
    fn remote_position_keeps_extra_fields() {
        let parsed: RemotePosition =
            serde_json::from_value(json!({"id": "501", "name": "Hammer", "price": 10.5}))
                .expect("position");
        assert_eq!(parsed.id, 501);
        assert_eq!(parsed.attributes.get("price"), Some(&json!(10.5)));
        assert!(!parsed.attributes.contains_key("id"));
    }

    #[test]
    fn task_record_tracks_lifecycle() {
        let mut task = TaskRecord::start(TaskName::UpdatingPositions, "nl_dealer", "Start");
        assert_eq!(task.success, None);
        task.mark_changes(false, true);
        task.fail("boom");
        assert_eq!(task.success, Some(false));
        assert!(task.changes);
        assert!(task.finished_at.is_some());
    }
}
