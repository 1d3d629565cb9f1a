use super::Reconciler;
use crate::models::{Category, Characteristic, Position};
use crate::remote::Resource;
use serde_json::Value;
use tracing::warn;

impl Reconciler {
    /// Best-effort enrichment: a fetch failure yields no characteristics and a
    /// failed insert only drops that one characteristic.
    pub async fn ingest_characteristics(
        &self,
        category: &Category,
        position: &Position,
    ) -> Vec<Characteristic> {
        let Some(category_id) = category.remote_id else {
            return Vec::new();
        };
        let resource = Resource::Good {
            category_id,
            position_id: position.remote_id,
        };
        let payload = match self.fetch(&resource).await {
            Ok(payload) => payload,
            Err(err) => {
                warn!(target = "catalog.characteristics", position = position.remote_id, error = %err, "characteristics_fetch_failed");
                return Vec::new();
            }
        };

        let mut stored = Vec::new();
        for (key, value) in characteristic_pairs(&payload) {
            match self
                .store
                .insert_characteristic(position.id, &key, &value)
                .await
            {
                Ok(characteristic) => stored.push(characteristic),
                Err(err) => {
                    warn!(target = "catalog.characteristics", position = position.remote_id, key = %key, error = %err, "characteristic_skipped");
                }
            }
        }
        stored
    }
}

/// Flattens a remote good payload into `(key, value)` pairs.
///
/// Reads `characteristics` (or `properties`) from the payload, or the payload
/// itself when it is a list. Lists hold `{name|key, value}` objects; objects
/// map keys to values directly. Null and blank values are dropped, scalar
/// lists are joined with `", "`, nested objects are ignored.
pub fn characteristic_pairs(payload: &Value) -> Vec<(String, String)> {
    let source = match payload {
        Value::Array(_) => payload,
        Value::Object(map) => match map.get("characteristics").or_else(|| map.get("properties")) {
            Some(inner) => inner,
            None => return Vec::new(),
        },
        _ => return Vec::new(),
    };

    let raw: Vec<(String, &Value)> = match source {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| {
                let key = item
                    .get("name")
                    .or_else(|| item.get("key"))
                    .and_then(Value::as_str)?;
                Some((key.to_string(), item.get("value")?))
            })
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        _ => Vec::new(),
    };

    raw.into_iter()
        .filter_map(|(key, value)| {
            let key = key.trim().to_string();
            let value = render_value(value)?;
            (!key.is_empty()).then_some((key, value))
        })
        .collect()
}

fn render_value(value: &Value) -> Option<String> {
    let rendered = match value {
        Value::Null | Value::Object(_) => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter(|v| !v.is_array())
            .filter_map(render_value)
            .collect::<Vec<_>>()
            .join(", "),
    };
    (!rendered.is_empty()).then_some(rendered)
}
