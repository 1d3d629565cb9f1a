use crate::config::{ResourceEndpoint, SyncConfig};
use crate::error::SyncError;
use crate::http::shared_client;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::{fmt, sync::Arc};
use urlencoding::encode;

/// Resources the reconciler reads from the remote catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Categories,
    Goods { category_id: i64 },
    Good { category_id: i64, position_id: i64 },
    GoodImages { goods_id: i64 },
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Categories => write!(f, "categories"),
            Resource::Goods { category_id } => write!(f, "goods(category={category_id})"),
            Resource::Good {
                category_id,
                position_id,
            } => write!(f, "good(category={category_id}, position={position_id})"),
            Resource::GoodImages { goods_id } => write!(f, "good_images(goods={goods_id})"),
        }
    }
}

/// Read access to a remote catalog. Implementations report application-level
/// failures as errors and never retry on their own.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn fetch(&self, resource: &Resource) -> Result<Value, SyncError>;

    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, SyncError>;
}

pub type SharedSource = Arc<dyn CatalogSource>;

#[derive(Clone)]
pub struct HttpCatalogSource {
    http: Client,
    config: Arc<SyncConfig>,
}

impl HttpCatalogSource {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        Self {
            http: shared_client(),
            config,
        }
    }

    fn endpoint(&self, resource: &Resource) -> &ResourceEndpoint {
        match resource {
            Resource::Categories => &self.config.categories,
            Resource::Goods { .. } => &self.config.goods,
            Resource::Good { .. } => &self.config.good,
            Resource::GoodImages { .. } => &self.config.images,
        }
    }

    pub fn url_for(&self, resource: &Resource) -> String {
        let mut url = self
            .endpoint(resource)
            .url
            .replace("{base}", &self.config.base_url)
            .replace("{catalog_name}", &encode(&self.config.catalog_name));
        match resource {
            Resource::Categories => {}
            Resource::Goods { category_id } => {
                url = url.replace("{category_id}", &category_id.to_string());
            }
            Resource::Good {
                category_id,
                position_id,
            } => {
                url = url
                    .replace("{category_id}", &category_id.to_string())
                    .replace("{position_id}", &position_id.to_string());
            }
            Resource::GoodImages { goods_id } => {
                url = url.replace("{goods_id}", &goods_id.to_string());
            }
        }
        url
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.http.get(url);
        match &self.config.remote_user {
            Some(user) => request.basic_auth(user, self.config.remote_password.as_deref()),
            None => request,
        }
    }
}

#[async_trait]
impl CatalogSource for HttpCatalogSource {
    async fn fetch(&self, resource: &Resource) -> Result<Value, SyncError> {
        let url = self.url_for(resource);
        let response = self
            .request(&url)
            .send()
            .await
            .map_err(|err| SyncError::remote(resource.to_string(), err.to_string()))?;

        if !response.status().is_success() {
            return Err(SyncError::remote(
                resource.to_string(),
                format!("HTTP {}", response.status()),
            ));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| SyncError::remote(resource.to_string(), err.to_string()))?;
        Ok(extract_data(payload, self.endpoint(resource).data_key.as_deref()))
    }

    async fn fetch_asset(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let response = self
            .request(url)
            .send()
            .await
            .map_err(|err| SyncError::asset(url, err.to_string()))?;
        if !response.status().is_success() {
            return Err(SyncError::asset(url, format!("HTTP {}", response.status())));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| SyncError::asset(url, err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

/// Narrows a response body to the payload stored under `data_key`.
pub fn extract_data(mut payload: Value, data_key: Option<&str>) -> Value {
    match data_key {
        Some(key) => payload
            .get_mut(key)
            .map(Value::take)
            .unwrap_or(Value::Null),
        None => payload,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn url_templates_substitute_ids() {
        let mut cfg = SyncConfig::local("nl_dealer", "/tmp/x");
        cfg.catalog_name = "main catalog".into();
        let source = HttpCatalogSource::new(Arc::new(cfg));
        assert_eq!(
            source.url_for(&Resource::Good {
                category_id: 5,
                position_id: 77
            }),
            "http://localhost:8080/catalogs/main%20catalog/categories/5/goods/77"
        );
        assert_eq!(
            source.url_for(&Resource::GoodImages { goods_id: 9 }),
            "http://localhost:8080/goods/9/images"
        );
    }

    #[test]
    fn extract_data_narrows_to_key() {
        let body = json!({"goods": [{"id": 1}], "total": 1});
        assert_eq!(extract_data(body.clone(), Some("goods")), json!([{"id": 1}]));
        assert_eq!(extract_data(body.clone(), Some("missing")), Value::Null);
        assert_eq!(extract_data(body.clone(), None), body);
    }
}
