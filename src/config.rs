use std::{env, path::PathBuf, time::Duration};

/// Runtime settings for a reconciliation engine bound to one dealer scope.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub dealer: String,
    pub base_url: String,
    pub catalog_name: String,
    pub categories: ResourceEndpoint,
    pub goods: ResourceEndpoint,
    pub good: ResourceEndpoint,
    pub images: ResourceEndpoint,
    pub root_name: String,
    pub default_image: PathBuf,
    pub upload_folder: PathBuf,
    pub logotype: String,
    pub mail_sender: String,
    pub mail_recipients: Vec<String>,
    pub mail_relay_url: Option<String>,
    pub remote_user: Option<String>,
    pub remote_password: Option<String>,
    pub position_concurrency: usize,
    pub fetch_timeout: Duration,
}

/// URL template plus the key under which the remote wraps its payload.
#[derive(Debug, Clone)]
pub struct ResourceEndpoint {
    pub url: String,
    pub data_key: Option<String>,
}

impl ResourceEndpoint {
    fn from_env(url_var: &str, url_default: &str, key_var: &str, key_default: &str) -> Self {
        let data_key = env::var(key_var).unwrap_or_else(|_| key_default.to_string());
        Self {
            url: env::var(url_var).unwrap_or_else(|_| url_default.to_string()),
            data_key: Some(data_key).filter(|k| !k.trim().is_empty()),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        Self {
            dealer: env::var("CATALOG_DEALER").unwrap_or_else(|_| "nl_dealer".into()),
            base_url: env::var("CATALOG_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".into())
                .trim_end_matches('/')
                .to_string(),
            catalog_name: env::var("CATALOG_NAME").unwrap_or_else(|_| "main".into()),
            categories: ResourceEndpoint::from_env(
                "CATALOG_CATEGORIES_URL",
                "{base}/catalogs/{catalog_name}/categories",
                "CATALOG_CATEGORIES_KEY",
                "",
            ),
            goods: ResourceEndpoint::from_env(
                "CATALOG_GOODS_URL",
                "{base}/catalogs/{catalog_name}/categories/{category_id}/goods",
                "CATALOG_GOODS_KEY",
                "goods",
            ),
            good: ResourceEndpoint::from_env(
                "CATALOG_GOOD_URL",
                "{base}/catalogs/{catalog_name}/categories/{category_id}/goods/{position_id}",
                "CATALOG_GOOD_KEY",
                "",
            ),
            images: ResourceEndpoint::from_env(
                "CATALOG_IMAGES_URL",
                "{base}/goods/{goods_id}/images",
                "CATALOG_IMAGES_KEY",
                "",
            ),
            root_name: env::var("CATALOG_ROOT_NAME").unwrap_or_else(|_| "Catalog".into()),
            default_image: env::var("CATALOG_DEFAULT_IMAGE")
                .unwrap_or_else(|_| "static/default.jpg".into())
                .into(),
            upload_folder: env::var("CATALOG_UPLOAD_FOLDER")
                .unwrap_or_else(|_| "uploads".into())
                .into(),
            logotype: env::var("CATALOG_LOGOTYPE").unwrap_or_default(),
            mail_sender: env::var("CATALOG_MAIL_SENDER")
                .unwrap_or_else(|_| "catalog-sync@localhost".into()),
            mail_recipients: env::var("CATALOG_MAIL_ADMIN")
                .map(|v| split_list(&v))
                .unwrap_or_default(),
            mail_relay_url: env::var("CATALOG_MAIL_RELAY_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            remote_user: env::var("CATALOG_REMOTE_USER").ok(),
            remote_password: env::var("CATALOG_REMOTE_PASSWORD").ok(),
            position_concurrency: env::var("CATALOG_POSITION_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(4),
            fetch_timeout: Duration::from_secs(
                env::var("CATALOG_FETCH_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(30),
            ),
        }
    }

    /// Config with local defaults rooted at `upload_folder`; used by tests and demos.
    pub fn local(dealer: &str, upload_folder: impl Into<PathBuf>) -> Self {
        let upload_folder = upload_folder.into();
        Self {
            dealer: dealer.to_string(),
            base_url: "http://localhost:8080".into(),
            catalog_name: "main".into(),
            categories: ResourceEndpoint {
                url: "{base}/catalogs/{catalog_name}/categories".into(),
                data_key: None,
            },
            goods: ResourceEndpoint {
                url: "{base}/catalogs/{catalog_name}/categories/{category_id}/goods".into(),
                data_key: Some("goods".into()),
            },
            good: ResourceEndpoint {
                url: "{base}/catalogs/{catalog_name}/categories/{category_id}/goods/{position_id}"
                    .into(),
                data_key: None,
            },
            images: ResourceEndpoint {
                url: "{base}/goods/{goods_id}/images".into(),
                data_key: None,
            },
            root_name: "Catalog".into(),
            default_image: upload_folder.join("default.jpg"),
            upload_folder,
            logotype: "&logo=1".into(),
            mail_sender: "catalog-sync@localhost".into(),
            mail_recipients: vec!["admin@localhost".into()],
            mail_relay_url: None,
            remote_user: None,
            remote_password: None,
            position_concurrency: 4,
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';', ' '])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_list_drops_blanks() {
        assert_eq!(
            split_list("ops@example.com, ,admin@example.com;"),
            vec!["ops@example.com", "admin@example.com"]
        );
    }

    #[test]
    fn local_config_places_default_asset_under_upload_folder() {
        let cfg = SyncConfig::local("nl_dealer", "/tmp/catalog");
        assert_eq!(cfg.default_image, PathBuf::from("/tmp/catalog/default.jpg"));
        assert_eq!(cfg.position_concurrency, 4);
    }
}
