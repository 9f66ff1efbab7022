//! DVID label instance over HTTP

use crate::{StorageError, StorageResult, VolumeStore, WriteOptions};
use calclabels_common::BoundingBox;
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::{debug, info};

/// One `labelblk` instance on a DVID server
#[derive(Debug, Clone)]
pub struct DvidVolumeStore {
    client: HttpClient,
    server: String,
    uuid: String,
    label_name: String,
}

impl DvidVolumeStore {
    /// `server` is the base URL, e.g. `http://emdata:8000`; a bare host gets `http://`
    pub fn new(server: &str, uuid: &str, label_name: &str) -> StorageResult<Self> {
        if uuid.is_empty() || label_name.is_empty() {
            return Err(StorageError::InvalidConfig(
                "uuid and label name must be set".to_string(),
            ));
        }
        let server = server.trim_end_matches('/');
        let server = if server.starts_with("http://") || server.starts_with("https://") {
            server.to_string()
        } else {
            format!("http://{server}")
        };

        let client = HttpClient::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            server,
            uuid: uuid.to_string(),
            label_name: label_name.to_string(),
        })
    }

    /// Parse a write location of the form `<server>/api/node/<uuid>/<label-name>`
    pub fn from_location(location: &str) -> StorageResult<Self> {
        let invalid = || {
            StorageError::InvalidConfig(format!(
                "write location {location} is not <server>/api/node/<uuid>/<label>"
            ))
        };
        let (node, label_name) = location
            .trim_end_matches('/')
            .rsplit_once('/')
            .ok_or_else(invalid)?;
        let (server, uuid) = node.rsplit_once("/api/node/").ok_or_else(invalid)?;
        if server.is_empty() || uuid.contains('/') {
            return Err(invalid());
        }
        Self::new(server, uuid, label_name)
    }

    /// Raw write URL for `region`
    #[must_use]
    pub fn raw_url(&self, region: &BoundingBox, options: &WriteOptions) -> String {
        let [sx, sy, sz] = region.size();
        let [x, y, z] = region.start();
        let mut url = format!(
            "{}/raw/0_1_2/{sx}_{sy}_{sz}/{x}_{y}_{z}",
            self.location()
        );
        let mut query = Vec::new();
        if options.throttle {
            query.push("throttle=on".to_string());
        }
        if let Some(roi) = &options.roi {
            query.push(format!("roi={roi}"));
        }
        if !query.is_empty() {
            url.push('?');
            url.push_str(&query.join("&"));
        }
        url
    }
}

#[async_trait::async_trait]
impl VolumeStore for DvidVolumeStore {
    fn location(&self) -> String {
        format!("{}/api/node/{}/{}", self.server, self.uuid, self.label_name)
    }

    async fn write_raw(
        &self,
        region: &BoundingBox,
        options: &WriteOptions,
        body: &[u8],
    ) -> StorageResult<u16> {
        let url = self.raw_url(region, options);
        debug!("POST {} ({} bytes)", url, body.len());
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body.to_vec())
            .send()
            .await?;
        Ok(response.status().as_u16())
    }

    async fn create_label_instance(&self) -> StorageResult<()> {
        let url = format!("{}/api/repo/{}/instance", self.server, self.uuid);
        let response = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "typename": "labelblk",
                "dataname": self.label_name,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            info!("Created label instance {}", self.label_name);
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        if body.contains("already exists") {
            info!("Label instance {} already exists", self.label_name);
            return Ok(());
        }
        Err(StorageError::UnexpectedStatus {
            status: status.as_u16(),
            body,
        })
    }
}
