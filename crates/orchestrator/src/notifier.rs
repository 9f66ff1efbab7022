//! Pipeline status reporting to the requesting service

use calclabels_common::{LabelError, Result};
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::info;

/// Milestones reported through the result callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Started,
    GeneratedInitialLabels,
    StitchedLabels,
    WroteLabels,
    Finished,
    Failed(String),
}

impl PipelineStatus {
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Started => "started",
            Self::GeneratedInitialLabels => "generated initial labels",
            Self::StitchedLabels => "stitched labels",
            Self::WroteLabels => "wrote labels",
            Self::Finished => "finished",
            Self::Failed(_) => "failed",
        }
    }

    /// JSON body posted to the callback
    #[must_use]
    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Failed(error) => serde_json::json!({ "status": "failed", "error": error }),
            other => serde_json::json!({ "status": other.label() }),
        }
    }
}

#[async_trait::async_trait]
pub trait StatusNotifier: Send + Sync {
    async fn notify(&self, status: &PipelineStatus) -> Result<()>;
}

/// Posts status payloads to an HTTP callback
#[derive(Debug, Clone)]
pub struct HttpStatusNotifier {
    client: HttpClient,
    url: String,
}

impl HttpStatusNotifier {
    pub fn new(url: &str) -> Result<Self> {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| LabelError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

#[async_trait::async_trait]
impl StatusNotifier for HttpStatusNotifier {
    async fn notify(&self, status: &PipelineStatus) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&status.payload())
            .send()
            .await
            .map_err(|e| LabelError::Other(format!("status callback failed: {e}")))?;
        if !response.status().is_success() {
            return Err(LabelError::Other(format!(
                "status callback answered {}",
                response.status()
            )));
        }
        Ok(())
    }
}

/// Logs status changes when no callback is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl StatusNotifier for LogNotifier {
    async fn notify(&self, status: &PipelineStatus) -> Result<()> {
        info!("Pipeline status: {}", status.payload());
        Ok(())
    }
}
