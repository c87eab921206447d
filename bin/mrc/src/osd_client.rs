//! Outbound calls to OSDs
//!
//! The coordinator only needs two calls: `invalidate`, which makes an OSD
//! drop its view of a replica set and report its replica state, and
//! `fetch_invalidated`, which asks a new replica to pull the data that was
//! current when the old view was invalidated.

use async_trait::async_trait;
use mrc_common::{Error, OsdUuid, Result};
use mrc_placement::OsdRegistry;
use mrc_xcap::FileCredentials;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Replica state reported by an invalidated OSD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub truncate_epoch: u64,
    pub max_object_version: u64,
}

/// Answer of an OSD to an invalidation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidateResponse {
    /// The OSD held the primary lease for the file
    pub is_primary: bool,
    pub status: Option<ReplicaStatus>,
}

#[async_trait]
pub trait OsdClient: Send + Sync {
    async fn invalidate(&self, osd: &OsdUuid, creds: &FileCredentials)
    -> Result<InvalidateResponse>;

    async fn fetch_invalidated(&self, osd: &OsdUuid, creds: &FileCredentials) -> Result<()>;
}

#[derive(Serialize)]
struct XLocRequest<'a> {
    file_id: &'a str,
    credentials: &'a FileCredentials,
}

/// JSON-over-HTTP OSD client; addresses come from the OSD registry
pub struct HttpOsdClient {
    http: reqwest::Client,
    registry: Arc<OsdRegistry>,
}

impl HttpOsdClient {
    pub fn new(registry: Arc<OsdRegistry>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { http, registry })
    }

    fn url(&self, osd: &OsdUuid, op: &str) -> Result<String> {
        let address = self
            .registry
            .address_of(osd)
            .ok_or_else(|| Error::ServiceUnavailable(format!("no address known for OSD {osd}")))?;
        Ok(format!("{}/v1/xloc/{op}", address.trim_end_matches('/')))
    }

    async fn post(&self, osd: &OsdUuid, op: &str, creds: &FileCredentials) -> Result<reqwest::Response> {
        let url = self.url(osd, op)?;
        debug!("POST {} for {}", url, creds.xcap.file_id);
        let response = self
            .http
            .post(&url)
            .json(&XLocRequest {
                file_id: &creds.xcap.file_id,
                credentials: creds,
            })
            .send()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("OSD {osd}: {e}")))?;
        if !response.status().is_success() {
            return Err(Error::ServiceUnavailable(format!(
                "OSD {osd} answered {} to {op}",
                response.status()
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl OsdClient for HttpOsdClient {
    async fn invalidate(
        &self,
        osd: &OsdUuid,
        creds: &FileCredentials,
    ) -> Result<InvalidateResponse> {
        self.post(osd, "invalidate", creds)
            .await?
            .json::<InvalidateResponse>()
            .await
            .map_err(|e| Error::ServiceUnavailable(format!("OSD {osd}: malformed reply: {e}")))
    }

    async fn fetch_invalidated(&self, osd: &OsdUuid, creds: &FileCredentials) -> Result<()> {
        self.post(osd, "fetch-invalidated", creds).await?;
        Ok(())
    }
}
