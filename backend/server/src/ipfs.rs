//! Evidence-store adapter — a Pinata-style content-addressed storage API.
//!
//! Treated as a remote dependency with possible downtime: callers must
//! degrade gracefully when it is unavailable (the reconciler still accepts
//! metadata-only references for files already uploaded upstream).

use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::config::Config;
use crate::errors::{MrvError, Result};

/// A successfully stored file.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub content_id: String,
    pub size: u64,
    pub gateway_url: String,
}

#[derive(Debug, Clone)]
pub struct UploadMetadata {
    pub project_id: String,
    pub category: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
    #[serde(rename = "PinSize", default)]
    pin_size: u64,
}

#[derive(Debug, Deserialize)]
struct PinListResponse {
    #[serde(default)]
    rows: Vec<PinRow>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PinRow {
    #[serde(rename = "ipfs_pin_hash")]
    pub content_id: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub date_pinned: String,
}

pub struct EvidenceStore {
    client: Client,
    api_url: String,
    gateway_url: String,
    jwt: String,
}

impl EvidenceStore {
    pub fn new(client: Client, config: &Config) -> Self {
        EvidenceStore {
            client,
            api_url: config.evidence_api_url.trim_end_matches('/').to_string(),
            gateway_url: config.evidence_gateway_url.trim_end_matches('/').to_string(),
            jwt: config.evidence_jwt.clone(),
        }
    }

    /// Uploads are disabled without a token; metadata-only attach still works.
    pub fn is_configured(&self) -> bool {
        !self.jwt.is_empty()
    }

    pub fn gateway_url_for(&self, content_id: &str) -> String {
        format!("{}/{content_id}", self.gateway_url)
    }

    /// Pin a file. Returns its content identifier, size and retrieval URL.
    pub async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        metadata: &UploadMetadata,
    ) -> Result<StoredFile> {
        if !self.is_configured() {
            return Err(MrvError::ServiceUnavailable("evidence store"));
        }

        let pin_metadata = json!({
            "name": filename,
            "keyvalues": {
                "project_id": metadata.project_id,
                "file_type": metadata.category,
                "description": metadata.description,
            }
        });

        let form = Form::new()
            .part(
                "file",
                Part::bytes(bytes).file_name(filename.to_string()),
            )
            .text("pinataMetadata", pin_metadata.to_string())
            .text("pinataOptions", json!({ "cidVersion": 1 }).to_string());

        let resp = self
            .client
            .post(format!("{}/pinning/pinFileToIPFS", self.api_url))
            .bearer_auth(&self.jwt)
            .multipart(form)
            .send()
            .await?;

        if !resp.status().is_success() {
            warn!("evidence store upload failed with status {}", resp.status());
            return Err(MrvError::ServiceUnavailable("evidence store"));
        }

        let body: PinResponse = resp.json().await?;
        Ok(StoredFile {
            gateway_url: self.gateway_url_for(&body.ipfs_hash),
            content_id: body.ipfs_hash,
            size: body.pin_size,
        })
    }

    /// List pinned files, optionally filtered to one project id.
    pub async fn list(&self, project_id: Option<&str>) -> Result<Vec<PinRow>> {
        if !self.is_configured() {
            return Err(MrvError::ServiceUnavailable("evidence store"));
        }

        let mut request = self
            .client
            .get(format!("{}/data/pinList", self.api_url))
            .bearer_auth(&self.jwt)
            .query(&[("status", "pinned"), ("pageLimit", "1000")]);

        if let Some(id) = project_id {
            request = request.query(&[(
                "metadata[keyvalues][project_id]",
                json!({ "value": id, "op": "eq" }).to_string(),
            )]);
        }

        let body: PinListResponse = request.send().await?.json().await?;
        Ok(body.rows)
    }

    /// Unpin a file from the store.
    pub async fn unpin(&self, content_id: &str) -> Result<bool> {
        if !self.is_configured() {
            return Err(MrvError::ServiceUnavailable("evidence store"));
        }

        let resp = self
            .client
            .delete(format!("{}/pinning/unpin/{content_id}", self.api_url))
            .bearer_auth(&self.jwt)
            .send()
            .await?;
        Ok(resp.status().is_success())
    }
}
