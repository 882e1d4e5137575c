//! HTTP client for the coordinator protocol.

use cascade_core::protocol::{
    DispatchResponse, HeartbeatRequest, LoopResponse, RegisterRequest, RegisterResponse,
    StageDescriptor, StartedRequest,
};
use cascade_core::{Error, Result};
use reqwest::{Client, StatusCode};
use std::path::Path;

#[derive(Clone)]
pub struct CoordinatorClient {
    client: Client,
    base_url: String,
}

impl CoordinatorClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Resolve the coordinator: an explicit URL wins, otherwise the
    /// address is read from the uri-file the coordinator wrote.
    pub fn discover(url: Option<&str>, urifile: Option<&Path>) -> Result<Self> {
        if let Some(url) = url {
            return Ok(Self::new(url));
        }
        let path = urifile.ok_or_else(|| {
            Error::Internal("no coordinator URL or urifile configured".to_string())
        })?;
        let uri = std::fs::read_to_string(path)?;
        Ok(Self::new(uri.trim()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    pub async fn register(&self, worker_uri: &str) -> Result<RegisterResponse> {
        let res = self
            .client
            .post(self.url("/workers"))
            .json(&RegisterRequest {
                worker_uri: worker_uri.to_string(),
            })
            .send()
            .await
            .map_err(network)?;
        res.json().await.map_err(network)
    }

    pub async fn dispatch(&self) -> Result<DispatchResponse> {
        let res = self
            .client
            .post(self.url("/stages/dispatch"))
            .send()
            .await
            .map_err(network)?;
        res.json().await.map_err(network)
    }

    pub async fn get_stage(&self, index: usize) -> Result<StageDescriptor> {
        let res = self
            .client
            .get(self.url(&format!("/stages/{}", index)))
            .send()
            .await
            .map_err(network)?;
        match res.status() {
            StatusCode::OK => res.json().await.map_err(network),
            StatusCode::NOT_FOUND => Err(Error::StageNotFound(index)),
            status => Err(Error::Network(status.to_string())),
        }
    }

    pub async fn stage_started(&self, index: usize, worker_uri: &str) -> Result<()> {
        let res = self
            .client
            .post(self.url(&format!("/stages/{}/started", index)))
            .json(&StartedRequest {
                worker_uri: worker_uri.to_string(),
            })
            .send()
            .await
            .map_err(network)?;
        ok_status(res.status())
    }

    pub async fn stage_finished(&self, index: usize) -> Result<()> {
        let res = self
            .client
            .post(self.url(&format!("/stages/{}/finished", index)))
            .send()
            .await
            .map_err(network)?;
        ok_status(res.status())
    }

    pub async fn stage_failed(&self, index: usize) -> Result<()> {
        let res = self
            .client
            .post(self.url(&format!("/stages/{}/failed", index)))
            .send()
            .await
            .map_err(network)?;
        ok_status(res.status())
    }

    pub async fn requeue(&self, index: usize) -> Result<()> {
        let res = self
            .client
            .post(self.url(&format!("/stages/{}/requeue", index)))
            .send()
            .await
            .map_err(network)?;
        ok_status(res.status())
    }

    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<()> {
        let res = self
            .client
            .post(self.url("/workers/heartbeat"))
            .json(req)
            .send()
            .await
            .map_err(network)?;
        ok_status(res.status())
    }

    pub async fn continue_loop(&self) -> Result<bool> {
        let res = self
            .client
            .get(self.url("/loop"))
            .send()
            .await
            .map_err(network)?;
        let status: LoopResponse = res.json().await.map_err(network)?;
        Ok(status.active)
    }
}

fn network(err: reqwest::Error) -> Error {
    Error::Network(err.to_string())
}

fn ok_status(status: StatusCode) -> Result<()> {
    if status.is_success() {
        Ok(())
    } else {
        Err(Error::Network(status.to_string()))
    }
}
