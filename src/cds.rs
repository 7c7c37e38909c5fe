//! Remote data-store client.
//!
//! Mirrors the CDS API flow: submit a request against a catalog, poll the
//! task until it completes, then stream the result to the target path.
//! Credentials come from `CDSAPI_URL`/`CDSAPI_KEY` or from `~/.cdsapirc`.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FetchError;

pub const DEFAULT_URL: &str = "https://cds.climate.copernicus.eu/api/v2";

/// One fully-specified store request.
#[derive(Debug, Clone, Serialize)]
pub struct CdsRequest {
    pub product_type: String,
    pub format: String,
    /// Bounding box, north / west / south / east.
    pub area: [f64; 4],
    pub year: String,
    pub month: Vec<String>,
    pub day: Vec<String>,
    pub time: Vec<String>,
    pub variable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pressure_level: Option<String>,
}

/// Boundary to the remote store. Failure means "data unavailable", never a
/// reason to abort the whole run.
#[allow(async_fn_in_trait)]
pub trait DataStore {
    async fn retrieve(
        &self,
        catalog: &str,
        request: &CdsRequest,
        target: &Path,
    ) -> Result<(), FetchError>;
}

pub struct CdsClient {
    http: reqwest::Client,
    url: String,
    uid: String,
    key: String,
}

#[derive(Debug, Deserialize)]
struct TaskReply {
    state: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    error: Option<TaskError>,
}

#[derive(Debug, Deserialize)]
struct TaskError {
    #[serde(default)]
    message: String,
}

impl CdsClient {
    /// Builds a client from the environment, falling back to `~/.cdsapirc`.
    pub fn from_environment() -> Result<CdsClient, FetchError> {
        let from_env = (
            std::env::var("CDSAPI_URL").ok(),
            std::env::var("CDSAPI_KEY").ok(),
        );
        let (url, key) = match from_env {
            (url, Some(key)) => (url.unwrap_or_else(|| DEFAULT_URL.to_string()), key),
            _ => {
                let path = dirs::home_dir()
                    .map(|home| home.join(".cdsapirc"))
                    .ok_or(FetchError::MissingCredentials)?;
                let text = std::fs::read_to_string(path)
                    .map_err(|_| FetchError::MissingCredentials)?;
                parse_cdsapirc(&text).ok_or(FetchError::MissingCredentials)?
            }
        };

        // Keys are "UID:APIKEY"; a missing UID part still authenticates on
        // some deployments, so it is not rejected here.
        let (uid, key) = match key.split_once(':') {
            Some((uid, key)) => (uid.to_string(), key.to_string()),
            None => (String::new(), key),
        };

        Ok(CdsClient {
            http: reqwest::Client::new(),
            url,
            uid,
            key,
        })
    }

    async fn poll_task(&self, request_id: &str) -> Result<TaskReply, FetchError> {
        let reply = self
            .http
            .get(format!("{}/tasks/{}", self.url, request_id))
            .basic_auth(&self.uid, Some(&self.key))
            .send()
            .await?;
        Ok(reply.json::<TaskReply>().await?)
    }

    async fn download(&self, location: &str, target: &Path) -> Result<(), FetchError> {
        let response = self
            .http
            .get(location)
            .basic_auth(&self.uid, Some(&self.key))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                catalog: location.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = File::create(target)?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk)?;
        }
        Ok(())
    }
}

impl DataStore for CdsClient {
    async fn retrieve(
        &self,
        catalog: &str,
        request: &CdsRequest,
        target: &Path,
    ) -> Result<(), FetchError> {
        let submit = self
            .http
            .post(format!("{}/resources/{}", self.url, catalog))
            .basic_auth(&self.uid, Some(&self.key))
            .json(request)
            .send()
            .await?;
        if !submit.status().is_success() {
            return Err(FetchError::Status {
                catalog: catalog.to_string(),
                status: submit.status().as_u16(),
            });
        }

        let mut task: TaskReply = submit.json().await?;
        let request_id = task
            .request_id
            .clone()
            .ok_or_else(|| FetchError::MalformedResponse("reply carries no request id".into()))?;

        loop {
            match task.state.as_str() {
                "completed" => break,
                "failed" => {
                    let message = task.error.map(|e| e.message).unwrap_or_default();
                    return Err(FetchError::TaskFailed(request_id, message));
                }
                state => {
                    debug!("task {request_id} is {state}, waiting");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    task = self.poll_task(&request_id).await?;
                }
            }
        }

        let location = task
            .location
            .ok_or_else(|| FetchError::MalformedResponse("completed task has no location".into()))?;
        self.download(&location, target).await
    }
}

fn parse_cdsapirc(text: &str) -> Option<(String, String)> {
    let mut url = None;
    let mut key = None;
    for line in text.lines() {
        if let Some((name, value)) = line.split_once(':') {
            match name.trim() {
                "url" => url = Some(value.trim().to_string()),
                // The split is on the first colon only, so the UID:APIKEY
                // colon inside the value survives.
                "key" => key = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    Some((url.unwrap_or_else(|| DEFAULT_URL.to_string()), key?))
}

// -- Tests -------------------------------------------------------------------
