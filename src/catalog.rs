use serde_json::json;
use tracing::debug;

use crate::api;
use crate::client::ApiClient;
use crate::config::INITIATOR;
use crate::error::{LoadCtlError, Result};
use crate::model::LoadTest;

/// Resolves test definitions and starts new runs.
pub struct TestCatalog<'a> {
    client: &'a ApiClient,
}

impl<'a> TestCatalog<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        TestCatalog { client }
    }

    /// Fetch a test definition by id.
    pub async fn fetch(&self, test_id: u32) -> Result<LoadTest> {
        let project_id = self.client.config().project_id;
        let path = api::load_test(project_id, test_id);
        let response = self.client.get(&path, &[]).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;
        debug!("fetch load test got response: {status}, {body}");

        if status != 200 {
            return Err(LoadCtlError::service(status, &body));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|_| {
            LoadCtlError::Protocol(format!("load test {test_id} response is not JSON: {body}"))
        })?;
        let name = parsed
            .get("name")
            .and_then(|n| n.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(LoadTest {
            id: test_id,
            project_id,
            name,
        })
    }

    /// Start a new run of the test. Returns the run id.
    pub async fn start_run(&self, test_id: u32, send_email: bool) -> Result<u32> {
        let path = api::start_test_run(self.client.config().project_id, test_id);
        let query = [
            ("sendEmail", send_email.to_string()),
            ("initiator", INITIATOR.to_string()),
        ];
        let response = self.client.post(&path, &query, &json!({})).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;

        if status != 200 {
            return Err(LoadCtlError::service(status, &body));
        }

        let parsed: serde_json::Value = serde_json::from_str(&body).map_err(|_| {
            LoadCtlError::Protocol(format!("start run response is not JSON: {body}"))
        })?;
        parsed
            .get("runId")
            .and_then(|id| id.as_u64())
            .map(|id| id as u32)
            .ok_or_else(|| LoadCtlError::Protocol(format!("start run response has no runId: {body}")))
    }
}
