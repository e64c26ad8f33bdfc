use serde_json::json;
use tracing::{debug, info};

use crate::api;
use crate::client::ApiClient;
use crate::error::{LoadCtlError, Result};
use crate::model::{LoadTest, RunStatusBody, TestRun};

/// Fetches run state and issues stop commands.
pub struct RunStatusService<'a> {
    client: &'a ApiClient,
}

impl<'a> RunStatusService<'a> {
    pub fn new(client: &'a ApiClient) -> Self {
        RunStatusService { client }
    }

    /// Re-fetch an existing run by id, e.g. to resolve a benchmark run.
    pub async fn fetch_by_id(&self, run_id: u32) -> Result<TestRun> {
        let body = self.fetch_body(api::test_run(run_id), run_id).await?;
        let test = LoadTest {
            id: body.test_id.unwrap_or_default(),
            project_id: self.client.config().project_id,
            name: String::new(),
        };
        let mut run = TestRun::new(run_id, test);
        run.apply(&body);
        Ok(run)
    }

    /// Refresh a run in place from the run endpoint.
    pub async fn fetch(&self, run: &mut TestRun) -> Result<()> {
        let body = self.fetch_body(api::test_run(run.id), run.id).await?;
        run.apply(&body);
        Ok(())
    }

    /// Refresh a run in place from the status endpoint (richer metadata:
    /// report availability, start/end times).
    pub async fn fetch_status(&self, run: &mut TestRun) -> Result<()> {
        let body = self.fetch_body(api::run_status(run.id), run.id).await?;
        run.apply(&body);
        Ok(())
    }

    async fn fetch_body(&self, path: String, run_id: u32) -> Result<RunStatusBody> {
        let response = self.client.get(&path, &[]).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;
        debug!("fetching run {run_id} got {status}, {body}");

        if status == 401 {
            return Err(LoadCtlError::Authentication(format!(
                "fetching run {run_id} returned 401"
            )));
        }
        if status != 200 {
            return Err(LoadCtlError::service(status, &body));
        }

        // An expired session serves the HTML login page with a 200, so a
        // non-JSON body here means we need to log in again.
        serde_json::from_str(&body).map_err(|_| {
            LoadCtlError::Authentication(format!("run {run_id} status response is not JSON"))
        })
    }

    /// Ask the backend to stop the run. Does not wait for termination.
    pub async fn abort(&self, run: &TestRun) -> Result<()> {
        let path = api::test_run(run.id);
        let query = [("action", "STOP".to_string())];
        let response = self.client.put(&path, &query, &json!({})).await?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(LoadCtlError::from_transport)?;
        debug!("aborting run {} got {status}, {body}", run.id);

        if status != 200 {
            info!("aborting run {} failed: {status}, {body}", run.id);
            return Err(LoadCtlError::service(status, &body));
        }

        info!("Aborting run #{} requested.", run.id);
        Ok(())
    }
}
