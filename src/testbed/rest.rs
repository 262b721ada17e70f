//! [`TestbedApi`] over the IoT-LAB REST API.

use super::{
    Credentials, ExperimentRequest, ExperimentState, ReservationError, ReservationId, Resources,
    TestbedApi, TestbedNode,
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RestTestbed {
    base: String,
    client: Client,
    credentials: Credentials,
}

#[derive(Debug, Deserialize)]
struct Submitted {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct ExperimentInfo {
    state: ExperimentState,
    #[serde(default)]
    nodes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NodeList {
    #[serde(default)]
    items: Vec<TestbedNode>,
}

impl RestTestbed {
    pub fn new(
        base: impl Into<String>,
        credentials: Credentials,
        request_timeout: Duration,
    ) -> Result<Self, ReservationError> {
        let client = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            client,
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path)
    }

    async fn get(&self, path: &str) -> Result<Response, ReservationError> {
        let r = self
            .client
            .get(self.url(path))
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .send()
            .await?;
        check(r).await
    }
}

/// Surface a non-success status with the API's own message.
async fn check(r: Response) -> Result<Response, ReservationError> {
    let status = r.status();
    if status.is_success() {
        return Ok(r);
    }
    let body = r.text().await.unwrap_or_default();
    Err(ReservationError::api(status.as_u16(), body))
}

/// JSON body of `POST /experiments`.
fn submission_body(request: &ExperimentRequest) -> Value {
    match &request.resources {
        Resources::Alias { count, archi, site } => json!({
            "name": request.name,
            "duration": request.duration,
            "type": "alias",
            "nodes": [{
                "alias": "1",
                "nbnodes": count,
                "properties": { "archi": archi, "site": site, "mobile": false },
            }],
        }),
        Resources::Physical { addresses } => json!({
            "name": request.name,
            "duration": request.duration,
            "type": "physical",
            "nodes": addresses,
        }),
    }
}

#[async_trait]
impl TestbedApi for RestTestbed {
    async fn submit(&self, request: &ExperimentRequest) -> Result<ReservationId, ReservationError> {
        debug!(name = %request.name, nodes = request.resources.len(), "POST experiments");
        let r = self
            .client
            .post(self.url("experiments"))
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .json(&submission_body(request))
            .send()
            .await?;
        let submitted = check(r).await?.json::<Submitted>().await?;
        Ok(ReservationId(submitted.id))
    }

    async fn state(&self, id: ReservationId) -> Result<ExperimentState, ReservationError> {
        let info = self.get(&format!("experiments/{id}")).await?.json::<ExperimentInfo>().await?;
        Ok(info.state)
    }

    async fn nodes(&self, id: ReservationId) -> Result<Vec<String>, ReservationError> {
        let info = self.get(&format!("experiments/{id}")).await?.json::<ExperimentInfo>().await?;
        Ok(info.nodes)
    }

    async fn stop(&self, id: ReservationId) -> Result<(), ReservationError> {
        debug!(%id, "DELETE experiment");
        let r = self
            .client
            .delete(self.url(&format!("experiments/{id}")))
            .basic_auth(&self.credentials.user, Some(&self.credentials.password))
            .send()
            .await?;
        check(r).await?;
        Ok(())
    }

    async fn site_nodes(&self, site: &str) -> Result<Vec<TestbedNode>, ReservationError> {
        let list = self.get(&format!("nodes?site={site}")).await?.json::<NodeList>().await?;
        Ok(list.items)
    }
}
