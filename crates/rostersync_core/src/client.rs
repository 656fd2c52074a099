use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Serialize;
use tracing::info;

use crate::config::{CollectionTarget, SyncConfig};
use crate::response::{QueryCollectionResponse, ServiceError};

const USER_TIME_ZONE: &str = "UTC";

pub trait CollectionApi {
    fn query_collection(&mut self, limit: u64) -> Result<QueryCollectionResponse>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct CollectionClientConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout_ms: Option<u64>,
    pub target: CollectionTarget,
}

impl CollectionClientConfig {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            target: config.target(),
        }
    }
}

pub struct CollectionClient {
    client: Client,
    config: CollectionClientConfig,
    request_count: usize,
}

impl CollectionClient {
    pub fn new(config: CollectionClientConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout_ms) = config.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        let client = builder
            .build()
            .context("failed to build collection HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }
}

impl CollectionApi for CollectionClient {
    fn query_collection(&mut self, limit: u64) -> Result<QueryCollectionResponse> {
        let payload = query_payload(&self.config.target, limit);
        self.request_count += 1;
        info!(endpoint = %self.config.endpoint, limit, "querying collection");

        let response = self
            .client
            .post(&self.config.endpoint)
            .header("User-Agent", self.config.user_agent.clone())
            .header("Accept", "application/json")
            .json(&payload)
            .send()
            .context("failed to send the collection query")?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().with_context(|| {
                format!(
                    "failed to read body from an error response (HTTP {})",
                    status.as_u16()
                )
            })?;
            bail!("{}", describe_failure(status, &body));
        }

        response
            .json::<QueryCollectionResponse>()
            .context("failed to decode the collection query response")
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

pub fn describe_failure(status: StatusCode, body: &str) -> String {
    match ServiceError::from_body(body) {
        Some(error) => format!(
            "collection query failed with HTTP {}: {}: {}",
            status.as_u16(),
            error.name,
            error.message
        ),
        None => format!(
            "collection query failed with HTTP {}: {}",
            status.as_u16(),
            body.trim()
        ),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPayload<'a> {
    collection: Pointer<'a>,
    collection_view: Pointer<'a>,
    loader: Loader,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pointer<'a> {
    id: &'a str,
    space_id: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Loader {
    #[serde(rename = "type")]
    loader_type: &'static str,
    reducers: Reducers,
    search_query: &'static str,
    user_time_zone: &'static str,
}

#[derive(Debug, Serialize)]
struct Reducers {
    #[serde(rename = "collection_group_results")]
    group_results: ResultsReducer,
}

#[derive(Debug, Serialize)]
struct ResultsReducer {
    #[serde(rename = "type")]
    reducer_type: &'static str,
    limit: u64,
}

/// Request body for one `queryCollection` call returning at most `limit` results.
pub fn query_payload(target: &CollectionTarget, limit: u64) -> QueryPayload<'_> {
    QueryPayload {
        collection: Pointer {
            id: &target.collection_id,
            space_id: &target.space_id,
        },
        collection_view: Pointer {
            id: &target.collection_view_id,
            space_id: &target.space_id,
        },
        loader: Loader {
            loader_type: "reducer",
            reducers: Reducers {
                group_results: ResultsReducer {
                    reducer_type: "results",
                    limit,
                },
            },
            search_query: "",
            user_time_zone: USER_TIME_ZONE,
        },
    }
}
