use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::{info, warn};

use crate::client::{CollectionApi, CollectionClient, CollectionClientConfig};
use crate::config::SyncConfig;
use crate::extract::{ExtractOptions, ExtractReport, extract_records};
use crate::list::{MergeOptions, MergeReport, RecordList};
use crate::response::QueryCollectionResponse;
use crate::store::load_list;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Existing list to merge into; read only.
    pub list_path: Option<PathBuf>,
    /// Saved response to use instead of querying the service.
    pub response_path: Option<PathBuf>,
    pub extract: ExtractOptions,
    pub merge: MergeOptions,
    pub max_limit: Option<u64>,
}

impl SyncOptions {
    pub fn from_config(
        config: &SyncConfig,
        list_path: Option<PathBuf>,
        response_path: Option<PathBuf>,
        duplicates_flag: Option<&str>,
    ) -> Result<Self> {
        Ok(Self {
            list_path,
            response_path,
            extract: config.extract_options(),
            merge: config.merge_options(duplicates_flag)?,
            max_limit: config.service.max_limit,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub list: RecordList,
    pub extract: ExtractReport,
    pub merge: MergeReport,
    pub size_hint: u64,
    pub request_count: usize,
}

/// Fetch, extract and merge using the configured service client.
pub fn run_sync(config: &SyncConfig, options: &SyncOptions) -> Result<SyncOutcome> {
    if options.response_path.is_some() {
        return run_sync_offline(options);
    }
    let mut api = CollectionClient::new(CollectionClientConfig::from_config(config))?;
    run_sync_with_api(&mut api, options)
}

/// Records extracted from the service (or a saved response), without merging.
pub fn fetch_records(config: &SyncConfig, options: &SyncOptions) -> Result<ExtractReport> {
    let response = match &options.response_path {
        Some(path) => load_response(path)?,
        None => {
            let mut api = CollectionClient::new(CollectionClientConfig::from_config(config))?;
            fetch_all(&mut api, options.max_limit)?.0
        }
    };
    Ok(extract_records(&response, &options.extract))
}

pub fn run_sync_with_api<A: CollectionApi>(
    api: &mut A,
    options: &SyncOptions,
) -> Result<SyncOutcome> {
    let list = load_list(options.list_path.as_deref())?;
    let (response, size_hint) = fetch_all(api, options.max_limit)?;
    Ok(merge_response(
        list,
        &response,
        size_hint,
        api.request_count(),
        options,
    ))
}

fn run_sync_offline(options: &SyncOptions) -> Result<SyncOutcome> {
    let list = load_list(options.list_path.as_deref())?;
    let Some(path) = &options.response_path else {
        bail!("offline sync requires a saved response path");
    };
    let response = load_response(path)?;
    let size_hint = response.result.size_hint;
    Ok(merge_response(list, &response, size_hint, 0, options))
}

/// Preflight with limit 0 to learn the size hint, then fetch that many results.
pub fn fetch_all<A: CollectionApi>(
    api: &mut A,
    max_limit: Option<u64>,
) -> Result<(QueryCollectionResponse, u64)> {
    let preflight = api
        .query_collection(0)
        .context("preflight request failed")?;
    let size_hint = preflight.result.size_hint;
    info!(size_hint, "preflight complete");
    if let Some(max_limit) = max_limit
        && size_hint > max_limit
    {
        bail!("size hint {size_hint} exceeds the configured max_limit {max_limit}");
    }

    let response = api.query_collection(size_hint).context("request failed")?;
    let returned = response.result.size_hint;
    if returned != size_hint {
        warn!(
            preflight = size_hint,
            returned, "size hint changed between preflight and fetch"
        );
    }
    Ok((response, size_hint))
}

pub fn load_response(path: &Path) -> Result<QueryCollectionResponse> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("failed to decode saved response {}", path.display()))
}

fn merge_response(
    mut list: RecordList,
    response: &QueryCollectionResponse,
    size_hint: u64,
    request_count: usize,
    options: &SyncOptions,
) -> SyncOutcome {
    let extracted = extract_records(response, &options.extract);
    info!(
        blocks = extracted.blocks_seen,
        records = extracted.records.len(),
        dropped = extracted.dropped_by_key,
        "extracted records"
    );

    let merge = list.update(extracted.records.clone(), &options.merge);
    info!(
        updated = merge.updated,
        unchanged = merge.unchanged,
        added = merge.added,
        duplicates = merge.duplicates.len(),
        total = list.len(),
        "merged records"
    );

    SyncOutcome {
        list,
        extract: extracted,
        merge,
        size_hint,
        request_count,
    }
}
