use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const PAGE_BLOCK_TYPE: &str = "page";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryCollectionResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub result: QueryResult,
    #[serde(default, deserialize_with = "null_as_default")]
    pub record_map: RecordMap,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default, deserialize_with = "null_as_default")]
    pub size_hint: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct RecordMap {
    #[serde(default, deserialize_with = "null_map_values")]
    pub block: BTreeMap<String, Block>,
    #[serde(default, deserialize_with = "null_map_values")]
    pub collection: BTreeMap<String, CollectionMetadata>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct Block {
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: BlockValue,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct BlockValue {
    #[serde(default, deserialize_with = "null_as_default", rename = "type")]
    pub block_type: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub alive: bool,
    /// Property key to rich-text spans.
    #[serde(default, deserialize_with = "null_map_values")]
    pub properties: BTreeMap<String, Vec<Value>>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub parent_id: String,
}

impl BlockValue {
    pub fn is_page(&self) -> bool {
        self.block_type == PAGE_BLOCK_TYPE
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CollectionMetadata {
    #[serde(default, deserialize_with = "null_as_default")]
    pub role: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub value: CollectionValue,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct CollectionValue {
    #[serde(default, deserialize_with = "null_map_values")]
    pub schema: BTreeMap<String, SchemaField>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct SchemaField {
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default", rename = "type")]
    pub field_type: String,
}

/// Error body returned by the service alongside a non-200 status.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServiceError {
    #[serde(rename = "errorId", default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
}

impl ServiceError {
    /// Decode an error body, ignoring bodies that carry neither a name nor a message.
    pub fn from_body(body: &str) -> Option<Self> {
        let parsed: Self = serde_json::from_str(body).ok()?;
        if parsed.name.is_empty() && parsed.message.is_empty() {
            return None;
        }
        Some(parsed)
    }
}

/// Decode `null` as the type's default, the way absent fields already are.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

/// Like [`null_as_default`], applied to the map itself and to each of its values.
fn null_map_values<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    let raw = Option::<BTreeMap<String, Option<T>>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(key, value)| (key, value.unwrap_or_default()))
        .collect())
}
