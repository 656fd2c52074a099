use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::debug;

use crate::list::Record;
use crate::response::QueryCollectionResponse;
use crate::rich_text::{RenderOptions, flatten_rich_text};

pub const DEFAULT_KEY_FIELD: &str = "Twitter";
pub const DEFAULT_KEY_PREFIX: &str = "@";

const BUILTIN_RENAMES: &[(&str, &str)] = &[("Summary/Reason for being on this list", "Summary")];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractOptions {
    pub key_field: String,
    pub key_prefix: String,
    /// Schema display name to output field name, applied after the built-in table.
    pub renames: BTreeMap<String, String>,
    pub skip_archived: bool,
    pub render: RenderOptions,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            key_field: DEFAULT_KEY_FIELD.to_string(),
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            renames: BTreeMap::new(),
            skip_archived: false,
            render: RenderOptions::default(),
        }
    }
}

impl ExtractOptions {
    pub fn rename_field(&self, name: &str) -> String {
        if let Some(renamed) = self.renames.get(name) {
            return renamed.clone();
        }
        BUILTIN_RENAMES
            .iter()
            .find(|(from, _)| *from == name)
            .map(|(_, to)| (*to).to_string())
            .unwrap_or_else(|| name.to_string())
    }

    fn accepts_key(&self, record: &Record) -> bool {
        record
            .get(&self.key_field)
            .is_some_and(|value| value.starts_with(&self.key_prefix))
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ExtractReport {
    pub records: Vec<Record>,
    pub blocks_seen: usize,
    pub skipped_not_page: usize,
    pub skipped_orphaned: usize,
    pub skipped_archived: usize,
    pub dropped_by_key: usize,
}

/// Schema field key to output field name, across every collection in the response.
///
/// Collections are visited in key order; a later collection overwrites an
/// earlier one for a colliding field key.
pub fn field_names(
    response: &QueryCollectionResponse,
    options: &ExtractOptions,
) -> BTreeMap<String, String> {
    let mut names = BTreeMap::new();
    for collection in response.record_map.collection.values() {
        for (key, field) in &collection.value.schema {
            names.insert(key.clone(), options.rename_field(&field.name));
        }
    }
    names
}

pub fn extract_records(
    response: &QueryCollectionResponse,
    options: &ExtractOptions,
) -> ExtractReport {
    let collection_ids = response
        .record_map
        .collection
        .keys()
        .map(String::as_str)
        .collect::<BTreeSet<_>>();
    let names = field_names(response, options);

    let mut report = ExtractReport::default();
    for (block_id, block) in &response.record_map.block {
        report.blocks_seen += 1;
        let value = &block.value;
        if !value.is_page() {
            report.skipped_not_page += 1;
            continue;
        }
        if !collection_ids.contains(value.parent_id.as_str()) {
            debug!(block = %block_id, parent = %value.parent_id, "skipping page outside target collections");
            report.skipped_orphaned += 1;
            continue;
        }
        if options.skip_archived && !value.alive {
            debug!(block = %block_id, "skipping archived page");
            report.skipped_archived += 1;
            continue;
        }

        let mut record = Record::new();
        for (key, spans) in &value.properties {
            let name = names.get(key).cloned().unwrap_or_else(|| key.clone());
            record.insert(name, flatten_rich_text(spans, &options.render));
        }

        if options.accepts_key(&record) {
            report.records.push(record);
        } else {
            debug!(block = %block_id, "dropping page without a usable key");
            report.dropped_by_key += 1;
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{ExtractOptions, extract_records, field_names};
    use crate::response::QueryCollectionResponse;

    fn response(blocks: serde_json::Value) -> QueryCollectionResponse {
        serde_json::from_value(json!({
            "result": {"sizeHint": 0},
            "recordMap": {
                "block": blocks,
                "collection": {
                    "coll-1": {
                        "value": {
                            "schema": {
                                "title": {"name": "Name", "type": "title"},
                                "tw": {"name": "Twitter", "type": "text"},
                                "sm": {"name": "Summary/Reason for being on this list", "type": "text"}
                            }
                        }
                    }
                }
            }
        }))
        .expect("decode response")
    }

    fn page(parent: &str, twitter: &str) -> serde_json::Value {
        json!({
            "value": {
                "type": "page",
                "alive": true,
                "parent_id": parent,
                "properties": {
                    "title": [["Alice"]],
                    "tw": [[twitter]],
                    "sm": [["see "], ["link", [["a", "https://example.org"]]]]
                }
            }
        })
    }

    #[test]
    fn keeps_pages_with_prefixed_key() {
        let report = extract_records(
            &response(json!({"b1": page("coll-1", "@alice")})),
            &ExtractOptions::default(),
        );
        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record["Twitter"], "@alice");
        assert_eq!(record["Name"], "Alice");
        assert_eq!(
            record["Summary"],
            "see <a href=\"https://example.org\">link</a>"
        );
        assert!(!record.contains_key("Summary/Reason for being on this list"));
    }

    #[test]
    fn drops_pages_without_prefix() {
        let report = extract_records(
            &response(json!({"b1": page("coll-1", "alice")})),
            &ExtractOptions::default(),
        );
        assert!(report.records.is_empty());
        assert_eq!(report.dropped_by_key, 1);
    }

    #[test]
    fn drops_pages_without_key_field() {
        let report = extract_records(
            &response(json!({
                "b1": {"value": {"type": "page", "parent_id": "coll-1", "properties": {"title": [["x"]]}}}
            })),
            &ExtractOptions::default(),
        );
        assert!(report.records.is_empty());
        assert_eq!(report.dropped_by_key, 1);
    }

    #[test]
    fn drops_non_page_blocks_regardless_of_key() {
        let mut block = page("coll-1", "@alice");
        block["value"]["type"] = json!("text");
        let report = extract_records(&response(json!({"b1": block})), &ExtractOptions::default());
        assert!(report.records.is_empty());
        assert_eq!(report.skipped_not_page, 1);
    }

    #[test]
    fn drops_orphaned_pages() {
        let report = extract_records(
            &response(json!({"b1": page("other", "@alice")})),
            &ExtractOptions::default(),
        );
        assert!(report.records.is_empty());
        assert_eq!(report.skipped_orphaned, 1);
    }

    #[test]
    fn archived_pages_kept_unless_configured() {
        let mut block = page("coll-1", "@alice");
        block["value"]["alive"] = json!(false);
        let response = response(json!({"b1": block}));

        let kept = extract_records(&response, &ExtractOptions::default());
        assert_eq!(kept.records.len(), 1);

        let skipped = extract_records(
            &response,
            &ExtractOptions {
                skip_archived: true,
                ..ExtractOptions::default()
            },
        );
        assert!(skipped.records.is_empty());
        assert_eq!(skipped.skipped_archived, 1);
    }

    #[test]
    fn unknown_property_keys_keep_raw_key() {
        let mut block = page("coll-1", "@alice");
        block["value"]["properties"]["zz"] = json!([["extra"]]);
        let report = extract_records(&response(json!({"b1": block})), &ExtractOptions::default());
        assert_eq!(report.records[0]["zz"], "extra");
    }

    #[test]
    fn null_property_flattens_to_empty_field() {
        let mut block = page("coll-1", "@alice");
        block["value"]["properties"]["sm"] = serde_json::Value::Null;
        block["value"]["alive"] = serde_json::Value::Null;
        let report = extract_records(&response(json!({"b1": block})), &ExtractOptions::default());
        assert_eq!(report.records.len(), 1);
        assert_eq!(report.records[0]["Summary"], "");
        assert_eq!(report.records[0]["Twitter"], "@alice");
    }

    #[test]
    fn configured_renames_override_builtin_table() {
        let options = ExtractOptions {
            renames: BTreeMap::from([
                (
                    "Summary/Reason for being on this list".to_string(),
                    "Reason".to_string(),
                ),
                ("Name".to_string(), "Display name".to_string()),
            ]),
            ..ExtractOptions::default()
        };
        let names = field_names(&response(json!({})), &options);
        assert_eq!(names["sm"], "Reason");
        assert_eq!(names["title"], "Display name");
        assert_eq!(names["tw"], "Twitter");
    }

    #[test]
    fn custom_key_field_and_prefix() {
        let options = ExtractOptions {
            key_field: "Name".to_string(),
            key_prefix: "Al".to_string(),
            ..ExtractOptions::default()
        };
        let report = extract_records(
            &response(json!({"b1": page("coll-1", "no-at-sign")})),
            &options,
        );
        assert_eq!(report.records.len(), 1);
    }

    #[test]
    fn counts_every_block() {
        let report = extract_records(
            &response(json!({
                "b1": page("coll-1", "@alice"),
                "b2": page("coll-1", "@bob"),
                "b3": page("coll-1", "carol"),
                "b4": {"value": {"type": "collection_view_page"}}
            })),
            &ExtractOptions::default(),
        );
        assert_eq!(report.blocks_seen, 4);
        assert_eq!(report.records.len(), 2);
        assert_eq!(report.dropped_by_key, 1);
        assert_eq!(report.skipped_not_page, 1);
    }
}
