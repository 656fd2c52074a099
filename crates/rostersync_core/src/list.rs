use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::extract::DEFAULT_KEY_FIELD;

/// Field never overwritten by a merge.
pub const ID_FIELD: &str = "id";

pub type Record = BTreeMap<String, String>;

/// Persisted record set. Wrapped in an object so top-level metadata can be
/// added later without breaking readers.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct RecordList {
    #[serde(default, deserialize_with = "crate::response::null_as_default")]
    pub entries: Vec<Record>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    #[default]
    Report,
    KeepFirst,
    Merge,
}

impl DuplicatePolicy {
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("report") {
            return Ok(Self::Report);
        }
        if value.eq_ignore_ascii_case("keep-first") || value.eq_ignore_ascii_case("keep_first") {
            return Ok(Self::KeepFirst);
        }
        if value.eq_ignore_ascii_case("merge") {
            return Ok(Self::Merge);
        }
        bail!("unsupported duplicate policy: {value} (expected report|keep-first|merge)")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::KeepFirst => "keep-first",
            Self::Merge => "merge",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub key_field: String,
    pub duplicates: DuplicatePolicy,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            key_field: DEFAULT_KEY_FIELD.to_string(),
            duplicates: DuplicatePolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct MergeReport {
    /// Existing entries whose fields changed.
    pub updated: usize,
    /// Existing entries matched by an incoming record without any change.
    pub unchanged: usize,
    pub added: usize,
    /// Indices (at load time) of entries repeating an earlier entry's key.
    pub duplicates: Vec<usize>,
    pub removed_duplicates: usize,
}

/// Copy every field of `from` into `into`, except [`ID_FIELD`].
/// Returns whether `into` changed.
pub fn merge_entry(into: &mut Record, from: &Record) -> bool {
    let mut changed = false;
    for (key, value) in from {
        if key == ID_FIELD {
            continue;
        }
        if into.get(key) != Some(value) {
            into.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}

fn key_of<'a>(record: &'a Record, key_field: &str) -> &'a str {
    record.get(key_field).map(String::as_str).unwrap_or("")
}

impl RecordList {
    pub fn new(entries: Vec<Record>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Indices of entries whose key repeats an earlier entry's key.
    pub fn find_duplicates(&self, key_field: &str) -> Vec<usize> {
        let mut seen = BTreeMap::new();
        let mut duplicates = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            if seen.insert(key_of(entry, key_field), index).is_some() {
                duplicates.push(index);
            }
        }
        duplicates
    }

    /// Merge `incoming` into the list.
    ///
    /// Entries matching an existing key are merged in place; the rest are
    /// appended in incoming order after every existing entry.
    pub fn update(&mut self, incoming: Vec<Record>, options: &MergeOptions) -> MergeReport {
        let key_field = options.key_field.as_str();
        let mut report = MergeReport {
            duplicates: self.find_duplicates(key_field),
            ..MergeReport::default()
        };
        for index in &report.duplicates {
            warn!(
                index,
                key = key_of(&self.entries[*index], key_field),
                policy = options.duplicates.as_str(),
                "duplicate entry in existing list"
            );
        }
        report.removed_duplicates = self.resolve_duplicates(&report.duplicates, options);

        // First occurrence wins the lookup when duplicates are kept.
        let mut existing_by_key = BTreeMap::new();
        for (index, entry) in self.entries.iter().enumerate() {
            existing_by_key
                .entry(key_of(entry, key_field).to_string())
                .or_insert(index);
        }

        let mut staged: Vec<Record> = Vec::new();
        let mut staged_by_key: BTreeMap<String, usize> = BTreeMap::new();
        for record in incoming {
            let key = key_of(&record, key_field).to_string();
            if let Some(&index) = existing_by_key.get(&key) {
                if merge_entry(&mut self.entries[index], &record) {
                    report.updated += 1;
                } else {
                    report.unchanged += 1;
                }
                continue;
            }
            match staged_by_key.entry(key) {
                Entry::Occupied(slot) => {
                    merge_entry(&mut staged[*slot.get()], &record);
                }
                Entry::Vacant(slot) => {
                    slot.insert(staged.len());
                    staged.push(record);
                }
            }
        }

        report.added = staged.len();
        self.entries.extend(staged);
        report
    }

    fn resolve_duplicates(&mut self, duplicates: &[usize], options: &MergeOptions) -> usize {
        if duplicates.is_empty() || options.duplicates == DuplicatePolicy::Report {
            return 0;
        }
        let key_field = options.key_field.as_str();
        let mut first_by_key: BTreeMap<String, usize> = BTreeMap::new();
        let mut kept: Vec<Record> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.drain(..) {
            let key = key_of(&entry, key_field).to_string();
            match first_by_key.get(&key) {
                Some(&index) => {
                    if options.duplicates == DuplicatePolicy::Merge {
                        merge_entry(&mut kept[index], &entry);
                    }
                }
                None => {
                    first_by_key.insert(key, kept.len());
                    kept.push(entry);
                }
            }
        }
        self.entries = kept;
        duplicates.len()
    }
}
