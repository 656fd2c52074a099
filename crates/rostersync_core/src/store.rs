use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::list::RecordList;

/// Load the persisted list. A missing path, or no path at all, yields an empty list.
pub fn load_list(path: Option<&Path>) -> Result<RecordList> {
    let Some(path) = path else {
        return Ok(RecordList::default());
    };
    match fs::metadata(path) {
        Ok(_) => {}
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(RecordList::default()),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to stat {}", path.display()));
        }
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let list: RecordList = serde_json::from_str(&content)
        .with_context(|| format!("failed to decode the content of {}", path.display()))?;
    Ok(list)
}

/// Pretty-print the list with two-space indentation and a trailing newline.
pub fn write_list<W: Write>(mut writer: W, list: &RecordList) -> Result<()> {
    let rendered = render_list(list)?;
    writer
        .write_all(rendered.as_bytes())
        .context("failed to write record list")?;
    writer.flush().context("failed to flush record list")?;
    Ok(())
}

pub fn render_list(list: &RecordList) -> Result<String> {
    let mut rendered = serde_json::to_string_pretty(list).context("failed to encode record list")?;
    rendered.push('\n');
    Ok(rendered)
}
