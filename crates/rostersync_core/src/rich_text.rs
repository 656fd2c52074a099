use serde::{Deserialize, Serialize};
use serde_json::Value;

const ANCHOR_MARK: &str = "a";
/// Replacement for URLs whose scheme is not allowed in an `href`.
pub const UNSAFE_URL: &str = "#ZgotmplZ";
const SAFE_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RenderOptions {
    /// Escape anchor text as HTML. The URL is always sanitized and escaped.
    pub escape_link_text: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            escape_link_text: true,
        }
    }
}

/// Flatten a rich-text property value into one string.
///
/// Each span is rendered with [`render_span`] and the results are concatenated
/// in order. Unrecognized shapes degrade to their JSON text instead of failing.
pub fn flatten_rich_text(spans: &[Value], options: &RenderOptions) -> String {
    let mut output = String::new();
    for span in spans {
        output.push_str(&render_span(span, options));
    }
    output
}

/// Best-effort render of a single span.
///
/// Accepted shapes:
/// - `[text]` renders `text`
/// - `[text, [["a", url]]]` renders an anchor
/// - anything else, including non-array spans, renders as JSON text
pub fn render_span(span: &Value, options: &RenderOptions) -> String {
    let Value::Array(items) = span else {
        return span.to_string();
    };
    match items.as_slice() {
        [text] => value_text(text),
        [text, marks] => match anchor_url(marks) {
            Some(url) => render_anchor(&value_text(text), &url, options),
            None => span.to_string(),
        },
        _ => span.to_string(),
    }
}

/// Strings pass through verbatim; every other value renders as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

pub fn escape_html(value: &str) -> String {
    let mut output = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            '"' => output.push_str("&#34;"),
            '\'' => output.push_str("&#39;"),
            '+' => output.push_str("&#43;"),
            '\0' => output.push('\u{FFFD}'),
            _ => output.push(ch),
        }
    }
    output
}

fn render_anchor(text: &str, url: &str, options: &RenderOptions) -> String {
    let text = if options.escape_link_text {
        escape_html(text)
    } else {
        text.to_string()
    };
    format!(
        "<a href=\"{}\">{}</a>",
        escape_html(&normalize_url(&sanitize_url(url))),
        text
    )
}

/// Replace URLs with a scheme other than http, https or mailto by [`UNSAFE_URL`].
/// A colon counts as a scheme separator only when no `/` precedes it.
pub fn sanitize_url(url: &str) -> String {
    if let Some(colon) = url.find(':')
        && !url[..colon].contains('/')
    {
        let scheme = &url[..colon];
        if !SAFE_SCHEMES
            .iter()
            .any(|safe| safe.eq_ignore_ascii_case(scheme))
        {
            return UNSAFE_URL.to_string();
        }
    }
    url.to_string()
}

/// Percent-encode every byte outside the URL reserved and unreserved sets.
/// Existing `%` escapes are left alone.
pub fn normalize_url(url: &str) -> String {
    let mut output = String::with_capacity(url.len());
    for byte in url.bytes() {
        match byte {
            b'!' | b'#' | b'$' | b'&' | b'*' | b'+' | b',' | b'/' | b':' | b';' | b'='
            | b'?' | b'@' | b'[' | b']' | b'-' | b'.' | b'_' | b'~' | b'%' => {
                output.push(char::from(byte))
            }
            _ if byte.is_ascii_alphanumeric() => output.push(char::from(byte)),
            _ => output.push_str(&format!("%{byte:02x}")),
        }
    }
    output
}

fn anchor_url(marks: &Value) -> Option<String> {
    let Value::Array(marks) = marks else {
        return None;
    };
    let [mark] = marks.as_slice() else {
        return None;
    };
    let mark = match mark {
        // Tolerate one extra level of wrapping: [[["a", url]]].
        Value::Array(inner) if inner.len() == 1 && inner[0].is_array() => &inner[0],
        other => other,
    };
    match mark {
        Value::Array(pair) => match pair.as_slice() {
            [kind, url] if value_text(kind) == ANCHOR_MARK => Some(value_text(url)),
            _ => None,
        },
        _ => None,
    }
}
