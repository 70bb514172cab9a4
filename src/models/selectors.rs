// src/models/selectors.rs

//! CSS selector rules for pulling candidate records out of a listing page.

use serde::{Deserialize, Serialize};

/// Selector rules for a listing page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractSpec {
    /// Selector that must match for the page to be considered well-formed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,

    /// Selector for each row/item, scoped to the container when present
    pub row: String,

    /// Number of leading rows to ignore (header rows rendered as `tr`)
    #[serde(default)]
    pub skip_rows: usize,

    /// Named fields extracted from each row
    pub fields: Vec<FieldSpec>,
}

/// How a single named field is read from a row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Field name, matching a source column
    pub name: String,

    /// Selector within the row; the row itself when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,

    /// Which match to use when the selector matches several elements.
    /// Negative values count from the end (`-1` is the last match).
    #[serde(default)]
    pub index: i32,

    /// Attribute to read instead of the element text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,

    /// Resolve the value as a URL against the page URL
    #[serde(default)]
    pub link: bool,

    /// Regex applied to the value; the first capture group is kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

impl FieldSpec {
    /// A text field read from `selector`.
    pub fn text(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            selector: Some(selector.into()),
            index: 0,
            attr: None,
            link: false,
            pattern: None,
        }
    }

    /// A link field read from the `href` of `selector`.
    pub fn href(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self {
            attr: Some("href".to_string()),
            link: true,
            ..Self::text(name, selector)
        }
    }

    /// Set the match index.
    pub fn nth(mut self, index: i32) -> Self {
        self.index = index;
        self
    }

    /// Set the capture pattern.
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }
}
