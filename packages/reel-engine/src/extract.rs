use crate::error::{ReelError, ReelResult};
use crate::scene::find_scene_name;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static TAGGED_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```python\r?\n(.*?)\r?\n```").expect("tagged fence pattern is valid")
});

static UNTAGGED_FENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```\r?\n(.*?)\r?\n```").expect("untagged fence pattern is valid")
});

/// Where the extracted source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeOrigin {
    Tagged,
    Untagged,
    Raw,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedCode {
    pub source: String,
    pub origin: CodeOrigin,
}

impl ExtractedCode {
    pub fn scene_name(&self) -> Option<String> {
        find_scene_name(&self.source)
    }

    /// Fails when the source has no recognizable scene entry point.
    pub fn validate(&self) -> ReelResult<String> {
        self.scene_name().ok_or(ReelError::NoSceneFound)
    }

    pub fn into_source(self) -> String {
        self.source
    }
}

/// Pulls the code out of free-form model output.
///
/// A ```` ```python ```` block beats an untagged block, which beats the raw text.
/// The first block of the winning kind is returned verbatim.
pub fn extract(raw_text: &str) -> ExtractedCode {
    if let Some(inner) = first_capture(&TAGGED_FENCE, raw_text) {
        return ExtractedCode {
            source: inner,
            origin: CodeOrigin::Tagged,
        };
    }
    if let Some(inner) = first_capture(&UNTAGGED_FENCE, raw_text) {
        return ExtractedCode {
            source: inner,
            origin: CodeOrigin::Untagged,
        };
    }
    ExtractedCode {
        source: raw_text.to_string(),
        origin: CodeOrigin::Raw,
    }
}

fn first_capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
