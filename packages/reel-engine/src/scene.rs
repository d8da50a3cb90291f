use regex::Regex;
use std::sync::LazyLock;

static SCENE_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"class\s+(\w+)\s*\([^)]*Scene[^)]*\):").expect("scene pattern is valid")
});

/// Name of the first class deriving from a `*Scene` base. Later definitions are ignored.
pub fn find_scene_name(code: &str) -> Option<String> {
    SCENE_CLASS
        .captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}
