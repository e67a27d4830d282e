//! Local names for portal elements.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

use crate::html::compile_static_regex;

static INVALID_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| compile_static_regex(r"[^-\s\w.]"));

/// Replaces every character outside `[-\s\w.]` with an underscore.
///
/// A name made only of dots (`.`, `..`) becomes as many underscores, so no
/// generated component points at the current or parent directory.
#[must_use]
pub fn valid_filename(name: &str) -> String {
    if !name.is_empty() && name.chars().all(|c| c == '.') {
        return "_".repeat(name.len());
    }
    INVALID_FILENAME_CHARS.replace_all(name, "_").into_owned()
}

/// Location of a top-level element (material or videostore): `<year>/<name>`.
#[must_use]
pub fn root_location(year: u16, name: &str) -> PathBuf {
    PathBuf::from(year.to_string()).join(valid_filename(name))
}

/// Location of a child element under `parent`.
#[must_use]
pub fn child_location(parent: &Path, name: &str) -> PathBuf {
    parent.join(valid_filename(name))
}
