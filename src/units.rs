//! The units document: the build-tool configuration that lists every unit.
//!
//! A project keeps a full list in `fleetpack.units.json`. When a node builds
//! a range, the full list is preserved as `original.<name>` and replaced by a
//! slice document that points back at it:
//!
//! ```json
//! { "sliceOf": "original.fleetpack.units.json", "first": 4, "count": 3 }
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::UnitsError;
use crate::plan::UnitRange;

/// One independently buildable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub name: String,
    /// Shell command run from the node's working directory.
    pub command: String,
    /// Filenames this unit writes; used by verification.
    #[serde(default)]
    pub outputs: Vec<String>,
}

/// Reference from a generated slice document to the preserved full list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceRef {
    pub slice_of: String,
    pub first: usize,
    pub count: usize,
}

/// Either shape of the units document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UnitsDocument {
    Full(Vec<UnitSpec>),
    Slice(SliceRef),
}

/// Name the full list is preserved under while a slice is in place.
pub fn preserved_name(units_file: &str) -> String {
    format!("original.{}", units_file)
}

/// JSON text of the slice document for `range`.
pub fn slice_document(units_file: &str, range: UnitRange) -> String {
    let doc = UnitsDocument::Slice(SliceRef {
        slice_of: preserved_name(units_file),
        first: range.first,
        count: range.count,
    });
    // Serializing a struct of strings and integers cannot fail.
    serde_json::to_string_pretty(&doc).unwrap_or_default()
}

pub fn load_document(path: &Path) -> Result<UnitsDocument, UnitsError> {
    let content = std::fs::read_to_string(path).map_err(|source| UnitsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| UnitsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load a document that must be a full unit list.
pub fn load_full(path: &Path) -> Result<Vec<UnitSpec>, UnitsError> {
    match load_document(path)? {
        UnitsDocument::Full(units) => Ok(units),
        UnitsDocument::Slice(_) => Err(UnitsError::UnexpectedSlice {
            path: path.to_path_buf(),
        }),
    }
}

/// Resolve the units a worker in `root` should build, following a slice to its original.
pub fn resolve(root: &Path, units_file: &str) -> Result<Vec<UnitSpec>, UnitsError> {
    match load_document(&root.join(units_file))? {
        UnitsDocument::Full(units) => Ok(units),
        UnitsDocument::Slice(slice) => {
            let original = root.join(&slice.slice_of);
            let units = load_full(&original)?;
            let end = slice.first.checked_add(slice.count);
            match end {
                Some(end) if end <= units.len() => Ok(units[slice.first..end].to_vec()),
                _ => Err(UnitsError::SliceOutOfRange {
                    path: original,
                    first: slice.first,
                    count: slice.count,
                    len: units.len(),
                }),
            }
        }
    }
}
