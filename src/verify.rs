//! Post-build output verification.

use regex::Regex;
use std::path::Path;

use crate::config::VerifyConfig;
use crate::errors::RunError;
use crate::units::UnitSpec;

/// Outcome of a successful check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub checked: usize,
}

/// Output filenames declared by `units`, in declaration order, narrowed by `filter`.
pub fn expected_outputs(units: &[UnitSpec], filter: Option<&Regex>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    units
        .iter()
        .flat_map(|u| u.outputs.iter())
        .filter(|name| filter.is_none_or(|re| re.is_match(name)))
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Every name in `expected` that is not a file under `dir`. Never short-circuits.
pub fn find_missing(dir: &Path, expected: &[String]) -> Vec<String> {
    expected
        .iter()
        .filter(|name| !dir.join(name).is_file())
        .cloned()
        .collect()
}

/// Check the full unit list's outputs against the configured directory.
pub fn verify_outputs(units: &[UnitSpec], config: &VerifyConfig) -> Result<VerifyReport, RunError> {
    let filter = config
        .filename_regex
        .as_deref()
        .map(Regex::new)
        .transpose()
        .map_err(|e| RunError::Config(format!("invalid filenameRegex: {}", e)))?;
    let expected = expected_outputs(units, filter.as_ref());
    let missing = find_missing(&config.output_directory, &expected);
    if !missing.is_empty() {
        return Err(RunError::Verification { missing });
    }
    Ok(VerifyReport {
        checked: expected.len(),
    })
}
