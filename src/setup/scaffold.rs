//! Project directory layout.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::SetupError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScaffoldReport {
    pub created: Vec<PathBuf>,
    pub existing: Vec<PathBuf>,
}

/// Create each of `dirs` under `root`. Existing directories are left alone.
pub fn create_scaffold(root: &Path, dirs: &[String]) -> Result<ScaffoldReport, SetupError> {
    let mut report = ScaffoldReport::default();
    for d in dirs {
        let path = root.join(d);
        if path.is_dir() {
            report.existing.push(path);
            continue;
        }
        fs::create_dir_all(&path).map_err(|e| SetupError::io(format!("create {}", path.display()), e))?;
        debug!(dir = %path.display(), "created");
        report.created.push(path);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_run_reports_existing() {
        let root = tempfile::tempdir().unwrap();
        let dirs: Vec<String> = ["logs", "cache/transformers", "data/samples"].iter().map(|s| s.to_string()).collect();
        let first = create_scaffold(root.path(), &dirs).unwrap();
        assert_eq!(first.created.len(), 3);
        assert!(root.path().join("cache/transformers").is_dir());
        let second = create_scaffold(root.path(), &dirs).unwrap();
        assert!(second.created.is_empty());
        assert_eq!(second.existing.len(), 3);
    }

    #[test]
    fn file_in_the_way_is_an_error() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("logs"), "x").unwrap();
        assert!(create_scaffold(root.path(), &["logs".to_string()]).is_err());
    }
}
