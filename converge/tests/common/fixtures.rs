use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

/// A file standing in for cluster state: the command under test `cat`s it
/// and the test rewrites it to simulate convergence.
pub struct StateFile {
    pub dir: TempDir,
    pub path: PathBuf,
}

impl StateFile {
    pub fn new(initial: &str) -> Self {
        crate::test_log!("FIXTURE: Creating state file with '{}'", initial.trim());

        let dir = TempDir::new().expect("Failed to create temp dir");
        let path = dir.path().join("state");
        fs::write(&path, initial).expect("Failed to write state file");
        Self { dir, path }
    }

    pub fn set(&self, content: &str) {
        crate::test_log!("FIXTURE: State now '{}'", content.trim());
        fs::write(&self.path, content).expect("Failed to update state file");
    }

    pub fn cat_command(&self) -> String {
        format!("cat {}", self.path.display())
    }
}
