// Common test utilities shared across acceptance tests
//
// Every TestProject owns two temp directories: the workspace the manifest
// lives in and a private tool cache. Nothing is read from or written to the
// user's real cache, and CI detection is cleared so ci-only targets behave
// the same on developer machines and CI runners.

#![allow(dead_code)]

use assert_cmd::Command;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

pub struct TestProject {
    temp_dir: TempDir,
    cache_dir: TempDir,
}

impl TestProject {
    /// Workspace with `manifest` as its werk.kdl
    pub fn new(manifest: &str) -> Self {
        let project = Self {
            temp_dir: TempDir::new().expect("Failed to create workspace dir"),
            cache_dir: TempDir::new().expect("Failed to create cache dir"),
        };
        project.write("werk.kdl", manifest);
        project
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn cache_path(&self) -> &Path {
        self.cache_dir.path()
    }

    /// `werk` running inside the workspace with an isolated cache
    pub fn werk(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_werk"));
        cmd.current_dir(self.path())
            .env("WERK_CACHE_DIR", self.cache_path())
            .env("WERK_LOG_FORMAT", "compact")
            .env("RUST_LOG", "warn")
            .env_remove("CI")
            .env_remove("WERK_CONFIG")
            .env_remove("WERK_JOBS");
        cmd
    }

    pub fn write(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.path().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&file_path, content).unwrap();
        file_path
    }

    pub fn read(&self, path: &str) -> String {
        fs::read_to_string(self.path().join(path))
            .unwrap_or_else(|e| panic!("Failed to read {}: {}", path, e))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.path().join(path).exists()
    }

    /// Lines appended to a run log by the manifest's actions
    pub fn log_lines(&self, path: &str) -> Vec<String> {
        if !self.exists(path) {
            return Vec::new();
        }
        self.read(path).lines().map(str::to_string).collect()
    }

    /// Push a file's mtime into the future so it reads as freshly edited
    pub fn touch_later(&self, path: &str) {
        let file = fs::File::options()
            .write(true)
            .open(self.path().join(path))
            .unwrap();
        file.set_modified(SystemTime::now() + Duration::from_secs(60))
            .unwrap();
    }
}
