//! Saves and restores algorithm parameters under a per-task directory.

use crate::algorithm::Algorithm;
use crate::error::AlgorithmError;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

const PREFIX: &str = "pass-";
const SUFFIX: &str = ".ckpt";

/// Configuration for the checkpointer.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckpointerConfig {
    /// Directory to store checkpoints.
    pub checkpoint_dir: PathBuf,
    /// Number of recent checkpoints to keep (0 = keep all).
    pub keep_last_n: usize,
}

impl CheckpointerConfig {
    /// Create a new config with specified checkpoint directory.
    pub fn new(checkpoint_dir: impl Into<PathBuf>) -> Self {
        Self {
            checkpoint_dir: checkpoint_dir.into(),
            keep_last_n: 0,
        }
    }

    /// Set the number of checkpoints to keep.
    pub fn with_keep_last_n(mut self, n: usize) -> Self {
        self.keep_last_n = n;
        self
    }
}

/// Error type for checkpointing operations.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint IO error: {0}")]
    Io(#[from] io::Error),

    #[error("algorithm could not (de)serialise parameters: {0}")]
    Algorithm(#[from] AlgorithmError),

    #[error("no checkpoint found in {0}")]
    NoCheckpoints(PathBuf),
}

/// Checkpoint metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Path to the checkpoint file.
    pub path: PathBuf,
    /// Pass at which the checkpoint was saved.
    pub pass: usize,
}

/// Checkpoint store for one task.
#[derive(Debug)]
pub struct Checkpointer {
    config: CheckpointerConfig,
    history: Vec<CheckpointInfo>,
}

impl Checkpointer {
    /// Create a new checkpointer.
    ///
    /// Creates the checkpoint directory if it doesn't exist.
    pub fn new(config: CheckpointerConfig) -> Result<Self, CheckpointError> {
        fs::create_dir_all(&config.checkpoint_dir)?;
        Ok(Self {
            config,
            history: Vec::new(),
        })
    }

    pub fn config(&self) -> &CheckpointerConfig {
        &self.config
    }

    /// File a checkpoint for `pass` is stored in.
    pub fn path_for(&self, pass: usize) -> PathBuf {
        self.config
            .checkpoint_dir
            .join(format!("{PREFIX}{pass:05}{SUFFIX}"))
    }

    /// Save `algorithm` parameters for `pass`.
    pub fn save(&mut self, algorithm: &dyn Algorithm, pass: usize) -> Result<PathBuf, CheckpointError> {
        let path = self.path_for(pass);
        let tmp = path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            algorithm.save(&mut writer)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &path)?;

        self.history.retain(|c| c.pass != pass);
        self.history.push(CheckpointInfo {
            path: path.clone(),
            pass,
        });
        self.cleanup_old_checkpoints();
        Ok(path)
    }

    /// Restore `algorithm` from a checkpoint file.
    pub fn load(&self, algorithm: &mut dyn Algorithm, path: &Path) -> Result<(), CheckpointError> {
        let mut reader = BufReader::new(File::open(path)?);
        algorithm.load(&mut reader)?;
        Ok(())
    }

    /// Restore the checkpoint saved at `pass`.
    pub fn load_pass(&self, algorithm: &mut dyn Algorithm, pass: usize) -> Result<CheckpointInfo, CheckpointError> {
        let path = self.path_for(pass);
        if !path.exists() {
            return Err(CheckpointError::NoCheckpoints(path));
        }
        self.load(algorithm, &path)?;
        Ok(CheckpointInfo { path, pass })
    }

    /// Restore the most recent checkpoint.
    pub fn load_latest(&self, algorithm: &mut dyn Algorithm) -> Result<CheckpointInfo, CheckpointError> {
        let latest = self.find_latest_checkpoint()?;
        self.load(algorithm, &latest.path)?;
        Ok(latest)
    }

    /// Find the latest checkpoint in the checkpoint directory.
    pub fn find_latest_checkpoint(&self) -> Result<CheckpointInfo, CheckpointError> {
        self.list_checkpoints()?
            .pop()
            .ok_or_else(|| CheckpointError::NoCheckpoints(self.config.checkpoint_dir.clone()))
    }

    /// List all checkpoints in the directory, oldest pass first.
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let mut checkpoints: Vec<CheckpointInfo> = fs::read_dir(&self.config.checkpoint_dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let path = e.path();
                let pass = path
                    .file_name()?
                    .to_str()?
                    .strip_prefix(PREFIX)?
                    .strip_suffix(SUFFIX)?
                    .parse()
                    .ok()?;
                Some(CheckpointInfo { path, pass })
            })
            .collect();

        checkpoints.sort_by_key(|c| c.pass);
        Ok(checkpoints)
    }

    /// Cleanup old checkpoints, keeping only the last N saved by this instance.
    fn cleanup_old_checkpoints(&mut self) {
        if self.config.keep_last_n == 0 {
            return;
        }
        while self.history.len() > self.config.keep_last_n {
            let old = self.history.remove(0);
            if let Err(e) = fs::remove_file(&old.path) {
                log::warn!("failed to remove old checkpoint {}: {}", old.path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingAlgorithm;
    use tempfile::tempdir;

    #[test]
    fn test_checkpoint_dir_creation() {
        let dir = tempdir().unwrap();
        let subdir = dir.path().join("nested/rl");

        let _checkpointer = Checkpointer::new(CheckpointerConfig::new(&subdir)).unwrap();

        assert!(subdir.exists());
    }

    #[test]
    fn test_path_naming() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        assert_eq!(checkpointer.path_for(12), dir.path().join("pass-00012.ckpt"));
    }

    #[test]
    fn test_save_and_load_latest() {
        let dir = tempdir().unwrap();
        let mut checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();

        let mut algorithm = CountingAlgorithm::new();
        algorithm.set_parameter(1.5);
        checkpointer.save(&algorithm, 1).unwrap();
        algorithm.set_parameter(2.5);
        checkpointer.save(&algorithm, 2).unwrap();

        let mut restored = CountingAlgorithm::new();
        let info = checkpointer.load_latest(&mut restored).unwrap();
        assert_eq!(info.pass, 2);
        assert_eq!(restored.parameter(), 2.5);

        checkpointer.load_pass(&mut restored, 1).unwrap();
        assert_eq!(restored.parameter(), 1.5);
    }

    #[test]
    fn test_missing_checkpoint() {
        let dir = tempdir().unwrap();
        let checkpointer = Checkpointer::new(CheckpointerConfig::new(dir.path())).unwrap();
        let mut algorithm = CountingAlgorithm::new();

        assert!(matches!(
            checkpointer.load_latest(&mut algorithm),
            Err(CheckpointError::NoCheckpoints(_))
        ));
        assert!(matches!(
            checkpointer.load_pass(&mut algorithm, 3),
            Err(CheckpointError::NoCheckpoints(_))
        ));
    }

    #[test]
    fn test_keep_last_n() {
        let dir = tempdir().unwrap();
        let config = CheckpointerConfig::new(dir.path()).with_keep_last_n(2);
        let mut checkpointer = Checkpointer::new(config).unwrap();
        let algorithm = CountingAlgorithm::new();

        for pass in 1..=4 {
            checkpointer.save(&algorithm, pass).unwrap();
        }

        let passes: Vec<usize> = checkpointer
            .list_checkpoints()
            .unwrap()
            .iter()
            .map(|c| c.pass)
            .collect();
        assert_eq!(passes, vec![3, 4]);
    }
}
