use std::io;
use std::path::Path;
use std::process::Command;

use crate::error::{GateError, Result};

/// Packs staged files into one archive for `archServer`.
pub trait Archiver: Send + Sync {
    /// Creates `staging/archive_name` from `files`, given relative to `staging`.
    fn archive(&self, staging: &Path, archive_name: &str, files: &[String]) -> Result<()>;
}

/// Runs `tar -cf` as a child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct TarArchiver;

impl Archiver for TarArchiver {
    fn archive(&self, staging: &Path, archive_name: &str, files: &[String]) -> Result<()> {
        let status = Command::new("tar")
            .arg("-cf")
            .arg(archive_name)
            .arg("--")
            .args(files)
            .current_dir(staging)
            .status()
            .map_err(GateError::io("spawn tar"))?;
        if !status.success() {
            return Err(GateError::Io {
                context: "tar",
                source: io::Error::other(format!("tar exited with {status}")),
            });
        }
        Ok(())
    }
}
