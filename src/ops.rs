//! File operations behind the session commands.
//!
//! Every method returns `Ok(text)` for anything the client should read,
//! including command-level failures. `Err` is reserved for what ends the
//! session: cancellation, broken locks, a dead channel.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::archive::Archiver;
use crate::cancel::CancelToken;
use crate::constants::{COPY_CHUNK, PAYLOAD_LEN};
use crate::error::{GateError, Result};
use crate::lines::{append_line, nth_line, replace_line};
use crate::registry::{FileEntry, Registry};

pub const NO_SUCH_FILE: &str = "There is no file with this name.";
pub const INVALID_NAME: &str = "Invalid file name";
pub const REGISTRY_FULL: &str = "File registry is full";
pub const READ_COMPLETED: &str = "\nReading file completed";
pub const ARCHIVE_EXTENSION: &str = ".tar";

/// Outcome of a byte-for-byte copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transfer {
    Complete(u64),
    MissingSource,
    Collision,
    /// Stopped early or the byte count did not match the source. The
    /// destination may hold a partial copy.
    Failed { copied: u64, reason: String },
}

/// Copies `src` to a new file `dst` in `COPY_CHUNK` steps.
pub fn transfer(src: &Path, dst: &Path, cancel: &CancelToken) -> Result<Transfer> {
    let mut input = match File::open(src) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Transfer::MissingSource),
        Err(err) => {
            return Ok(Transfer::Failed {
                copied: 0,
                reason: err.to_string(),
            })
        }
    };
    let expected = match input.metadata() {
        Ok(meta) => meta.len(),
        Err(err) => {
            return Ok(Transfer::Failed {
                copied: 0,
                reason: err.to_string(),
            })
        }
    };
    let mut output = match OpenOptions::new().write(true).create_new(true).open(dst) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::AlreadyExists => return Ok(Transfer::Collision),
        Err(err) => {
            return Ok(Transfer::Failed {
                copied: 0,
                reason: err.to_string(),
            })
        }
    };

    let mut buf = [0u8; COPY_CHUNK];
    let mut copied = 0u64;
    loop {
        cancel.check()?;
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => {
                return Ok(Transfer::Failed {
                    copied,
                    reason: err.to_string(),
                })
            }
        };
        if let Err(err) = output.write_all(&buf[..n]) {
            return Ok(Transfer::Failed {
                copied,
                reason: err.to_string(),
            });
        }
        copied += n as u64;
    }

    if copied != expected {
        return Ok(Transfer::Failed {
            copied,
            reason: format!("expected {expected} byte(s)"),
        });
    }
    Ok(Transfer::Complete(copied))
}

/// A plain file name inside the root, nothing that walks out of it.
pub fn is_bare_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\0'])
}

pub struct Workspace {
    root: PathBuf,
    registry: Arc<Registry>,
    archiver: Arc<dyn Archiver>,
}

impl Workspace {
    pub fn new(root: PathBuf, registry: Arc<Registry>, archiver: Arc<dyn Archiver>) -> Self {
        Workspace {
            root,
            registry,
            archiver,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Registry entry of `name`. A file that exists on disk but was never
    /// referenced gets registered on the way.
    fn lookup(&self, name: &str) -> Result<Option<Arc<FileEntry>>> {
        if let Some(entry) = self.registry.find(name)? {
            return Ok(Some(entry));
        }
        if !self.root.join(name).is_file() {
            return Ok(None);
        }
        match self.registry.find_or_create(name) {
            Ok(entry) => Ok(Some(entry)),
            Err(GateError::RegistryFull) => {
                log::warn!("registry full, cannot track {name}");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub fn list(&self) -> Result<String> {
        let dir = match fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(err) => return Ok(format!("Error listing server directory: {err}")),
        };
        let mut names: Vec<String> = dir
            .filter_map(|item| item.ok())
            .map(|item| item.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names.join("\n"))
    }

    pub fn read_line(&self, name: &str, line: usize, cancel: &CancelToken) -> Result<String> {
        if !is_bare_name(name) {
            return Ok(INVALID_NAME.into());
        }
        let Some(entry) = self.lookup(name)? else {
            return Ok(NO_SUCH_FILE.into());
        };
        let _guard = entry.read(cancel)?;
        let content = match fs::read(self.root.join(name)) {
            Ok(content) => content,
            Err(_) => return Ok("Error happened while opening file.".into()),
        };
        Ok(match nth_line(&content, line) {
            Some(text) => String::from_utf8_lossy(text).into_owned(),
            None => "Total number of lines was exceeded.".into(),
        })
    }

    /// Streams the whole file through `emit` in frame-sized chunks while
    /// holding the read lock; the returned text closes the answer.
    pub fn read_all(
        &self,
        name: &str,
        cancel: &CancelToken,
        mut emit: impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<String> {
        if !is_bare_name(name) {
            return Ok(INVALID_NAME.into());
        }
        let Some(entry) = self.lookup(name)? else {
            return Ok(NO_SUCH_FILE.into());
        };
        let _guard = entry.read(cancel)?;
        let mut file = match File::open(self.root.join(name)) {
            Ok(file) => file,
            Err(_) => return Ok("Error happened while opening file.".into()),
        };
        let mut buf = vec![0u8; PAYLOAD_LEN];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => emit(&buf[..n])?,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(_) => return Ok("Error while reading from file.".into()),
            }
        }
        Ok(READ_COMPLETED.into())
    }

    pub fn write_text(
        &self,
        name: &str,
        line: Option<usize>,
        text: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        if !is_bare_name(name) {
            return Ok(INVALID_NAME.into());
        }
        let entry = match self.registry.find_or_create(name) {
            Ok(entry) => entry,
            Err(GateError::RegistryFull) => return Ok(REGISTRY_FULL.into()),
            Err(err) => return Err(err),
        };
        let _guard = entry.write(cancel)?;
        let path = self.root.join(name);
        let content = match fs::read(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(_) => return Ok("Failed to open file for writing.".into()),
        };
        let updated = match line {
            None => append_line(&content, text.as_bytes()),
            Some(n) => match replace_line(&content, n, text.as_bytes()) {
                Some(updated) => updated,
                None => return Ok("Total number of lines was exceeded.".into()),
            },
        };
        if fs::write(&path, &updated).is_err() {
            return Ok("Couldn't write to file.".into());
        }
        Ok(format!("{} byte(s) written", text.len()))
    }

    /// Client directory → server root, under the write lock.
    pub fn upload(&self, name: &str, client_dir: &Path, cancel: &CancelToken) -> Result<String> {
        if !is_bare_name(name) {
            return Ok(INVALID_NAME.into());
        }
        if !client_dir.join(name).is_file() {
            return Ok("File doesn't exist in client directory.".into());
        }
        let entry = match self.registry.find_or_create(name) {
            Ok(entry) => entry,
            Err(GateError::RegistryFull) => return Ok(REGISTRY_FULL.into()),
            Err(err) => return Err(err),
        };
        let _guard = entry.write(cancel)?;
        let outcome = transfer(&client_dir.join(name), &self.root.join(name), cancel)?;
        Ok(match outcome {
            Transfer::Complete(bytes) => format!("{bytes} byte(s) transferred"),
            Transfer::MissingSource => "File doesn't exist in client directory.".into(),
            Transfer::Collision => "There is already a file with this name.".into(),
            Transfer::Failed { copied, reason } => {
                format!("Error while uploading file ({reason})\n{copied} byte(s) written to file {name}")
            }
        })
    }

    /// Server root → client directory, under the read lock.
    pub fn download(&self, name: &str, client_dir: &Path, cancel: &CancelToken) -> Result<String> {
        if !is_bare_name(name) {
            return Ok(INVALID_NAME.into());
        }
        let Some(entry) = self.lookup(name)? else {
            return Ok("File doesn't exist in server directory.".into());
        };
        let _guard = entry.read(cancel)?;
        let outcome = transfer(&self.root.join(name), &client_dir.join(name), cancel)?;
        Ok(match outcome {
            Transfer::Complete(bytes) => format!("{bytes} byte(s) transferred"),
            Transfer::MissingSource => "File doesn't exist in server directory.".into(),
            Transfer::Collision => "File already exists in client directory.".into(),
            Transfer::Failed { copied, reason } => {
                format!("Error while downloading file ({reason})\n{copied} byte(s) written to file {name}")
            }
        })
    }

    /// Copies every tracked file into `<client_dir>/<stem>`, archives the
    /// staging directory into `<client_dir>/<stem>.tar`, then removes it.
    /// Nothing is rolled back on failure.
    pub fn archive(&self, archive_name: &str, client_dir: &Path, cancel: &CancelToken) -> Result<String> {
        let Some(stem) = archive_name.strip_suffix(ARCHIVE_EXTENSION) else {
            return Ok("File extension entered wrong".into());
        };
        if !is_bare_name(archive_name) || stem.is_empty() {
            return Ok(INVALID_NAME.into());
        }

        let staging = client_dir.join(stem);
        if let Err(err) = fs::create_dir_all(&staging) {
            return Ok(format!("Error creating {}: {err}", staging.display()));
        }

        let mut files = Vec::new();
        let mut total = 0u64;
        for name in self.registry.names()? {
            let Some(entry) = self.registry.find(&name)? else {
                continue;
            };
            let _guard = entry.read(cancel)?;
            match transfer(&self.root.join(&name), &staging.join(&name), cancel)? {
                Transfer::Complete(bytes) => {
                    total += bytes;
                    files.push(name);
                }
                Transfer::MissingSource => log::warn!("tracked file {name} is missing on disk"),
                Transfer::Collision => {
                    return Ok(format!("Error while archiving: {name} already staged"));
                }
                Transfer::Failed { reason, .. } => {
                    return Ok(format!("Error while archiving {name}: {reason}"));
                }
            }
        }

        if let Err(err) = self.archiver.archive(&staging, archive_name, &files) {
            return Ok(format!("Error running archiver: {err}"));
        }
        match transfer(&staging.join(archive_name), &client_dir.join(archive_name), cancel)? {
            Transfer::Complete(_) => {}
            Transfer::Collision => {
                return Ok(format!("Error: {archive_name} already exists in client directory"));
            }
            Transfer::MissingSource => return Ok("Error: archiver produced no archive".into()),
            Transfer::Failed { reason, .. } => {
                return Ok(format!("Error copying {archive_name}: {reason}"));
            }
        }
        if let Err(err) = fs::remove_dir_all(&staging) {
            return Ok(format!("Error removing {}: {err}", staging.display()));
        }
        Ok(format!(
            "{} files downloaded ..{total} byte(s) transferred ..",
            files.len()
        ))
    }
}
