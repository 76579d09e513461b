//! Game session lifecycle: resume or boot on start, persist on end.
//!
//! Files are keyed by the SHA-256 of the ROM image so that renaming a ROM
//! keeps its saves:
//!
//! ```text
//! <root>/state/<hash>.sav    full save state
//! <root>/sram/<hash>.sram    raw battery RAM dump
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use nestor_core::logging::{log, LogCategory, LogLevel};
use sha2::{Digest, Sha256};

use crate::console::Console;
use crate::NesError;

/// Stable identity of a ROM image (lowercase hex SHA-256).
pub fn rom_hash(rom_data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(rom_data);
    format!("{:x}", hasher.finalize())
}

/// Read a battery RAM dump.
pub fn read_sram<P: AsRef<Path>>(path: P) -> io::Result<Vec<u8>> {
    fs::read(path)
}

/// Write a battery RAM dump, creating parent directories.
pub fn write_sram<P: AsRef<Path>>(path: P, sram: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, sram)
}

/// Where a session keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub root: PathBuf,
}

impl SessionPaths {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// `saves/` next to the running executable, or the working directory.
    pub fn beside_executable() -> Self {
        let mut root = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));
        root.push("saves");
        Self { root }
    }

    pub fn state_path(&self, hash: &str) -> PathBuf {
        self.root.join("state").join(format!("{}.sav", hash))
    }

    pub fn sram_path(&self, hash: &str) -> PathBuf {
        self.root.join("sram").join(format!("{}.sram", hash))
    }
}

/// How [`Session::start`] brought the console up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartKind {
    /// Restored from the save state
    Resumed,
    /// Cold reset, battery RAM loaded if present
    Booted,
}

/// A running game: the console plus where its files live.
#[derive(Debug)]
pub struct Session {
    console: Console,
    hash: String,
    paths: SessionPaths,
    start: StartKind,
}

impl Session {
    /// Bring a freshly built console up. With `resume`, a cleanly restoring
    /// save state wins; otherwise (or on any restore failure) the console is
    /// cold reset and, for battery-backed carts, battery RAM is loaded.
    pub fn start<S: Into<String>>(
        mut console: Console,
        hash: S,
        paths: SessionPaths,
        resume: bool,
    ) -> Self {
        let hash = hash.into();
        let start = if resume && Self::try_resume(&mut console, &paths.state_path(&hash)) {
            StartKind::Resumed
        } else {
            console.cold_reset();
            if console.cartridge().battery {
                Self::load_battery(&mut console, &paths.sram_path(&hash));
            }
            StartKind::Booted
        };
        log(LogCategory::State, LogLevel::Info, || {
            format!("session {} started: {:?}", &hash[..hash.len().min(12)], start)
        });
        Self {
            console,
            hash,
            paths,
            start,
        }
    }

    fn try_resume(console: &mut Console, path: &Path) -> bool {
        match console.load_state_file(path) {
            Ok(()) => true,
            Err(NesError::Io(e)) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => {
                log(LogCategory::State, LogLevel::Warn, || {
                    format!("discarding save state {}: {}", path.display(), e)
                });
                false
            }
        }
    }

    fn load_battery(console: &mut Console, path: &Path) {
        match read_sram(path) {
            Ok(bytes) => {
                log(LogCategory::State, LogLevel::Debug, || {
                    format!("loaded {} bytes of battery RAM", bytes.len())
                });
                console.cartridge_mut().load_sram(&bytes);
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => log(LogCategory::State, LogLevel::Warn, || {
                format!("cannot read battery RAM {}: {}", path.display(), e)
            }),
        }
    }

    pub fn console(&self) -> &Console {
        &self.console
    }

    pub fn console_mut(&mut self) -> &mut Console {
        &mut self.console
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn start_kind(&self) -> StartKind {
        self.start
    }

    /// Detach audio, write battery RAM (battery carts only) and the save
    /// state. Hands the console back for reuse or drop.
    pub fn end(mut self) -> Result<Console, NesError> {
        if let Some(output) = self.console.detach_audio() {
            log(LogCategory::APU, LogLevel::Debug, || {
                format!("audio detached, {} samples dropped", output.sink().dropped())
            });
        }
        if self.console.cartridge().battery {
            write_sram(
                self.paths.sram_path(&self.hash),
                &self.console.cartridge().sram,
            )?;
        }
        self.console
            .save_state_file(self.paths.state_path(&self.hash))?;
        Ok(self.console)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rom_hash_is_sha256_hex() {
        assert_eq!(
            rom_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(rom_hash(b"abc").len(), 64);
    }

    #[test]
    fn paths_are_keyed_by_hash() {
        let paths = SessionPaths::new("/data");
        assert_eq!(paths.state_path("ab12"), PathBuf::from("/data/state/ab12.sav"));
        assert_eq!(paths.sram_path("ab12"), PathBuf::from("/data/sram/ab12.sram"));
    }

    #[test]
    fn beside_executable_ends_in_saves() {
        assert!(SessionPaths::beside_executable().root.ends_with("saves"));
    }
}
