//! Host automation API handed to scripts.
//!
//! Scripts never talk to the game directly: they receive a [`GameApi`]
//! capability (injected as the `Ratchetron` global) and the process id of the
//! attached game. The real console connection lives outside this crate;
//! [`MemoryImage`] is an offline stand-in used by the CLI and tests.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Mutex, PoisonError};

use anyhow::{bail, Context, Result};

/// Memory access to an attached game process.
///
/// Implementations must be shareable across threads: ticks run on worker
/// threads while the owner keeps a handle for unloading.
pub trait GameApi: Send + Sync + fmt::Debug {
    /// Process id of the currently attached game.
    fn current_pid(&self) -> u32;

    /// Read `size` bytes at `address` in process `pid`.
    fn read_memory(&self, pid: u32, address: u32, size: u32) -> Result<Vec<u8>>;

    /// Write `bytes` at `address` in process `pid`.
    fn write_memory(&self, pid: u32, address: u32, bytes: &[u8]) -> Result<()>;
}

/// Sparse in-memory process image.
///
/// Unwritten bytes read as zero. Accesses with a pid other than the image's
/// own are rejected, mirroring a console that only exposes the running game.
pub struct MemoryImage {
    pid: u32,
    bytes: Mutex<HashMap<u32, u8>>,
}

impl fmt::Debug for MemoryImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let populated = self.bytes.lock().map(|b| b.len()).unwrap_or(0);
        f.debug_struct("MemoryImage")
            .field("pid", &self.pid)
            .field("populated_bytes", &populated)
            .finish()
    }
}

impl MemoryImage {
    /// Empty image for process `pid`.
    #[must_use]
    pub fn new(pid: u32) -> Self {
        Self {
            pid,
            bytes: Mutex::new(HashMap::new()),
        }
    }

    /// Image seeded with the raw dump at `path`, mapped at `base`.
    pub fn from_dump(pid: u32, path: &Path, base: u32) -> Result<Self> {
        let dump = std::fs::read(path)
            .with_context(|| format!("Failed to read memory dump: {}", path.display()))?;
        let image = Self::new(pid);
        image.poke(base, &dump)?;
        log::info!(
            "Loaded {} byte memory dump at {:#010x} from {}",
            dump.len(),
            base,
            path.display()
        );
        Ok(image)
    }

    /// Write bytes without a pid check.
    pub fn poke(&self, address: u32, bytes: &[u8]) -> Result<()> {
        if let Some(last) = bytes.len().checked_sub(1) {
            u32::try_from(last)
                .ok()
                .and_then(|last| address.checked_add(last))
                .context("Write runs past the end of the address space")?;
        }

        let mut memory = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        for (addr, byte) in (address..=u32::MAX).zip(bytes) {
            memory.insert(addr, *byte);
        }
        Ok(())
    }

    /// Read bytes without a pid check.
    #[must_use]
    pub fn peek(&self, address: u32, size: u32) -> Vec<u8> {
        let memory = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        (0..size)
            .map(|offset| {
                address
                    .checked_add(offset)
                    .and_then(|addr| memory.get(&addr).copied())
                    .unwrap_or(0)
            })
            .collect()
    }

    fn check_pid(&self, pid: u32) -> Result<()> {
        if pid != self.pid {
            bail!("process {pid} is not attached (attached: {})", self.pid);
        }
        Ok(())
    }
}

impl GameApi for MemoryImage {
    fn current_pid(&self) -> u32 {
        self.pid
    }

    fn read_memory(&self, pid: u32, address: u32, size: u32) -> Result<Vec<u8>> {
        self.check_pid(pid)?;
        Ok(self.peek(address, size))
    }

    fn write_memory(&self, pid: u32, address: u32, bytes: &[u8]) -> Result<()> {
        self.check_pid(pid)?;
        self.poke(address, bytes)
    }
}
