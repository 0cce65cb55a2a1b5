//! CLI command implementations.

pub mod dump_log;
pub mod pending;
pub mod simulate;

use std::path::Path;
use twophase_log::{MemoryBackend, TransactionLog};

/// Loads a read-only copy of a coordinator log.
///
/// The file itself is neither locked nor truncated, so this works on the
/// log of a running coordinator.
pub fn load_log(path: &Path) -> Result<TransactionLog, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("log file not found: {}", path.display()).into());
    }
    let bytes = std::fs::read(path)?;
    Ok(TransactionLog::with_backend(
        Box::new(MemoryBackend::with_data(bytes)),
        false,
    )?)
}
