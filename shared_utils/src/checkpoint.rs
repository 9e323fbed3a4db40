//! Atomic write & delete protection
//!
//! - Atomic write: readers see either the old file or the complete new one
//! - Atomic delete: verify output integrity before deleting original
//!
//! # Usage
//! ```no_run
//! use shared_utils::checkpoint::{atomic_write, safe_delete_original};
//! use std::path::Path;
//!
//! fn main() -> std::io::Result<()> {
//!     let input = Path::new("/tmp/test/photo.png");
//!     let output = Path::new("/tmp/test/photo.jpg");
//!
//!     atomic_write(output, b"...", Some(input))?;
//!     safe_delete_original(input, output, 1)?;
//!     Ok(())
//! }
//! ```

use crate::batch::IN_FLIGHT_MARKER;
use crate::common_utils::parent_dir;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;

// ============================================================================
// Atomic Write
// ============================================================================

/// Write `bytes` to `target` through a temp file in the same directory, then
/// rename it into place.
///
/// The temp file name carries [`IN_FLIGHT_MARKER`] so discovery and the
/// directory watcher skip it. When `permissions_from` is given its mode is
/// copied onto the new file (temp files are created owner-only).
pub fn atomic_write(target: &Path, bytes: &[u8], permissions_from: Option<&Path>) -> io::Result<()> {
    let dir = parent_dir(target);
    let mut tmp = tempfile::Builder::new()
        .prefix(IN_FLIGHT_MARKER)
        .tempfile_in(dir)?;

    tmp.write_all(bytes)?;

    if let Some(source) = permissions_from {
        if let Ok(meta) = fs::metadata(source) {
            tmp.as_file().set_permissions(meta.permissions())?;
        }
    }

    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;

    tracing::debug!(path = %target.display(), bytes = bytes.len(), "Atomically replaced file");
    Ok(())
}

// ============================================================================
// Atomic Delete Protection
// ============================================================================

/// Verify output file integrity before deleting original
pub fn verify_output_integrity(output: &Path, min_size: u64) -> Result<(), String> {
    if !output.exists() {
        return Err("Output file does not exist".to_string());
    }

    let metadata =
        fs::metadata(output).map_err(|e| format!("Cannot read output metadata: {}", e))?;

    if metadata.len() == 0 {
        return Err("Output file is empty (0 bytes)".to_string());
    }

    if metadata.len() < min_size {
        return Err(format!(
            "Output file too small: {} < {} bytes",
            metadata.len(),
            min_size
        ));
    }

    let mut file = File::open(output).map_err(|e| format!("Cannot open output file: {}", e))?;
    let mut buffer = [0u8; 16];
    let n = file
        .read(&mut buffer)
        .map_err(|e| format!("Cannot read output file: {}", e))?;
    if n == 0 {
        return Err("Output file is unreadable (no data)".to_string());
    }

    Ok(())
}

/// Safe delete original file with integrity check
/// Only deletes if output passes integrity verification
pub fn safe_delete_original(input: &Path, output: &Path, min_output_size: u64) -> io::Result<()> {
    if let Err(reason) = verify_output_integrity(output, min_output_size) {
        tracing::warn!(
            original = %input.display(),
            output = %output.display(),
            reason = %reason,
            "Output integrity check failed, original kept"
        );
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Output integrity check failed: {}", reason),
        ));
    }

    fs::remove_file(input)?;
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
