//! Accept or reject a candidate encoding and write it atomically.

use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use shared_utils::checkpoint::{atomic_write, safe_delete_original};

use crate::error::{OptimizeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub replaced: bool,
    /// Size of the file that now represents the image (the original's size
    /// when the candidate was rejected).
    pub final_size: u64,
    pub original_removed: bool,
}

/// Whether `candidate_size` beats `orig_size` by the required margin.
pub fn is_worth_committing(orig_size: u64, candidate_size: u64, min_ratio: f64) -> bool {
    orig_size > 0 && (candidate_size as f64 / orig_size as f64) < min_ratio
}

/// Replace `original` with `candidate`, or write it to `alt_output` instead.
///
/// With `compare` set the candidate must be smaller than
/// `original_size * min_ratio`. `force_delete` removes `original` after a
/// successful write to `alt_output`; failing to delete is logged and does not
/// undo the new file.
pub fn commit(
    original: &Path,
    candidate: &[u8],
    compare: bool,
    force_delete: bool,
    alt_output: Option<&Path>,
    min_ratio: f64,
) -> Result<CommitOutcome> {
    let orig_size = fs::metadata(original)
        .map_err(|e| OptimizeError::fs(original, e))?
        .len();
    let candidate_size = candidate.len() as u64;

    if compare && !is_worth_committing(orig_size, candidate_size, min_ratio) {
        debug!(
            path = %original.display(),
            orig_size,
            candidate_size,
            "Candidate below required saving, keeping original"
        );
        return Ok(CommitOutcome {
            replaced: false,
            final_size: orig_size,
            original_removed: false,
        });
    }

    let target = alt_output.unwrap_or(original);
    atomic_write(target, candidate, Some(original)).map_err(|e| OptimizeError::fs(target, e))?;

    let mut original_removed = false;
    if force_delete && target != original {
        match safe_delete_original(original, target, 1) {
            Ok(()) => {
                info!(original = %original.display(), replacement = %target.display(), "🗑️ Original removed");
                original_removed = true;
            }
            Err(e) => warn!(original = %original.display(), error = %e, "Could not remove original"),
        }
    }

    debug!(path = %target.display(), orig_size, candidate_size, "Candidate committed");
    Ok(CommitOutcome {
        replaced: true,
        final_size: candidate_size,
        original_removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RATIO: f64 = 0.99;

    #[test]
    fn test_margin_is_strict() {
        assert!(is_worth_committing(1000, 989, RATIO));
        assert!(!is_worth_committing(1000, 990, RATIO));
        assert!(!is_worth_committing(1000, 1200, RATIO));
        assert!(!is_worth_committing(0, 0, RATIO));
    }

    #[test]
    fn test_rejected_candidate_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        fs::write(&path, vec![7u8; 1000]).unwrap();

        let outcome = commit(&path, &[1u8; 995], true, false, None, RATIO).unwrap();
        assert!(!outcome.replaced);
        assert_eq!(outcome.final_size, 1000);
        assert_eq!(fs::read(&path).unwrap(), vec![7u8; 1000]);
    }

    #[test]
    fn test_accepted_candidate_replaces_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.png");
        fs::write(&path, vec![7u8; 1000]).unwrap();

        let outcome = commit(&path, &[1u8; 500], true, false, None, RATIO).unwrap();
        assert!(outcome.replaced);
        assert_eq!(outcome.final_size, 500);
        assert_eq!(fs::read(&path).unwrap(), vec![1u8; 500]);
    }

    #[test]
    fn test_no_comparison_accepts_bigger_candidate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.jpg");
        fs::write(&path, vec![7u8; 10]).unwrap();

        let outcome = commit(&path, &[1u8; 20], false, false, None, RATIO).unwrap();
        assert!(outcome.replaced);
        assert_eq!(fs::metadata(&path).unwrap().len(), 20);
    }

    #[test]
    fn test_alt_output_and_force_delete() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("photo.png");
        let alt = dir.path().join("photo.jpg");
        fs::write(&src, vec![7u8; 1000]).unwrap();

        let kept = commit(&src, &[1u8; 100], true, false, Some(alt.as_path()), RATIO).unwrap();
        assert!(kept.replaced && !kept.original_removed);
        assert!(src.exists() && alt.exists());

        let removed = commit(&src, &[2u8; 100], true, true, Some(alt.as_path()), RATIO).unwrap();
        assert!(removed.original_removed);
        assert!(!src.exists());
        assert_eq!(fs::read(&alt).unwrap(), vec![2u8; 100]);
    }

    #[test]
    fn test_missing_original_is_fs_error() {
        let dir = TempDir::new().unwrap();
        let err = commit(&dir.path().join("gone.png"), b"x", true, false, None, RATIO).unwrap_err();
        assert!(matches!(err, OptimizeError::FileSystem { .. }));
    }
}
