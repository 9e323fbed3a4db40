//! Optimizer error types

use std::path::PathBuf;
use thiserror::Error;

use crate::palette::PaletteError;
use crate::pool::PoolFailure;

#[derive(Error, Debug)]
pub enum OptimizeError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Image format not supported: {0}")]
    Unsupported(String),

    #[error("Failed to encode {format}: {reason}")]
    Encode { format: &'static str, reason: String },

    #[error("File system error on {}: {source}", path.display())]
    FileSystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    PaletteFull(#[from] PaletteError),

    #[error("Images are not comparable (size, mode or channel layout differ)")]
    NotComparable,

    #[error("Please specify a valid path to an existing file or folder: {}", .0.display())]
    InvalidPath(PathBuf),

    #[error("No supported image files were found in {}", .0.display())]
    NoImagesFound(PathBuf),

    #[error(transparent)]
    Pool(#[from] PoolFailure),

    #[error("Directory watch failed: {0}")]
    Watch(String),
}

impl OptimizeError {
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileSystem {
            path: path.into(),
            source,
        }
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }

    pub fn encode(format: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Encode {
            format,
            reason: err.to_string(),
        }
    }
}

impl From<image::ImageError> for OptimizeError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => Self::Unsupported(e.to_string()),
            image::ImageError::Encoding(e) => Self::encode("image", e),
            other => Self::Decode(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, OptimizeError>;
