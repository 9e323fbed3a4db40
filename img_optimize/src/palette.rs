//! Bounded, append-only color table used when rebuilding palettes.

use std::collections::HashMap;
use thiserror::Error;

/// Largest palette an indexed PNG can carry.
pub const MAX_PALETTE_SIZE: usize = 256;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaletteError {
    #[error("Palette is full (256 colors), cannot add {0:?}")]
    Full([u8; 3]),
}

/// Maps RGB triples to stable indices. Indices are handed out in insertion
/// order and never change once assigned.
#[derive(Debug, Clone, Default)]
pub struct Palette {
    lookup: HashMap<[u8; 3], u8>,
    colors: Vec<[u8; 3]>,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index for `color`, assigning the next free one if it is new.
    pub fn add(&mut self, color: [u8; 3]) -> Result<u8, PaletteError> {
        if let Some(&index) = self.lookup.get(&color) {
            return Ok(index);
        }
        if self.colors.len() >= MAX_PALETTE_SIZE {
            return Err(PaletteError::Full(color));
        }
        let index = self.colors.len() as u8;
        self.colors.push(color);
        self.lookup.insert(color, index);
        Ok(index)
    }

    pub fn get(&self, color: [u8; 3]) -> Option<u8> {
        self.lookup.get(&color).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    pub fn into_colors(self) -> Vec<[u8; 3]> {
        self.colors
    }
}
