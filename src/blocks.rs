//! Append-only store of memory blocks held for the lifetime of a run.

use crate::error::{Result, StressError};

/// One heap block filled with a fixed word pattern.
#[derive(Debug)]
pub struct Block {
    words: Box<[u32]>,
}

impl Block {
    /// Allocates `bytes` (rounded down to whole words) and fills every word
    /// with `pattern`. Allocation failure is returned instead of aborting.
    pub fn filled(bytes: usize, pattern: u32) -> Result<Self> {
        let len = bytes / std::mem::size_of::<u32>();
        let mut words = Vec::new();
        words
            .try_reserve_exact(len)
            .map_err(|source| StressError::Allocation { bytes, source })?;
        words.resize(len, pattern);
        Ok(Self {
            words: words.into_boxed_slice(),
        })
    }

    pub fn len_bytes(&self) -> usize {
        self.words.len() * std::mem::size_of::<u32>()
    }

    #[cfg(test)]
    fn words(&self) -> &[u32] {
        &self.words
    }
}

/// Owns every block pushed into it until dropped. There is no removal.
#[derive(Debug, Default)]
pub struct RetainedBlocks {
    blocks: Vec<Block>,
    bytes: usize,
}

impl RetainedBlocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: Block) {
        self.bytes += block.len_bytes();
        self.blocks.push(block);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn retained_bytes(&self) -> usize {
        self.bytes
    }
}
