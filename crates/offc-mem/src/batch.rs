use thiserror::Error;

use crate::folio::Folio;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BatchError {
    #[error("source and destination lists differ in length ({src} vs {dst})")]
    LengthMismatch { src: usize, dst: usize },

    #[error("folio size mismatch: source {src} bytes, destination {dst} bytes")]
    SizeMismatch { src: usize, dst: usize },

    #[error("zero-sized transfer unit")]
    Empty,
}

/// One unit to move: `src` is copied into `dst`, which has the same size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferPair {
    src: Folio,
    dst: Folio,
}

impl TransferPair {
    pub fn new(src: Folio, dst: Folio) -> Result<Self, BatchError> {
        if src.size() != dst.size() {
            return Err(BatchError::SizeMismatch {
                src: src.size(),
                dst: dst.size(),
            });
        }
        if src.size() == 0 {
            return Err(BatchError::Empty);
        }
        Ok(Self { src, dst })
    }

    pub fn src(&self) -> &Folio {
        &self.src
    }

    pub fn dst(&self) -> &Folio {
        &self.dst
    }

    /// Bytes to transfer.
    pub fn len(&self) -> usize {
        self.src.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered list of transfer pairs handed to a backend in one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    pairs: Vec<TransferPair>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pair two equally long folio lists in order.
    pub fn from_lists(dst: Vec<Folio>, src: Vec<Folio>) -> Result<Self, BatchError> {
        if dst.len() != src.len() {
            return Err(BatchError::LengthMismatch {
                src: src.len(),
                dst: dst.len(),
            });
        }
        src.into_iter()
            .zip(dst)
            .map(|(src, dst)| TransferPair::new(src, dst))
            .collect()
    }

    pub fn push(&mut self, pair: TransferPair) {
        self.pairs.push(pair);
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn pairs(&self) -> &[TransferPair] {
        &self.pairs
    }

    pub fn iter(&self) -> core::slice::Iter<'_, TransferPair> {
        self.pairs.iter()
    }

    pub fn total_bytes(&self) -> usize {
        self.pairs.iter().map(TransferPair::len).sum()
    }

    /// New batch holding the pairs at `indices`, in the order given.
    ///
    /// Panics if an index is out of bounds.
    pub fn subset(&self, indices: &[usize]) -> Batch {
        Batch {
            pairs: indices.iter().map(|&idx| self.pairs[idx]).collect(),
        }
    }
}

impl From<Vec<TransferPair>> for Batch {
    fn from(pairs: Vec<TransferPair>) -> Self {
        Self { pairs }
    }
}

impl FromIterator<TransferPair> for Batch {
    fn from_iter<I: IntoIterator<Item = TransferPair>>(iter: I) -> Self {
        Self {
            pairs: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a TransferPair;
    type IntoIter = core::slice::Iter<'a, TransferPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.pairs.iter()
    }
}
