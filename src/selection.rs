//! Selections.
//!
//! A [`Selection`] describes which elements of a dataset are transferred by a read.
//! Walking a selection over an extent produces a lazy sequence of [`Step`]s: maximal runs of elements that are contiguous in the fastest (last) dimension.
//!
//! Variants:
//!  - [`Selection::All`]: every element of the extent.
//!  - [`Selection::RegularHyperslab`]: a [`RegularHyperslab`] (start/stride/count/block per dimension), also created with a [`HyperslabBuilder`].
//!  - [`Selection::IrregularHyperslab`]: an explicit list of [`HyperslabBlock`]s.
//!  - [`Selection::Points`]: an explicit list of element coordinates.
//!
//! [`ChunkSteps`] partitions a step sequence across the chunk lattice of a chunked dataset.

mod chunk_steps;
mod hyperslab_builder;
mod selection_walker;

pub use chunk_steps::{ChunkStep, ChunkSteps};
pub use hyperslab_builder::HyperslabBuilder;
pub use selection_walker::SelectionWalker;

use derive_more::{Display, From};
use itertools::izip;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The coordinates of an element or chunk.
pub type Coordinates = Vec<u64>;

/// A dataset extent (the size of each dimension).
pub type Extent = Vec<u64>;

/// A run of `run_length` elements contiguous in the last dimension, starting at `coordinates`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Step {
    coordinates: Coordinates,
    run_length: u64,
}

impl Step {
    /// Create a new step.
    #[must_use]
    pub fn new(coordinates: Coordinates, run_length: u64) -> Self {
        Self {
            coordinates,
            run_length,
        }
    }

    /// Return the coordinates of the first element of the step.
    #[must_use]
    pub fn coordinates(&self) -> &[u64] {
        &self.coordinates
    }

    /// Return the number of elements in the step.
    #[must_use]
    pub const fn run_length(&self) -> u64 {
        self.run_length
    }

    /// Consume the step and return its coordinates and run length.
    #[must_use]
    pub fn into_parts(self) -> (Coordinates, u64) {
        (self.coordinates, self.run_length)
    }
}

/// A regular hyperslab.
///
/// Per dimension, `count` blocks of `block` elements are selected, the first starting at `start` and each subsequent block `stride` elements after the previous.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[display("start {start:?} stride {stride:?} count {count:?} block {block:?}")]
#[serde(try_from = "RegularHyperslabSerde", into = "RegularHyperslabSerde")]
pub struct RegularHyperslab {
    start: Coordinates,
    stride: Vec<u64>,
    count: Vec<u64>,
    block: Vec<u64>,
}

#[derive(Serialize, Deserialize)]
struct RegularHyperslabSerde {
    start: Coordinates,
    stride: Vec<u64>,
    count: Vec<u64>,
    block: Vec<u64>,
}

impl TryFrom<RegularHyperslabSerde> for RegularHyperslab {
    type Error = SelectionError;

    fn try_from(value: RegularHyperslabSerde) -> Result<Self, Self::Error> {
        Self::new(value.start, value.stride, value.count, value.block)
    }
}

impl From<RegularHyperslab> for RegularHyperslabSerde {
    fn from(value: RegularHyperslab) -> Self {
        Self {
            start: value.start,
            stride: value.stride,
            count: value.count,
            block: value.block,
        }
    }
}

impl RegularHyperslab {
    /// Create a new regular hyperslab.
    ///
    /// # Errors
    /// Returns a [`SelectionError`] if
    ///  - the lengths of `start`, `stride`, `count` and `block` differ, or
    ///  - any `stride` is zero or less than its `block`.
    pub fn new(
        start: Coordinates,
        stride: Vec<u64>,
        count: Vec<u64>,
        block: Vec<u64>,
    ) -> Result<Self, SelectionError> {
        let rank = start.len();
        for len in [stride.len(), count.len(), block.len()] {
            if len != rank {
                return Err(IncompatibleDimensionalityError::new(len, rank).into());
            }
        }
        for (&stride, &block) in std::iter::zip(&stride, &block) {
            if stride == 0 || stride < block {
                return Err(SelectionError::InvalidSelection(format!(
                    "stride {stride} must be non-zero and not less than block {block}"
                )));
            }
        }
        Ok(Self {
            start,
            stride,
            count,
            block,
        })
    }

    /// Create a new one-dimensional hyperslab of `block` contiguous elements starting at `start`.
    #[must_use]
    pub fn new_1d(start: u64, block: u64) -> Self {
        Self {
            start: vec![start],
            stride: vec![block.max(1)],
            count: vec![1],
            block: vec![block],
        }
    }

    /// Create a new hyperslab of one contiguous block per dimension, with `start` and `shape`.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the lengths of `start` and `shape` differ.
    pub fn new_with_start_shape(
        start: Coordinates,
        shape: Vec<u64>,
    ) -> Result<Self, IncompatibleDimensionalityError> {
        if start.len() != shape.len() {
            return Err(IncompatibleDimensionalityError::new(shape.len(), start.len()));
        }
        Ok(Self {
            stride: shape.iter().map(|&block| block.max(1)).collect(),
            count: vec![1; start.len()],
            block: shape,
            start,
        })
    }

    /// Return the dimensionality of the hyperslab.
    #[must_use]
    pub fn dimensionality(&self) -> usize {
        self.start.len()
    }

    /// Return the start of each dimension.
    #[must_use]
    pub fn start(&self) -> &[u64] {
        &self.start
    }

    /// Return the stride of each dimension.
    #[must_use]
    pub fn stride(&self) -> &[u64] {
        &self.stride
    }

    /// Return the block count of each dimension.
    #[must_use]
    pub fn count(&self) -> &[u64] {
        &self.count
    }

    /// Return the block size of each dimension.
    #[must_use]
    pub fn block(&self) -> &[u64] {
        &self.block
    }

    /// Return the number of selected elements, `count * block` multiplied over all dimensions.
    ///
    /// Saturates at [`u64::MAX`].
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        if self.count.contains(&0) || self.block.contains(&0) {
            return 0;
        }
        std::iter::zip(&self.count, &self.block)
            .map(|(count, block)| count.saturating_mul(*block))
            .fold(1, u64::saturating_mul)
    }

    /// Return the exclusive end of the selection in each dimension, or [`None`] if the selection is empty or its end is not representable.
    #[must_use]
    pub fn end_exc(&self) -> Option<Vec<u64>> {
        if self.num_elements() == 0 {
            return None;
        }
        izip!(&self.start, &self.stride, &self.count, &self.block)
            .map(|(start, stride, count, block)| {
                (count - 1)
                    .checked_mul(*stride)
                    .and_then(|offset| offset.checked_add(*start))
                    .and_then(|offset| offset.checked_add(*block))
            })
            .collect()
    }

    /// Returns true if the selection lies within `extent`.
    ///
    /// A selection whose end overflows [`u64`] is never within `extent`.
    #[must_use]
    pub fn inbounds(&self, extent: &[u64]) -> bool {
        if extent.len() != self.dimensionality() {
            return false;
        }
        if self.num_elements() == 0 {
            return true;
        }
        self.end_exc().map_or(false, |end| {
            std::iter::zip(end, extent).all(|(end, extent)| end <= *extent)
        })
    }
}

/// A block of an irregular hyperslab, from `start` to `end` (inclusive).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HyperslabBlock {
    /// The first coordinate of the block.
    pub start: Coordinates,
    /// The last coordinate of the block (inclusive).
    pub end: Coordinates,
}

impl HyperslabBlock {
    /// Return the number of elements in the block, zero if the block is inverted in any dimension.
    ///
    /// Saturates at [`u64::MAX`].
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        let shape: Vec<u64> = std::iter::zip(&self.start, &self.end)
            .map(|(start, end)| {
                if end < start {
                    0
                } else {
                    (end - start).saturating_add(1)
                }
            })
            .collect();
        if shape.contains(&0) {
            0
        } else {
            shape.into_iter().fold(1, u64::saturating_mul)
        }
    }
}

/// An irregular hyperslab: an explicit list of blocks, walked in list order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IrregularHyperslabSerde", into = "IrregularHyperslabSerde")]
pub struct IrregularHyperslab {
    blocks: Vec<HyperslabBlock>,
}

#[derive(Serialize, Deserialize)]
struct IrregularHyperslabSerde {
    blocks: Vec<HyperslabBlock>,
}

impl TryFrom<IrregularHyperslabSerde> for IrregularHyperslab {
    type Error = SelectionError;

    fn try_from(value: IrregularHyperslabSerde) -> Result<Self, Self::Error> {
        Self::new(value.blocks)
    }
}

impl From<IrregularHyperslab> for IrregularHyperslabSerde {
    fn from(value: IrregularHyperslab) -> Self {
        Self {
            blocks: value.blocks,
        }
    }
}

impl IrregularHyperslab {
    /// Create a new irregular hyperslab.
    ///
    /// # Errors
    /// Returns a [`SelectionError`] if the blocks have inconsistent dimensionality or a block ends before it starts.
    pub fn new(blocks: Vec<HyperslabBlock>) -> Result<Self, SelectionError> {
        let rank = blocks.first().map_or(0, |block| block.start.len());
        for block in &blocks {
            for len in [block.start.len(), block.end.len()] {
                if len != rank {
                    return Err(IncompatibleDimensionalityError::new(len, rank).into());
                }
            }
            if std::iter::zip(&block.start, &block.end).any(|(start, end)| end < start) {
                return Err(SelectionError::InvalidSelection(format!(
                    "hyperslab block {:?}..={:?} ends before it starts",
                    block.start, block.end
                )));
            }
        }
        Ok(Self { blocks })
    }

    /// Return the blocks.
    #[must_use]
    pub fn blocks(&self) -> &[HyperslabBlock] {
        &self.blocks
    }

    /// Return the number of selected elements.
    ///
    /// Saturates at [`u64::MAX`].
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.blocks
            .iter()
            .map(HyperslabBlock::num_elements)
            .fold(0, u64::saturating_add)
    }
}

/// A point selection: an explicit list of element coordinates, walked in list order.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PointSelectionSerde", into = "PointSelectionSerde")]
pub struct PointSelection {
    points: Vec<Coordinates>,
}

#[derive(Serialize, Deserialize)]
struct PointSelectionSerde {
    points: Vec<Coordinates>,
}

impl TryFrom<PointSelectionSerde> for PointSelection {
    type Error = IncompatibleDimensionalityError;

    fn try_from(value: PointSelectionSerde) -> Result<Self, Self::Error> {
        Self::new(value.points)
    }
}

impl From<PointSelection> for PointSelectionSerde {
    fn from(value: PointSelection) -> Self {
        Self {
            points: value.points,
        }
    }
}

impl PointSelection {
    /// Create a new point selection.
    ///
    /// # Errors
    /// Returns [`IncompatibleDimensionalityError`] if the points do not all have the same dimensionality.
    pub fn new(points: Vec<Coordinates>) -> Result<Self, IncompatibleDimensionalityError> {
        let rank = points.first().map_or(0, Vec::len);
        if let Some(point) = points.iter().find(|point| point.len() != rank) {
            return Err(IncompatibleDimensionalityError::new(point.len(), rank));
        }
        Ok(Self { points })
    }

    /// Return the points.
    #[must_use]
    pub fn points(&self) -> &[Coordinates] {
        &self.points
    }

    /// Return the number of selected elements.
    #[must_use]
    pub fn num_elements(&self) -> u64 {
        self.points.len() as u64
    }
}

/// A selection.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default, From)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Selection {
    /// Every element of the extent.
    #[default]
    All,
    /// A regular hyperslab.
    RegularHyperslab(RegularHyperslab),
    /// An irregular hyperslab.
    IrregularHyperslab(IrregularHyperslab),
    /// A point selection.
    Points(PointSelection),
}

impl Selection {
    /// Return the number of elements selected within `extent`.
    ///
    /// Saturates at [`u64::MAX`].
    #[must_use]
    pub fn num_elements(&self, extent: &[u64]) -> u64 {
        match self {
            Self::All => {
                if extent.contains(&0) {
                    0
                } else {
                    extent.iter().copied().fold(1, u64::saturating_mul)
                }
            }
            Self::RegularHyperslab(hyperslab) => hyperslab.num_elements(),
            Self::IrregularHyperslab(hyperslab) => hyperslab.num_elements(),
            Self::Points(points) => points.num_elements(),
        }
    }

    /// Walk the selection over `extent`.
    ///
    /// The returned walker is lazy and owns all of its state, so walking a selection again yields an identical sequence.
    ///
    /// # Errors
    /// Returns a [`SelectionError`] if the selection is incompatible with the dimensionality of `extent` or exceeds it.
    pub fn walk(&self, extent: &[u64]) -> Result<SelectionWalker, SelectionError> {
        SelectionWalker::new(self, extent)
    }
}

/// An incompatible dimensionality error.
#[derive(Copy, Clone, Debug, Error)]
#[error("incompatible dimensionality {0}, expected {1}")]
pub struct IncompatibleDimensionalityError(usize, usize);

impl IncompatibleDimensionalityError {
    /// Create a new incompatible dimensionality error.
    #[must_use]
    pub const fn new(got: usize, expected: usize) -> Self {
        Self(got, expected)
    }
}

/// A selection error.
#[derive(Clone, Debug, Error)]
pub enum SelectionError {
    /// The selection exceeds the extent.
    #[error("selection {_0} is out of bounds of extent {_1:?}")]
    OutOfBounds(String, Extent),
    /// The selection is malformed.
    #[error("invalid selection: {_0}")]
    InvalidSelection(String),
    /// The selection dimensionality does not match.
    #[error(transparent)]
    IncompatibleDimensionality(#[from] IncompatibleDimensionalityError),
}
