use super::{IncompatibleDimensionalityError, RegularHyperslab, SelectionError};

/// A [`RegularHyperslab`] builder.
///
/// The builder is initialised with a dimensionality and defaults to a single element at the origin:
///  - `start` is zero,
///  - `stride`, `count` and `block` are one.
///
/// A `stride` left unset follows `block`, so setting only `start`, `count` and `block` selects contiguous blocks.
///
/// For example:
///
/// ```rust
/// # use h5chunk::selection::HyperslabBuilder;
/// // Every third element of the first six
/// let hyperslab = HyperslabBuilder::new(1)
///     .with_stride(vec![3])
///     .with_count(vec![2])
///     .build()?;
/// assert_eq!(hyperslab.num_elements(), 2);
/// # Ok::<(), h5chunk::selection::SelectionError>(())
/// ```
#[derive(Clone, Debug)]
pub struct HyperslabBuilder {
    /// The first element of each dimension.
    pub start: Vec<u64>,
    /// The distance between blocks of each dimension, or [`None`] to follow the block size.
    pub stride: Option<Vec<u64>>,
    /// The block count of each dimension.
    pub count: Vec<u64>,
    /// The block size of each dimension.
    pub block: Vec<u64>,
}

impl HyperslabBuilder {
    /// Create a new hyperslab builder with dimensionality `dimensionality`.
    #[must_use]
    pub fn new(dimensionality: usize) -> Self {
        Self {
            start: vec![0; dimensionality],
            stride: None,
            count: vec![1; dimensionality],
            block: vec![1; dimensionality],
        }
    }

    /// Set the start.
    pub fn with_start(&mut self, start: Vec<u64>) -> &mut Self {
        self.start = start;
        self
    }

    /// Set the stride.
    pub fn with_stride(&mut self, stride: Vec<u64>) -> &mut Self {
        self.stride = Some(stride);
        self
    }

    /// Set the count.
    pub fn with_count(&mut self, count: Vec<u64>) -> &mut Self {
        self.count = count;
        self
    }

    /// Set the block.
    pub fn with_block(&mut self, block: Vec<u64>) -> &mut Self {
        self.block = block;
        self
    }

    /// Build into a [`RegularHyperslab`].
    ///
    /// # Errors
    /// Returns a [`SelectionError`] if the lengths of the parameters differ or a stride is zero or less than its block.
    pub fn build(&self) -> Result<RegularHyperslab, SelectionError> {
        let rank = self.start.len();
        if self.block.len() != rank {
            return Err(IncompatibleDimensionalityError::new(self.block.len(), rank).into());
        }
        let stride = self
            .stride
            .clone()
            .unwrap_or_else(|| self.block.iter().map(|&block| block.max(1)).collect());
        RegularHyperslab::new(
            self.start.clone(),
            stride,
            self.count.clone(),
            self.block.clone(),
        )
    }
}
