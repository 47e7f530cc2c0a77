use std::iter::FusedIterator;

use itertools::izip;

use super::{
    Coordinates, HyperslabBlock, IncompatibleDimensionalityError, RegularHyperslab, Selection,
    SelectionError, Step,
};

/// Walks the rows of one regular hyperslab.
#[derive(Clone, Debug)]
struct HyperslabWalker {
    start: Coordinates,
    stride: Vec<u64>,
    block: Vec<u64>,
    stop: Vec<u64>,
    cursor: Coordinates,
    /// Blocks in the last dimension are separated by a gap, so each block is its own run.
    gapped: bool,
    run_length: u64,
    remaining: usize,
}

impl HyperslabWalker {
    /// The hyperslab must be non-empty, within bounds and have a dimensionality of at least one.
    fn new(hyperslab: &RegularHyperslab) -> Self {
        let stop: Vec<u64> = izip!(
            hyperslab.start(),
            hyperslab.stride(),
            hyperslab.count(),
            hyperslab.block()
        )
        .map(|(start, stride, count, block)| start + (count - 1) * stride + block)
        .collect();

        let last = hyperslab.dimensionality() - 1;
        let gapped = hyperslab.stride()[last] != hyperslab.block()[last];
        let run_length = if gapped {
            hyperslab.block()[last]
        } else {
            stop[last] - hyperslab.start()[last]
        };

        let rows: u64 = std::iter::zip(&hyperslab.count()[..last], &hyperslab.block()[..last])
            .map(|(count, block)| count * block)
            .fold(1, u64::saturating_mul);
        let steps = if gapped {
            rows.saturating_mul(hyperslab.count()[last])
        } else {
            rows
        };

        Self {
            start: hyperslab.start().to_vec(),
            stride: hyperslab.stride().to_vec(),
            block: hyperslab.block().to_vec(),
            stop,
            cursor: hyperslab.start().to_vec(),
            gapped,
            run_length,
            remaining: usize::try_from(steps).unwrap_or(usize::MAX),
        }
    }

    /// Move the cursor to the start of the next run.
    fn advance(&mut self) {
        let last = self.cursor.len() - 1;

        if self.gapped {
            self.cursor[last] = self.cursor[last].saturating_add(self.stride[last]);
            if self.cursor[last] < self.stop[last] {
                return;
            }
        }
        self.cursor[last] = self.start[last];

        // Carry into slower dimensions, skipping the gap after each block
        for dim in (0..last).rev() {
            self.cursor[dim] += 1;
            if (self.cursor[dim] - self.start[dim]) % self.stride[dim] == self.block[dim] {
                self.cursor[dim] = self.cursor[dim].saturating_add(self.stride[dim] - self.block[dim]);
            }
            if self.cursor[dim] < self.stop[dim] {
                return;
            }
            self.cursor[dim] = self.start[dim];
        }
    }
}

impl Iterator for HyperslabWalker {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        if self.remaining == 0 {
            return None;
        }
        let step = Step::new(self.cursor.clone(), self.run_length);
        self.remaining -= 1;
        if self.remaining > 0 {
            self.advance();
        }
        Some(step)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

#[derive(Clone, Debug)]
enum SelectionWalkerInner {
    Empty,
    /// The single element of a dataset with no dimensions.
    Scalar(bool),
    Hyperslab(HyperslabWalker),
    Blocks {
        blocks: std::vec::IntoIter<HyperslabBlock>,
        current: Option<HyperslabWalker>,
        remaining: usize,
    },
    Points(std::vec::IntoIter<Coordinates>),
}

/// A lazy iterator over the [`Step`]s of a [`Selection`] within an extent.
///
/// Steps cover every selected element exactly once:
///  - hyperslabs are walked in dimension-major order (last dimension fastest), with consecutive blocks of the last dimension coalesced into one step when there is no gap between them,
///  - irregular hyperslab blocks are walked in list order, one step per row of each block,
///  - points are walked in list order, one step of length one per point.
#[derive(Clone, Debug)]
pub struct SelectionWalker {
    inner: SelectionWalkerInner,
}

impl SelectionWalker {
    /// Create a new selection walker for `selection` within `extent`.
    ///
    /// # Errors
    /// Returns a [`SelectionError`] if the selection is incompatible with the dimensionality of `extent` or exceeds it.
    pub fn new(selection: &Selection, extent: &[u64]) -> Result<Self, SelectionError> {
        let inner = match selection {
            Selection::All => {
                if extent.is_empty() {
                    SelectionWalkerInner::Scalar(true)
                } else if extent.contains(&0) {
                    SelectionWalkerInner::Empty
                } else {
                    let hyperslab = RegularHyperslab::new_with_start_shape(
                        vec![0; extent.len()],
                        extent.to_vec(),
                    )?;
                    SelectionWalkerInner::Hyperslab(HyperslabWalker::new(&hyperslab))
                }
            }
            Selection::RegularHyperslab(hyperslab) => {
                if hyperslab.dimensionality() != extent.len() {
                    return Err(IncompatibleDimensionalityError::new(
                        hyperslab.dimensionality(),
                        extent.len(),
                    )
                    .into());
                }
                if !hyperslab.inbounds(extent) {
                    return Err(SelectionError::OutOfBounds(
                        hyperslab.to_string(),
                        extent.to_vec(),
                    ));
                }
                if extent.is_empty() {
                    SelectionWalkerInner::Scalar(true)
                } else if hyperslab.num_elements() == 0 {
                    SelectionWalkerInner::Empty
                } else {
                    SelectionWalkerInner::Hyperslab(HyperslabWalker::new(hyperslab))
                }
            }
            Selection::IrregularHyperslab(hyperslab) => {
                let mut rows: u64 = 0;
                for block in hyperslab.blocks() {
                    if block.start.len() != extent.len() {
                        return Err(IncompatibleDimensionalityError::new(
                            block.start.len(),
                            extent.len(),
                        )
                        .into());
                    }
                    if std::iter::zip(&block.end, extent).any(|(end, extent)| end >= extent) {
                        return Err(SelectionError::OutOfBounds(
                            format!("block {:?}..={:?}", block.start, block.end),
                            extent.to_vec(),
                        ));
                    }
                    rows = rows.saturating_add(block_rows(block));
                }
                if extent.is_empty() {
                    SelectionWalkerInner::Scalar(!hyperslab.blocks().is_empty())
                } else {
                    SelectionWalkerInner::Blocks {
                        blocks: hyperslab.blocks().to_vec().into_iter(),
                        current: None,
                        remaining: usize::try_from(rows).unwrap_or(usize::MAX),
                    }
                }
            }
            Selection::Points(points) => {
                for point in points.points() {
                    if point.len() != extent.len() {
                        return Err(
                            IncompatibleDimensionalityError::new(point.len(), extent.len()).into(),
                        );
                    }
                    if std::iter::zip(point, extent).any(|(coordinate, extent)| coordinate >= extent) {
                        return Err(SelectionError::OutOfBounds(
                            format!("point {point:?}"),
                            extent.to_vec(),
                        ));
                    }
                }
                SelectionWalkerInner::Points(points.points().to_vec().into_iter())
            }
        };
        Ok(Self { inner })
    }
}

/// The number of rows (steps) of a block, every dimension but the last multiplied.
fn block_rows(block: &HyperslabBlock) -> u64 {
    let rank = block.start.len();
    if rank == 0 || block.num_elements() == 0 {
        return 0;
    }
    std::iter::zip(&block.start[..rank - 1], &block.end[..rank - 1])
        .map(|(start, end)| end - start + 1)
        .fold(1, u64::saturating_mul)
}

fn block_hyperslab(block: &HyperslabBlock) -> RegularHyperslab {
    let shape = std::iter::zip(&block.start, &block.end)
        .map(|(start, end)| end - start + 1)
        .collect();
    // Dimensionality is validated by the walker
    RegularHyperslab::new_with_start_shape(block.start.clone(), shape)
        .unwrap_or_else(|_| RegularHyperslab::new_1d(0, 0))
}

impl Iterator for SelectionWalker {
    type Item = Step;

    fn next(&mut self) -> Option<Step> {
        match &mut self.inner {
            SelectionWalkerInner::Empty => None,
            SelectionWalkerInner::Scalar(pending) => {
                if *pending {
                    *pending = false;
                    Some(Step::new(vec![], 1))
                } else {
                    None
                }
            }
            SelectionWalkerInner::Hyperslab(walker) => walker.next(),
            SelectionWalkerInner::Blocks {
                blocks,
                current,
                remaining,
            } => loop {
                if let Some(step) = current.as_mut().and_then(Iterator::next) {
                    *remaining = remaining.saturating_sub(1);
                    return Some(step);
                }
                let block = blocks.next()?;
                *current = Some(HyperslabWalker::new(&block_hyperslab(&block)));
            },
            SelectionWalkerInner::Points(points) => points.next().map(|point| Step::new(point, 1)),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = match &self.inner {
            SelectionWalkerInner::Empty => 0,
            SelectionWalkerInner::Scalar(pending) => usize::from(*pending),
            SelectionWalkerInner::Hyperslab(walker) => walker.remaining,
            SelectionWalkerInner::Blocks { remaining, .. } => *remaining,
            SelectionWalkerInner::Points(points) => points.len(),
        };
        (len, Some(len))
    }
}

impl ExactSizeIterator for SelectionWalker {}

impl FusedIterator for SelectionWalker {}
