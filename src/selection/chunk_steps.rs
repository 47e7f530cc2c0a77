use std::iter::FusedIterator;

use super::{Coordinates, Step};

/// The part of a [`Step`] that falls within one chunk.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChunkStep {
    chunk_indices: Coordinates,
    chunk_offset: u64,
    length: u64,
}

impl ChunkStep {
    /// Return the chunk grid indices (the scaled chunk coordinate).
    #[must_use]
    pub fn chunk_indices(&self) -> &[u64] {
        &self.chunk_indices
    }

    /// Return the offset of the first element of the run within the chunk, in elements.
    #[must_use]
    pub const fn chunk_offset(&self) -> u64 {
        self.chunk_offset
    }

    /// Return the number of elements in the run.
    #[must_use]
    pub const fn length(&self) -> u64 {
        self.length
    }
}

/// Partitions a sequence of [`Step`]s across a regular chunk grid.
///
/// A step spanning several chunks in the last dimension is split into one [`ChunkStep`] per chunk, in order.
/// Chunks are addressed with the full chunk shape, including chunks overhanging the extent.
#[derive(Clone, Debug)]
pub struct ChunkSteps<I> {
    steps: I,
    chunk_shape: Vec<u64>,
    /// The row-major element strides of a chunk.
    chunk_strides: Vec<u64>,
    current: Option<Step>,
}

impl<I: Iterator<Item = Step>> ChunkSteps<I> {
    /// Create a new chunk step iterator over `steps` with `chunk_shape`.
    ///
    /// Every element of `chunk_shape` must be non-zero.
    pub fn new(steps: I, chunk_shape: &[u64]) -> Self {
        let mut chunk_strides = vec![1; chunk_shape.len()];
        for dim in (0..chunk_shape.len().saturating_sub(1)).rev() {
            chunk_strides[dim] = chunk_strides[dim + 1] * chunk_shape[dim + 1];
        }
        Self {
            steps,
            chunk_shape: chunk_shape.to_vec(),
            chunk_strides,
            current: None,
        }
    }
}

impl<I: Iterator<Item = Step>> Iterator for ChunkSteps<I> {
    type Item = ChunkStep;

    fn next(&mut self) -> Option<ChunkStep> {
        let step = match self.current.take() {
            Some(step) => step,
            None => loop {
                let step = self.steps.next()?;
                if step.run_length() > 0 {
                    break step;
                }
            },
        };
        let (mut coordinates, run_length) = step.into_parts();

        let mut chunk_indices = Vec::with_capacity(coordinates.len());
        let mut chunk_offset = 0;
        for ((coordinate, chunk_size), stride) in coordinates
            .iter()
            .zip(&self.chunk_shape)
            .zip(&self.chunk_strides)
        {
            chunk_indices.push(coordinate / chunk_size);
            chunk_offset += (coordinate % chunk_size) * stride;
        }

        let length = match (coordinates.last_mut(), self.chunk_shape.last()) {
            (Some(last), Some(chunk_size)) => {
                let length = (chunk_size - *last % chunk_size).min(run_length);
                *last += length;
                length
            }
            _ => run_length,
        };
        if length < run_length {
            self.current = Some(Step::new(coordinates, run_length - length));
        }

        Some(ChunkStep {
            chunk_indices,
            chunk_offset,
            length,
        })
    }
}

impl<I: FusedIterator<Item = Step>> FusedIterator for ChunkSteps<I> {}
