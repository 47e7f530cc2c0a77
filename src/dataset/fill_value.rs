//! Dataset fill values.

use serde::{Deserialize, Serialize};

/// The fill value of a dataset.
///
/// Provides an element value for chunks that were never written.
/// An empty fill value is undefined and reads as zero bytes.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FillValue(Vec<u8>);

impl core::fmt::Display for FillValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<Vec<u8>> for FillValue {
    fn from(value: Vec<u8>) -> Self {
        FillValue(value)
    }
}

macro_rules! fill_value_from_primitive {
    ($($t:ty),*) => {
        $(
            impl From<$t> for FillValue {
                fn from(value: $t) -> Self {
                    FillValue(value.to_ne_bytes().to_vec())
                }
            }
        )*
    };
}

fill_value_from_primitive!(u8, u16, u32, u64, i8, i16, i32, i64, f32, f64);

impl FillValue {
    /// Create a new fill value composed of `bytes`.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> FillValue {
        FillValue(bytes)
    }

    /// Create an undefined fill value, which reads as zero bytes.
    #[must_use]
    pub fn undefined() -> FillValue {
        FillValue(Vec::new())
    }

    /// Returns true if the fill value is undefined.
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the size in bytes of the fill value.
    #[must_use]
    pub fn size(&self) -> usize {
        self.0.len()
    }

    /// Return the byte representation of the fill value.
    #[must_use]
    pub fn as_ne_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Fill `bytes` with repeated copies of the fill value.
    ///
    /// The length of `bytes` must be a multiple of the fill value size.
    pub(crate) fn fill(&self, bytes: &mut [u8]) {
        if self.0.is_empty() || self.0.iter().all(|byte| *byte == 0) {
            bytes.fill(0);
        } else {
            for element in bytes.chunks_exact_mut(self.0.len()) {
                element.copy_from_slice(&self.0);
            }
        }
    }

    /// Return `num_elements` copies of the fill value of an element with `element_size` bytes.
    pub(crate) fn repeat(&self, num_elements: usize, element_size: usize) -> Vec<u8> {
        let mut bytes = vec![0; num_elements * element_size];
        self.fill(&mut bytes);
        bytes
    }
}
