//! The `scaleoffset` filter (id 6).
//!
//! Stores each element as its offset from the minimum of the chunk, packed into the fewest bits that hold the largest offset.
//! Floating point elements are first multiplied by `10^scale_factor` and rounded to integers (D-scaling), so the filter is lossy for them.
//!
//! The client data holds at least 8 values:
//!  - `0`: the scale type, `0` for floating point D-scaling, `1` for floating point E-scaling or `2` for integers,
//!  - `1`: the scale factor, the decimal digits kept for D-scaling (two's complement) or the bit width of integers (`0` to compute it),
//!  - `2`: the number of elements in a chunk,
//!  - `3`: the element class, `0` for integers or `1` for floating point,
//!  - `4`: the element size in bytes,
//!  - `5`: the sign of integers, `0` for unsigned or `1` for two's complement,
//!  - `6`: the byte order, `0` for little endian or `1` for big endian,
//!  - `7`: `1` if a fill value follows, otherwise `0`,
//!  - `8..`: the fill value, packed little endian into consecutive values.
//!
//! An encoded chunk starts with a 21 byte header: the bit width (`u32`), the size of the stored minimum (always 8) and the minimum (`u64`), all little endian.
//! The packed offsets follow, most significant bit first.
//! If a fill value is defined, elements equal to it are stored as the all ones offset.
//! If the bit width is the full element width, elements are stored unpacked in little endian byte order.
//!
//! E-scaling is not supported.

use itertools::{Itertools, MinMaxResult};

use crate::plugin::{PluginCreateError, PluginParametersInvalidError};

use super::{FilterDescription, FilterError, FilterPlugin, FilterTraits};

const IDENTIFIER: &str = "scaleoffset";

/// The filter identifier of the `scaleoffset` filter.
pub const FILTER_ID: u16 = 6;

/// The size of the header of an encoded chunk.
const HEADER_SIZE: usize = 21;

/// The size of the minimum stored in the header.
const MINVAL_SIZE: usize = 8;

// Register the filter.
inventory::submit! {
    FilterPlugin::new(IDENTIFIER, is_id_scale_offset, create_filter_scale_offset)
}

fn is_id_scale_offset(id: u16) -> bool {
    id == FILTER_ID
}

fn create_filter_scale_offset(
    description: &FilterDescription,
) -> Result<Box<dyn FilterTraits>, PluginCreateError> {
    let filter = ScaleOffsetFilter::new(description.client_data()).map_err(|_| {
        PluginParametersInvalidError::new(IDENTIFIER, "filter", description.client_data().to_vec())
    })?;
    Ok(Box::new(filter))
}

/// How the elements of a chunk are reduced to integer offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScaleOffsetMode {
    /// Integer elements, with a bit width computed per chunk (`None`) or fixed.
    Integer {
        /// True if elements are two's complement.
        signed: bool,
        /// A fixed bit width.
        bit_width: Option<u32>,
    },
    /// Floating point elements, keeping `decimal_digits` digits after the decimal point.
    FloatDScale {
        /// The decimal scale factor.
        decimal_digits: i32,
    },
}

/// A `scaleoffset` filter implementation.
#[derive(Clone, Debug)]
pub struct ScaleOffsetFilter {
    mode: ScaleOffsetMode,
    num_elements: usize,
    element_size: usize,
    big_endian: bool,
    /// The fill value as an unsigned integer of the element width.
    fill_value: Option<u64>,
}

impl ScaleOffsetFilter {
    /// Create a new `scaleoffset` filter from its client data.
    ///
    /// # Errors
    /// Returns [`FilterError::InvalidParameters`] if the client data is truncated, inconsistent, requests E-scaling or an element size other than 1, 2, 4 or 8 bytes (4 or 8 bytes for floating point).
    pub fn new(client_data: &[u32]) -> Result<Self, FilterError> {
        let invalid = |reason: &str| {
            FilterError::InvalidParameters(format!(
                "scaleoffset client data {client_data:?}: {reason}"
            ))
        };
        let [scale_type, scale_factor, num_elements, class, element_size, sign, order, fill_defined, fill @ ..] =
            client_data
        else {
            return Err(invalid("expected at least 8 values"));
        };
        let element_size =
            usize::try_from(*element_size).map_err(|_| invalid("invalid element size"))?;
        let mode = match (*scale_type, *class) {
            (2, 0) => ScaleOffsetMode::Integer {
                signed: match *sign {
                    0 => false,
                    1 => true,
                    _ => return Err(invalid("invalid sign")),
                },
                bit_width: (*scale_factor > 0).then_some(*scale_factor),
            },
            (0, 1) => ScaleOffsetMode::FloatDScale {
                decimal_digits: i32::from_ne_bytes(scale_factor.to_ne_bytes()),
            },
            (1, 1) => return Err(invalid("E-scaling is not supported")),
            _ => return Err(invalid("the scale type does not match the element class")),
        };
        match mode {
            ScaleOffsetMode::Integer { bit_width, .. } => {
                if ![1, 2, 4, 8].contains(&element_size) {
                    return Err(invalid("unsupported integer size"));
                }
                if bit_width.is_some_and(|bit_width| bit_width as usize > element_size * 8) {
                    return Err(invalid("bit width exceeds the element size"));
                }
            }
            ScaleOffsetMode::FloatDScale { .. } => {
                if ![4, 8].contains(&element_size) {
                    return Err(invalid("unsupported floating point size"));
                }
            }
        }
        let big_endian = match *order {
            0 => false,
            1 => true,
            _ => return Err(invalid("invalid byte order")),
        };
        let fill_value = match *fill_defined {
            0 => None,
            1 => {
                let bytes: Vec<u8> = fill.iter().flat_map(|word| word.to_le_bytes()).collect();
                if bytes.len() < element_size {
                    return Err(invalid("truncated fill value"));
                }
                Some(read_element(&bytes[..element_size], false))
            }
            _ => return Err(invalid("invalid fill value flag")),
        };
        Ok(Self {
            mode,
            num_elements: usize::try_from(*num_elements)
                .map_err(|_| invalid("invalid number of elements"))?,
            element_size,
            big_endian,
            fill_value,
        })
    }

    /// Return the mode.
    #[must_use]
    pub const fn mode(&self) -> ScaleOffsetMode {
        self.mode
    }

    #[allow(clippy::cast_possible_truncation)]
    fn element_bits(&self) -> u32 {
        // element sizes are at most 8 bytes
        self.element_size as u32 * 8
    }

    fn decode_failure(reason: impl Into<String>) -> FilterError {
        FilterError::DecodeFailure {
            filter: IDENTIFIER,
            reason: reason.into(),
        }
    }

    /// The offsets of integer elements, their minimum and bit width.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn integer_offsets(&self, elements: &[u64], signed: bool, bit_width: Option<u32>) -> (Vec<u64>, u64, u32) {
        let key = |element: u64| {
            if signed {
                i128::from(sign_extend(element, self.element_size))
            } else {
                i128::from(element)
            }
        };
        let (min, max) = match elements
            .iter()
            .filter(|element| Some(**element) != self.fill_value)
            .map(|element| key(*element))
            .minmax()
        {
            MinMaxResult::NoElements => (0, 0),
            MinMaxResult::OneElement(element) => (element, element),
            MinMaxResult::MinMax(min, max) => (min, max),
        };
        let reserved = if self.fill_value.is_some() { 2 } else { 1 };
        let bit_width = bit_width
            .unwrap_or_else(|| bits_for((max - min) as u128 + reserved))
            .min(self.element_bits());
        let all_ones = mask(bit_width);
        let offsets = elements
            .iter()
            .map(|element| {
                if Some(*element) == self.fill_value {
                    all_ones
                } else {
                    ((key(*element) - min) as u64) & all_ones
                }
            })
            .collect();
        let min = (min as u64) & mask(self.element_bits());
        (offsets, min, bit_width)
    }

    /// The offsets of floating point elements scaled by `10^decimal_digits`, their minimum and bit width.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn float_offsets(&self, elements: &[u64], decimal_digits: i32) -> (Vec<u64>, u64, u32) {
        let (min, max) = elements
            .iter()
            .filter(|element| Some(**element) != self.fill_value)
            .map(|element| self.bits_to_float(*element))
            .filter(|value| value.is_finite())
            .fold(None, |range: Option<(f64, f64)>, value| {
                Some(range.map_or((value, value), |(min, max)| {
                    (min.min(value), max.max(value))
                }))
            })
            .unwrap_or((0.0, 0.0));
        let scale = 10f64.powi(decimal_digits);
        let reserved = if self.fill_value.is_some() { 2 } else { 1 };
        let span = ((max - min) * scale).round() as u128;
        let bit_width = bits_for(span + reserved).min(self.element_bits());
        let all_ones = mask(bit_width);
        let offsets = elements
            .iter()
            .map(|element| {
                if Some(*element) == self.fill_value {
                    all_ones
                } else {
                    (((self.bits_to_float(*element) - min) * scale).round() as u64).min(all_ones)
                }
            })
            .collect();
        (offsets, self.float_to_bits(min), bit_width)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn bits_to_float(&self, bits: u64) -> f64 {
        if self.element_size == 4 {
            f64::from(f32::from_bits(bits as u32))
        } else {
            f64::from_bits(bits)
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn float_to_bits(&self, value: f64) -> u64 {
        if self.element_size == 4 {
            u64::from((value as f32).to_bits())
        } else {
            value.to_bits()
        }
    }

    /// Restore an element from its offset.
    #[allow(clippy::cast_precision_loss)]
    fn restore(&self, offset: u64, min: u64, bit_width: u32) -> u64 {
        if let Some(fill_value) = self.fill_value {
            if offset == mask(bit_width) {
                return fill_value;
            }
        }
        match self.mode {
            ScaleOffsetMode::Integer { .. } => offset.wrapping_add(min) & mask(self.element_bits()),
            ScaleOffsetMode::FloatDScale { decimal_digits } => self.float_to_bits(
                offset as f64 / 10f64.powi(decimal_digits) + self.bits_to_float(min),
            ),
        }
    }
}

impl FilterTraits for ScaleOffsetFilter {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn encode(&self, decoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        if decoded_value.len() != self.num_elements * self.element_size {
            return Err(FilterError::EncodeFailure {
                filter: IDENTIFIER,
                reason: format!(
                    "expected {} elements of {} bytes, got {} bytes",
                    self.num_elements,
                    self.element_size,
                    decoded_value.len()
                ),
            });
        }
        let elements: Vec<u64> = decoded_value
            .chunks_exact(self.element_size)
            .map(|bytes| read_element(bytes, self.big_endian))
            .collect();
        let (offsets, min, bit_width) = match self.mode {
            ScaleOffsetMode::Integer { signed, bit_width } => {
                self.integer_offsets(&elements, signed, bit_width)
            }
            ScaleOffsetMode::FloatDScale { decimal_digits } => {
                self.float_offsets(&elements, decimal_digits)
            }
        };

        let mut encoded_value = Vec::with_capacity(HEADER_SIZE + decoded_value.len());
        encoded_value.extend_from_slice(&bit_width.to_le_bytes());
        encoded_value.push(MINVAL_SIZE as u8);
        encoded_value.extend_from_slice(&min.to_le_bytes());
        encoded_value.resize(HEADER_SIZE, 0);
        if bit_width == self.element_bits() {
            for element in elements {
                encoded_value.extend_from_slice(&element.to_le_bytes()[..self.element_size]);
            }
        } else {
            let mut writer = BitWriter::new(encoded_value);
            for offset in offsets {
                writer.write(offset, bit_width);
            }
            encoded_value = writer.finish();
        }
        Ok(encoded_value)
    }

    fn decode(&self, encoded_value: &[u8]) -> Result<Vec<u8>, FilterError> {
        if encoded_value.len() < HEADER_SIZE {
            return Err(Self::decode_failure("truncated header"));
        }
        let (header, payload) = encoded_value.split_at(HEADER_SIZE);
        let bit_width = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let minval_size = usize::from(header[4]);
        let minval = &header[5..];
        if minval_size > MINVAL_SIZE {
            return Err(Self::decode_failure(format!(
                "minimum of {minval_size} bytes"
            )));
        }
        let min = read_element(&minval[..minval_size], false);
        if bit_width > self.element_bits() {
            return Err(Self::decode_failure(format!(
                "bit width {bit_width} exceeds the element size {}",
                self.element_size
            )));
        }

        let size = self.num_elements * self.element_size;
        let mut decoded_value = vec![0; size];
        if bit_width == self.element_bits() {
            let payload = payload
                .get(..size)
                .ok_or_else(|| Self::decode_failure("truncated elements"))?;
            for (bytes, element) in std::iter::zip(
                decoded_value.chunks_exact_mut(self.element_size),
                payload.chunks_exact(self.element_size),
            ) {
                write_element(read_element(element, false), bytes, self.big_endian);
            }
        } else {
            let mut reader = BitReader::new(payload);
            for bytes in decoded_value.chunks_exact_mut(self.element_size) {
                let offset = reader
                    .read(bit_width)
                    .ok_or_else(|| Self::decode_failure("truncated offsets"))?;
                write_element(self.restore(offset, min, bit_width), bytes, self.big_endian);
            }
        }
        Ok(decoded_value)
    }
}

/// The number of bits that represent the values `0..n`.
fn bits_for(n: u128) -> u32 {
    if n <= 1 {
        0
    } else {
        u128::BITS - (n - 1).leading_zeros()
    }
}

/// The lowest `bits` bits set.
const fn mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1 << bits) - 1
    }
}

fn sign_extend(value: u64, size: usize) -> i64 {
    let shift = u64::BITS as usize - size * 8;
    i64::from_ne_bytes((value << shift).to_ne_bytes()) >> shift
}

fn read_element(bytes: &[u8], big_endian: bool) -> u64 {
    let fold = |value: u64, byte: &u8| (value << 8) | u64::from(*byte);
    if big_endian {
        bytes.iter().fold(0, fold)
    } else {
        bytes.iter().rev().fold(0, fold)
    }
}

fn write_element(value: u64, bytes: &mut [u8], big_endian: bool) {
    let size = bytes.len();
    bytes.copy_from_slice(&value.to_le_bytes()[..size]);
    if big_endian {
        bytes.reverse();
    }
}

/// Packs values most significant bit first.
struct BitWriter {
    bytes: Vec<u8>,
    free: u32,
}

impl BitWriter {
    fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, free: 0 }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write(&mut self, value: u64, bits: u32) {
        let mut remaining = bits;
        while remaining > 0 {
            if self.free == 0 {
                self.bytes.push(0);
                self.free = 8;
            }
            let take = remaining.min(self.free);
            let chunk = (value >> (remaining - take)) & mask(take);
            if let Some(last) = self.bytes.last_mut() {
                *last |= (chunk << (self.free - take)) as u8;
            }
            self.free -= take;
            remaining -= take;
        }
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Unpacks values packed by a [`BitWriter`].
struct BitReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    const fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn read(&mut self, bits: u32) -> Option<u64> {
        let mut value = 0;
        let mut remaining = bits;
        while remaining > 0 {
            let byte = *self.bytes.get(self.position / 8)?;
            let available = 8 - (self.position % 8) as u32;
            let take = remaining.min(available);
            let chunk = (u64::from(byte) >> (available - take)) & mask(take);
            value = (value << take) | chunk;
            self.position += take as usize;
            remaining -= take;
        }
        Some(value)
    }
}
