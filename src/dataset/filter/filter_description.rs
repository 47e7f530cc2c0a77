use serde::{Deserialize, Serialize};

use crate::format::{FormatError, FormatReader};

use super::MAX_FILTERS;

const STRUCTURE: &str = "filter pipeline message";

/// The flag bit of an optional filter.
const FLAG_OPTIONAL: u16 = 0b1;

/// A filter description from a filter pipeline message.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterDescription {
    id: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    flags: u16,
    #[serde(default)]
    client_data: Vec<u32>,
}

impl FilterDescription {
    /// Create a new filter description with filter identifier `id` and `client_data`.
    #[must_use]
    pub fn new(id: u16, client_data: Vec<u32>) -> Self {
        Self {
            id,
            name: None,
            flags: 0,
            client_data,
        }
    }

    /// Set the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the flags.
    #[must_use]
    pub fn with_flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    /// Return the filter identifier.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Return the name, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn name_or_unnamed(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed filter")
    }

    /// Return the flags.
    #[must_use]
    pub const fn flags(&self) -> u16 {
        self.flags
    }

    /// Returns true if the filter is optional.
    ///
    /// An optional filter that failed when a chunk was written is recorded as skipped in the filter mask of that chunk.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        self.flags & FLAG_OPTIONAL != 0
    }

    /// Return the client data.
    #[must_use]
    pub fn client_data(&self) -> &[u32] {
        &self.client_data
    }
}

/// Decode a filter pipeline message (version 1 or 2) into its filter descriptions, in the order they are applied when writing.
///
/// Version 1 pads the header with 6 reserved bytes, pads names to a multiple of 8 bytes, and pads odd client data counts with one extra value.
/// Version 2 has no padding and omits the name length and name of filters with an identifier below 256.
///
/// # Errors
/// Returns [`FormatError`] if the message is truncated, has an unsupported version, or holds more than [`MAX_FILTERS`] filters.
pub fn decode_filter_pipeline_message(
    reader: &mut FormatReader,
) -> Result<Vec<FilterDescription>, FormatError> {
    let version = reader.read_u8()?;
    if !matches!(version, 1 | 2) {
        return Err(FormatError::UnsupportedVersion {
            structure: STRUCTURE,
            address: reader.address(),
            version,
        });
    }
    let num_filters = usize::from(reader.read_u8()?);
    if num_filters > MAX_FILTERS {
        return Err(FormatError::InvalidValue(format!(
            "{num_filters} filters exceeds the maximum of {MAX_FILTERS}"
        )));
    }
    if version == 1 {
        reader.skip(6)?;
    }

    let mut descriptions = Vec::with_capacity(num_filters);
    for _ in 0..num_filters {
        descriptions.push(decode_filter_description(reader, version)?);
    }
    Ok(descriptions)
}

fn decode_filter_description(
    reader: &mut FormatReader,
    version: u8,
) -> Result<FilterDescription, FormatError> {
    let id = reader.read_u16()?;
    let name_length = if version == 1 || id >= 256 {
        usize::from(reader.read_u16()?)
    } else {
        0
    };
    let flags = reader.read_u16()?;
    let num_client_data = usize::from(reader.read_u16()?);

    let name = if name_length > 0 {
        let padded_length = if version == 1 {
            name_length.next_multiple_of(8)
        } else {
            name_length
        };
        let name = reader.read_bytes(padded_length)?;
        let name = name.split(|byte| *byte == 0).next().unwrap_or(name);
        Some(String::from_utf8_lossy(name).into_owned())
    } else {
        None
    };

    let client_data = (0..num_client_data)
        .map(|_| reader.read_u32())
        .collect::<Result<Vec<_>, _>>()?;
    if version == 1 && num_client_data % 2 == 1 {
        reader.skip(4)?;
    }

    Ok(FilterDescription {
        id,
        name,
        flags,
        client_data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::format_writer::FormatWriter;

    const JSON_VALID: &str = r#"{
        "id": 2,
        "client_data": [4]
    }"#;

    #[test]
    fn filter_description_serde() {
        let description: FilterDescription = serde_json::from_str(JSON_VALID).unwrap();
        assert_eq!(description, FilterDescription::new(2, vec![4]));
        assert!(!description.is_optional());
        assert_eq!(
            serde_json::to_string(&description).unwrap(),
            r#"{"id":2,"flags":0,"client_data":[4]}"#
        );
    }

    #[test]
    fn filter_pipeline_message_v1() -> Result<(), FormatError> {
        let bytes = FormatWriter::new()
            .u8(1)
            .u8(2)
            .bytes(&[0; 6])
            // shuffle
            .u16(2)
            .u16(8)
            .u16(1)
            .u16(1)
            .bytes(b"shuffle\0")
            .u32(4)
            .u32(0)
            // deflate, name padded from 8 to 16
            .u16(1)
            .u16(9)
            .u16(0)
            .u16(2)
            .bytes(b"deflate!\0\0\0\0\0\0\0\0")
            .u32(6)
            .u32(7)
            .finish();
        let mut reader = FormatReader::new(&bytes, 0);
        let descriptions = decode_filter_pipeline_message(&mut reader)?;
        assert_eq!(reader.remaining(), 0);
        assert_eq!(
            descriptions,
            vec![
                FilterDescription::new(2, vec![4])
                    .with_name("shuffle")
                    .with_flags(1),
                FilterDescription::new(1, vec![6, 7]).with_name("deflate!"),
            ]
        );
        assert!(descriptions[0].is_optional());
        Ok(())
    }

    #[test]
    fn filter_pipeline_message_v2() -> Result<(), FormatError> {
        let bytes = FormatWriter::new()
            .u8(2)
            .u8(2)
            // fletcher32, no name below id 256
            .u16(3)
            .u16(0)
            .u16(0)
            // zstd
            .u16(32015)
            .u16(4)
            .u16(1)
            .u16(1)
            .bytes(b"zstd")
            .u32(3)
            .finish();
        let mut reader = FormatReader::new(&bytes, 0);
        let descriptions = decode_filter_pipeline_message(&mut reader)?;
        assert_eq!(reader.remaining(), 0);
        assert_eq!(
            descriptions,
            vec![
                FilterDescription::new(3, vec![]),
                FilterDescription::new(32015, vec![3])
                    .with_name("zstd")
                    .with_flags(1),
            ]
        );
        Ok(())
    }

    #[test]
    fn filter_pipeline_message_invalid() {
        let bytes = [3, 0];
        assert!(matches!(
            decode_filter_pipeline_message(&mut FormatReader::new(&bytes, 0)),
            Err(FormatError::UnsupportedVersion { version: 3, .. })
        ));
        let bytes = [2, 1, 1, 0];
        assert!(matches!(
            decode_filter_pipeline_message(&mut FormatReader::new(&bytes, 0)),
            Err(FormatError::UnexpectedEnd { .. })
        ));
    }
}
