use serde::{Deserialize, Serialize};

use crate::selection::Extent;

use super::{DatasetLayout, FillValue};

const fn default_field_size() -> u8 {
    8
}

/// The metadata of a dataset needed to read its raw data.
///
/// This is the subset of the dataspace, datatype, fill value and data layout messages of a dataset that the reader depends upon,
/// handed over by a metadata layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    /// The current extent.
    pub extent: Extent,
    /// The maximum extent, [`None`] in a dimension if it is unlimited. Defaults to the current extent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_extent: Option<Vec<Option<u64>>>,
    /// The size of an element in bytes.
    pub element_size: usize,
    /// The storage layout.
    pub layout: DatasetLayout,
    /// The fill value.
    #[serde(default, skip_serializing_if = "FillValue::is_undefined")]
    pub fill_value: FillValue,
    /// The size of file addresses in bytes.
    #[serde(default = "default_field_size")]
    pub offset_size: u8,
    /// The size of file lengths in bytes.
    #[serde(default = "default_field_size")]
    pub length_size: u8,
}
