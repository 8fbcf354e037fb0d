use serde::Serialize;

/// Byte order / endianness of the samples in a data file.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    /// Big Endian
    Big,
    /// Little Endian
    Little,
}

impl ByteOrder {
    /// Byte order implied by a BLUEFILE `data_rep` field.
    ///
    /// `IEEE` denotes big-endian samples. Anything else, including the usual `EEEI`, is read
    /// as little-endian.
    pub fn from_data_rep(data_rep: &str) -> Self {
        if data_rep.trim_end_matches('\0').trim() == "IEEE" {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }
}
