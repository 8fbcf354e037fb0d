//! BLUEFILE header codec.
//!
//! A BLUEFILE starts with a fixed 512-byte little-endian header describing the layout of the
//! sample data that follows it. The format code is two characters: a class (`S` scalar,
//! `C` complex, ...) followed by an atom type (`B` int8, `I` int16, ...).

use crate::error::SdsError;
use crate::source::ByteRangeSource;
use crate::types::ByteOrder;

use serde::Serialize;

/// Size of the fixed header in bytes.
pub const HEADER_SIZE: usize = 512;

/// File type of one-dimensional (line) data.
pub const TYPE_LINE: i32 = 1000;

/// File type of two-dimensional (raster) data.
pub const TYPE_RASTER: i32 = 2000;

/// Parsed BLUEFILE header.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlueHeader {
    pub version: String,
    pub head_rep: String,
    pub data_rep: String,
    pub detached: i32,
    pub protected: i32,
    pub pipe: i32,
    pub ext_start: i32,
    pub ext_size: i32,
    pub data_start: f64,
    pub data_size: f64,
    pub file_type: i32,
    pub format: String,
    pub flagmask: i16,
    pub timecode: f64,
    pub xstart: f64,
    pub xdelta: f64,
    pub xunits: i32,
    pub subsize: i32,
    pub ystart: f64,
    pub ydelta: f64,
    pub yunits: i32,
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    out
}

fn text(bytes: &[u8], offset: usize, len: usize) -> String {
    String::from_utf8_lossy(&bytes[offset..offset + len])
        .trim_end_matches('\0')
        .to_string()
}

fn i16_at(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes(field(bytes, offset))
}

fn i32_at(bytes: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes(field(bytes, offset))
}

fn f64_at(bytes: &[u8], offset: usize) -> f64 {
    f64::from_le_bytes(field(bytes, offset))
}

impl BlueHeader {
    /// Parse a header from the first 512 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SdsError> {
        if bytes.len() < HEADER_SIZE {
            return Err(SdsError::MalformedHeader {
                length: bytes.len(),
            });
        }
        Ok(BlueHeader {
            version: text(bytes, 0, 4),
            head_rep: text(bytes, 4, 4),
            data_rep: text(bytes, 8, 4),
            detached: i32_at(bytes, 12),
            protected: i32_at(bytes, 16),
            pipe: i32_at(bytes, 20),
            ext_start: i32_at(bytes, 24),
            ext_size: i32_at(bytes, 28),
            data_start: f64_at(bytes, 32),
            data_size: f64_at(bytes, 40),
            file_type: i32_at(bytes, 48),
            format: text(bytes, 52, 2),
            flagmask: i16_at(bytes, 54),
            timecode: f64_at(bytes, 56),
            xstart: f64_at(bytes, 256),
            xdelta: f64_at(bytes, 264),
            xunits: i32_at(bytes, 272),
            subsize: i32_at(bytes, 276),
            ystart: f64_at(bytes, 280),
            ydelta: f64_at(bytes, 288),
            yunits: i32_at(bytes, 296),
        })
    }

    /// Read and parse the header at offset 0 of `source`.
    pub fn parse(source: &dyn ByteRangeSource) -> Result<Self, SdsError> {
        match source.read_at(0, HEADER_SIZE) {
            Ok(bytes) => Self::from_bytes(&bytes),
            Err(SdsError::ShortRead { actual, .. }) => {
                Err(SdsError::MalformedHeader { length: actual })
            }
            Err(err) => Err(err),
        }
    }

    /// Byte order of the sample data.
    pub fn byte_order(&self) -> ByteOrder {
        ByteOrder::from_data_rep(&self.data_rep)
    }

    /// Decoding information for the header's format code.
    pub fn format_info(&self) -> Result<FormatInfo, SdsError> {
        FormatInfo::from_code(&self.format)
    }
}

/// Scalar types that the sample decoder understands.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Atom {
    /// `P`: one bit per sample.
    Packed,
    /// `B`
    Int8,
    /// `I`
    Int16,
    /// `L`
    Int32,
    /// `F`
    Float32,
    /// `D`
    Float64,
}

impl Atom {
    /// Look up a decodable atom by its format letter.
    pub fn from_letter(letter: char) -> Option<Self> {
        match letter {
            'P' => Some(Atom::Packed),
            'B' => Some(Atom::Int8),
            'I' => Some(Atom::Int16),
            'L' => Some(Atom::Int32),
            'F' => Some(Atom::Float32),
            'D' => Some(Atom::Float64),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Atom::Packed => 'P',
            Atom::Int8 => 'B',
            Atom::Int16 => 'I',
            Atom::Int32 => 'L',
            Atom::Float32 => 'F',
            Atom::Float64 => 'D',
        }
    }

    pub fn bytes_per_scalar(self) -> f64 {
        match self {
            Atom::Packed => 0.125,
            Atom::Int8 => 1.0,
            Atom::Int16 => 2.0,
            Atom::Int32 | Atom::Float32 => 4.0,
            Atom::Float64 => 8.0,
        }
    }
}

/// Scalars per atom for every class letter a header may carry.
pub fn class_scalars(class: char) -> Option<usize> {
    match class {
        'S' | 'U' => Some(1),
        'C' => Some(2),
        'V' => Some(3),
        'Q' => Some(4),
        'M' => Some(9),
        'X' => Some(10),
        'T' => Some(16),
        '1'..='9' => class.to_digit(10).map(|d| d as usize),
        _ => None,
    }
}

/// Bytes per scalar for every atom letter a header may carry.
pub fn atom_bytes(atom: char) -> Option<f64> {
    match atom {
        'P' => Some(0.125),
        'A' | 'O' | 'B' => Some(1.0),
        'I' => Some(2.0),
        'L' | 'F' => Some(4.0),
        'X' | 'D' => Some(8.0),
        _ => None,
    }
}

/// Split a two-character format code into its class and atom letters.
fn split_code(code: &str) -> Result<(char, char), SdsError> {
    let mut chars = code.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(class), Some(atom), None) => Ok((class, atom)),
        _ => Err(SdsError::UnknownFormat {
            code: code.to_string(),
        }),
    }
}

/// Derived decoding information for a format code.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FormatInfo {
    pub atom: Atom,
    pub scalars_per_atom: usize,
    pub bytes_per_scalar: f64,
}

impl FormatInfo {
    /// Look up a decodable format code. Only scalar (`S`) and complex (`C`) classes are
    /// supported.
    pub fn from_code(code: &str) -> Result<Self, SdsError> {
        let unknown = || SdsError::UnknownFormat {
            code: code.to_string(),
        };
        let (class, atom) = split_code(code)?;
        let scalars_per_atom = match class {
            'S' => 1,
            'C' => 2,
            _ => return Err(unknown()),
        };
        let atom = Atom::from_letter(atom).ok_or_else(unknown)?;
        Ok(FormatInfo {
            atom,
            scalars_per_atom,
            bytes_per_scalar: atom.bytes_per_scalar(),
        })
    }

    /// Bytes used by one element: one scalar, or a real/imaginary pair.
    pub fn bytes_per_atom(&self) -> f64 {
        self.scalars_per_atom as f64 * self.bytes_per_scalar
    }

    pub fn is_complex(&self) -> bool {
        self.scalars_per_atom == 2
    }
}

/// Header plus the derived fields returned by the header endpoint.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HeaderSummary {
    #[serde(flatten)]
    pub header: BlueHeader,
    /// Scalars per atom
    pub spa: usize,
    /// Bytes per scalar
    pub bps: f64,
    /// Bytes per atom
    pub bpa: f64,
    /// Atoms per element
    pub ape: i32,
    /// Bytes per element
    pub bpe: f64,
    /// Number of elements in the file
    pub size: i64,
}

impl HeaderSummary {
    pub fn new(header: BlueHeader) -> Result<Self, SdsError> {
        let unknown = || SdsError::UnknownFormat {
            code: header.format.clone(),
        };
        let (class, atom) = split_code(&header.format)?;
        let spa = class_scalars(class).ok_or_else(unknown)?;
        let bps = atom_bytes(atom).ok_or_else(unknown)?;
        let bpa = spa as f64 * bps;
        let ape = if header.file_type == TYPE_LINE {
            1
        } else {
            header.subsize
        };
        let bpe = ape as f64 * bpa;
        let size = if bpe > 0.0 {
            (header.data_size / bpe).floor() as i64
        } else {
            0
        };
        Ok(HeaderSummary {
            header,
            spa,
            bps,
            bpa,
            ape,
            bpe,
            size,
        })
    }
}
