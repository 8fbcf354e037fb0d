//! Output encoder.

use crate::bluefile::Atom;
use crate::colormap::{quantize, Rgb};
use crate::error::SdsError;

use bytes::Bytes;
use zerocopy::byteorder::{LittleEndian, I16, I32, U32, U64};
use zerocopy::AsBytes;

/// Wire representation of rendered values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    /// Four bytes per value through a colormap.
    Rgba,
    /// Little-endian scalars of the given atom type.
    Atom(Atom),
}

impl OutputFormat {
    /// Parse an `outfmt` value: `RGBA`, or a two-character format code whose second character
    /// selects the atom type.
    pub fn from_code(code: &str) -> Result<Self, SdsError> {
        if code.eq_ignore_ascii_case("RGBA") {
            return Ok(OutputFormat::Rgba);
        }
        let mut chars = code.chars();
        match (chars.next(), chars.next().and_then(Atom::from_letter), chars.next()) {
            (Some(_), Some(atom), None) => Ok(OutputFormat::Atom(atom)),
            _ => Err(SdsError::UnknownFormat {
                code: code.to_string(),
            }),
        }
    }

    /// Bytes needed to encode `count` values.
    pub fn encoded_len(&self, count: usize) -> usize {
        match self {
            OutputFormat::Rgba => count * 4,
            OutputFormat::Atom(Atom::Packed) => (count + 7) / 8,
            OutputFormat::Atom(atom) => count * atom.bytes_per_scalar() as usize,
        }
    }
}

/// Pack values into bits, most significant bit first. Positive values set their bit.
pub fn pack_bits(values: &[f64]) -> Vec<u8> {
    values
        .chunks(8)
        .map(|chunk| {
            chunk
                .iter()
                .enumerate()
                .filter(|(_, v)| **v > 0.0)
                .fold(0_u8, |byte, (bit, _)| byte | (0x80 >> bit))
        })
        .collect()
}

/// Serialise rendered values.
///
/// Integer outputs round to the nearest integer and saturate at the type's bounds. `zmin`,
/// `zmax` and `palette` are only used by [OutputFormat::Rgba].
pub fn encode(
    values: &[f64],
    format: OutputFormat,
    zmin: f64,
    zmax: f64,
    palette: &[Rgb],
) -> Bytes {
    let atom = match format {
        OutputFormat::Rgba => {
            return values
                .iter()
                .flat_map(|&v| quantize(v, zmin, zmax, palette))
                .collect::<Vec<u8>>()
                .into()
        }
        OutputFormat::Atom(atom) => atom,
    };
    match atom {
        Atom::Packed => pack_bits(values).into(),
        Atom::Int8 => values
            .iter()
            .map(|v| v.round() as i8)
            .collect::<Vec<i8>>()
            .as_bytes()
            .to_vec()
            .into(),
        Atom::Int16 => values
            .iter()
            .map(|v| I16::<LittleEndian>::new(v.round() as i16))
            .collect::<Vec<_>>()
            .as_bytes()
            .to_vec()
            .into(),
        Atom::Int32 => values
            .iter()
            .map(|v| I32::<LittleEndian>::new(v.round() as i32))
            .collect::<Vec<_>>()
            .as_bytes()
            .to_vec()
            .into(),
        Atom::Float32 => values
            .iter()
            .map(|&v| U32::<LittleEndian>::new((v as f32).to_bits()))
            .collect::<Vec<_>>()
            .as_bytes()
            .to_vec()
            .into(),
        Atom::Float64 => values
            .iter()
            .map(|v| U64::<LittleEndian>::new(v.to_bits()))
            .collect::<Vec<_>>()
            .as_bytes()
            .to_vec()
            .into(),
    }
}
