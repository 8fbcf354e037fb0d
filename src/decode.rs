//! Sample decoder: raw bytes to `f64` samples.

use crate::bluefile::Atom;
use crate::error::SdsError;
use crate::types::ByteOrder;

use zerocopy::byteorder::{BigEndian, LittleEndian, I16, I32, U32, U64};
use zerocopy::{FromBytes, LayoutVerified, Unaligned};

/// A fixed-width scalar that can be viewed in place over a byte buffer.
///
/// Floating point atoms are viewed through their unsigned integer bit patterns so that byte
/// order is handled the same way for every width.
trait Scalar: FromBytes + Unaligned + Copy {
    fn to_f64(self) -> f64;
}

impl Scalar for i8 {
    fn to_f64(self) -> f64 {
        self as f64
    }
}

impl<O: zerocopy::byteorder::ByteOrder> Scalar for I16<O> {
    fn to_f64(self) -> f64 {
        self.get() as f64
    }
}

impl<O: zerocopy::byteorder::ByteOrder> Scalar for I32<O> {
    fn to_f64(self) -> f64 {
        self.get() as f64
    }
}

impl<O: zerocopy::byteorder::ByteOrder> Scalar for U32<O> {
    fn to_f64(self) -> f64 {
        f32::from_bits(self.get()) as f64
    }
}

impl<O: zerocopy::byteorder::ByteOrder> Scalar for U64<O> {
    fn to_f64(self) -> f64 {
        f64::from_bits(self.get())
    }
}

/// View `data` as a slice of `T`, ignoring a trailing partial element.
fn from_bytes<T: Scalar>(data: &[u8]) -> Result<&[T], SdsError> {
    let whole = data.len() - data.len() % std::mem::size_of::<T>();
    let layout = LayoutVerified::<_, [T]>::new_slice_unaligned(&data[..whole]).ok_or(
        SdsError::FromBytes {
            type_name: std::any::type_name::<T>(),
        },
    )?;
    Ok(layout.into_slice())
}

fn convert<T: Scalar>(data: &[u8]) -> Result<Vec<f64>, SdsError> {
    Ok(from_bytes::<T>(data)?.iter().map(|v| v.to_f64()).collect())
}

/// Expand each byte into eight 0.0/1.0 samples, most significant bit first.
pub fn unpack_bits(data: &[u8]) -> Vec<f64> {
    data.iter()
        .flat_map(|byte| (0..8).rev().map(move |bit| ((byte >> bit) & 1) as f64))
        .collect()
}

fn decode_ordered<O: zerocopy::byteorder::ByteOrder>(
    data: &[u8],
    atom: Atom,
) -> Result<Vec<f64>, SdsError> {
    match atom {
        Atom::Packed => Ok(unpack_bits(data)),
        Atom::Int8 => convert::<i8>(data),
        Atom::Int16 => convert::<I16<O>>(data),
        Atom::Int32 => convert::<I32<O>>(data),
        Atom::Float32 => convert::<U32<O>>(data),
        Atom::Float64 => convert::<U64<O>>(data),
    }
}

/// Decode `data` as a dense array of `atom` scalars in `byte_order`.
///
/// Complex data decodes to interleaved real and imaginary scalars.
pub fn decode(data: &[u8], atom: Atom, byte_order: ByteOrder) -> Result<Vec<f64>, SdsError> {
    match byte_order {
        ByteOrder::Little => decode_ordered::<LittleEndian>(data, atom),
        ByteOrder::Big => decode_ordered::<BigEndian>(data, atom),
    }
}

/// Drop the bits outside a packed read that was widened to byte boundaries.
///
/// `first_byte` is the fractional byte offset of the first wanted bit and `length` the
/// fractional number of bytes spanned from the start of that byte to the last wanted bit. A
/// whole `length` means no trailing trim.
pub fn trim_packed(mut samples: Vec<f64>, first_byte: f64, length: f64) -> Vec<f64> {
    let start_bit = (first_byte.fract() * 8.0).round() as usize;
    let end_bit = (length.fract() * 8.0).round() as usize;
    let extra = if end_bit > 0 { 8 - end_bit } else { 0 };
    let end = samples.len().saturating_sub(extra).max(start_bit.min(samples.len()));
    samples.truncate(end);
    samples.drain(..start_bit.min(end));
    samples
}
