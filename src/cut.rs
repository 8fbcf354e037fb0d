//! X/Y cuts and line plots.
//!
//! A cut reads a single row or column of a raster, a line plot reads a span of a type 1000
//! file. Both are turned into a polyline of `(x, z)` pixel coordinates with consecutive
//! duplicates removed.

use crate::bluefile::Atom;
use crate::complex::{self, ComplexMode};
use crate::error::SdsError;
use crate::render::{read_line, read_reduced_line, FileGeometry};
use crate::source::ByteRangeSource;

use bytes::Bytes;
use rayon::prelude::*;
use zerocopy::byteorder::{LittleEndian, I16};
use zerocopy::AsBytes;

/// Values of `xsize` elements of `row`, starting at column `xstart`.
pub fn x_cut(
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    row: usize,
    xstart: usize,
    xsize: usize,
    cxmode: Option<ComplexMode>,
) -> Result<Vec<f64>, SdsError> {
    geometry.check_bounds(xstart, row, xsize, 1)?;
    read_reduced_line(source, geometry, row, xstart, xsize, cxmode)
}

/// Values of `ysize` elements of `column`, starting at row `ystart`.
///
/// Packed-bit files are not supported.
pub fn y_cut(
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    column: usize,
    ystart: usize,
    ysize: usize,
    cxmode: Option<ComplexMode>,
) -> Result<Vec<f64>, SdsError> {
    if geometry.format.atom == Atom::Packed {
        return Err(SdsError::invalid_request(
            "y cuts are not supported for packed data",
        ));
    }
    geometry.check_bounds(column, ystart, 1, ysize)?;
    let results: Vec<Result<Vec<f64>, SdsError>> = (ystart..ystart + ysize)
        .into_par_iter()
        .map(|row| read_line(source, geometry, row, column, 1))
        .collect();
    let mut samples = Vec::with_capacity(ysize * 2);
    for result in results {
        samples.extend(result?);
    }
    Ok(complex::reduce(
        samples,
        cxmode,
        geometry.format.is_complex(),
    ))
}

/// Map values onto an `outxsize` by `outzsize` pixel grid.
///
/// The encoding is every x coordinate followed by every z coordinate, as little-endian
/// `i16`. A z of 0 is `zmax`.
pub fn polyline(values: &[f64], outxsize: usize, outzsize: usize, zmin: f64, zmax: f64) -> Bytes {
    let xratio = values.len() as f64 / (outxsize as f64 - 1.0);
    let zratio = (zmax - zmin) / (outzsize as f64 - 1.0);
    let mut xs: Vec<i16> = Vec::with_capacity(values.len());
    let mut zs: Vec<i16> = Vec::with_capacity(values.len());
    for (i, value) in values.iter().enumerate() {
        let x = pixel(i as f64 / xratio);
        let z = if zratio == 0.0 {
            0
        } else {
            pixel((zmax - value) / zratio)
        };
        if xs.last() == Some(&x) && zs.last() == Some(&z) {
            continue;
        }
        xs.push(x);
        zs.push(z);
    }
    xs.into_iter()
        .chain(zs)
        .map(I16::<LittleEndian>::new)
        .collect::<Vec<_>>()
        .as_bytes()
        .to_vec()
        .into()
}

fn pixel(position: f64) -> i16 {
    if position.is_finite() {
        position.round() as i16
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bluefile::BlueHeader;
    use crate::source::BytesSource;
    use crate::test_utils::{self, HeaderFields};

    fn fixture() -> (BytesSource, FileGeometry) {
        let file = test_utils::fixture_60x60();
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::raster(&header, None).unwrap();
        (BytesSource::new(file.into(), "fixture"), geometry)
    }

    fn decode_polyline(bytes: &[u8]) -> (Vec<i16>, Vec<i16>) {
        let values: Vec<i16> = bytes
            .chunks(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let (xs, zs) = values.split_at(values.len() / 2);
        (xs.to_vec(), zs.to_vec())
    }

    #[test]
    fn polyline_layout() {
        let bytes = polyline(&[0.0, 1.0, 2.0, 3.0], 4, 4, 0.0, 3.0);
        let (xs, zs) = decode_polyline(&bytes);
        assert_eq!(vec![0, 1, 2, 2], xs);
        assert_eq!(vec![3, 2, 1, 0], zs);
    }

    #[test]
    fn polyline_drops_consecutive_duplicates() {
        let bytes = polyline(&[5.0; 4], 2, 11, 0.0, 10.0);
        assert_eq!(&[0, 0, 1, 0, 5, 0, 5, 0][..], &bytes[..]);
    }

    #[test]
    fn polyline_flat_range() {
        let bytes = polyline(&[1.0, 1.0, 2.0], 3, 10, 1.0, 1.0);
        let (_, zs) = decode_polyline(&bytes);
        assert!(zs.iter().all(|z| *z == 0));
    }

    #[test]
    fn x_cut_first_row() {
        let (source, geometry) = fixture();
        let values = x_cut(&source, &geometry, 0, 0, 60, None).unwrap();
        assert_eq!(vec![0.0; 60], values);
        let (xs, zs) = decode_polyline(&polyline(&values, 60, 10, 0.0, 10.0));
        // Columns 30 and 31 both land on pixel 30.
        assert_eq!(59, xs.len());
        assert!(zs.iter().all(|z| *z == 9));
    }

    #[test]
    fn x_cut_middle_row() {
        let (source, geometry) = fixture();
        let values = x_cut(&source, &geometry, 30, 0, 60, None).unwrap();
        let expected: Vec<f64> = (0..60).map(|col| (col / 6) as f64).collect();
        assert_eq!(expected, values);
    }

    #[test]
    fn x_cut_out_of_bounds() {
        let (source, geometry) = fixture();
        assert!(matches!(
            x_cut(&source, &geometry, 60, 0, 60, None),
            Err(SdsError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn y_cut_column() {
        let (source, geometry) = fixture();
        let values = y_cut(&source, &geometry, 12, 0, 60, None).unwrap();
        assert_eq!(60, values.len());
        assert_eq!(0.0, values[0]);
        assert_eq!(2.0, values[30]);
        assert_eq!(10.0, values[55]);
    }

    #[test]
    fn y_cut_complex_magnitude() {
        let data: Vec<u8> = [3.0_f32, 4.0, 6.0, 8.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let fields = HeaderFields {
            format: "CF".to_string(),
            subsize: 1,
            data_size: data.len() as f64,
            ..Default::default()
        };
        let file = test_utils::bluefile_bytes(&fields, &data);
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::raster(&header, None).unwrap();
        let source = BytesSource::new(file.into(), "complex");
        let values = y_cut(&source, &geometry, 0, 0, 2, Some(ComplexMode::Magnitude)).unwrap();
        assert_eq!(vec![5.0, 10.0], values);
    }

    #[test]
    fn y_cut_packed_rejected() {
        let fields = HeaderFields {
            format: "SP".to_string(),
            subsize: 8,
            data_size: 2.0,
            ..Default::default()
        };
        let file = test_utils::bluefile_bytes(&fields, &[0xff, 0x00]);
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::raster(&header, None).unwrap();
        let source = BytesSource::new(file.into(), "packed");
        assert!(matches!(
            y_cut(&source, &geometry, 0, 0, 2, None),
            Err(SdsError::InvalidRequest { .. })
        ));
    }

    #[test]
    fn line_plot_span() {
        let data: Vec<u8> = (0..10_i16).flat_map(|v| v.to_le_bytes()).collect();
        let fields = HeaderFields {
            format: "SI".to_string(),
            file_type: crate::bluefile::TYPE_LINE,
            subsize: 0,
            data_size: data.len() as f64,
            ..Default::default()
        };
        let file = test_utils::bluefile_bytes(&fields, &data);
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::line(&header).unwrap();
        let source = BytesSource::new(file.into(), "line");
        let values = x_cut(&source, &geometry, 0, 2, 5, None).unwrap();
        assert_eq!(vec![2.0, 3.0, 4.0, 5.0, 6.0], values);
    }
}
