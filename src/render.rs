//! Request orchestrator for raster renders.
//!
//! A render walks the output rows in order. For each output row it reads the block of source
//! rows that feed it, X-decimates every source row in parallel into its own slot of a
//! pre-sized buffer, then Y-decimates the block into one output row.

use crate::bluefile::{Atom, BlueHeader, FormatInfo, TYPE_LINE, TYPE_RASTER};
use crate::colormap::Rgb;
use crate::complex::{self, ComplexMode};
use crate::decimation::{self, Transform};
use crate::decode::{decode, trim_packed};
use crate::encoder::{encode, OutputFormat};
use crate::error::SdsError;
use crate::source::ByteRangeSource;
use crate::types::ByteOrder;

use bytes::Bytes;
use rayon::prelude::*;
use std::ops::Range;

/// Layout of the sample data of one file.
#[derive(Clone, Debug, PartialEq)]
pub struct FileGeometry {
    pub format: FormatInfo,
    pub byte_order: ByteOrder,
    /// Byte offset of the first sample.
    pub data_offset: u64,
    /// Elements per row.
    pub file_x_size: usize,
    /// Number of rows.
    pub file_y_size: usize,
    pub xstart: f64,
    pub xdelta: f64,
    pub ystart: f64,
    pub ydelta: f64,
}

impl FileGeometry {
    fn new(header: &BlueHeader, file_x_size: usize, file_y_size: usize) -> Result<Self, SdsError> {
        Ok(FileGeometry {
            format: header.format_info()?,
            byte_order: header.byte_order(),
            data_offset: header.data_start.max(0.0) as u64,
            file_x_size,
            file_y_size,
            xstart: header.xstart,
            xdelta: header.xdelta,
            ystart: header.ystart,
            ydelta: header.ydelta,
        })
    }

    /// Geometry of a 2-D raster. `subsize` overrides the header's row width and is required
    /// for type 1000 files.
    pub fn raster(header: &BlueHeader, subsize: Option<usize>) -> Result<Self, SdsError> {
        let file_x_size = match (header.file_type, subsize) {
            (TYPE_RASTER | TYPE_LINE, Some(subsize)) => subsize,
            (TYPE_RASTER, None) => usize::try_from(header.subsize).map_err(|_| {
                SdsError::invalid_request(format!("invalid header subsize {}", header.subsize))
            })?,
            (TYPE_LINE, None) => {
                return Err(SdsError::invalid_request(
                    "for type 1000 files, a subsize needs to be set",
                ))
            }
            (file_type, _) => {
                return Err(SdsError::invalid_request(format!(
                    "unsupported file type {}",
                    file_type
                )))
            }
        };
        if file_x_size == 0 {
            return Err(SdsError::invalid_request("row width must be at least 1"));
        }
        let format = header.format_info()?;
        let scalars = (header.data_size / format.bytes_per_scalar).floor().max(0.0) as usize;
        let mut file_y_size = scalars / file_x_size;
        if format.is_complex() {
            file_y_size /= 2;
        }
        Self::new(header, file_x_size, file_y_size)
    }

    /// Geometry of a type 1000 file viewed as a single row.
    pub fn line(header: &BlueHeader) -> Result<Self, SdsError> {
        if header.file_type != TYPE_LINE {
            return Err(SdsError::invalid_request(
                "line plots are only supported for type 1000 files",
            ));
        }
        let format = header.format_info()?;
        let file_x_size = (header.data_size / format.bytes_per_atom()).floor().max(0.0) as usize;
        Self::new(header, file_x_size, 1)
    }

    /// Bytes per element, fractional for packed bits.
    pub fn bytes_per_element(&self) -> f64 {
        self.format.bytes_per_atom()
    }

    /// Check that a source rectangle lies inside the file.
    pub fn check_bounds(
        &self,
        xstart: usize,
        ystart: usize,
        xsize: usize,
        ysize: usize,
    ) -> Result<(), SdsError> {
        if xsize < 1 || ysize < 1 {
            return Err(SdsError::invalid_request(format!(
                "region size {}x{} must be at least 1x1",
                xsize, ysize
            )));
        }
        if xstart + xsize > self.file_x_size || ystart + ysize > self.file_y_size {
            return Err(SdsError::invalid_request(format!(
                "region {}+{} x {}+{} outside file of {}x{}",
                xstart, xsize, ystart, ysize, self.file_x_size, self.file_y_size
            )));
        }
        Ok(())
    }
}

/// Read and decode `xsize` elements of `row` starting at column `xstart`.
///
/// Returns scalars before complex reduction.
pub fn read_line(
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    row: usize,
    xstart: usize,
    xsize: usize,
) -> Result<Vec<f64>, SdsError> {
    let bpe = geometry.bytes_per_element();
    let first_byte = (row * geometry.file_x_size + xstart) as f64 * bpe;
    let length = xsize as f64 * bpe + first_byte.fract();
    let bytes = source.read_at(
        geometry.data_offset + first_byte.floor() as u64,
        length.ceil() as usize,
    )?;
    let samples = decode(&bytes, geometry.format.atom, geometry.byte_order)?;
    Ok(match geometry.format.atom {
        Atom::Packed => trim_packed(samples, first_byte, length),
        _ => samples,
    })
}

/// Read one row segment and reduce it to one value per element.
pub fn read_reduced_line(
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    row: usize,
    xstart: usize,
    xsize: usize,
    cxmode: Option<ComplexMode>,
) -> Result<Vec<f64>, SdsError> {
    let samples = read_line(source, geometry, row, xstart, xsize)?;
    Ok(complex::reduce(
        samples,
        cxmode,
        geometry.format.is_complex(),
    ))
}

/// A validated render of one source rectangle.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderRequest {
    pub xstart: usize,
    pub ystart: usize,
    pub xsize: usize,
    pub ysize: usize,
    pub outxsize: usize,
    pub outysize: usize,
    pub transform: Transform,
    pub cxmode: Option<ComplexMode>,
    pub output: OutputFormat,
}

/// Source rows feeding output row `index` of `out_len`.
pub fn row_window(index: usize, out_len: usize, ystart: usize, ysize: usize) -> Range<usize> {
    let window = decimation::window(index, out_len, ysize);
    ystart + window.start..ystart + window.end
}

/// Render a rectangle to output values, row-major.
#[tracing::instrument(level = "DEBUG", skip(source, geometry))]
pub fn render_values(
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    request: &RenderRequest,
) -> Result<Vec<f64>, SdsError> {
    geometry.check_bounds(request.xstart, request.ystart, request.xsize, request.ysize)?;
    if request.outxsize < 1 || request.outysize < 1 {
        return Err(SdsError::invalid_request("output size must be at least 1x1"));
    }

    let mut output = Vec::with_capacity(request.outxsize * request.outysize);
    for out_row in 0..request.outysize {
        let rows = row_window(out_row, request.outysize, request.ystart, request.ysize);
        let mut block = vec![0.0; rows.len() * request.outxsize];
        // Every row task runs to completion before the first failure is reported.
        let results: Vec<Result<(), SdsError>> = block
            .par_chunks_mut(request.outxsize)
            .zip(rows.into_par_iter())
            .map(|(slot, row)| {
                let line = read_reduced_line(
                    source,
                    geometry,
                    row,
                    request.xstart,
                    request.xsize,
                    request.cxmode,
                )?;
                decimation::decimate_x_into(&line, slot, request.transform);
                Ok(())
            })
            .collect();
        results.into_iter().collect::<Result<Vec<()>, _>>()?;
        output.extend(decimation::decimate_y(
            &block,
            request.outxsize,
            request.transform,
        )?);
    }
    Ok(output)
}

/// Render a rectangle and encode it.
pub fn render(
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    request: &RenderRequest,
    zmin: f64,
    zmax: f64,
    palette: &[Rgb],
) -> Result<Bytes, SdsError> {
    let values = render_values(source, geometry, request)?;
    Ok(encode(&values, request.output, zmin, zmax, palette))
}

/// Tile edge lengths accepted by the tile endpoint.
pub const TILE_SIZES: [usize; 5] = [100, 200, 300, 400, 500];

/// Decimation factor for each tile decimation mode.
pub const TILE_DECIMATION: [usize; 11] = [1, 1, 2, 4, 8, 16, 32, 64, 128, 256, 512];

/// Source rectangle and output size of a tile.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TileRegion {
    pub xstart: usize,
    pub ystart: usize,
    pub xsize: usize,
    pub ysize: usize,
    pub outxsize: usize,
    pub outysize: usize,
}

/// Locate a tile in the file, shrinking it where it overruns the file edge.
pub fn tile_region(
    geometry: &FileGeometry,
    tile_x_size: usize,
    tile_y_size: usize,
    dec_x: usize,
    dec_y: usize,
    tile_x: usize,
    tile_y: usize,
) -> Result<TileRegion, SdsError> {
    let xstart = tile_x * tile_x_size * dec_x;
    let ystart = tile_y * tile_y_size * dec_y;
    if xstart >= geometry.file_x_size || ystart >= geometry.file_y_size {
        return Err(SdsError::invalid_request(format!(
            "tile ({}, {}) starts outside file of {}x{}",
            tile_x, tile_y, geometry.file_x_size, geometry.file_y_size
        )));
    }
    let (xsize, outxsize) = clip(xstart, tile_x_size * dec_x, tile_x_size, dec_x, geometry.file_x_size);
    let (ysize, outysize) = clip(ystart, tile_y_size * dec_y, tile_y_size, dec_y, geometry.file_y_size);
    Ok(TileRegion {
        xstart,
        ystart,
        xsize,
        ysize,
        outxsize,
        outysize,
    })
}

fn clip(start: usize, size: usize, out: usize, dec: usize, file_size: usize) -> (usize, usize) {
    if start + size > file_size {
        let size = file_size - start;
        (size, (size / dec).max(1))
    } else {
        (size, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::source::BytesSource;
    use crate::test_utils::{self, HeaderFields};

    fn fixture() -> (BytesSource, FileGeometry) {
        let file = test_utils::fixture_60x60();
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::raster(&header, None).unwrap();
        (BytesSource::new(file.into(), "fixture"), geometry)
    }

    fn request(xstart: usize, ystart: usize, xsize: usize, ysize: usize) -> RenderRequest {
        RenderRequest {
            xstart,
            ystart,
            xsize,
            ysize,
            outxsize: xsize,
            outysize: ysize,
            transform: Transform::First,
            cxmode: None,
            output: OutputFormat::Atom(Atom::Int8),
        }
    }

    #[test]
    fn fixture_geometry() {
        let (_, geometry) = fixture();
        assert_eq!(60, geometry.file_x_size);
        assert_eq!(60, geometry.file_y_size);
        assert_eq!(512, geometry.data_offset);
    }

    #[test]
    fn single_points() {
        let (source, geometry) = fixture();
        assert_eq!(vec![0.0], render_values(&source, &geometry, &request(0, 0, 1, 1)).unwrap());
        assert_eq!(
            vec![10.0],
            render_values(&source, &geometry, &request(59, 59, 1, 1)).unwrap()
        );
    }

    #[test]
    fn mean_of_first_block() {
        let (source, geometry) = fixture();
        let request = RenderRequest {
            outxsize: 1,
            outysize: 1,
            transform: Transform::Mean,
            ..request(0, 0, 10, 10)
        };
        assert_eq!(vec![0.0], render_values(&source, &geometry, &request).unwrap());
    }

    #[test]
    fn identity_render() {
        let (source, geometry) = fixture();
        let data = &test_utils::fixture_60x60()[512..];
        let values = render_values(&source, &geometry, &request(5, 8, 20, 40)).unwrap();
        let expected: Vec<f64> = (8..48)
            .flat_map(|row| (5..25).map(move |col| data[row * 60 + col] as f64))
            .collect();
        assert_eq!(expected, values);
    }

    #[test]
    fn repeated_renders_identical() {
        let (source, geometry) = fixture();
        let request = RenderRequest {
            outxsize: 7,
            outysize: 9,
            transform: Transform::Mean,
            ..request(0, 0, 60, 60)
        };
        let first = render(&source, &geometry, &request, 0.0, 10.0, &[]).unwrap();
        for _ in 0..5 {
            assert_eq!(first, render(&source, &geometry, &request, 0.0, 10.0, &[]).unwrap());
        }
    }

    #[test]
    fn expansion_repeats_rows() {
        let (source, geometry) = fixture();
        let request = RenderRequest {
            outxsize: 2,
            outysize: 4,
            ..request(59, 9, 1, 2)
        };
        assert_eq!(
            vec![0.0, 0.0, 0.0, 0.0, 9.0, 9.0, 9.0, 9.0],
            render_values(&source, &geometry, &request).unwrap()
        );
    }

    #[test]
    fn out_of_bounds_rejected() {
        let (source, geometry) = fixture();
        for request in [request(50, 0, 11, 1), request(0, 60, 1, 1), request(0, 0, 0, 1)] {
            assert!(matches!(
                render_values(&source, &geometry, &request),
                Err(SdsError::InvalidRequest { .. })
            ));
        }
    }

    #[test]
    fn read_error_surfaces() {
        let (_, geometry) = fixture();
        let truncated = test_utils::fixture_60x60()[..512 + 60 * 30].to_vec();
        let source = BytesSource::new(truncated.into(), "truncated");
        let request = RenderRequest {
            outysize: 1,
            ..request(0, 0, 60, 60)
        };
        assert!(matches!(
            render_values(&source, &geometry, &request),
            Err(SdsError::ShortRead { .. })
        ));
    }

    #[test]
    fn complex_magnitude_render() {
        let mut data = Vec::new();
        for (re, im) in [(3_i16, 4_i16), (0, 1), (-6, 8), (1, 0)] {
            data.extend_from_slice(&re.to_le_bytes());
            data.extend_from_slice(&im.to_le_bytes());
        }
        let fields = HeaderFields {
            format: "CI".to_string(),
            subsize: 2,
            data_size: data.len() as f64,
            ..Default::default()
        };
        let file = test_utils::bluefile_bytes(&fields, &data);
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::raster(&header, None).unwrap();
        assert_eq!(2, geometry.file_y_size);
        let source = BytesSource::new(file.into(), "complex");
        let request = RenderRequest {
            cxmode: Some(ComplexMode::Magnitude),
            ..request(0, 0, 2, 2)
        };
        assert_eq!(
            vec![5.0, 1.0, 10.0, 1.0],
            render_values(&source, &geometry, &request).unwrap()
        );
    }

    #[test]
    fn packed_line_read_unaligned() {
        // One row of 20 bits: 0b1100_1010 0b0101_0101 0b1111_0000.
        let data = [0b1100_1010, 0b0101_0101, 0b1111_0000];
        let fields = HeaderFields {
            format: "SP".to_string(),
            subsize: 20,
            data_size: 2.5,
            ..Default::default()
        };
        let file = test_utils::bluefile_bytes(&fields, &data);
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::raster(&header, None).unwrap();
        let source = BytesSource::new(file.into(), "packed");
        let line = read_line(&source, &geometry, 0, 3, 10).unwrap();
        assert_eq!(
            vec![0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0],
            line
        );
    }

    #[test]
    fn big_endian_samples() {
        let data: Vec<u8> = [1_i16, -2, 300, 4].iter().flat_map(|v| v.to_be_bytes()).collect();
        let fields = HeaderFields {
            format: "SI".to_string(),
            subsize: 2,
            data_size: data.len() as f64,
            data_rep: "IEEE".to_string(),
            ..Default::default()
        };
        let file = test_utils::bluefile_bytes(&fields, &data);
        let header = BlueHeader::from_bytes(&file).unwrap();
        let geometry = FileGeometry::raster(&header, None).unwrap();
        let source = BytesSource::new(file.into(), "be");
        assert_eq!(
            vec![1.0, -2.0, 300.0, 4.0],
            render_values(&source, &geometry, &request(0, 0, 2, 2)).unwrap()
        );
    }

    #[test]
    fn raster_geometry_rules() {
        let line_fields = HeaderFields {
            file_type: TYPE_LINE,
            subsize: 0,
            data_size: 100.0,
            ..Default::default()
        };
        let header = BlueHeader::from_bytes(&test_utils::header_bytes(&line_fields)).unwrap();
        assert!(matches!(
            FileGeometry::raster(&header, None),
            Err(SdsError::InvalidRequest { .. })
        ));
        let geometry = FileGeometry::raster(&header, Some(10)).unwrap();
        assert_eq!((10, 10), (geometry.file_x_size, geometry.file_y_size));

        let other = HeaderFields {
            file_type: 3000,
            ..Default::default()
        };
        let header = BlueHeader::from_bytes(&test_utils::header_bytes(&other)).unwrap();
        assert!(FileGeometry::raster(&header, Some(10)).is_err());
    }

    #[test]
    fn line_geometry() {
        let fields = HeaderFields {
            format: "CF".to_string(),
            file_type: TYPE_LINE,
            data_size: 80.0,
            ..Default::default()
        };
        let header = BlueHeader::from_bytes(&test_utils::header_bytes(&fields)).unwrap();
        let geometry = FileGeometry::line(&header).unwrap();
        assert_eq!((10, 1), (geometry.file_x_size, geometry.file_y_size));
    }

    #[test]
    fn tile_regions() {
        let (_, geometry) = fixture();
        let region = tile_region(&geometry, 100, 100, 1, 1, 0, 0).unwrap();
        assert_eq!(
            TileRegion {
                xstart: 0,
                ystart: 0,
                xsize: 60,
                ysize: 60,
                outxsize: 60,
                outysize: 60
            },
            region
        );
        let region = tile_region(&geometry, 100, 100, 4, 2, 0, 0).unwrap();
        assert_eq!((60, 15), (region.xsize, region.outxsize));
        assert_eq!((60, 30), (region.ysize, region.outysize));
        assert!(tile_region(&geometry, 100, 100, 1, 1, 1, 0).is_err());
    }
}
