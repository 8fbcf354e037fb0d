//! Request parameters, response metadata and associated validation

use crate::colormap::Colormap;
use crate::complex::ComplexMode;
use crate::decimation::Transform;
use crate::encoder::OutputFormat;
use crate::error::SdsError;
use crate::render::{TILE_DECIMATION, TILE_SIZES};

use axum::body::Bytes;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Path parameters of a tile request
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "validate_tile_path"))]
pub struct TilePath {
    pub location: String,
    pub tile_x_size: usize,
    pub tile_y_size: usize,
    #[validate(range(max = 10, message = "decimation mode must be between 0 and 10"))]
    pub dec_x_mode: usize,
    #[validate(range(max = 10, message = "decimation mode must be between 0 and 10"))]
    pub dec_y_mode: usize,
    pub tile_x: usize,
    pub tile_y: usize,
    pub file_path: String,
}

impl TilePath {
    /// Decimation factors for the X and Y modes.
    pub fn decimation(&self) -> (usize, usize) {
        (
            TILE_DECIMATION[self.dec_x_mode.min(10)],
            TILE_DECIMATION[self.dec_y_mode.min(10)],
        )
    }
}

fn validate_tile_path(path: &TilePath) -> Result<(), ValidationError> {
    if !TILE_SIZES.contains(&path.tile_x_size) || !TILE_SIZES.contains(&path.tile_y_size) {
        return Err(ValidationError::new(
            "tile size must be one of 100, 200, 300, 400 or 500",
        ));
    }
    Ok(())
}

/// Path parameters of a region request
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "validate_region_path"))]
pub struct RegionPath {
    pub x1: usize,
    pub y1: usize,
    pub x2: usize,
    pub y2: usize,
    #[validate(range(min = 1, message = "outxsize must be greater than 0"))]
    pub outxsize: usize,
    #[validate(range(min = 1, message = "outysize must be greater than 0"))]
    pub outysize: usize,
    pub location: String,
    pub file_path: String,
}

impl RegionPath {
    /// Source rectangle as `(xstart, ystart, xsize, ysize)`.
    pub fn rectangle(&self) -> (usize, usize, usize, usize) {
        (
            self.x1.min(self.x2),
            self.y1.min(self.y2),
            self.x1.abs_diff(self.x2),
            self.y1.abs_diff(self.y2),
        )
    }
}

fn validate_region_path(path: &RegionPath) -> Result<(), ValidationError> {
    if path.x1 == path.x2 || path.y1 == path.y2 {
        return Err(ValidationError::new("region must be at least 1x1"));
    }
    Ok(())
}

/// Path parameters of an X or Y cut
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
pub struct CutPath {
    pub x1: usize,
    pub y1: usize,
    pub x2: usize,
    pub y2: usize,
    #[validate(range(min = 1, message = "outxsize must be greater than 0"))]
    pub outxsize: usize,
    #[validate(range(min = 1, message = "outzsize must be greater than 0"))]
    pub outzsize: usize,
    pub location: String,
    pub file_path: String,
}

/// Path parameters of a line plot
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
#[validate(schema(function = "validate_line_path"))]
pub struct LinePath {
    pub x1: usize,
    pub x2: usize,
    #[validate(range(min = 1, message = "outxsize must be greater than 0"))]
    pub outxsize: usize,
    #[validate(range(min = 1, message = "outzsize must be greater than 0"))]
    pub outzsize: usize,
    pub location: String,
    pub file_path: String,
}

fn validate_line_path(path: &LinePath) -> Result<(), ValidationError> {
    if path.x1 == path.x2 {
        return Err(ValidationError::new("line must span at least 1 element"));
    }
    Ok(())
}

/// Path parameters addressing one file
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
pub struct FilePath {
    pub location: String,
    pub file_path: String,
}

/// Path parameters of a file system listing
#[derive(Clone, Debug, Deserialize, PartialEq, Validate)]
pub struct BrowsePath {
    pub location: String,
    #[serde(default)]
    pub path: String,
}

/// Query parameters shared by render endpoints
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Validate)]
pub struct RenderQuery {
    pub transform: Option<String>,
    pub cxmode: Option<String>,
    pub colormap: Option<String>,
    pub outfmt: Option<String>,
    pub zmin: Option<f64>,
    pub zmax: Option<f64>,
    #[validate(range(min = 1, message = "subsize must be greater than 0"))]
    pub subsize: Option<usize>,
}

impl RenderQuery {
    /// Requested reduction, `first` by default.
    pub fn transform(&self) -> Transform {
        self.transform
            .as_deref()
            .map_or(Transform::First, Transform::from_name)
    }

    /// Requested complex mode, if any.
    pub fn cxmode(&self) -> Option<ComplexMode> {
        self.cxmode.as_deref().map(ComplexMode::from_name)
    }

    /// Requested colormap, `RampColormap` by default.
    pub fn colormap(&self) -> Colormap {
        self.colormap
            .as_deref()
            .map_or(Colormap::RampColormap, Colormap::from_name)
    }

    /// Requested output format, `RGBA` by default.
    pub fn output_format(&self) -> Result<OutputFormat, SdsError> {
        self.outfmt
            .as_deref()
            .map_or(Ok(OutputFormat::Rgba), OutputFormat::from_code)
    }

    /// Explicit value range. Both bounds must be given to disable estimation.
    pub fn explicit_range(&self) -> Option<(f64, f64)> {
        self.zmin.zip(self.zmax)
    }
}

/// Geometry and value range of a rendered output, stored alongside cached entries and echoed
/// in response headers.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct FileMetaData {
    pub outxsize: usize,
    pub outysize: usize,
    pub outzsize: usize,
    pub zmin: f64,
    pub zmax: f64,
    pub filexstart: f64,
    pub filexdelta: f64,
    pub fileystart: f64,
    pub fileydelta: f64,
    pub xstart: usize,
    pub xsize: usize,
    pub ystart: usize,
    pub ysize: usize,
}

impl FileMetaData {
    /// Source-file X coordinate of the first column.
    pub fn xmin(&self) -> f64 {
        self.filexstart + self.filexdelta * self.xstart as f64
    }

    /// Source-file X coordinate just past the last column.
    pub fn xmax(&self) -> f64 {
        self.filexstart + self.filexdelta * (self.xstart + self.xsize) as f64
    }

    pub fn ymin(&self) -> f64 {
        self.fileystart + self.fileydelta * self.ystart as f64
    }

    pub fn ymax(&self) -> f64 {
        self.fileystart + self.fileydelta * (self.ystart + self.ysize) as f64
    }
}

/// One entry of a directory listing
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct DirEntry {
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: String,
}

/// Rendered output and the metadata describing it.
pub struct Response {
    /// Encoded output
    pub body: Bytes,
    /// Geometry and value range of the output
    pub metadata: FileMetaData,
    /// Whether the output is a polyline, which also reports `outzsize`
    pub line: bool,
}

impl Response {
    /// Return a Response object
    pub fn new(body: Bytes, metadata: FileMetaData, line: bool) -> Response {
        Response {
            body,
            metadata,
            line,
        }
    }
}
