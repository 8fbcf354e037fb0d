//! Range estimator.
//!
//! Files that fit in the byte budget are scanned in full. Larger files are sampled: four
//! sections of a single long row, or the first and last rows plus evenly spaced middle rows.
//! Sampled ranges are best-effort approximations.

use crate::complex::{self, ComplexMode};
use crate::error::SdsError;
use crate::metrics::ZRANGE_ESTIMATES;
use crate::render::{read_reduced_line, FileGeometry};
use crate::source::ByteRangeSource;

use hashbrown::HashMap;
use rayon::prelude::*;
use std::sync::{Mutex, PoisonError};

/// Value range used to scale rendered output.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ZRange {
    pub zmin: f64,
    pub zmax: f64,
}

/// A run of `xsize` elements of `row` starting at `xstart`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Segment {
    pub row: usize,
    pub xstart: usize,
    pub xsize: usize,
}

/// Segments read to estimate the range of a file within `budget` bytes.
pub fn sample_segments(geometry: &FileGeometry, budget: usize) -> Vec<Segment> {
    let file_x = geometry.file_x_size;
    let file_y = geometry.file_y_size;
    let whole_row = |row| Segment {
        row,
        xstart: 0,
        xsize: file_x,
    };
    if file_x == 0 || file_y == 0 {
        return Vec::new();
    }
    let bpe = geometry.bytes_per_element();
    let row_bytes = file_x as f64 * bpe;
    if row_bytes * (file_y as f64) < budget as f64 {
        return (0..file_y).map(whole_row).collect();
    }

    if file_y == 1 {
        let section = (((budget as f64 / bpe) / 4.0).floor() as usize).clamp(1, file_x);
        let space = file_x.saturating_sub(4 * section) / 3;
        let mut segments: Vec<Segment> = (0..3)
            .map(|k| Segment {
                row: 0,
                xstart: (k * (section + space)).min(file_x - section),
                xsize: section,
            })
            .collect();
        segments.push(Segment {
            row: 0,
            xstart: file_x - section,
            xsize: section,
        });
        return segments;
    }

    let mut segments = vec![whole_row(0), whole_row(file_y - 1)];
    let rows_in_budget = (budget as f64 / row_bytes).floor() as usize;
    let middle = rows_in_budget.saturating_sub(2).min(file_y - 2);
    segments.extend((0..middle).map(|i| whole_row((i + 1) * file_y / (middle + 1))));
    segments
}

/// Memoised value ranges keyed by file identity and complex mode.
#[derive(Debug, Default)]
pub struct ZRangeCache {
    memo: Mutex<HashMap<(String, Option<ComplexMode>), ZRange>>,
}

impl ZRangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Estimate the value range of a whole file.
    ///
    /// The memo lock is not held while reading, so two concurrent first requests for the same
    /// file may both compute the range; the first stored result wins.
    #[tracing::instrument(level = "DEBUG", skip(self, source, geometry), fields(file = source.identity()))]
    pub fn estimate(
        &self,
        source: &dyn ByteRangeSource,
        geometry: &FileGeometry,
        cxmode: Option<ComplexMode>,
        budget: usize,
    ) -> Result<ZRange, SdsError> {
        let key = (source.identity().to_string(), cxmode);
        if let Some(range) = self.lock().get(&key) {
            ZRANGE_ESTIMATES.with_label_values(&["memo"]).inc();
            return Ok(*range);
        }

        let range = compute_range(source, geometry, cxmode, budget)?;
        ZRANGE_ESTIMATES.with_label_values(&["computed"]).inc();
        Ok(*self.lock().entry(key).or_insert(range))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(String, Option<ComplexMode>), ZRange>> {
        self.memo.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Range over the sampled segments of a file, without memoisation.
pub fn compute_range(
    source: &dyn ByteRangeSource,
    geometry: &FileGeometry,
    cxmode: Option<ComplexMode>,
    budget: usize,
) -> Result<ZRange, SdsError> {
    let results: Vec<Result<Option<(f64, f64)>, SdsError>> = sample_segments(geometry, budget)
        .into_par_iter()
        .map(|segment| {
            let line = read_reduced_line(
                source,
                geometry,
                segment.row,
                segment.xstart,
                segment.xsize,
                cxmode,
            )?;
            Ok(complex::value_range(&line))
        })
        .collect();
    let mut range: Option<(f64, f64)> = None;
    for segment_range in results {
        if let Some((min, max)) = segment_range? {
            range = Some(match range {
                None => (min, max),
                Some((zmin, zmax)) => (zmin.min(min), zmax.max(max)),
            });
        }
    }
    let (zmin, zmax) = range.unwrap_or((0.0, 0.0));
    Ok(ZRange { zmin, zmax })
}
