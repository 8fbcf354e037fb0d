//! Decimation engine.
//!
//! Resamples a sequence to a target length. When shrinking, each output value reduces a window
//! of `ceil(len / out)` inputs starting at `round(i * len / out)`; the final window is anchored
//! to the end of the input so the tail is always covered. When growing, each output repeats
//! the input at `floor(i * len / out)`.

use crate::error::SdsError;

use ndarray::ArrayView2;
use std::ops::Range;
use strum_macros::Display;
use tracing::{event, Level};

/// Reduction applied to each decimation window.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
#[strum(serialize_all = "lowercase")]
pub enum Transform {
    Mean,
    Min,
    Max,
    First,
    /// Same as [Transform::First]; use [Transform::MaxAbs] for the largest magnitude.
    AbsMax,
    /// Largest absolute value in the window.
    MaxAbs,
}

impl Transform {
    /// Look up a transform by name. Unknown names resolve to [Transform::First] with a warning.
    pub fn from_name(name: &str) -> Self {
        match name {
            "mean" => Transform::Mean,
            "min" => Transform::Min,
            "max" => Transform::Max,
            "first" => Transform::First,
            "absmax" => Transform::AbsMax,
            "maxabs" => Transform::MaxAbs,
            _ => {
                event!(Level::WARN, "Unknown transform {}, using first", name);
                Transform::First
            }
        }
    }

    /// Reduce one window to a value. Empty windows and NaN results give 0.
    pub fn apply(self, window: &[f64]) -> f64 {
        let Some(&first) = window.first() else {
            return 0.0;
        };
        let value = match self {
            Transform::Mean => window.iter().sum::<f64>() / window.len() as f64,
            Transform::Min => window.iter().copied().fold(first, f64::min),
            Transform::Max => window.iter().copied().fold(first, f64::max),
            Transform::First | Transform::AbsMax => first,
            Transform::MaxAbs => window.iter().map(|v| v.abs()).fold(first.abs(), f64::max),
        };
        if value.is_nan() {
            0.0
        } else {
            value
        }
    }
}

/// Source window for output `index` when resampling `len` inputs to `out_len` outputs.
pub fn window(index: usize, out_len: usize, len: usize) -> Range<usize> {
    let ratio = len as f64 / out_len as f64;
    if ratio > 1.0 {
        let width = ratio.ceil() as usize;
        if index + 1 >= out_len {
            len.saturating_sub(width)..len
        } else {
            let start = ((index as f64 * ratio).round() as usize).min(len);
            start..(start + width).min(len)
        }
    } else {
        let start = ((index as f64 * ratio).floor() as usize).min(len.saturating_sub(1));
        start..(start + 1).min(len)
    }
}

/// Resample `line` into `out`, one window per output slot.
pub fn decimate_x_into(line: &[f64], out: &mut [f64], transform: Transform) {
    let out_len = out.len();
    for (index, value) in out.iter_mut().enumerate() {
        *value = transform.apply(&line[window(index, out_len, line.len())]);
    }
}

/// Resample `line` to `out_len` values.
pub fn decimate_x(line: &[f64], out_len: usize, transform: Transform) -> Vec<f64> {
    let mut out = vec![0.0; out_len];
    decimate_x_into(line, &mut out, transform);
    out
}

/// Reduce a block of equal-length rows to one row, column by column.
///
/// `lines` holds the rows back to back, each `row_len` values long.
pub fn decimate_y(lines: &[f64], row_len: usize, transform: Transform) -> Result<Vec<f64>, SdsError> {
    if row_len == 0 {
        return Ok(Vec::new());
    }
    let rows = lines.len() / row_len;
    let block = ArrayView2::from_shape((rows, row_len), lines)?;
    Ok(block
        .columns()
        .into_iter()
        .map(|column| transform.apply(&column.to_vec()))
        .collect())
}
