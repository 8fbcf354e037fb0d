//! Colormap engine.
//!
//! Named colormaps are defined by a handful of control points in percentage space. A palette
//! is a dense table of 8-bit colours interpolated between consecutive control points, and
//! [quantize] maps a value in `[zmin, zmax]` to one palette entry.

use hashbrown::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use strum_macros::Display;
use tracing::{event, Level};

/// Number of palette entries used by renders.
pub const DEFAULT_PALETTE_SIZE: usize = 1000;

/// Alpha channel of every RGBA pixel.
const OPAQUE: u8 = 255;

/// A colormap anchor: position and colour channels, all in percent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControlPoint {
    pub position: f64,
    pub red: f64,
    pub green: f64,
    pub blue: f64,
}

const fn point(position: f64, red: f64, green: f64, blue: f64) -> ControlPoint {
    ControlPoint {
        position,
        red,
        green,
        blue,
    }
}

/// An 8-bit RGB palette entry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub fn new(red: u8, green: u8, blue: u8) -> Self {
        Rgb { red, green, blue }
    }
}

const GREYSCALE: [ControlPoint; 3] = [
    point(0.0, 0.0, 0.0, 0.0),
    point(60.0, 50.0, 50.0, 50.0),
    point(100.0, 100.0, 100.0, 100.0),
];

const RAMP: [ControlPoint; 7] = [
    point(0.0, 0.0, 0.0, 15.0),
    point(10.0, 0.0, 0.0, 50.0),
    point(31.0, 0.0, 65.0, 75.0),
    point(50.0, 0.0, 80.0, 0.0),
    point(70.0, 75.0, 80.0, 0.0),
    point(83.0, 100.0, 60.0, 0.0),
    point(100.0, 100.0, 0.0, 0.0),
];

const COLOR_WHEEL: [ControlPoint; 7] = [
    point(0.0, 100.0, 100.0, 0.0),
    point(20.0, 0.0, 80.0, 40.0),
    point(30.0, 0.0, 100.0, 100.0),
    point(50.0, 10.0, 10.0, 0.0),
    point(65.0, 100.0, 0.0, 0.0),
    point(88.0, 100.0, 40.0, 0.0),
    point(100.0, 100.0, 100.0, 0.0),
];

const SPECTRUM: [ControlPoint; 7] = [
    point(0.0, 0.0, 75.0, 0.0),
    point(22.0, 0.0, 90.0, 90.0),
    point(37.0, 0.0, 0.0, 85.0),
    point(49.0, 90.0, 0.0, 85.0),
    point(68.0, 90.0, 0.0, 0.0),
    point(80.0, 90.0, 90.0, 0.0),
    point(100.0, 95.0, 95.0, 95.0),
];

const CALE_WHITE: [ControlPoint; 7] = [
    point(0.0, 100.0, 100.0, 100.0),
    point(16.666, 0.0, 0.0, 100.0),
    point(33.333, 0.0, 100.0, 100.0),
    point(50.0, 0.0, 100.0, 0.0),
    point(66.666, 100.0, 100.0, 0.0),
    point(83.333, 100.0, 0.0, 0.0),
    point(100.0, 100.0, 0.0, 100.0),
];

const HOT_DESAT: [ControlPoint; 8] = [
    point(0.0, 27.84, 27.84, 85.88),
    point(14.2857, 0.0, 0.0, 35.69),
    point(28.571, 0.0, 100.0, 100.0),
    point(42.857, 0.0, 49.8, 0.0),
    point(57.14286, 100.0, 100.0, 0.0),
    point(71.42857, 100.0, 37.65, 0.0),
    point(85.7143, 41.96, 0.0, 0.0),
    point(100.0, 87.84, 29.8, 29.8),
];

const SUNSET: [ControlPoint; 7] = [
    point(0.0, 10.0, 0.0, 23.0),
    point(18.0, 34.0, 0.0, 60.0),
    point(36.0, 58.0, 20.0, 47.0),
    point(55.0, 74.0, 20.0, 28.0),
    point(72.0, 90.0, 43.0, 0.0),
    point(87.0, 100.0, 72.0, 0.0),
    point(100.0, 100.0, 100.0, 76.0),
];

/// Named colormaps.
#[derive(Clone, Copy, Debug, Display, Eq, Hash, PartialEq)]
pub enum Colormap {
    Greyscale,
    RampColormap,
    ColorWheel,
    Spectrum,
    #[strum(serialize = "calewhite")]
    CaleWhite,
    HotDesat,
    Sunset,
}

impl Colormap {
    /// Look up a colormap by name. Unknown names resolve to [Colormap::RampColormap] with a
    /// warning.
    pub fn from_name(name: &str) -> Self {
        match name {
            "Greyscale" => Colormap::Greyscale,
            "RampColormap" => Colormap::RampColormap,
            "ColorWheel" => Colormap::ColorWheel,
            "Spectrum" => Colormap::Spectrum,
            "calewhite" => Colormap::CaleWhite,
            "HotDesat" => Colormap::HotDesat,
            "Sunset" => Colormap::Sunset,
            _ => {
                event!(Level::WARN, "Unknown colormap {}, using RampColormap", name);
                Colormap::RampColormap
            }
        }
    }

    pub fn control_points(self) -> &'static [ControlPoint] {
        match self {
            Colormap::Greyscale => &GREYSCALE,
            Colormap::RampColormap => &RAMP,
            Colormap::ColorWheel => &COLOR_WHEEL,
            Colormap::Spectrum => &SPECTRUM,
            Colormap::CaleWhite => &CALE_WHITE,
            Colormap::HotDesat => &HOT_DESAT,
            Colormap::Sunset => &SUNSET,
        }
    }
}

fn to_byte(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Scale a percentage to the 8-bit channel range.
fn from_percent(percent: f64) -> f64 {
    percent * 255.0 / 100.0
}

/// Interpolate one channel between two control points, both in percent.
fn interpolate(t: f64, from: f64, to: f64) -> u8 {
    let (from, to) = (from_percent(from), from_percent(to));
    to_byte(t * (to - from) + from)
}

impl From<ControlPoint> for Rgb {
    fn from(point: ControlPoint) -> Self {
        Rgb::new(
            to_byte(from_percent(point.red)),
            to_byte(from_percent(point.green)),
            to_byte(from_percent(point.blue)),
        )
    }
}

/// Expand control points into a palette of `size` entries.
///
/// Entry 0 is the first control point. Each later point at position `p` closes a segment
/// ending just before index `round(p * size / 100)`, whose entries step linearly from the
/// previous point so that the last entry of the segment reaches the point's colour exactly.
pub fn build_palette(points: &[ControlPoint], size: usize) -> Vec<Rgb> {
    let mut palette = vec![Rgb::default(); size];
    let mut points = points.to_vec();
    points.sort_by(|a, b| a.position.total_cmp(&b.position));
    let Some(first) = points.first().copied() else {
        return palette;
    };
    if let Some(entry) = palette.first_mut() {
        *entry = first.into();
    }

    let per_position = size as f64 / 100.0;
    let mut last_filled = 0;
    for pair in points.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let start = last_filled + 1;
        let end = ((to.position * per_position).round() as usize).min(size);
        if end <= start {
            continue;
        }
        for (j, entry) in palette.iter_mut().enumerate().take(end).skip(start) {
            let t = (j + 1 - start) as f64 / (end - start) as f64;
            *entry = Rgb::new(
                interpolate(t, from.red, to.red),
                interpolate(t, from.green, to.green),
                interpolate(t, from.blue, to.blue),
            );
        }
        last_filled = end - 1;
    }
    palette
}

/// Palette index for `value` in `[zmin, zmax]`, clamped to the palette.
pub fn palette_index(value: f64, zmin: f64, zmax: f64, size: usize) -> usize {
    if size == 0 || zmax == zmin {
        return 0;
    }
    let index = ((value - zmin) / ((zmax - zmin) / size as f64)).round();
    if index.is_nan() {
        0
    } else {
        index.clamp(0.0, (size - 1) as f64) as usize
    }
}

/// Map `value` to an opaque RGBA pixel.
pub fn quantize(value: f64, zmin: f64, zmax: f64, palette: &[Rgb]) -> [u8; 4] {
    let colour = palette
        .get(palette_index(value, zmin, zmax, palette.len()))
        .copied()
        .unwrap_or_default();
    [colour.red, colour.green, colour.blue, OPAQUE]
}

/// Palettes built on first use and kept for the life of the process.
#[derive(Debug, Default)]
pub struct PaletteCache {
    palettes: RwLock<HashMap<Colormap, Arc<Vec<Rgb>>>>,
}

impl PaletteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Palette of [DEFAULT_PALETTE_SIZE] entries for `colormap`.
    pub fn get(&self, colormap: Colormap) -> Arc<Vec<Rgb>> {
        if let Some(palette) = self
            .palettes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&colormap)
        {
            return palette.clone();
        }
        let palette = Arc::new(build_palette(
            colormap.control_points(),
            DEFAULT_PALETTE_SIZE,
        ));
        self.palettes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(colormap)
            .or_insert(palette)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colormap_names() {
        for name in [
            "Greyscale",
            "RampColormap",
            "ColorWheel",
            "Spectrum",
            "calewhite",
            "HotDesat",
            "Sunset",
        ] {
            assert_eq!(name, Colormap::from_name(name).to_string());
        }
        assert_eq!(Colormap::RampColormap, Colormap::from_name("Viridis"));
    }

    #[test]
    fn palette_reproduces_control_points() {
        let palette = build_palette(&GREYSCALE, 6);
        assert_eq!(6, palette.len());
        assert_eq!(Rgb::new(0, 0, 0), palette[0]);
        assert_eq!(Rgb::new(128, 128, 128), palette[3]);
        assert_eq!(Rgb::new(255, 255, 255), palette[5]);
    }

    #[test]
    fn palette_segments_interpolate() {
        let palette = build_palette(&GREYSCALE, 6);
        // First segment fills 1..4 in three steps towards 127.5.
        assert_eq!(Rgb::new(43, 43, 43), palette[1]);
        assert_eq!(Rgb::new(85, 85, 85), palette[2]);
        // Second segment fills 4..6 in two steps towards 255.
        assert_eq!(Rgb::new(191, 191, 191), palette[4]);
    }

    #[test]
    fn palette_sorts_control_points() {
        let mut points = GREYSCALE.to_vec();
        points.reverse();
        assert_eq!(build_palette(&GREYSCALE, 50), build_palette(&points, 50));
    }

    #[test]
    fn default_palette_endpoints() {
        for colormap in [Colormap::RampColormap, Colormap::HotDesat, Colormap::CaleWhite] {
            let points = colormap.control_points();
            let palette = build_palette(points, DEFAULT_PALETTE_SIZE);
            let last = points[points.len() - 1];
            assert_eq!(Rgb::from(last), palette[DEFAULT_PALETTE_SIZE - 1]);
        }
    }

    #[test]
    fn quantize_clamps() {
        let palette = build_palette(&GREYSCALE, 6);
        assert_eq!([0, 0, 0, 255], quantize(-100.0, 0.0, 6.0, &palette));
        assert_eq!([255, 255, 255, 255], quantize(100.0, 0.0, 6.0, &palette));
        assert_eq!([128, 128, 128, 255], quantize(3.0, 0.0, 6.0, &palette));
    }

    #[test]
    fn half_intensity_rounds_up() {
        assert_eq!(Rgb::new(128, 128, 128), Rgb::from(point(0.0, 50.0, 50.0, 50.0)));
        assert_eq!(Rgb::new(38, 191, 204), Rgb::from(point(0.0, 15.0, 75.0, 80.0)));
    }

    #[test]
    fn lowest_colours_of_named_colormaps() {
        let cache = PaletteCache::new();
        for (colormap, expected) in [
            (Colormap::RampColormap, [0, 0, 38, 255]),
            (Colormap::Greyscale, [0, 0, 0, 255]),
            (Colormap::ColorWheel, [255, 255, 0, 255]),
            (Colormap::Spectrum, [0, 191, 0, 255]),
        ] {
            let palette = cache.get(colormap);
            assert_eq!(expected, quantize(0.0, 0.0, 2.0, &palette), "{}", colormap);
            // A value at zmin of an explicit range maps to the first colour too.
            assert_eq!(expected, quantize(12.04, 12.04, 50.0, &palette), "{}", colormap);
        }
    }

    #[test]
    fn highest_colour_of_ramp() {
        let palette = build_palette(&RAMP, DEFAULT_PALETTE_SIZE);
        assert_eq!([255, 0, 0, 255], quantize(12.04, 0.0, 12.04, &palette));
    }

    #[test]
    fn quantize_flat_range() {
        let palette = build_palette(&GREYSCALE, 6);
        for value in [-1.0, 0.0, 5.0, f64::NAN, f64::INFINITY] {
            assert_eq!([0, 0, 0, 255], quantize(value, 5.0, 5.0, &palette));
        }
    }

    #[test]
    fn quantize_nan_value() {
        assert_eq!(0, palette_index(f64::NAN, 0.0, 1.0, 10));
    }

    #[test]
    fn palette_cache_memoises() {
        let cache = PaletteCache::new();
        let first = cache.get(Colormap::Sunset);
        let second = cache.get(Colormap::Sunset);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(DEFAULT_PALETTE_SIZE, first.len());
    }
}
