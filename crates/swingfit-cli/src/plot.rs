//! Diagnostic PNG of the accepted series: going and swing, one panel each.

use std::path::Path;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use swingfit::SwingSample;

const WIDTH: u32 = 960;
const PANEL_HEIGHT: u32 = 320;
const MARGIN: u32 = 24;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const FRAME: Rgb<u8> = Rgb([96, 96, 96]);
const ZERO: Rgb<u8> = Rgb([200, 200, 200]);
const GOING: Rgb<u8> = Rgb([31, 119, 180]);
const SWING: Rgb<u8> = Rgb([214, 39, 40]);

/// Rate error of each period relative to the series mean, in ppm.
///
/// Positive values mean the period was longer than average.
pub fn going_ppm(series: &[SwingSample]) -> Vec<f64> {
    if series.is_empty() {
        return Vec::new();
    }
    let mean = series.iter().map(|s| s.period_s).sum::<f64>() / series.len() as f64;
    series
        .iter()
        .map(|s| (s.period_s - mean) / mean * 1e6)
        .collect()
}

/// Render `series` into an RGB image.
pub fn render(series: &[SwingSample]) -> RgbImage {
    let mut img = RgbImage::from_pixel(WIDTH, 2 * PANEL_HEIGHT, BACKGROUND);
    let going = going_ppm(series);
    let swing: Vec<f64> = series.iter().map(|s| s.swing_deg).collect();
    draw_panel(&mut img, 0, &going, GOING, true);
    draw_panel(&mut img, PANEL_HEIGHT, &swing, SWING, false);
    img
}

/// Render and save as PNG.
pub fn write_png(path: &Path, series: &[SwingSample]) -> Result<(), image::ImageError> {
    render(series).save(path)
}

fn draw_panel(img: &mut RgbImage, top: u32, values: &[f64], color: Rgb<u8>, zero_line: bool) {
    let x0 = MARGIN as f32;
    let y0 = (top + MARGIN) as f32;
    let w = (WIDTH - 2 * MARGIN) as f32;
    let h = (PANEL_HEIGHT - 2 * MARGIN) as f32;
    draw_hollow_rect_mut(
        img,
        Rect::at(x0 as i32, y0 as i32).of_size(w as u32, h as u32),
        FRAME,
    );
    if values.is_empty() {
        return;
    }

    let (mut lo, mut hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if zero_line {
        lo = lo.min(0.0);
        hi = hi.max(0.0);
    }
    if hi - lo < 1e-12 {
        lo -= 1.0;
        hi += 1.0;
    }
    let span = (values.len().max(2) - 1) as f32;
    let to_px = |i: usize, v: f64| -> (f32, f32) {
        let x = x0 + w * i as f32 / span;
        let y = y0 + h * (1.0 - ((v - lo) / (hi - lo)) as f32);
        (x, y)
    };

    if zero_line {
        let (_, yz) = to_px(0, 0.0);
        draw_line_segment_mut(img, (x0, yz), (x0 + w, yz), ZERO);
    }
    let points: Vec<(f32, f32)> = values.iter().enumerate().map(|(i, &v)| to_px(i, v)).collect();
    for pair in points.windows(2) {
        draw_line_segment_mut(img, pair[0], pair[1], color);
    }
    if points.len() <= 200 {
        for &(x, y) in &points {
            draw_filled_circle_mut(img, (x.round() as i32, y.round() as i32), 2, color);
        }
    }
}
