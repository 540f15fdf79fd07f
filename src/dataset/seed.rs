//! Built-in starter datasets.
//!
//! Digit references are rendered from a 5x7 bitmap font, scaled 3x and
//! centred on a black 28x28 canvas with white strokes, the same polarity as
//! captured drawings.

use crate::variant::{DIGIT_IMAGE_SIDE, VariantKind};

use super::{Features, LabeledSample, PixelGrid};

const GLYPH_WIDTH: usize = 5;
const GLYPH_HEIGHT: usize = 7;
const GLYPH_SCALE: usize = 3;

#[rustfmt::skip]
const DIGIT_GLYPHS: [[&str; GLYPH_HEIGHT]; 10] = [
    [".###.", "#...#", "#..##", "#.#.#", "##..#", "#...#", ".###."],
    ["..#..", ".##..", "..#..", "..#..", "..#..", "..#..", ".###."],
    [".###.", "#...#", "....#", "...#.", "..#..", ".#...", "#####"],
    ["#####", "...#.", "..#..", "...#.", "....#", "#...#", ".###."],
    ["...#.", "..##.", ".#.#.", "#..#.", "#####", "...#.", "...#."],
    ["#####", "#....", "####.", "....#", "....#", "#...#", ".###."],
    ["..##.", ".#...", "#....", "####.", "#...#", "#...#", ".###."],
    ["#####", "....#", "...#.", "..#..", ".#...", ".#...", ".#..."],
    [".###.", "#...#", "#...#", ".###.", "#...#", "#...#", ".###."],
    [".###.", "#...#", "#...#", ".####", "....#", "...#.", ".##.."],
];

/// Minimal dataset used when nothing has been persisted yet.
pub fn default_seed(kind: VariantKind) -> Vec<LabeledSample> {
    match kind {
        VariantKind::Brightness => vec![
            LabeledSample::new(Features::rgb(0.0, 0.0, 0.0), "dark"),
            LabeledSample::new(Features::rgb(255.0, 255.0, 255.0), "bright"),
        ],
        VariantKind::Color => vec![
            LabeledSample::new(Features::rgb(255.0, 0.0, 0.0), "red"),
            LabeledSample::new(Features::rgb(0.0, 255.0, 0.0), "green"),
            LabeledSample::new(Features::rgb(0.0, 0.0, 255.0), "blue"),
        ],
        VariantKind::Digit => (0..10u8)
            .filter_map(|digit| {
                reference_digit(digit)
                    .map(|grid| LabeledSample::new(Features::Grid(grid), digit.to_string()))
            })
            .collect(),
    }
}

/// Reference drawing of `digit`, or `None` for values above 9.
pub fn reference_digit(digit: u8) -> Option<PixelGrid> {
    let glyph = DIGIT_GLYPHS.get(usize::from(digit))?;
    let side = DIGIT_IMAGE_SIDE;
    let offset_x = (side - GLYPH_WIDTH * GLYPH_SCALE) / 2;
    let offset_y = (side - GLYPH_HEIGHT * GLYPH_SCALE) / 2;
    let mut grid = PixelGrid::blank(side, side);
    for (row, line) in glyph.iter().enumerate() {
        for (col, cell) in line.bytes().enumerate() {
            if cell != b'#' {
                continue;
            }
            for dy in 0..GLYPH_SCALE {
                for dx in 0..GLYPH_SCALE {
                    grid.set(
                        offset_x + col * GLYPH_SCALE + dx,
                        offset_y + row * GLYPH_SCALE + dy,
                        255,
                    );
                }
            }
        }
    }
    Some(grid)
}
