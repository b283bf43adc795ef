//! Square grid code: a dark border ring around a 3×3 payload.
//!
//! The 5×5 grid (ring included) carries five identifier bits on the plus
//! shaped payload cells and a rotation anchor on the four payload corners:
//! the top-left one is light, the other three are dark.
//!
//! ```text
//!   . . . . . . .     . margin (light)
//!   . # # # # # .     # ring (dark)
//!   . # A 0 d # .     A anchor (light), d anchor (dark)
//!   . # 1 2 4 # .     0..4 identifier bits, LSB first, light = 1
//!   . # d 3 d # .
//!   . # # # # # .
//!   . . . . . . .
//! ```

use image::{GrayImage, Luma};
use imageproc::drawing::draw_filled_rect_mut;
use imageproc::rect::Rect;
use marker_track_core::{binarize_samples, GrayImageView};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::sampling::{border_cells, sample_grid};
use crate::{CodeError, DecodeError};

/// Cells per side of the sampled grid, border ring included.
pub const GRID_SIZE: usize = 5;
/// Largest identifier a square code can carry.
pub const MAX_SQUARE_ID: u32 = 31;

/// Payload cells `(column, row)` holding bits 0..5.
const CODE_POINTS: [(usize, usize); 5] = [(1, 0), (0, 1), (1, 1), (1, 2), (2, 1)];
/// Payload corners in clockwise order starting at the top-left, as grid `(row, col)`.
const ANCHORS: [(usize, usize); 4] = [(1, 1), (1, 3), (3, 3), (3, 1)];

/// Light (`true`) / dark (`false`) cells, indexed `[row][col]`.
pub type CodeGrid = [[bool; GRID_SIZE]; GRID_SIZE];

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SquareParams {
    /// Minimum gray range over the grid samples.
    pub min_contrast: u8,
    /// Light cells tolerated on the border ring.
    pub max_light_border: usize,
}

impl Default for SquareParams {
    fn default() -> Self {
        Self {
            min_contrast: 30,
            max_light_border: 1,
        }
    }
}

/// A successfully read square code.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquareDecode {
    pub id: u32,
    /// How many corners the input quad must be rotated by so that
    /// `quad[0]` becomes the marker's top-left corner.
    pub rotation: usize,
    /// Input quad re-rooted at the marker's top-left corner.
    pub quad: [Point2<f32>; 4],
}

/// Cell pattern for identifier `id` in canonical orientation.
pub fn encode_square(id: u32) -> Result<CodeGrid, CodeError> {
    if id > MAX_SQUARE_ID {
        return Err(CodeError::IdOutOfRange {
            id,
            max: MAX_SQUARE_ID,
        });
    }
    let mut grid = [[false; GRID_SIZE]; GRID_SIZE];
    for (bit, &(col, row)) in CODE_POINTS.iter().enumerate() {
        grid[row + 1][col + 1] = (id >> bit) & 1 == 1;
    }
    let (r, c) = ANCHORS[0];
    grid[r][c] = true;
    Ok(grid)
}

/// Printable marker: one light margin cell, the dark ring and the payload.
///
/// The result is `7 * cell_px` pixels wide. The ring's outer border sits at
/// `cell_px` from the image edge.
pub fn render_square(id: u32, cell_px: u32) -> Result<GrayImage, CodeError> {
    if cell_px == 0 {
        return Err(CodeError::ZeroCellSize);
    }
    let grid = encode_square(id)?;
    let side = (GRID_SIZE as u32 + 2) * cell_px;
    let mut img = GrayImage::from_pixel(side, side, Luma([255]));
    for (r, row) in grid.iter().enumerate() {
        for (c, &light) in row.iter().enumerate() {
            if light {
                continue;
            }
            let x = ((c as u32 + 1) * cell_px) as i32;
            let y = ((r as u32 + 1) * cell_px) as i32;
            draw_filled_rect_mut(&mut img, Rect::at(x, y).of_size(cell_px, cell_px), Luma([0]));
        }
    }
    Ok(img)
}

/// Read the identifier and orientation of a binarized grid as seen in the
/// image.
///
/// With `flip_horizontal` the canonical grid is transposed before the bits
/// are read, which undoes a mirrored view.
pub fn decode_grid(
    observed: &CodeGrid,
    flip_horizontal: bool,
) -> Result<(u32, usize), DecodeError> {
    let mut rotation = None;
    for (k, &(r, c)) in ANCHORS.iter().enumerate() {
        if observed[r][c] {
            if rotation.is_some() {
                return Err(DecodeError::NoRotationAnchor);
            }
            rotation = Some(k);
        }
    }
    let rotation = rotation.ok_or(DecodeError::NoRotationAnchor)?;

    let mut canonical = rotate_grid(observed, rotation);
    if flip_horizontal {
        transpose(&mut canonical);
    }
    let id = CODE_POINTS
        .iter()
        .enumerate()
        .filter(|&(_, &(col, row))| canonical[row + 1][col + 1])
        .fold(0u32, |acc, (bit, _)| acc | (1 << bit));
    Ok((id, rotation))
}

/// Sample, binarize and decode the square code inside `quad`.
///
/// `quad` must be clockwise on screen; the result is re-rooted so its first
/// corner is the marker's top-left corner.
pub fn decode_square(
    img: &GrayImageView<'_>,
    quad: &[Point2<f32>; 4],
    flip_horizontal: bool,
    params: &SquareParams,
) -> Result<SquareDecode, DecodeError> {
    let samples = sample_grid(img, quad, GRID_SIZE)?;
    let (lo, hi) = samples
        .iter()
        .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi.saturating_sub(lo);
    if range < params.min_contrast {
        return Err(DecodeError::LowContrast {
            range,
            min: params.min_contrast,
        });
    }

    let bits = binarize_samples(&samples);
    let mut grid = [[false; GRID_SIZE]; GRID_SIZE];
    for (i, light) in bits.into_iter().enumerate() {
        grid[i / GRID_SIZE][i % GRID_SIZE] = light;
    }

    let light_border = border_cells(GRID_SIZE)
        .into_iter()
        .filter(|&(r, c)| grid[r][c])
        .count();
    if light_border > params.max_light_border {
        return Err(DecodeError::BorderMismatch {
            light: light_border,
            max: params.max_light_border,
        });
    }

    let (id, rotation) = decode_grid(&grid, flip_horizontal)?;
    Ok(SquareDecode {
        id,
        rotation,
        quad: std::array::from_fn(|i| quad[(i + rotation) % 4]),
    })
}

/// Grid as it reads with corner `rotation` of the observed grid moved to the
/// top-left.
fn rotate_grid(m: &CodeGrid, rotation: usize) -> CodeGrid {
    let n = GRID_SIZE - 1;
    std::array::from_fn(|a| {
        std::array::from_fn(|b| match rotation % 4 {
            0 => m[a][b],
            1 => m[b][n - a],
            2 => m[n - a][n - b],
            _ => m[n - b][a],
        })
    })
}

fn transpose(m: &mut CodeGrid) {
    for a in 0..GRID_SIZE {
        for b in (a + 1)..GRID_SIZE {
            let t = m[a][b];
            m[a][b] = m[b][a];
            m[b][a] = t;
        }
    }
}
