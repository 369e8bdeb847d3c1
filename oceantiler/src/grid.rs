//! Tile grid model.
//!
//! Maps a tile's pyramid address `(zoom, col, row)` onto a rectangular
//! window of the source raster. A zoom level `z` divides the raster into a
//! `2^z x 2^z` grid; each tile's window is its grid slice expanded by a
//! buffer margin so that neighbouring tiles share edge context and the
//! derived contours/shading join seamlessly once trimmed by the destination
//! store.
//!
//! These are pure functions: no I/O, no side effects. Invalid addresses are
//! caller contract violations surfaced as [`GridError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference tile edge length in output pixels.
///
/// Buffer pixels are expressed relative to this size: a buffer of 8 means
/// 8/256ths of a tile's source slice on each side.
pub const REFERENCE_TILE_SIZE: u32 = 256;

/// A tile's address within the pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoord {
    /// Pyramid layer; level `z` has `2^z x 2^z` tiles.
    pub zoom: u8,
    /// Column, `0..2^zoom`.
    pub col: u32,
    /// Row, `0..2^zoom`.
    pub row: u32,
}

impl TileCoord {
    /// Number of rows (and columns) at this tile's zoom level.
    #[inline]
    pub fn num_rows(&self) -> u32 {
        1u32 << self.zoom
    }

    /// Short label used in progress output and destination rows.
    pub fn label(&self) -> String {
        format!("{} - {}", self.col, self.row)
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "z{}/{}_{}", self.zoom, self.col, self.row)
    }
}

/// Grid-wide inputs shared by every tile of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    /// Source raster width in pixels.
    pub src_width: u32,
    /// Source raster height in pixels.
    pub src_height: u32,
    /// Buffer margin in output pixels (relative to [`REFERENCE_TILE_SIZE`]).
    pub tile_buffer_px: u32,
    /// Ratio between internal processing resolution and output resolution.
    pub magnifier: u32,
}

impl GridParams {
    /// Processing-resolution tile edge length: `256 * magnifier`.
    #[inline]
    pub fn magnified_tile_size(&self) -> u32 {
        REFERENCE_TILE_SIZE * self.magnifier
    }

    /// Buffer margin scaled to processing resolution.
    #[inline]
    pub fn scaled_buffer(&self) -> u32 {
        self.tile_buffer_px * self.magnifier
    }
}

/// A tile's buffered source window plus its processing-resolution extent.
///
/// `x`/`y` are in source-raster pixel coordinates and may be negative (or
/// the window may overrun the raster) at pyramid edges: the window is passed
/// verbatim to the subset stage (`gdal_translate -srcwin`), whose clamp/pad
/// behaviour at out-of-range coordinates is that tool's contract. There is
/// no wrap-around joining from the opposite raster edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileWindow {
    /// Buffered window origin, source pixels. May be negative at edges.
    pub x: f64,
    /// Buffered window origin, source pixels. May be negative at edges.
    pub y: f64,
    /// Buffered window extent in source pixels.
    pub src_width: f64,
    /// Buffered window extent in source pixels.
    pub src_height: f64,
    /// Processing-resolution extent: `256*magnifier + 2*buffer*magnifier`.
    pub out_width: u32,
    /// Processing-resolution extent: `256*magnifier + 2*buffer*magnifier`.
    pub out_height: u32,
}

impl TileWindow {
    /// The window's far corner, `(x + src_width, y + src_height)`.
    #[inline]
    pub fn extent(&self) -> (f64, f64) {
        (self.x + self.src_width, self.y + self.src_height)
    }
}

/// A tile's un-buffered core slice with integer edges.
///
/// Edges are computed as `floor(index * subset_size)` on both sides, so the
/// cores of adjacent tiles share an edge exactly: no gaps, no overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreWindow {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Invalid grid inputs. These are caller contract violations, not runtime
/// conditions to recover from.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    /// `col` or `row` is outside `0..2^zoom`.
    #[error("tile {coord} is outside the grid at its zoom level")]
    TileOutOfRange { coord: TileCoord },

    /// Source raster has a zero dimension.
    #[error("source raster has empty dimensions ({width}x{height})")]
    EmptySource { width: u32, height: u32 },
}

fn validate(coord: TileCoord, params: &GridParams) -> Result<(), GridError> {
    if params.src_width == 0 || params.src_height == 0 {
        return Err(GridError::EmptySource {
            width: params.src_width,
            height: params.src_height,
        });
    }
    if coord.col >= coord.num_rows() || coord.row >= coord.num_rows() {
        return Err(GridError::TileOutOfRange { coord });
    }
    Ok(())
}

/// Computes the buffered source window for a tile.
///
/// The buffer purposely makes adjacent windows overlap so that downstream
/// contouring and shading see context past the tile edge; only the core
/// slice is authoritative once the destination store trims overlaps.
pub fn tile_window(coord: TileCoord, params: &GridParams) -> Result<TileWindow, GridError> {
    validate(coord, params)?;

    let num_rows = f64::from(coord.num_rows());
    let subset_width = f64::from(params.src_width) / num_rows;
    let subset_height = f64::from(params.src_height) / num_rows;

    // Buffer expressed as a fraction of the reference tile, in source pixels.
    let buffer = f64::from(params.tile_buffer_px);
    let buffer_x = subset_width / f64::from(REFERENCE_TILE_SIZE) * buffer;
    let buffer_y = subset_height / f64::from(REFERENCE_TILE_SIZE) * buffer;

    Ok(TileWindow {
        x: f64::from(coord.col) * subset_width - buffer_x,
        y: f64::from(coord.row) * subset_height - buffer_y,
        src_width: subset_width + 2.0 * buffer_x,
        src_height: subset_height + 2.0 * buffer_y,
        out_width: params.magnified_tile_size() + 2 * params.scaled_buffer(),
        out_height: params.magnified_tile_size() + 2 * params.scaled_buffer(),
    })
}

/// Computes the un-buffered core slice for a tile.
pub fn core_window(coord: TileCoord, params: &GridParams) -> Result<CoreWindow, GridError> {
    validate(coord, params)?;

    let num_rows = f64::from(coord.num_rows());
    let subset_width = f64::from(params.src_width) / num_rows;
    let subset_height = f64::from(params.src_height) / num_rows;

    let left = (f64::from(coord.col) * subset_width).floor() as u32;
    let right = (f64::from(coord.col + 1) * subset_width).floor() as u32;
    let top = (f64::from(coord.row) * subset_height).floor() as u32;
    let bottom = (f64::from(coord.row + 1) * subset_height).floor() as u32;

    Ok(CoreWindow {
        x: left,
        y: top,
        width: right - left,
        height: bottom - top,
    })
}
