//! Declarative stage chain construction.
//!
//! [`build_chain`] turns a tile's window plus the run configuration into the
//! ordered list of external-utility invocations that process the tile:
//!
//! ```text
//! subset -> resample? -> contour? -> clip? -> shade -> threshold xN
//!        -> combine -> georeference -> polygonize -> tag-zoom
//!        -> copy-output? -> persist
//! ```
//!
//! Every artifact lives inside the tile's scoped workspace; the chain is
//! pure data and can be inspected in tests without running anything.

use crate::config::RunConfig;
use crate::exec::StageCommand;
use crate::grid::{TileCoord, TileWindow};
use crate::pipeline::error::StageKind;
use crate::store::SpatialStore;
use std::path::Path;

/// One pipeline step: the stage it belongs to and the command to run.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub command: StageCommand,
}

impl Stage {
    fn new(kind: StageKind, command: StageCommand) -> Self {
        Self { kind, command }
    }
}

fn num(v: f64) -> String {
    format!("{}", v)
}

fn path_arg(p: &Path) -> String {
    p.display().to_string()
}

/// Builds the full stage chain for one tile.
pub fn build_chain(
    config: &RunConfig,
    store: &SpatialStore,
    coord: TileCoord,
    window: &TileWindow,
    workspace: &Path,
) -> Vec<Stage> {
    let mut stages = Vec::new();
    let mut current = workspace.join("subset.tif");

    // Subset: extract the buffered window. Out-of-range coordinates at
    // pyramid edges are handed to gdal_translate unmodified.
    stages.push(Stage::new(
        StageKind::Subset,
        StageCommand::new(
            "gdal_translate",
            [
                "-srcwin".to_string(),
                num(window.x),
                num(window.y),
                num(window.src_width),
                num(window.src_height),
                "-of".to_string(),
                "GTIFF".to_string(),
                path_arg(&config.source),
                path_arg(&current),
            ],
        ),
    ));

    // Resample when processing below source resolution.
    if f64::from(window.out_width) < window.src_width {
        let resampled = workspace.join("resampled.tif");
        stages.push(Stage::new(
            StageKind::Resample,
            StageCommand::new(
                "gdalwarp",
                [
                    "-ts".to_string(),
                    window.out_width.to_string(),
                    window.out_height.to_string(),
                    path_arg(&current),
                    path_arg(&resampled),
                ],
            ),
        ));
        current = resampled;
    }

    // Contour side-channel: derived from the subset, appended straight into
    // the contour table, never consumed by later stages.
    if config.contour_interval > 0 {
        let contour = workspace.join("contour.geojson");
        stages.push(Stage::new(
            StageKind::Contour,
            StageCommand::new(
                "gdal_contour",
                [
                    "-a".to_string(),
                    "elev".to_string(),
                    path_arg(&current),
                    "-f".to_string(),
                    "GeoJSON".to_string(),
                    path_arg(&contour),
                    "-i".to_string(),
                    config.contour_interval.to_string(),
                ],
            ),
        ));
        stages.push(Stage::new(
            StageKind::ContourPersist,
            store.append(
                &contour,
                &config.contour_table,
                Some(config.simplify_tolerance),
            ),
        ));
    }

    // Clip: window-extract the boundary, then cut the subset with it. The
    // clipped raster replaces the subset for all following stages.
    if let Some(clipfile) = &config.clipfile {
        let clip_extract = workspace.join("clip_extract.shp");
        let (extent_x, extent_y) = window.extent();
        stages.push(Stage::new(
            StageKind::ClipExtract,
            StageCommand::new(
                "ogr2ogr",
                [
                    "-f".to_string(),
                    "ESRI Shapefile".to_string(),
                    path_arg(&clip_extract),
                    path_arg(clipfile),
                    "-clipsrc".to_string(),
                    num(window.x),
                    num(window.y),
                    num(extent_x),
                    num(extent_y),
                ],
            ),
        ));
        let clipped = workspace.join("subset_clipped.tif");
        stages.push(Stage::new(
            StageKind::Clip,
            StageCommand::new(
                "gdalwarp",
                [
                    "-cutline".to_string(),
                    path_arg(&clip_extract),
                    path_arg(&current),
                    path_arg(&clipped),
                ],
            ),
        ));
        current = clipped;
    }

    // Shade.
    let hillshade = workspace.join("hillshade.tif");
    stages.push(Stage::new(
        StageKind::Shade,
        StageCommand::new(
            "gdaldem",
            [
                "hillshade".to_string(),
                "-co".to_string(),
                "compress=lzw".to_string(),
                "-compute_edges".to_string(),
                "-z".to_string(),
                num(config.vert_exag),
                path_arg(&current),
                path_arg(&hillshade),
            ],
        ),
    ));

    // Threshold: one binarized raster per configured percentage.
    let mut threshold_paths = Vec::with_capacity(config.thresholds.len());
    for threshold in &config.thresholds {
        let out = workspace.join(format!("threshold_{}.tif", threshold));
        stages.push(Stage::new(
            StageKind::Threshold,
            StageCommand::new(
                "convert",
                [
                    path_arg(&hillshade),
                    "-threshold".to_string(),
                    format!("{}%", threshold),
                    path_arg(&out),
                ],
            ),
        ));
        threshold_paths.push(out);
    }

    // Combine: elementwise mean of the thresholded rasters, mid-gray marked
    // transparent so only shadow/highlight extremes survive.
    let combined_gif = workspace.join("combined.gif");
    let mut combine_args: Vec<String> = threshold_paths.iter().map(|p| path_arg(p)).collect();
    combine_args.extend([
        "-evaluate-sequence".to_string(),
        "mean".to_string(),
        "-transparent".to_string(),
        "rgb(153,153,153)".to_string(),
        path_arg(&combined_gif),
    ]);
    stages.push(Stage::new(
        StageKind::Combine,
        StageCommand::new("convert", combine_args),
    ));

    let combined_tif = workspace.join("combined.tif");
    stages.push(Stage::new(
        StageKind::CombineConvert,
        StageCommand::new(
            "convert",
            [path_arg(&combined_gif), path_arg(&combined_tif)],
        ),
    ));

    // Georeference: the convert steps drop the spatial reference; extract a
    // world file from the subset and attach it to the combined raster.
    stages.push(Stage::new(
        StageKind::Georeference,
        StageCommand::new("listgeo", ["-tfw".to_string(), path_arg(&current)]),
    ));
    stages.push(Stage::new(
        StageKind::Georeference,
        StageCommand::new(
            "mv",
            [
                path_arg(&current.with_extension("tfw")),
                path_arg(&combined_tif.with_extension("tfw")),
            ],
        ),
    ));

    // Polygonize into a shapefile keyed by pixel value.
    let shp = workspace.join("out.shp");
    stages.push(Stage::new(
        StageKind::Polygonize,
        StageCommand::new(
            "gdal_polygonize.py",
            [
                path_arg(&combined_tif),
                "-f".to_string(),
                "ESRI Shapefile".to_string(),
                path_arg(&shp),
                "out".to_string(),
                "value".to_string(),
            ],
        ),
    ));

    // Tag rows with the zoom level: the tile table is shared across levels.
    stages.push(Stage::new(
        StageKind::TagZoom,
        StageCommand::new(
            "ogrinfo",
            [
                path_arg(&shp),
                "-sql".to_string(),
                "ALTER TABLE out ADD COLUMN zoom integer".to_string(),
            ],
        ),
    ));
    stages.push(Stage::new(
        StageKind::TagZoom,
        StageCommand::new(
            "ogrinfo",
            [
                path_arg(&shp),
                "-dialect".to_string(),
                "SQLite".to_string(),
                "-sql".to_string(),
                format!("UPDATE out SET zoom = {}", coord.zoom),
            ],
        ),
    ));

    // Optional copy of the vectorized artifact for inspection.
    if let Some(dir) = &config.copy_output_dir {
        let dest = dir.join(format!("z{}_{}_{}.shp", coord.zoom, coord.col, coord.row));
        stages.push(Stage::new(
            StageKind::CopyOutput,
            StageCommand::new("cp", [path_arg(&shp), path_arg(&dest)]),
        ));
    }

    // Persist into the zoom-shared tile table.
    stages.push(Stage::new(
        StageKind::Persist,
        store.append(&shp, &config.tile_table, Some(config.simplify_tolerance)),
    ));

    stages
}
