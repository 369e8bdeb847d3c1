//! Source raster dimension probe.
//!
//! The scheduler's only interaction with the source raster is a single
//! read-only dimension lookup at init; all pixel access happens inside the
//! external stage utilities. The probe shells out to `gdalinfo -json` and
//! reads the `size` field.

use serde::Deserialize;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tracing::debug;

/// Pixel dimensions of the source raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterSize {
    pub width: u32,
    pub height: u32,
}

/// Errors from probing the source raster.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn gdalinfo: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("gdalinfo exited with status {code} for {path}")]
    ExitStatus { path: String, code: i32 },

    #[error("could not parse gdalinfo output: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Capability to read a raster's pixel dimensions.
pub trait RasterProbe: Send + Sync + 'static {
    fn probe(&self, path: &Path) -> impl Future<Output = Result<RasterSize, ProbeError>> + Send;
}

#[derive(Debug, Deserialize)]
struct GdalInfo {
    size: [u32; 2],
}

/// Probes via `gdalinfo -json`.
#[derive(Debug, Clone, Default)]
pub struct GdalRasterProbe;

impl GdalRasterProbe {
    pub fn new() -> Self {
        Self
    }
}

impl RasterProbe for GdalRasterProbe {
    async fn probe(&self, path: &Path) -> Result<RasterSize, ProbeError> {
        let output = tokio::process::Command::new("gdalinfo")
            .arg("-json")
            .arg(path)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await
            .map_err(ProbeError::Spawn)?;

        if !output.status.success() {
            return Err(ProbeError::ExitStatus {
                path: path.display().to_string(),
                code: output.status.code().unwrap_or(-1),
            });
        }

        let info: GdalInfo = serde_json::from_slice(&output.stdout)?;
        let size = RasterSize {
            width: info.size[0],
            height: info.size[1],
        };
        debug!(width = size.width, height = size.height, "Probed source raster");
        Ok(size)
    }
}
