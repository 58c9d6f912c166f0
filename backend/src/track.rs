//! Track path loading. Paths are JSON node lists exported per track code;
//! a handful of open-configuration layouts share the base circuit file.

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use race_types::Vec3;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("could not read track path: {0}")]
    Io(#[from] std::io::Error),
    #[error("track path is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("track path contains no nodes")]
    Empty,
}

/// One sampled point of the racing line; id = position in path order.
#[derive(Debug, Clone, Copy)]
pub struct TrackNode {
    pub id: u32,
    pub pos: Vec3,
}

#[derive(Deserialize)]
struct PathFile {
    nodes: Vec<PathPoint>,
}

#[derive(Deserialize)]
struct PathPoint {
    x: f64,
    y: f64,
    z: f64,
}

/// Open-configuration layouts run on the base circuit and share its
/// path file.
pub fn canonical_code(track: &str) -> &str {
    match track {
        "FE2X" => "F25",
        "FE3X" => "F33",
        "AS1X" => "A11",
        other => other,
    }
}

/// Load `<dir>/<CODE>.json` and number the nodes in path order.
pub async fn load_track(dir: &Path, track: &str) -> Result<Vec<TrackNode>, TrackError> {
    let file = dir.join(format!("{}.json", canonical_code(track)));
    let raw = tokio::fs::read_to_string(&file).await?;
    let parsed: PathFile = serde_json::from_str(&raw)?;
    if parsed.nodes.is_empty() {
        return Err(TrackError::Empty);
    }
    Ok(parsed
        .nodes
        .iter()
        .enumerate()
        .map(|(i, p)| TrackNode { id: i as u32, pos: Vec3::new(p.x, p.y, p.z) })
        .collect())
}
