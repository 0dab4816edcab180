use std::path::PathBuf;
use thiserror::Error;

/// Failures caused by the paths the user handed in.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid path: '{}' is not a directory", .0.display())]
    InvalidPath(PathBuf),

    #[error("no point cloud files found in '{}'", .0.display())]
    NoPointClouds(PathBuf),

    #[error(
        "folder '{}' already exists and is not empty, empty it or choose a new, distinct name",
        .0.display()
    )]
    OutputNotEmpty(PathBuf),

    #[error("video file '{}' does not exist", .0.display())]
    MissingVideo(PathBuf),
}
