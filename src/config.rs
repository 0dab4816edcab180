use std::time::Duration;

/// How long each frame stays on screen when replaying saved files.
pub const VIEW_FRAME_INTERVAL: Duration = Duration::from_micros(31_800);

/// How long each frame stays on screen when generating clouds from video.
pub const TEST_FRAME_INTERVAL: Duration = Duration::from_nanos(41_666_667);

pub const DEFAULT_OUTPUT_ROOT: &str = "saved_pointclouds";
pub const DEFAULT_FOCAL_LENGTH: f32 = 500.0;
pub const DEFAULT_DISTANCE_OFFSET: f32 = 50.0;

/// Depth units per metre.
pub const DEPTH_SCALE: f32 = 1000.0;

/// Scaled depths beyond this distance are dropped during back-projection.
pub const DEPTH_TRUNC: f32 = 1000.0;

/// Zero padding of the frame number in saved file names.
pub const FRAME_INDEX_WIDTH: usize = 5;

/// Pinhole camera model used to back-project depth frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Intrinsics {
    pub width: usize,
    pub height: usize,
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Builds intrinsics with the principal point at the image center.
    pub fn centered(width: usize, height: usize, fx: f32, fy: f32) -> Self {
        Self {
            width,
            height,
            fx,
            fy,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        }
    }
}

/// Options of the depth transform applied to every frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthParams {
    /// Values at or below this are zeroed before inversion.
    pub threshold: Option<f32>,
    pub distance_offset: f32,
}

impl Default for DepthParams {
    fn default() -> Self {
        Self {
            threshold: None,
            distance_offset: DEFAULT_DISTANCE_OFFSET,
        }
    }
}
