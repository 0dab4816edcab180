use crate::config::{DepthParams, Intrinsics, DEPTH_SCALE, DEPTH_TRUNC};
use anyhow::{ensure, Result};
use nalgebra::Point3;

/// A single-channel depth image stored as row-major `f32` values.
///
/// The buffer is reused across frames; decoding writes into it in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DepthFrame {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl DepthFrame {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    /// Overwrites the buffer with an 8-bit grayscale frame.
    pub fn fill_from_gray8(&mut self, pixels: &[u8]) -> Result<()> {
        ensure!(
            pixels.len() == self.data.len(),
            "frame has {} pixels, expected {}x{}",
            pixels.len(),
            self.width,
            self.height
        );
        self.data
            .iter_mut()
            .zip(pixels)
            .for_each(|(dst, &src)| *dst = src as f32);
        Ok(())
    }

    /// Zeroes every value at or below `threshold`.
    ///
    /// A zero threshold counts as unset and leaves the frame untouched.
    pub fn truncate(&mut self, threshold: Option<f32>) {
        let Some(threshold) = threshold.filter(|&t| t != 0.0) else {
            return;
        };
        self.data
            .iter_mut()
            .filter(|value| **value <= threshold)
            .for_each(|value| *value = 0.0);
    }

    /// Flips the intensity scale so that bright (near) pixels become small depths.
    pub fn invert(&mut self) {
        let Some(max) = self.data.iter().copied().reduce(f32::max) else {
            return;
        };
        self.data.iter_mut().for_each(|value| *value = max - *value);
    }

    pub fn offset(&mut self, distance: f32) {
        self.data.iter_mut().for_each(|value| *value += distance);
    }

    /// Runs the full per-frame transform: truncate, invert, offset.
    pub fn prepare(&mut self, params: &DepthParams) {
        self.truncate(params.threshold);
        self.invert();
        self.offset(params.distance_offset);
    }

    /// Back-projects every valid pixel through the pinhole model into `out`.
    ///
    /// `out` is cleared first and keeps its allocation.
    pub fn back_project(&self, intrinsics: &Intrinsics, out: &mut Vec<Point3<f32>>) {
        let Intrinsics { fx, fy, cx, cy, .. } = *intrinsics;

        out.clear();
        out.extend(
            self.data
                .chunks_exact(self.width.max(1))
                .take(self.height)
                .enumerate()
                .flat_map(|(v, row)| {
                    row.iter().enumerate().filter_map(move |(u, &depth)| {
                        let z = depth / DEPTH_SCALE;
                        if !(z > 0.0 && z <= DEPTH_TRUNC) {
                            return None;
                        }
                        let x = (u as f32 - cx) * z / fx;
                        let y = (v as f32 - cy) * z / fy;
                        Some(Point3::new(x, y, z))
                    })
                }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn frame(width: usize, height: usize, pixels: &[u8]) -> DepthFrame {
        let mut frame = DepthFrame::new(width, height);
        frame.fill_from_gray8(pixels).unwrap();
        frame
    }

    #[test]
    fn rejects_wrong_frame_size() {
        let mut frame = DepthFrame::new(2, 2);
        assert!(frame.fill_from_gray8(&[1, 2, 3]).is_err());
    }

    #[test]
    fn truncate_zeroes_values_at_or_below_threshold() {
        let mut frame = frame(4, 1, &[10, 20, 30, 40]);
        frame.truncate(Some(20.0));
        assert_eq!(frame.data, [0.0, 0.0, 30.0, 40.0]);
    }

    #[test]
    fn zero_or_missing_threshold_is_a_no_op() {
        let mut frame = frame(3, 1, &[0, 5, 9]);
        frame.truncate(None);
        frame.truncate(Some(0.0));
        assert_eq!(frame.data, [0.0, 5.0, 9.0]);
    }

    #[test]
    fn invert_subtracts_from_max() {
        let mut frame = frame(3, 1, &[0, 100, 255]);
        frame.invert();
        assert_eq!(frame.data, [255.0, 155.0, 0.0]);
    }

    #[test]
    fn invert_empty_frame() {
        let mut frame = DepthFrame::new(0, 0);
        frame.invert();
        assert!(frame.data.is_empty());
    }

    #[test]
    fn prepare_pushes_truncated_background_far_away() {
        let mut frame = frame(3, 1, &[5, 100, 200]);
        frame.prepare(&DepthParams {
            threshold: Some(50.0),
            distance_offset: 50.0,
        });
        // 5 is truncated to 0, then max 200 inverts everything.
        assert_eq!(frame.data, [250.0, 150.0, 50.0]);
    }

    #[test]
    fn back_projection_follows_pinhole_model() {
        let mut frame = DepthFrame::new(2, 2);
        frame.data = vec![1000.0, 2000.0, 0.0, 500.0];
        let intrinsics = Intrinsics::centered(2, 2, 500.0, 250.0);

        let mut points = vec![Point3::origin(); 16];
        frame.back_project(&intrinsics, &mut points);

        assert_eq!(points.len(), 3);
        assert_relative_eq!(points[0], Point3::new(-0.002, -0.004, 1.0));
        assert_relative_eq!(points[1], Point3::new(0.0, -0.008, 2.0));
        assert_relative_eq!(points[2], Point3::new(0.0, 0.0, 0.5));
    }

    #[test]
    fn back_projection_drops_points_past_truncation_distance() {
        let mut frame = DepthFrame::new(2, 1);
        frame.data = vec![DEPTH_TRUNC * DEPTH_SCALE * 2.0, 100.0];
        let intrinsics = Intrinsics::centered(2, 1, 500.0, 500.0);

        let mut points = Vec::new();
        frame.back_project(&intrinsics, &mut points);
        assert_eq!(points.len(), 1);
        assert_relative_eq!(points[0].z, 0.1);
    }
}
