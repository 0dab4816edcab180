use nalgebra::{Matrix4, Point3};
use palette::{FromColor, Hsv, Srgb};

/// The point cloud shown or saved by a run.
///
/// One instance lives for the whole run and only its positions change from
/// frame to frame, so the viewer keeps drawing the same object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub points: Vec<Point3<f32>>,
}

impl PointCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Swaps in the positions of a new frame, keeping the allocation.
    pub fn replace_points<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = Point3<f32>>,
    {
        self.points.clear();
        self.points.extend(points);
    }

    /// Turns the cloud 180 degrees about the x axis so it renders upright.
    pub fn flip_for_display(&mut self) {
        let flip = display_flip();
        self.points
            .iter_mut()
            .for_each(|point| *point = flip.transform_point(point));
    }

    pub fn depth_range(&self) -> Option<DepthRange> {
        let mut iter = self.points.iter().map(|point| point.z);
        let first = iter.next()?;
        let (near, far) = iter.fold((first, first), |(near, far), z| (near.min(z), far.max(z)));
        Some(DepthRange { near, far })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepthRange {
    pub near: f32,
    pub far: f32,
}

/// Homogeneous transform negating y and z.
pub fn display_flip() -> Matrix4<f32> {
    Matrix4::new(
        1.0, 0.0, 0.0, 0.0, //
        0.0, -1.0, 0.0, 0.0, //
        0.0, 0.0, -1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    )
}

/// Maps a depth onto a hue, red for the nearest points and blue for the farthest.
pub fn depth_color(z: f32, range: DepthRange) -> Point3<f32> {
    let DepthRange { near, far } = range;
    let span = far - near;
    let t = if span.abs() > f32::EPSILON {
        ((z - near) / span).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let hue = 240.0 * t;
    let (r, g, b) = Srgb::from_color(Hsv::new(hue, 1.0, 1.0)).into_components();
    Point3::from([r, g, b])
}
