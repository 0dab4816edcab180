use crate::{
    config::{DepthParams, Intrinsics},
    data::PointCloud,
    depth::DepthFrame,
    store,
    video::{VideoDecoder, VideoInfo},
};
use anyhow::{ensure, Result};
use std::path::{Path, PathBuf};

/// A sequence of frames that can be loaded, one at a time, into a point cloud.
pub trait FrameSource {
    /// Replaces the points of `cloud` with the next frame.
    ///
    /// Returns `false` once the sequence is exhausted; `cloud` is then left untouched.
    fn load_next(&mut self, cloud: &mut PointCloud) -> Result<bool>;

    /// Restarts the sequence from its first frame.
    fn rewind(&mut self) -> Result<()>;

    /// Total number of frames, if known.
    fn len_hint(&self) -> Option<u64>;

    /// A short description of the last loaded frame.
    fn label(&self) -> Option<String> {
        None
    }
}

/// Point clouds computed on the fly from a depth video.
pub struct VideoSource {
    path: PathBuf,
    decoder: VideoDecoder,
    intrinsics: Intrinsics,
    params: DepthParams,
    gray: Vec<u8>,
    depth: DepthFrame,
}

impl VideoSource {
    pub fn open(
        path: impl AsRef<Path>,
        info: VideoInfo,
        intrinsics: Intrinsics,
        params: DepthParams,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        ensure!(
            (intrinsics.width, intrinsics.height) == (info.width, info.height),
            "intrinsics are {}x{} but the video is {}x{}",
            intrinsics.width,
            intrinsics.height,
            info.width,
            info.height
        );
        let decoder = VideoDecoder::open(&path, info)?;

        Ok(Self {
            path,
            decoder,
            intrinsics,
            params,
            gray: Vec::with_capacity(info.frame_len()),
            depth: DepthFrame::new(intrinsics.width, intrinsics.height),
        })
    }
}

impl FrameSource for VideoSource {
    fn load_next(&mut self, cloud: &mut PointCloud) -> Result<bool> {
        if !self.decoder.next_frame(&mut self.gray)? {
            return Ok(false);
        }
        frame_to_cloud(
            &self.gray,
            &mut self.depth,
            &self.params,
            &self.intrinsics,
            cloud,
        )?;
        Ok(true)
    }

    fn rewind(&mut self) -> Result<()> {
        let info = *self.decoder.info();
        self.decoder = VideoDecoder::open(&self.path, info)?;
        Ok(())
    }

    fn len_hint(&self) -> Option<u64> {
        self.decoder.info().frames
    }
}

/// Runs one decoded grayscale frame through the depth transform into `cloud`.
pub fn frame_to_cloud(
    gray: &[u8],
    depth: &mut DepthFrame,
    params: &DepthParams,
    intrinsics: &Intrinsics,
    cloud: &mut PointCloud,
) -> Result<()> {
    depth.fill_from_gray8(gray)?;
    depth.prepare(params);
    depth.back_project(intrinsics, &mut cloud.points);
    Ok(())
}

/// Point clouds replayed from previously saved files.
pub struct FileSource {
    files: Vec<PathBuf>,
    cursor: usize,
}

impl FileSource {
    /// Collects the point cloud files of `dir`, failing if there are none.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let files = store::list_point_cloud_files(dir)?;
        Ok(Self { files, cursor: 0 })
    }
}

impl FrameSource for FileSource {
    fn load_next(&mut self, cloud: &mut PointCloud) -> Result<bool> {
        let Some(path) = self.files.get(self.cursor) else {
            return Ok(false);
        };
        store::read_point_cloud(path, cloud)?;
        self.cursor += 1;
        Ok(true)
    }

    fn rewind(&mut self) -> Result<()> {
        self.cursor = 0;
        Ok(())
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.files.len() as u64)
    }

    fn label(&self) -> Option<String> {
        let path = self.files.get(self.cursor.checked_sub(1)?)?;
        let stem = path.file_stem()?.to_string_lossy().into_owned();
        Some(stem)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FrameWriter, PointCloudFormat};
    use nalgebra::Point3;
    use tempfile::tempdir;

    #[test]
    fn gray_frame_becomes_cloud() {
        let intrinsics = Intrinsics::centered(2, 1, 500.0, 500.0);
        let params = DepthParams {
            threshold: None,
            distance_offset: 50.0,
        };
        let mut depth = DepthFrame::new(2, 1);
        let mut cloud = PointCloud::new();

        frame_to_cloud(&[200, 100], &mut depth, &params, &intrinsics, &mut cloud).unwrap();

        // inverted: [0, 100], offset: [50, 150], scaled by 1/1000
        assert_eq!(cloud.len(), 2);
        assert!((cloud.points[0].z - 0.05).abs() < 1e-6);
        assert!((cloud.points[1].z - 0.15).abs() < 1e-6);
        assert!((cloud.points[0].x - (-1.0 * 0.05 / 500.0)).abs() < 1e-9);
    }

    #[test]
    fn file_source_replays_and_rewinds() {
        let tmp = tempdir().unwrap();
        let mut writer = FrameWriter::create(tmp.path(), "clip", PointCloudFormat::Ply).unwrap();
        for i in 0..3 {
            let cloud = PointCloud {
                points: vec![Point3::new(i as f32, 0.0, 1.0)],
            };
            writer.write(&cloud).unwrap();
        }

        let mut source = FileSource::open(writer.dir()).unwrap();
        assert_eq!(source.len_hint(), Some(3));
        assert_eq!(source.label(), None);

        let mut cloud = PointCloud::new();
        let mut seen = Vec::new();
        while source.load_next(&mut cloud).unwrap() {
            seen.push(cloud.points[0].x);
        }
        assert_eq!(seen, [0.0, 1.0, 2.0]);
        assert_eq!(source.label().as_deref(), Some("clip_00003"));

        // exhausted sources leave the cloud alone
        assert!(!source.load_next(&mut cloud).unwrap());
        assert_eq!(cloud.points[0].x, 2.0);

        source.rewind().unwrap();
        assert!(source.load_next(&mut cloud).unwrap());
        assert_eq!(cloud.points[0].x, 0.0);
    }
}
