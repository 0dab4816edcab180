use crate::{config::FRAME_INDEX_WIDTH, data::PointCloud, error::Error};
use anyhow::{bail, ensure, Context, Result};
use clap::ValueEnum;
use itertools::Itertools;
use nalgebra::Point3;
use pcd_rs::{DataKind, PcdSerialize, WriterInit};
use ply_rs::{
    parser::Parser,
    ply::{
        Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
        ScalarType,
    },
    writer::Writer,
};
use std::{
    ffi::OsStr,
    fs::{self, File},
    io::{BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::{debug, info};

/// On-disk encoding of a saved point cloud.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum)]
pub enum PointCloudFormat {
    /// Binary little-endian PLY.
    #[default]
    Ply,
    /// Binary PCD.
    Pcd,
}

impl PointCloudFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Ply => "ply",
            Self::Pcd => "pcd",
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
        let ext = path.as_ref().extension()?;
        [Self::Ply, Self::Pcd]
            .into_iter()
            .find(|format| ext == format.extension())
    }
}

#[derive(Debug, Clone, Copy, PcdSerialize)]
struct PcdPoint {
    x: f32,
    y: f32,
    z: f32,
}

/// `<name>_<index>.<ext>`, with the index zero padded.
pub fn frame_file_name(name: &str, index: usize, format: PointCloudFormat) -> String {
    format!(
        "{name}_{index:0width$}.{ext}",
        width = FRAME_INDEX_WIDTH,
        ext = format.extension()
    )
}

/// Creates `root/name`, refusing to reuse a folder that already has content.
pub fn prepare_output_dir(root: impl AsRef<Path>, name: &str) -> Result<PathBuf> {
    ensure!(
        !name.is_empty() && Path::new(name).file_name() == Some(OsStr::new(name)),
        "output name '{name}' must be a plain folder name"
    );

    let root = root.as_ref();
    fs::create_dir_all(root)
        .with_context(|| format!("unable to create '{}'", root.display()))?;

    let dir = root.join(name);
    if dir.is_dir() && dir.read_dir()?.next().is_some() {
        return Err(Error::OutputNotEmpty(dir).into());
    }
    fs::create_dir_all(&dir).with_context(|| format!("unable to create '{}'", dir.display()))?;

    Ok(dir)
}

/// Writes the frames of one run as sequentially numbered files.
#[derive(Debug)]
pub struct FrameWriter {
    dir: PathBuf,
    name: String,
    format: PointCloudFormat,
    count: usize,
}

impl FrameWriter {
    /// Prepares `root/name` and starts numbering at 1.
    pub fn create(root: impl AsRef<Path>, name: &str, format: PointCloudFormat) -> Result<Self> {
        let dir = prepare_output_dir(root, name)?;
        info!("saving point clouds to '{}'", dir.display());

        Ok(Self {
            dir,
            name: name.to_string(),
            format,
            count: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of frames written so far.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn write(&mut self, cloud: &PointCloud) -> Result<PathBuf> {
        let index = self.count + 1;
        let path = self
            .dir
            .join(frame_file_name(&self.name, index, self.format));
        write_point_cloud(&path, cloud, self.format)?;
        self.count = index;
        debug!("wrote {} points to '{}'", cloud.len(), path.display());
        Ok(path)
    }
}

pub fn write_point_cloud(
    path: impl AsRef<Path>,
    cloud: &PointCloud,
    format: PointCloudFormat,
) -> Result<()> {
    let path = path.as_ref();
    let result = match format {
        PointCloudFormat::Ply => write_ply(path, cloud),
        PointCloudFormat::Pcd => write_pcd(path, cloud),
    };
    result.with_context(|| format!("unable to write '{}'", path.display()))
}

fn write_ply(path: &Path, cloud: &PointCloud) -> Result<()> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::BinaryLittleEndian;
    ply.header
        .comments
        .push(format!("generated by {}", env!("CARGO_PKG_NAME")));

    let mut vertex = ElementDef::new("vertex".to_string());
    for axis in ["x", "y", "z"] {
        vertex.properties.add(PropertyDef::new(
            axis.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    vertex.count = cloud.len();
    ply.header.elements.add(vertex);

    let vertices = cloud
        .points
        .iter()
        .map(|point| {
            let mut element = DefaultElement::new();
            element.insert("x".to_string(), Property::Float(point.x));
            element.insert("y".to_string(), Property::Float(point.y));
            element.insert("z".to_string(), Property::Float(point.z));
            element
        })
        .collect();
    ply.payload.insert("vertex".to_string(), vertices);

    let mut out = BufWriter::new(File::create(path)?);
    Writer::new().write_ply(&mut out, &mut ply)?;
    out.flush()?;
    Ok(())
}

fn write_pcd(path: &Path, cloud: &PointCloud) -> Result<()> {
    let mut writer = WriterInit {
        width: cloud.len() as u64,
        height: 1,
        viewpoint: Default::default(),
        data_kind: DataKind::Binary,
        schema: None,
    }
    .create(path)?;

    for point in &cloud.points {
        writer.push(&PcdPoint {
            x: point.x,
            y: point.y,
            z: point.z,
        })?;
    }
    writer.finish()?;
    Ok(())
}

/// Lists the saved point clouds of a folder in playback order.
pub fn list_point_cloud_files(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Err(Error::InvalidPath(dir.to_path_buf()).into());
    }

    let mut files: Vec<_> = dir
        .read_dir()?
        .map(|entry| -> Result<_> {
            let entry = entry?;
            let file_type = entry.file_type()?;

            if !(file_type.is_file() || file_type.is_symlink()) {
                return Ok(None);
            }

            let path = entry.path();
            Ok(PointCloudFormat::from_path(&path).map(|_| path))
        })
        .filter_map(|path| path.transpose())
        .try_collect()?;

    if files.is_empty() {
        return Err(Error::NoPointClouds(dir.to_path_buf()).into());
    }
    files.sort_unstable();

    Ok(files)
}

/// Loads the positions stored in `path` into `cloud`.
pub fn read_point_cloud(path: impl AsRef<Path>, cloud: &mut PointCloud) -> Result<()> {
    let path = path.as_ref();
    let result = match PointCloudFormat::from_path(path) {
        Some(PointCloudFormat::Ply) => read_ply(path, cloud),
        Some(PointCloudFormat::Pcd) => read_pcd(path, cloud),
        None => bail!("unrecognized point cloud file"),
    };
    result.with_context(|| format!("unable to read '{}'", path.display()))
}

fn read_ply(path: &Path, cloud: &mut PointCloud) -> Result<()> {
    let mut reader = BufReader::new(File::open(path)?);
    let ply = Parser::<DefaultElement>::new().read_ply(&mut reader)?;

    let Some(vertices) = ply.payload.get("vertex") else {
        bail!("missing vertex element");
    };

    let points: Vec<_> = vertices
        .iter()
        .map(|vertex| -> Result<_> {
            let x = coordinate(vertex, "x")?;
            let y = coordinate(vertex, "y")?;
            let z = coordinate(vertex, "z")?;
            Ok(Point3::new(x, y, z))
        })
        .try_collect()?;
    cloud.replace_points(points);

    Ok(())
}

fn coordinate(vertex: &DefaultElement, axis: &str) -> Result<f32> {
    let value = match vertex.get(axis) {
        Some(Property::Float(value)) => *value,
        Some(Property::Double(value)) => *value as f32,
        Some(_) => bail!("property '{axis}' is not a float"),
        None => bail!("vertex has no '{axis}' property"),
    };
    Ok(value)
}

fn read_pcd(path: &Path, cloud: &mut PointCloud) -> Result<()> {
    let reader = pcd_rs::DynReader::open(path)?;
    let points: Vec<_> = reader
        .map(|record| -> Result<_> {
            let record = record?;
            let xyz: Option<[f32; 3]> = record.to_xyz();
            let Some(xyz) = xyz else {
                bail!("point has no x, y, z fields");
            };
            Ok(Point3::from(xyz))
        })
        .try_collect()?;
    cloud.replace_points(points);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample_cloud() -> PointCloud {
        PointCloud {
            points: vec![
                Point3::new(0.0, 0.0, 0.05),
                Point3::new(-0.1, 0.2, 0.125),
                Point3::new(1.5, -2.25, 0.3),
            ],
        }
    }

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(
            frame_file_name("walk", 1, PointCloudFormat::Ply),
            "walk_00001.ply"
        );
        assert_eq!(
            frame_file_name("walk", 12345, PointCloudFormat::Pcd),
            "walk_12345.pcd"
        );
    }

    #[test]
    fn recognizes_point_cloud_extensions() {
        assert_eq!(
            PointCloudFormat::from_path("a/b_00001.ply"),
            Some(PointCloudFormat::Ply)
        );
        assert_eq!(
            PointCloudFormat::from_path("b.pcd"),
            Some(PointCloudFormat::Pcd)
        );
        assert_eq!(PointCloudFormat::from_path("b.txt"), None);
        assert_eq!(PointCloudFormat::from_path("ply"), None);
    }

    #[test]
    fn output_dir_is_created_under_root() {
        let tmp = tempdir().unwrap();
        let root = tmp.path().join("saved_pointclouds");

        let dir = prepare_output_dir(&root, "clip").unwrap();
        assert_eq!(dir, root.join("clip"));
        assert!(dir.is_dir());

        // an existing but empty folder is reused
        assert_eq!(prepare_output_dir(&root, "clip").unwrap(), dir);
    }

    #[test]
    fn output_name_must_be_a_single_folder() {
        let tmp = tempdir().unwrap();
        for name in ["", "a/b", "..", "."] {
            assert!(prepare_output_dir(tmp.path(), name).is_err(), "{name:?}");
        }
        assert!(!tmp.path().join("a").exists());
    }

    #[test]
    fn populated_output_dir_is_refused() {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("clip");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("clip_00001.ply"), b"").unwrap();

        let err = prepare_output_dir(tmp.path(), "clip").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::OutputNotEmpty(path)) if path == &dir
        ));
    }

    #[test]
    fn frame_writer_numbers_from_one() {
        let tmp = tempdir().unwrap();
        let mut writer = FrameWriter::create(tmp.path(), "clip", PointCloudFormat::Ply).unwrap();
        let cloud = sample_cloud();

        let first = writer.write(&cloud).unwrap();
        let second = writer.write(&cloud).unwrap();

        assert_eq!(first, tmp.path().join("clip").join("clip_00001.ply"));
        assert_eq!(second, tmp.path().join("clip").join("clip_00002.ply"));
        assert_eq!(writer.count(), 2);
        assert_eq!(
            list_point_cloud_files(writer.dir()).unwrap(),
            vec![first, second]
        );
    }

    #[test]
    fn ply_files_read_back() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("frame.ply");
        let cloud = sample_cloud();
        write_point_cloud(&path, &cloud, PointCloudFormat::Ply).unwrap();

        let mut loaded = PointCloud::new();
        read_point_cloud(&path, &mut loaded).unwrap();
        assert_eq!(loaded, cloud);
    }

    #[test]
    fn pcd_files_read_back() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("frame.pcd");
        let cloud = sample_cloud();
        write_point_cloud(&path, &cloud, PointCloudFormat::Pcd).unwrap();

        let mut loaded = PointCloud::new();
        read_point_cloud(&path, &mut loaded).unwrap();
        assert_eq!(loaded, cloud);
    }

    #[test]
    fn reads_ascii_ply_with_double_coordinates() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("ascii.ply");
        fs::write(
            &path,
            "ply\n\
             format ascii 1.0\n\
             element vertex 2\n\
             property double x\n\
             property double y\n\
             property double z\n\
             end_header\n\
             1 2 3\n\
             -0.5 0.25 4\n",
        )
        .unwrap();

        let mut cloud = PointCloud::new();
        read_point_cloud(&path, &mut cloud).unwrap();
        assert_eq!(
            cloud.points,
            vec![Point3::new(1.0, 2.0, 3.0), Point3::new(-0.5, 0.25, 4.0)]
        );
    }

    #[test]
    fn listing_skips_other_files_and_sorts() {
        let tmp = tempdir().unwrap();
        for name in ["b_00002.ply", "b_00001.ply", "notes.txt", "c.pcd"] {
            fs::write(tmp.path().join(name), b"").unwrap();
        }
        fs::create_dir(tmp.path().join("nested.ply")).unwrap();

        let files = list_point_cloud_files(tmp.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|path| path.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, ["b_00001.ply", "b_00002.ply", "c.pcd"]);
    }

    #[test]
    fn listing_missing_folder_fails() {
        let tmp = tempdir().unwrap();
        let missing = tmp.path().join("nope");
        let err = list_point_cloud_files(&missing).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidPath(path)) if path == &missing
        ));
    }

    #[test]
    fn listing_empty_folder_fails() {
        let tmp = tempdir().unwrap();
        fs::write(tmp.path().join("readme.md"), b"").unwrap();
        let err = list_point_cloud_files(tmp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::NoPointClouds(_))
        ));
    }
}
