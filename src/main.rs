mod config;
mod data;
mod depth;
mod error;
mod gui;
mod progress;
mod source;
mod store;
mod video;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::{
    DepthParams, Intrinsics, DEFAULT_DISTANCE_OFFSET, DEFAULT_FOCAL_LENGTH, DEFAULT_OUTPUT_ROOT,
    TEST_FRAME_INTERVAL, VIEW_FRAME_INTERVAL,
};
use data::PointCloud;
use gui::{App, PlaybackOptions};
use kiss3d::{light::Light, window::Window};
use progress::frame_progress;
use source::{FileSource, FrameSource, VideoSource};
use std::{path::PathBuf, time::Duration};
use store::{FrameWriter, PointCloudFormat};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use video::VideoInfo;

/// Turns depth-map videos into point cloud sequences.
#[derive(Parser)]
#[clap(version)]
struct Opts {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create point clouds from a depth video and save them.
    Save(SaveOpts),

    /// Create point clouds from a depth video and show them in real time.
    Test(TestOpts),

    /// Play back point cloud files saved earlier.
    View(ViewOpts),
}

#[derive(Args)]
struct SaveOpts {
    /// The depth video to convert.
    pub video_path: PathBuf,

    /// The name the point clouds are saved under.
    pub output_name: String,

    #[clap(flatten)]
    pub depth: DepthOpts,

    /// The file format of the saved point clouds.
    #[clap(long, value_enum, default_value_t)]
    pub format: PointCloudFormat,

    /// The folder the named output folder is created in.
    #[clap(long, default_value = DEFAULT_OUTPUT_ROOT)]
    pub output_root: PathBuf,
}

#[derive(Args)]
struct TestOpts {
    /// The depth video to convert.
    pub video_path: PathBuf,

    #[clap(flatten)]
    pub depth: DepthOpts,

    /// Loop playback until interrupted.
    #[clap(long = "loop", short = 'l')]
    pub looping: bool,

    #[clap(flatten)]
    pub display: DisplayOpts,
}

#[derive(Args)]
struct ViewOpts {
    /// The folder that contains .ply or .pcd point cloud files.
    pub point_cloud_folder_path: PathBuf,

    /// Loop playback until interrupted.
    #[clap(long = "loop", short = 'l')]
    pub looping: bool,

    #[clap(flatten)]
    pub display: DisplayOpts,
}

#[derive(Args)]
struct DepthOpts {
    /// Remove background pixels at or below this intensity.
    #[clap(long, short = 't', alias = "truncation_threshold")]
    pub truncation_threshold: Option<f32>,

    /// Move the point cloud further away from the origin by this distance.
    #[clap(
        long,
        short = 'd',
        alias = "distance_offset",
        default_value_t = DEFAULT_DISTANCE_OFFSET
    )]
    pub distance_offset: f32,

    /// Horizontal focal length of the virtual camera.
    #[clap(long, default_value_t = DEFAULT_FOCAL_LENGTH)]
    pub fx: f32,

    /// Vertical focal length of the virtual camera.
    #[clap(long, default_value_t = DEFAULT_FOCAL_LENGTH)]
    pub fy: f32,
}

impl DepthOpts {
    fn params(&self) -> DepthParams {
        DepthParams {
            threshold: self.truncation_threshold,
            distance_offset: self.distance_offset,
        }
    }

    fn intrinsics(&self, info: &VideoInfo) -> Intrinsics {
        Intrinsics::centered(info.width, info.height, self.fx, self.fy)
    }
}

#[derive(Args)]
struct DisplayOpts {
    /// Color points by depth.
    #[clap(long)]
    pub colored: bool,

    /// Set the plotted point size.
    #[clap(long, default_value = "1.0")]
    pub point_size: f32,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let Opts { command } = Opts::parse();

    match command {
        Command::Save(opts) => save(opts),
        Command::Test(opts) => test(opts),
        Command::View(opts) => view(opts),
    }
}

fn save(opts: SaveOpts) -> Result<()> {
    let SaveOpts {
        video_path,
        output_name,
        depth,
        format,
        output_root,
    } = opts;

    let info = video::probe(&video_path)?;
    let mut writer = FrameWriter::create(&output_root, &output_name, format)?;
    let mut source = VideoSource::open(&video_path, info, depth.intrinsics(&info), depth.params())?;

    let progress = frame_progress(info.frames)?;
    let mut cloud = PointCloud::new();
    while source.load_next(&mut cloud)? {
        if cloud.is_empty() {
            warn!("frame {} has no points", writer.count() + 1);
        }
        writer.write(&cloud)?;
        progress.inc(1);
    }
    progress.finish();

    info!(
        "saved {} point clouds to '{}'",
        writer.count(),
        writer.dir().display()
    );
    Ok(())
}

fn test(opts: TestOpts) -> Result<()> {
    let TestOpts {
        video_path,
        depth,
        looping,
        display,
    } = opts;

    let info = video::probe(&video_path)?;
    let source = VideoSource::open(&video_path, info, depth.intrinsics(&info), depth.params())?;

    play(Box::new(source), TEST_FRAME_INTERVAL, looping, &display)
}

fn view(opts: ViewOpts) -> Result<()> {
    let ViewOpts {
        point_cloud_folder_path,
        looping,
        display,
    } = opts;

    let source = FileSource::open(&point_cloud_folder_path)?;

    play(Box::new(source), VIEW_FRAME_INTERVAL, looping, &display)
}

fn play(
    source: Box<dyn FrameSource>,
    interval: Duration,
    looping: bool,
    display: &DisplayOpts,
) -> Result<()> {
    let options = PlaybackOptions {
        interval,
        looping,
        colored: display.colored,
    };
    let state = App::build(source, options)?;
    let failure = state.failure();

    let mut window = Window::new(env!("CARGO_BIN_NAME"));
    window.set_light(Light::StickToCamera);
    window.set_point_size(display.point_size);
    window.render_loop(state);

    match failure.take() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
