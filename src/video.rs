//! Depth-video decoding through `ffprobe` and `ffmpeg` child processes.

use crate::error::Error;
use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::{
    io::{ErrorKind, Read},
    path::{Path, PathBuf},
    process::{Child, ChildStdout, Command, Stdio},
};
use tracing::{debug, warn};

/// Geometry of the first video stream of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: usize,
    pub height: usize,
    /// Frame count as reported by the container, if any.
    pub frames: Option<u64>,
}

impl VideoInfo {
    pub fn frame_len(&self) -> usize {
        self.width * self.height
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<usize>,
    height: Option<usize>,
    nb_frames: Option<String>,
}

/// Reads the dimensions and frame count of the first video stream.
pub fn probe(path: impl AsRef<Path>) -> Result<VideoInfo> {
    let path = path.as_ref();
    ensure_exists(path)?;

    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,nb_frames")
        .arg("-of")
        .arg("json")
        .arg(path)
        .stdin(Stdio::null())
        .output()
        .context("failed to run ffprobe, is ffmpeg installed?")?;

    if !output.status.success() {
        bail!(
            "ffprobe failed on '{}': {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    parse_probe_output(&output.stdout)
        .with_context(|| format!("unable to read video stream of '{}'", path.display()))
}

fn parse_probe_output(json: &[u8]) -> Result<VideoInfo> {
    let ProbeOutput { streams } = serde_json::from_slice(json)?;
    let stream = streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no video stream"))?;

    let (Some(width), Some(height)) = (stream.width, stream.height) else {
        bail!("video stream has no dimensions");
    };
    if width == 0 || height == 0 {
        bail!("video stream is {width}x{height}");
    }

    let frames = stream
        .nb_frames
        .and_then(|count| count.parse::<u64>().ok())
        .filter(|&count| count > 0);

    Ok(VideoInfo {
        width,
        height,
        frames,
    })
}

fn ensure_exists(path: &Path) -> Result<()> {
    if !path.is_file() {
        return Err(Error::MissingVideo(path.to_path_buf()).into());
    }
    Ok(())
}

/// `ffmpeg` invocation writing the first video stream as raw gray frames to stdout.
///
/// Frames keep their coded orientation so they match the probed dimensions.
fn decode_command(path: &Path) -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-noautorotate")
        .arg("-i")
        .arg(path)
        .arg("-map")
        .arg("0:v:0")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("gray")
        .arg("-");
    cmd
}

/// Streams 8-bit grayscale frames out of an `ffmpeg` process.
pub struct VideoDecoder {
    path: PathBuf,
    info: VideoInfo,
    child: Child,
    stdout: ChildStdout,
}

impl VideoDecoder {
    pub fn open(path: impl AsRef<Path>, info: VideoInfo) -> Result<Self> {
        let path = path.as_ref();
        ensure_exists(path)?;

        let mut child = decode_command(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("failed to spawn ffmpeg, is it installed?")?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                bail!("failed to capture ffmpeg stdout");
            }
        };

        debug!(
            "decoding '{}' as {}x{} gray frames",
            path.display(),
            info.width,
            info.height
        );

        Ok(Self {
            path: path.to_path_buf(),
            info,
            child,
            stdout,
        })
    }

    pub fn info(&self) -> &VideoInfo {
        &self.info
    }

    /// Reads the next frame into `buf`, returning `false` at the end of the stream.
    pub fn next_frame(&mut self, buf: &mut Vec<u8>) -> Result<bool> {
        buf.resize(self.info.frame_len(), 0);
        read_frame(&mut self.stdout, buf)
            .with_context(|| format!("failed to decode '{}'", self.path.display()))
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Fills `buf` with exactly one frame.
///
/// End of stream before the first byte is a clean end. A partial frame is
/// dropped with a warning.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        }
    }

    if filled == buf.len() {
        return Ok(true);
    }
    if filled > 0 {
        warn!(
            "dropping trailing partial frame ({filled} of {} bytes)",
            buf.len()
        );
    }
    Ok(false)
}
