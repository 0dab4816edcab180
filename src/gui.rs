use crate::{
    data::{depth_color, PointCloud},
    progress::frame_progress,
    source::FrameSource,
};
use anyhow::{bail, Result};
use indicatif::ProgressBar;
use kiss3d::{
    camera::{ArcBall, Camera},
    event::{Action, Key, WindowEvent},
    planar_camera::PlanarCamera,
    post_processing::PostProcessingEffect,
    text::Font,
    window::{State, Window},
};
use kiss3d_utils::WindowPlotExt;
use nalgebra::{Point2, Point3, Vector3};
use std::{
    cell::RefCell,
    f32::consts::FRAC_PI_4,
    rc::Rc,
    thread,
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// Playback settings of the viewer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackOptions {
    /// Time each frame stays on screen.
    pub interval: Duration,
    /// Restart from the first frame when the sequence ends.
    pub looping: bool,
    /// Color points by depth instead of plain white.
    pub colored: bool,
}

/// Shared slot the viewer leaves its error in once the window is gone.
pub type Failure = Rc<RefCell<Option<anyhow::Error>>>;

/// What the window should do after a playback tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Continue,
    Close,
}

/// Frame sequencing of the viewer, independent of the window.
///
/// A frame is never replaced before it has been drawn at least once.
pub struct Playback {
    source: Box<dyn FrameSource>,
    cloud: PointCloud,
    colors: Vec<Point3<f32>>,
    options: PlaybackOptions,
    state: StateKind,
    progress: ProgressBar,
    frame: u64,
    next_due: Instant,
    shown: bool,
}

impl Playback {
    /// Loads the first frame of `source`.
    pub fn start(
        mut source: Box<dyn FrameSource>,
        options: PlaybackOptions,
        progress: ProgressBar,
    ) -> Result<Self> {
        let mut cloud = PointCloud::new();
        if !source.load_next(&mut cloud)? {
            bail!("the sequence has no frames");
        }

        let mut playback = Self {
            source,
            cloud,
            colors: vec![],
            options,
            state: StateKind::Playing,
            progress,
            frame: 0,
            next_due: Instant::now(),
            shown: false,
        };
        playback.present();
        Ok(playback)
    }

    pub fn cloud(&self) -> &PointCloud {
        &self.cloud
    }

    pub fn colors(&self) -> &[Point3<f32>] {
        &self.colors
    }

    /// 1-based number of the current frame within this pass.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn label(&self) -> Option<String> {
        self.source.label()
    }

    pub fn is_finished(&self) -> bool {
        self.state == StateKind::Finished
    }

    pub fn toggle_pause(&mut self) {
        use StateKind::*;

        self.state = match self.state {
            Pause => Playing,
            Playing => Pause,
            Finished => Finished,
        };
    }

    /// Records that the current frame reached the screen at `now`.
    pub fn mark_shown(&mut self, now: Instant) {
        if !self.shown {
            self.shown = true;
            self.next_due = now + self.options.interval;
        }
    }

    /// Time left before the current frame may be replaced.
    pub fn wait_time(&self, now: Instant) -> Option<Duration> {
        if self.state != StateKind::Playing || !self.shown {
            return None;
        }
        self.next_due.checked_duration_since(now)
    }

    /// Moves to the next frame once the current one has been shown for a full interval.
    pub fn tick(&mut self, now: Instant) -> Result<Tick> {
        if self.state != StateKind::Playing || !self.shown || now < self.next_due {
            return Ok(Tick::Continue);
        }

        if self.source.load_next(&mut self.cloud)? {
            self.present();
            return Ok(Tick::Continue);
        }

        if !self.options.looping {
            debug!("reached the end of the sequence after {} frames", self.frame);
            self.state = StateKind::Finished;
            self.progress.finish();
            return Ok(Tick::Close);
        }

        self.restart()?;
        Ok(Tick::Continue)
    }

    /// Goes back to the first frame and starts a new progress pass.
    pub fn restart(&mut self) -> Result<()> {
        self.source.rewind()?;
        self.progress.reset();
        self.frame = 0;
        if !self.source.load_next(&mut self.cloud)? {
            bail!("the sequence has no frames");
        }
        self.present();
        Ok(())
    }

    /// Prepares the freshly loaded frame for drawing.
    fn present(&mut self) {
        self.colors.clear();
        if self.options.colored {
            if let Some(range) = self.cloud.depth_range() {
                self.colors.extend(
                    self.cloud
                        .points
                        .iter()
                        .map(|point| depth_color(point.z, range)),
                );
            }
        }
        self.cloud.flip_for_display();

        self.frame += 1;
        self.progress.inc(1);
        self.shown = false;
    }
}

pub struct App {
    playback: Playback,
    camera: ArcBall,
    failure: Failure,
}

impl State for App {
    fn step(&mut self, window: &mut Window) {
        let result = self.try_step(window);
        if let Err(err) = result {
            *self.failure.borrow_mut() = Some(err);
            self.playback.progress.abandon();
            window.close();
        }
    }

    fn cameras_and_effect(
        &mut self,
    ) -> (
        Option<&mut dyn Camera>,
        Option<&mut dyn PlanarCamera>,
        Option<&mut dyn PostProcessingEffect>,
    ) {
        (Some(&mut self.camera), None, None)
    }
}

impl App {
    /// Loads the first frame and aims the camera at it.
    pub fn build(source: Box<dyn FrameSource>, options: PlaybackOptions) -> Result<Self> {
        let progress = frame_progress(source.len_hint())?;
        let playback = Playback::start(source, options, progress)?;
        let camera = fit_camera(playback.cloud());

        if options.looping {
            info!("Press Ctrl+C to end playback");
        }

        Ok(Self {
            playback,
            camera,
            failure: Failure::default(),
        })
    }

    pub fn failure(&self) -> Failure {
        self.failure.clone()
    }

    fn try_step(&mut self, window: &mut Window) -> Result<()> {
        self.update(window)?;
        self.render(window);
        Ok(())
    }

    fn update(&mut self, window: &mut Window) -> Result<()> {
        let mut restart = false;
        window.events().iter().for_each(|event| {
            use Action as A;
            use Key as K;
            use WindowEvent as E;

            match event.value {
                E::Key(K::Space, A::Press, _) => {
                    self.playback.toggle_pause();
                }
                E::Key(K::R, A::Press, _) => {
                    restart = true;
                }
                E::Key(K::Left, A::Release, _) => {
                    let curr_yaw = self.camera.yaw();
                    self.camera.set_yaw(curr_yaw - 0.05);
                }
                E::Key(K::Right, A::Release, _) => {
                    let curr_yaw = self.camera.yaw();
                    self.camera.set_yaw(curr_yaw + 0.05);
                }
                E::Key(K::Down, A::Release, _) => {
                    self.camera.set_pitch(self.camera.pitch() - 0.05);
                }
                E::Key(K::Up, A::Release, _) => {
                    self.camera.set_pitch(self.camera.pitch() + 0.05);
                }
                _ => {}
            }
        });

        if restart && !self.playback.is_finished() {
            self.playback.restart()?;
        }

        if let Some(rest) = self.playback.wait_time(Instant::now()) {
            thread::sleep(rest);
        }
        if self.playback.tick(Instant::now())? == Tick::Close {
            window.close();
        }

        Ok(())
    }

    fn render(&mut self, window: &mut Window) {
        let playback = &self.playback;
        let text = match playback.label() {
            Some(name) => format!("Frame: {}, name: {name}", playback.frame()),
            None => format!("Frame: {}", playback.frame()),
        };
        window.draw_text(
            &text,
            &Point2::from([5.0; 2]),
            40.0,
            &Font::default(),
            &Point3::from([0.0, 204.0, 0.0]),
        );

        let default_color = Point3::from([1.0; 3]);
        let colors = playback.colors();
        playback
            .cloud()
            .points
            .iter()
            .enumerate()
            .for_each(|(idx, point)| {
                let color = colors.get(idx).unwrap_or(&default_color);
                window.draw_point(point, color);
            });

        window.draw_axes(Point3::origin(), 0.05);

        self.playback.mark_shown(Instant::now());
    }
}

/// Places an orbit camera in front of the cloud, looking at its center.
fn fit_camera(cloud: &PointCloud) -> ArcBall {
    let (at, extent) = match bounds(cloud) {
        Some((min, max)) => (nalgebra::center(&min, &max), (max - min).amax()),
        None => (Point3::origin(), 1.0),
    };
    let distance = if extent > 0.0 { extent * 1.5 } else { 1.0 };
    let eye = at + Vector3::new(0.0, 0.0, distance);

    ArcBall::new_with_frustrum(FRAC_PI_4, distance * 1e-3, distance * 100.0, eye, at)
}

fn bounds(cloud: &PointCloud) -> Option<(Point3<f32>, Point3<f32>)> {
    let (first, rest) = cloud.points.split_first()?;
    let bounds = rest.iter().fold((*first, *first), |(min, max), point| {
        (min.inf(point), max.sup(point))
    });
    Some(bounds)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum StateKind {
    Pause,
    Playing,
    Finished,
}
