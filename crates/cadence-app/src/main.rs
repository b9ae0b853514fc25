// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use cadence_core::init_tracing;
use cadence_platform::WindowProbe;
use cadence_render::{FrameConfig, FrameStatus, PresentPolicy, RenderSize, Renderer};
use cadence_render_vk::{ShaderSet, VkRenderer};
use clap::Parser;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use cadence_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing file means defaults
    #[arg(long, default_value = "cadence.toml")]
    config: PathBuf,
    /// Overrides `[render] frames_in_flight`
    #[arg(long)]
    frames_in_flight: Option<usize>,
    /// Force FIFO presentation
    #[arg(long)]
    vsync: bool,
    /// Directory holding tri.vert.spv and tri.frag.spv; the shaders built
    /// into the binary are used when absent
    #[arg(long)]
    shaders: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum PresentPolicyCfg {
    #[default]
    LowLatency,
    Vsync,
}

#[derive(Debug, Deserialize, Clone, Copy)]
struct RenderCfg {
    #[serde(default = "default_frames_in_flight")]
    frames_in_flight: usize,
    #[serde(default)]
    present_policy: PresentPolicyCfg,
    #[serde(default = "default_clear")]
    clear_color: [f32; 4],
    #[serde(default = "default_validation")]
    validation: bool,
}

#[derive(Debug, Deserialize, Clone)]
struct WindowCfg {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_width")]
    width: u32,
    #[serde(default = "default_height")]
    height: u32,
}

#[derive(Debug, Deserialize, Default)]
struct AppCfg {
    #[serde(default)]
    render: RenderCfg,
    #[serde(default)]
    window: WindowCfg,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            frames_in_flight: default_frames_in_flight(),
            present_policy: PresentPolicyCfg::LowLatency,
            clear_color: default_clear(),
            validation: default_validation(),
        }
    }
}

impl Default for WindowCfg {
    fn default() -> Self {
        WindowCfg {
            title: default_title(),
            width: default_width(),
            height: default_height(),
        }
    }
}

fn default_frames_in_flight() -> usize {
    FrameConfig::DEFAULT_FRAMES_IN_FLIGHT
}
fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}
fn default_validation() -> bool {
    cfg!(debug_assertions)
}
fn default_title() -> String {
    "cadence".to_owned()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}

fn parse_cfg(text: &str) -> Result<AppCfg> {
    Ok(toml::from_str::<AppCfg>(text)?)
}

fn load_cfg(path: &Path) -> AppCfg {
    match std::fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e:#}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => {
            info!("{} not found; using defaults", path.display());
            AppCfg::default()
        }
    }
}

/// File values, then CLI overrides.
fn frame_config(cfg: &RenderCfg, args: &Args) -> FrameConfig {
    let policy = if args.vsync {
        PresentPolicy::Vsync
    } else {
        match cfg.present_policy {
            PresentPolicyCfg::LowLatency => PresentPolicy::LowLatency,
            PresentPolicyCfg::Vsync => PresentPolicy::Vsync,
        }
    };
    FrameConfig {
        frames_in_flight: args.frames_in_flight.unwrap_or(cfg.frames_in_flight),
        present_policy: policy,
        clear_color: cfg.clear_color,
        validation: cfg.validation,
    }
}

fn load_shaders(dir: Option<&Path>) -> Result<ShaderSet> {
    match dir {
        Some(dir) => {
            info!("loading shaders from {}", dir.display());
            ShaderSet::load(dir)
        }
        None => ShaderSet::builtin(),
    }
}

/// Events after which a paused window may be drawable again without a
/// `Resized` (un-minimizing at the same size).
fn resumes_drawing(event: &WindowEvent) -> bool {
    matches!(event, WindowEvent::Occluded(false) | WindowEvent::Focused(true))
}

struct App {
    frame_config: FrameConfig,
    window_cfg: WindowCfg,
    shaders_dir: Option<PathBuf>,

    window: Option<Arc<Window>>,
    renderer: Option<VkRenderer<WindowProbe>>,
    failure: Option<anyhow::Error>,

    exiting: bool,
    paused: bool,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn init_renderer(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.window_cfg.title.clone())
            .with_inner_size(PhysicalSize::new(self.window_cfg.width, self.window_cfg.height));
        let window = Arc::new(event_loop.create_window(attrs).context("create_window")?);

        let inner = window.inner_size();
        let size = RenderSize::new(inner.width, inner.height);
        let shaders = load_shaders(self.shaders_dir.as_deref())?;
        let renderer = VkRenderer::new(
            window.as_ref(),
            window.as_ref(),
            WindowProbe::new(window.clone()),
            size,
            &self.frame_config,
            shaders,
        )
        .context("Vulkan renderer init")?;

        info!(
            "renderer ready: {} frames in flight, {:?}, extent {}",
            self.frame_config.frames_in_flight,
            self.frame_config.present_policy,
            renderer.extent()
        );
        self.paused = size.is_empty();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.failure = Some(err);
        self.close(event_loop);
    }

    // STRICT ORDER: renderer (drains the GPU) before the window it presents to.
    fn close(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut renderer) = self.renderer.take() {
            if let Some(frames) = renderer.frame_loop() {
                let stats = frames.scheduler().stats();
                info!(
                    "frames submitted: {}, acknowledged: {}, swapchain rebuilds: {}",
                    stats.submitted,
                    stats.acknowledged,
                    frames.recreation().rebuild_count()
                );
            }
            if let Err(e) = renderer.shutdown() {
                error!("shutdown: {e}");
            }
        }
        self.window = None;
        event_loop.exit();
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.init_renderer(event_loop) {
                self.fail(event_loop, e);
                return;
            }
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                if let Some(renderer) = &self.renderer {
                    renderer.notify_resized();
                }
                let now_paused = new_size.width == 0 || new_size.height == 0;
                if self.paused != now_paused {
                    info!(
                        "Resized → {}x{} (paused={})",
                        new_size.width, new_size.height, now_paused
                    );
                }
                self.paused = now_paused;
                if !self.paused {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(renderer) = &mut self.renderer else {
                    return;
                };
                match renderer.draw_frame() {
                    Ok(FrameStatus::Presented { .. }) => {
                        // count only frames that were actually presented
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(FrameStatus::Recreated(_)) => {
                        self.paused = false;
                    }
                    Ok(FrameStatus::Paused) => {
                        self.paused = true;
                    }
                    Err(e) => self.fail(event_loop, anyhow!(e).context("draw_frame")),
                }
            }

            ref other if self.paused && resumes_drawing(other) => {
                debug!("{other:?} while paused; retrying the swapchain");
                if let Some(renderer) = &self.renderer {
                    renderer.notify_resized();
                }
                self.paused = false;
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if self.paused {
            // zero-area surface: sleep until a resize or the window shows again
            event_loop.set_control_flow(ControlFlow::Wait);
            self.frames = 0;
            return;
        }

        event_loop.set_control_flow(ControlFlow::Poll);
        if let Some(w) = &self.window {
            w.request_redraw();
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = load_cfg(&args.config);
    let frame_config = frame_config(&cfg.render, &args);
    frame_config.validate()?;

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        frame_config,
        window_cfg: cfg.window,
        shaders_dir: args.shaders,
        window: None,
        renderer: None,
        failure: None,
        exiting: false,
        paused: false,
        frames: 0,
        last_fps_instant: Instant::now(),
    };

    event_loop.run_app(&mut app)?;
    match app.failure.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(std::iter::once("cadence-app").chain(extra.iter().copied()))
    }

    #[test]
    fn empty_file_gives_defaults() {
        let cfg = parse_cfg("").expect("empty toml");
        assert_eq!(cfg.render.frames_in_flight, 2);
        assert_eq!(cfg.render.present_policy, PresentPolicyCfg::LowLatency);
        assert_eq!(cfg.window.title, "cadence");
        assert_eq!((cfg.window.width, cfg.window.height), (1280, 720));
    }

    #[test]
    fn file_values_are_read() {
        let cfg = parse_cfg(
            r#"
            [render]
            frames_in_flight = 3
            present_policy = "vsync"
            clear_color = [0.1, 0.2, 0.3, 1.0]
            validation = false

            [window]
            title = "demo"
            width = 800
            "#,
        )
        .expect("valid toml");
        assert_eq!(cfg.render.frames_in_flight, 3);
        assert_eq!(cfg.render.present_policy, PresentPolicyCfg::Vsync);
        assert_eq!(cfg.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert!(!cfg.render.validation);
        assert_eq!(cfg.window.title, "demo");
        assert_eq!((cfg.window.width, cfg.window.height), (800, 720));
    }

    #[test]
    fn bad_file_is_an_error_not_a_panic() {
        assert!(parse_cfg("[render]\nfps = [").is_err());
        assert!(parse_cfg("[render]\npresent_policy = \"triple\"").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = load_cfg(Path::new("no/such/cadence.toml"));
        assert_eq!(cfg.render.frames_in_flight, 2);
    }

    #[test]
    fn cli_overrides_file() {
        let file = RenderCfg {
            frames_in_flight: 3,
            ..RenderCfg::default()
        };
        let fc = frame_config(&file, &args(&[]));
        assert_eq!(fc.frames_in_flight, 3);
        assert_eq!(fc.present_policy, PresentPolicy::LowLatency);

        let fc = frame_config(&file, &args(&["--frames-in-flight", "1", "--vsync"]));
        assert_eq!(fc.frames_in_flight, 1);
        assert_eq!(fc.present_policy, PresentPolicy::Vsync);
    }

    #[test]
    fn shaders_default_to_the_built_in_set() {
        assert!(args(&[]).shaders.is_none());
        load_shaders(None).expect("built-in shaders");

        let a = args(&["--shaders", "definitely/not/here"]);
        assert!(load_shaders(a.shaders.as_deref()).is_err());
    }

    #[test]
    fn window_showing_again_resumes_drawing() {
        assert!(resumes_drawing(&WindowEvent::Occluded(false)));
        assert!(resumes_drawing(&WindowEvent::Focused(true)));
        assert!(!resumes_drawing(&WindowEvent::Occluded(true)));
        assert!(!resumes_drawing(&WindowEvent::Focused(false)));
        assert!(!resumes_drawing(&WindowEvent::CloseRequested));
    }

    #[test]
    fn zero_frames_in_flight_fails_validation() {
        let fc = frame_config(&RenderCfg::default(), &args(&["--frames-in-flight", "0"]));
        assert!(fc.validate().is_err());
    }
}
