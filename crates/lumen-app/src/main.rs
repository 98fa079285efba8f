// SPDX-License-Identifier: CEPL-1.0
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use lumen_core::init_tracing;
use lumen_render::{FrameResult, RenderOptions, RenderSize, Renderer, TickOutcome, UpdateMode};
use lumen_render_vk::VkRenderer;
use tracing::{error, info};

use lumen_platform::winit::{
    application::ApplicationHandler,
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, NamedKey},
    window::{Window, WindowId},
};

mod config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing means defaults
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log: String,

    #[command(flatten)]
    mode: ModeArgs,
}

#[derive(clap::Args, Debug)]
#[group(multiple = false)]
struct ModeArgs {
    /// Redraw only when content changes (space bar)
    #[arg(long)]
    on_demand: bool,
    /// Redraw every frame, paced by vsync
    #[arg(long)]
    continuous: bool,
    /// Redraw every frame, as fast as presentation allows
    #[arg(long)]
    max_frame_rate: bool,
}

impl ModeArgs {
    fn selected(&self) -> Option<UpdateMode> {
        if self.on_demand {
            Some(UpdateMode::OnDemand)
        } else if self.continuous {
            Some(UpdateMode::Continuous)
        } else if self.max_frame_rate {
            Some(UpdateMode::MaxFrameRate)
        } else {
            None
        }
    }
}

// Space cycles through these to exercise on-demand redraws.
const PALETTE: [[f32; 4]; 4] = [
    [0.0, 0.0, 0.0, 1.0],
    [0.02, 0.02, 0.04, 1.0],
    [0.05, 0.08, 0.12, 1.0],
    [0.12, 0.05, 0.05, 1.0],
];

struct App {
    options: RenderOptions,
    window: Option<Window>,
    renderer: Option<VkRenderer>,
    render_size: RenderSize,

    exiting: bool,
    // Surface had no area on the last tick; wait for a resize.
    parked: bool,
    // Pending redraw was asked for by about_to_wait, not the window system.
    loop_redraw: bool,
    fatal: Option<anyhow::Error>,
    palette_index: usize,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    fn new(options: RenderOptions) -> Self {
        App {
            options,
            window: None,
            renderer: None,
            render_size: RenderSize {
                width: 0,
                height: 0,
            },
            exiting: false,
            parked: false,
            loop_redraw: false,
            fatal: None,
            palette_index: 0,
            frames: 0,
            last_fps_instant: Instant::now(),
        }
    }

    /// Renderer goes before the window it draws into.
    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.exiting = true;
        if let Some(mut r) = self.renderer.take() {
            r.teardown();
        }
        self.window = None;
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        self.fatal = Some(err);
        self.shutdown(event_loop);
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let window = event_loop
            .create_window(lumen_platform::main_window_attributes("lumen"))
            .context("create_window")?;
        let size = window.inner_size();
        self.render_size = RenderSize {
            width: size.width,
            height: size.height,
        };
        let renderer = VkRenderer::new(&window, &window, self.render_size, self.options)
            .context("vulkan renderer init")?;
        info!(
            "window {}x{}, mode={:?}",
            size.width, size.height, self.options.update_mode
        );
        window.request_redraw();
        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
            return;
        }
        event_loop.set_control_flow(match self.options.update_mode {
            UpdateMode::MaxFrameRate => ControlFlow::Poll,
            UpdateMode::OnDemand | UpdateMode::Continuous => ControlFlow::Wait,
        });
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
                self.shutdown(event_loop);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                match event.logical_key {
                    Key::Named(NamedKey::Escape) => self.shutdown(event_loop),
                    Key::Named(NamedKey::Space) => {
                        self.palette_index = (self.palette_index + 1) % PALETTE.len();
                        if let Some(r) = &mut self.renderer {
                            r.set_clear_color(PALETTE[self.palette_index]);
                        }
                        if let Some(w) = &self.window {
                            w.request_redraw();
                        }
                    }
                    _ => {}
                }
            }

            WindowEvent::Resized(new_size) => {
                self.render_size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                if let Some(r) = &mut self.renderer {
                    r.resize(self.render_size);
                    if !self.render_size.is_degenerate() {
                        r.request_frame();
                    }
                }
                self.parked = false;
                if !self.render_size.is_degenerate() {
                    if let Some(w) = &self.window {
                        w.request_redraw();
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let from_window_system = !std::mem::take(&mut self.loop_redraw);
                let Some(r) = &mut self.renderer else {
                    return;
                };
                match redraw(r, from_window_system) {
                    Ok(TickOutcome::Presented { .. }) => {
                        self.frames = self.frames.saturating_add(1);
                    }
                    Ok(TickOutcome::Parked) => self.parked = true,
                    Ok(_) => {}
                    Err(e) => {
                        let err = anyhow::Error::new(e).context("frame loop halted");
                        self.fail(event_loop, err);
                    }
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }

        if let (Some(r), Some(w)) = (&self.renderer, &self.window) {
            if r.wants_frame() && !self.parked && !self.render_size.is_degenerate() {
                self.loop_redraw = true;
                w.request_redraw();
            }
        }

        let now = Instant::now();
        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            if self.frames > 0 {
                info!("fps ~ {}", self.frames);
            }
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

/// Redraws the window system asks for (expose, first paint) count as content
/// changes, so on-demand mode paints them too.
fn redraw<R: Renderer>(renderer: &mut R, from_window_system: bool) -> FrameResult<TickOutcome> {
    if from_window_system {
        renderer.request_frame();
    }
    renderer.render()
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log);

    let cfg = config::load_cfg(&args.config);
    let options = cfg.render.to_options(args.mode.selected());

    let event_loop: EventLoop<()> = EventLoop::new().context("create event loop")?;
    let mut app = App::new(options);
    event_loop.run_app(&mut app).context("event loop")?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
