// SPDX-License-Identifier: CEPL-1.0
//! Per-frame state machine: acquire, record, submit, present.
//!
//! Each step consumes the token produced by the step before it, so a frame
//! cannot be recorded without an acquired image or presented without a
//! submission. Staleness reported by the driver is folded into a single
//! recreation point at the start of the next tick. Only one frame is ever in
//! flight: the tick does not return until the GPU has finished it.

use std::time::Duration;

use ash::vk;
use tracing::{debug, error, trace, warn};

use crate::device::{FrameBackend, FrameRecording};
use crate::error::{FrameError, FrameResult, Staleness, SwapchainError};
use crate::options::{RenderOptions, UpdateMode};
use crate::swapchain::{RecreateStatus, SwapchainManager};
use crate::sync::SyncSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
    /// Waiting for a usable surface extent.
    Recreating,
}

/// What one call to [`FrameScheduler::tick`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was scheduled.
    Idle,
    Presented { frame_id: u64, image_index: u32 },
    /// Rendered and submitted, but the present engine reported out-of-date.
    Dropped { frame_id: u64 },
    /// Acquire reported a stale chain; the chain was rebuilt instead.
    Abandoned,
    /// The surface has no area; rendering resumes after a usable resize.
    Parked,
    /// A previous tick failed fatally.
    Halted,
}

/// Image handed out by acquire, valid for the generation it came from.
#[must_use]
struct AcquiredImage {
    image_index: u32,
    suboptimal: bool,
}

#[must_use]
struct RecordedFrame {
    image_index: u32,
    frame_id: u64,
}

#[must_use]
struct SubmittedFrame {
    image_index: u32,
    frame_id: u64,
}

enum Presented {
    Optimal,
    Suboptimal,
    OutOfDate,
}

pub struct FrameScheduler<D: FrameBackend> {
    // Chain and its resources go before the semaphores they were used with.
    manager: SwapchainManager<D>,
    sync: SyncSet<D>,
    mode: UpdateMode,
    state: FrameState,
    frame_id: u64,
    target_extent: vk::Extent2D,
    frame_scheduled: bool,
    recreate_pending: bool,
    halted: bool,
    frame_timeout: Duration,
    clear_color: [f32; 4],
}

impl<D: FrameBackend> FrameScheduler<D> {
    /// Builds the first generation for `initial_extent`. A degenerate extent
    /// is not an error; the scheduler starts parked.
    pub fn new(
        manager: SwapchainManager<D>,
        options: &RenderOptions,
        initial_extent: vk::Extent2D,
    ) -> FrameResult<Self> {
        let sync = SyncSet::new(manager.device().clone())?;
        let mut scheduler = Self {
            manager,
            sync,
            mode: options.update_mode,
            state: FrameState::Recreating,
            frame_id: 0,
            target_extent: initial_extent,
            frame_scheduled: false,
            recreate_pending: true,
            halted: false,
            frame_timeout: options.frame_timeout,
            clear_color: options.clear_color,
        };
        scheduler.recreate()?;
        Ok(scheduler)
    }

    /// Records the new window size; the chain is rebuilt on the next tick.
    pub fn notify_resize(&mut self, extent: vk::Extent2D) {
        trace!(width = extent.width, height = extent.height, "resize noted");
        self.target_extent = extent;
        self.recreate_pending = true;
    }

    /// Content changed; schedules a frame in every mode.
    pub fn request_frame(&mut self) {
        if !self.halted {
            self.frame_scheduled = true;
        }
    }

    /// Whether the next tick has work to do.
    pub fn wants_frame(&self) -> bool {
        !self.halted && (self.frame_scheduled || self.recreate_pending)
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn mode(&self) -> UpdateMode {
        self.mode
    }

    /// Id of the last frame that got past acquire.
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    pub fn generation(&self) -> Option<u64> {
        self.manager.current().map(|g| g.id())
    }

    pub fn manager(&self) -> &SwapchainManager<D> {
        &self.manager
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Runs at most one frame. A returned error has already halted the
    /// scheduler; later ticks report [`TickOutcome::Halted`].
    pub fn tick(&mut self) -> FrameResult<TickOutcome> {
        if self.halted {
            return Ok(TickOutcome::Halted);
        }
        self.run_tick().inspect_err(|e| self.halt(e))
    }

    fn halt(&mut self, err: &FrameError) {
        error!("frame loop halted: {err}");
        self.halted = true;
        self.frame_scheduled = false;
        self.state = FrameState::Idle;
    }

    fn run_tick(&mut self) -> FrameResult<TickOutcome> {
        if (self.recreate_pending || !self.manager.is_ready()) && !self.recreate()? {
            return Ok(TickOutcome::Parked);
        }
        if !self.frame_scheduled {
            return Ok(TickOutcome::Idle);
        }

        let acquired = match self.acquire() {
            Ok(a) => a,
            Err(SwapchainError::Stale(staleness)) => {
                warn!(?staleness, "acquire: swapchain stale, abandoning frame");
                self.recreate_pending = true;
                return Ok(if self.recreate()? {
                    TickOutcome::Abandoned
                } else {
                    TickOutcome::Parked
                });
            }
            Err(SwapchainError::Fatal(e)) => return Err(e),
        };
        if acquired.suboptimal {
            warn!("acquire: swapchain suboptimal, recreating after this frame");
            self.recreate_pending = true;
        }

        let recorded = self.record(acquired)?;
        let submitted = self.submit(recorded)?;
        let (frame_id, image_index) = (submitted.frame_id, submitted.image_index);
        let presented = self.present(submitted)?;

        self.state = FrameState::Idle;
        self.manager.device().wait_frame_complete(self.frame_timeout)?;

        let outcome = match presented {
            Presented::Optimal => TickOutcome::Presented {
                frame_id,
                image_index,
            },
            Presented::Suboptimal => {
                warn!("present: swapchain suboptimal");
                self.recreate_pending = true;
                TickOutcome::Presented {
                    frame_id,
                    image_index,
                }
            }
            Presented::OutOfDate => {
                // The frame never reached the screen; it stays scheduled.
                warn!("present: swapchain out of date");
                self.recreate_pending = true;
                return Ok(TickOutcome::Dropped { frame_id });
            }
        };
        self.frame_scheduled = self.mode.reschedules();
        Ok(outcome)
    }

    /// Returns `false` while parked on a degenerate extent. On-demand mode
    /// leaves scheduling alone; the window system asks for the redraw.
    fn recreate(&mut self) -> FrameResult<bool> {
        self.state = FrameState::Recreating;
        match self.manager.recreate(self.target_extent)? {
            RecreateStatus::Ready { generation } => {
                debug!(generation, "new generation ready");
                self.recreate_pending = false;
                if self.mode.reschedules() {
                    self.frame_scheduled = true;
                }
                self.state = FrameState::Idle;
                Ok(true)
            }
            RecreateStatus::NotReady => Ok(false),
        }
    }

    fn acquire(&mut self) -> Result<AcquiredImage, SwapchainError> {
        self.state = FrameState::Acquiring;
        let Some(generation) = self.manager.current() else {
            return Err(SwapchainError::Stale(Staleness::OutOfDate));
        };
        let (image_index, suboptimal) = self
            .manager
            .device()
            .acquire_next_image(generation.handle(), self.sync.image_available())?;
        if image_index as usize >= generation.image_count() {
            return Err(FrameError::InvalidImageIndex {
                index: image_index,
                image_count: generation.image_count(),
            }
            .into());
        }
        Ok(AcquiredImage {
            image_index,
            suboptimal,
        })
    }

    fn record(&mut self, acquired: AcquiredImage) -> FrameResult<RecordedFrame> {
        self.state = FrameState::Recording;
        self.frame_id += 1;
        let slot = self.manager.slot(acquired.image_index)?;
        let pipeline = self
            .manager
            .pipeline()
            .ok_or_else(|| FrameError::configuration("no pipeline for current generation"))?;
        trace!(frame = self.frame_id, image = acquired.image_index, "recording");
        self.manager.device().record_frame(&FrameRecording {
            image_index: acquired.image_index,
            framebuffer: slot.framebuffer(),
            extent: slot.extent(),
            pipeline,
            frame_id: self.frame_id,
            clear_color: self.clear_color,
        })?;
        Ok(RecordedFrame {
            image_index: acquired.image_index,
            frame_id: self.frame_id,
        })
    }

    fn submit(&mut self, recorded: RecordedFrame) -> FrameResult<SubmittedFrame> {
        self.state = FrameState::Submitting;
        self.manager
            .device()
            .submit(self.sync.image_available(), self.sync.render_finished())?;
        Ok(SubmittedFrame {
            image_index: recorded.image_index,
            frame_id: recorded.frame_id,
        })
    }

    fn present(&mut self, submitted: SubmittedFrame) -> FrameResult<Presented> {
        self.state = FrameState::Presenting;
        let Some(generation) = self.manager.current() else {
            return Err(FrameError::configuration("presenting without a swapchain"));
        };
        match self.manager.device().present(
            generation.handle(),
            submitted.image_index,
            self.sync.render_finished(),
        ) {
            Ok(false) => Ok(Presented::Optimal),
            Ok(true) | Err(SwapchainError::Stale(Staleness::Suboptimal)) => {
                Ok(Presented::Suboptimal)
            }
            Err(SwapchainError::Stale(Staleness::OutOfDate)) => Ok(Presented::OutOfDate),
            Err(SwapchainError::Fatal(e)) => Err(e),
        }
    }
}

impl<D: FrameBackend> Drop for FrameScheduler<D> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.device().wait_idle() {
            warn!("wait_idle before releasing frame resources failed: {e}");
        }
    }
}
