// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic swapchain lifecycle and frame scheduling.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

pub mod device;
pub mod error;
pub mod options;
pub mod present;
pub mod scheduler;
pub mod swapchain;
pub mod sync;

#[cfg(test)]
mod mock;

pub use device::{FrameBackend, FrameRecording, PresentDevice, RenderTarget, SwapchainDesc};
pub use error::{FrameError, FrameResult, Staleness, SwapchainError, VkResultExt};
pub use options::{RenderOptions, UpdateMode};
pub use scheduler::{FrameScheduler, FrameState, TickOutcome};
pub use swapchain::{RecreateStatus, SwapchainManager};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// Minimized windows report a zero dimension.
    pub fn is_degenerate(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl From<RenderSize> for vk::Extent2D {
    fn from(s: RenderSize) -> Self {
        vk::Extent2D {
            width: s.width,
            height: s.height,
        }
    }
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RenderOptions,
    ) -> FrameResult<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize);
    /// Schedules a redraw for on-demand rendering.
    fn request_frame(&mut self);
    fn wants_frame(&self) -> bool;
    fn render(&mut self) -> FrameResult<TickOutcome>;
    fn set_clear_color(&mut self, rgba: [f32; 4]);
}
