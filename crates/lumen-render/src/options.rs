// SPDX-License-Identifier: CEPL-1.0
use std::time::Duration;

/// When the frame loop schedules work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UpdateMode {
    /// Only after an explicit "content changed" request.
    OnDemand,
    /// Every tick, paced by vertical sync.
    #[default]
    Continuous,
    /// Every tick, as fast as the present engine allows.
    MaxFrameRate,
}

impl UpdateMode {
    /// Whether a completed frame schedules the next one on its own.
    pub fn reschedules(self) -> bool {
        !matches!(self, UpdateMode::OnDemand)
    }
}

pub const DEFAULT_IMAGE_COUNT: u32 = 2;
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

#[derive(Clone, Copy, Debug)]
pub struct RenderOptions {
    pub update_mode: UpdateMode,
    /// `None` defers to the platform preference.
    pub prefer_mailbox: Option<bool>,
    /// Requested swapchain length before clamping to surface limits.
    pub image_count: u32,
    /// Longest wait for a frame's GPU work before the device counts as hung.
    pub frame_timeout: Duration,
    pub clear_color: [f32; 4],
}

impl Default for RenderOptions {
    fn default() -> Self {
        RenderOptions {
            update_mode: UpdateMode::default(),
            prefer_mailbox: None,
            image_count: DEFAULT_IMAGE_COUNT,
            frame_timeout: DEFAULT_FRAME_TIMEOUT,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}
