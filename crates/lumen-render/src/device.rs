// SPDX-License-Identifier: CEPL-1.0
//! Collaborator contracts the frame loop is written against.
//!
//! [`PresentDevice`] is the device/queue side: surface queries, the swapchain
//! itself, semaphores and queue operations. [`RenderTarget`] is the render pass
//! side: it builds framebuffers and the per-generation pipeline against its own
//! render pass, and records a frame. Both take `&self`; implementations own
//! whatever interior state they need.

use std::time::Duration;

use ash::vk;

use crate::error::{FrameResult, SwapchainError};

/// Everything needed to build one swapchain generation.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainDesc {
    pub surface_format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
    pub min_image_count: u32,
    pub present_mode: vk::PresentModeKHR,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
    /// Chain being replaced, or null on first creation.
    pub old_swapchain: vk::SwapchainKHR,
}

/// Inputs for recording one frame. All handles belong to the same generation.
#[derive(Clone, Copy, Debug)]
pub struct FrameRecording {
    pub image_index: u32,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub frame_id: u64,
    pub clear_color: [f32; 4],
}

pub trait PresentDevice {
    fn surface_capabilities(&self) -> FrameResult<vk::SurfaceCapabilitiesKHR>;
    fn surface_formats(&self) -> FrameResult<Vec<vk::SurfaceFormatKHR>>;
    fn present_modes(&self) -> FrameResult<Vec<vk::PresentModeKHR>>;

    fn create_swapchain(&self, desc: &SwapchainDesc) -> FrameResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> FrameResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);

    fn create_image_view(&self, image: vk::Image, format: vk::Format)
        -> FrameResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);

    fn create_semaphore(&self) -> FrameResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Returns `(image_index, suboptimal)`. Blocks without a timeout.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), SwapchainError>;

    /// Submits the last recorded frame on the graphics queue, waiting on `wait`
    /// at color-attachment output and signaling `signal`.
    fn submit(&self, wait: vk::Semaphore, signal: vk::Semaphore) -> FrameResult<()>;

    /// Returns `true` when the present was suboptimal.
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, SwapchainError>;

    /// Blocks until the last submission and its presentation are done.
    /// Running past `timeout` is a [`crate::FrameError::DeviceHang`].
    fn wait_frame_complete(&self, timeout: Duration) -> FrameResult<()>;

    fn wait_idle(&self) -> FrameResult<()>;
}

pub trait RenderTarget {
    fn create_framebuffer(
        &self,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> FrameResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    /// Pipeline with viewport/scissor baked to `extent`.
    fn create_pipeline(&self, extent: vk::Extent2D) -> FrameResult<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    fn record_frame(&self, frame: &FrameRecording) -> FrameResult<()>;
}

/// A device that can drive the whole frame loop.
pub trait FrameBackend: PresentDevice + RenderTarget {}

impl<T: PresentDevice + RenderTarget + ?Sized> FrameBackend for T {}
