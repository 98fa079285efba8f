// SPDX-License-Identifier: CEPL-1.0
//! Scripted stand-in for a GPU, used by the frame loop tests.
//!
//! Handles are minted from a counter and tracked until destroyed; destroying a
//! handle that is not live, or using one in a frame, panics. Acquire and
//! present results are popped from per-call scripts and default to success.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ash::vk::{self, Handle};

use crate::device::{FrameRecording, PresentDevice, RenderTarget, SwapchainDesc};
use crate::error::{FrameError, FrameResult, SwapchainError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Swapchain,
    ImageView,
    Framebuffer,
    Pipeline,
    Semaphore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Scripted {
    Optimal,
    Suboptimal,
    OutOfDate,
    Fail(vk::Result),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    WaitIdle,
    CreateSwapchain(u64),
    DestroySwapchain(u64),
    Acquire(u32),
    Record(u64),
    Submit,
    Present(u32),
    WaitFrame,
}

pub(crate) struct MockState {
    pub caps: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub acquire_script: VecDeque<Scripted>,
    pub present_script: VecDeque<Scripted>,
    pub hang: bool,
    /// Framebuffers that may still be created before creation starts failing.
    pub framebuffer_budget: Option<usize>,
    pub swapchains: Vec<SwapchainDesc>,
    pub recordings: Vec<FrameRecording>,
    pub events: Vec<Event>,
    live: HashMap<u64, Kind>,
    images: HashMap<u64, usize>,
    framebuffer_extents: HashMap<u64, vk::Extent2D>,
    next_raw: u64,
    next_image: u32,
}

impl MockState {
    fn mint(&mut self, kind: Kind) -> u64 {
        self.next_raw += 1;
        self.live.insert(self.next_raw, kind);
        self.next_raw
    }

    fn release(&mut self, raw: u64, kind: Kind) {
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            other => panic!("destroying {kind:?} {raw:#x} that is not live (found {other:?})"),
        }
    }

    fn assert_live(&self, raw: u64, kind: Kind) {
        assert_eq!(
            self.live.get(&raw),
            Some(&kind),
            "{kind:?} {raw:#x} used after it was destroyed"
        );
    }

    pub fn live_count(&self, kind: Kind) -> usize {
        self.live.values().filter(|&&k| k == kind).count()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.iter().filter(|&e| pred(e)).count()
    }
}

pub(crate) struct MockDevice {
    state: Mutex<MockState>,
}

impl MockDevice {
    /// Free-size surface (extent follows the caller), two images minimum, no maximum.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                caps: vk::SurfaceCapabilitiesKHR {
                    min_image_count: 2,
                    max_image_count: 0,
                    current_extent: vk::Extent2D {
                        width: u32::MAX,
                        height: u32::MAX,
                    },
                    min_image_extent: vk::Extent2D {
                        width: 1,
                        height: 1,
                    },
                    max_image_extent: vk::Extent2D {
                        width: 16384,
                        height: 16384,
                    },
                    current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                    ..Default::default()
                },
                formats: vec![vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                }],
                present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
                acquire_script: VecDeque::new(),
                present_script: VecDeque::new(),
                hang: false,
                framebuffer_budget: None,
                swapchains: Vec::new(),
                recordings: Vec::new(),
                events: Vec::new(),
                live: HashMap::new(),
                images: HashMap::new(),
                framebuffer_extents: HashMap::new(),
                next_raw: 0x1000,
                next_image: 0,
            }),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn script_acquire(&self, steps: impl IntoIterator<Item = Scripted>) {
        self.state().acquire_script.extend(steps);
    }

    pub fn script_present(&self, steps: impl IntoIterator<Item = Scripted>) {
        self.state().present_script.extend(steps);
    }

    pub fn live_count(&self, kind: Kind) -> usize {
        self.state().live_count(kind)
    }

    pub fn total_live(&self) -> usize {
        self.state().live.len()
    }
}

fn stale_or_fatal<T>(
    op: &'static str,
    step: Scripted,
    ok: impl FnOnce(bool) -> T,
) -> Result<T, SwapchainError> {
    match step {
        Scripted::Optimal => Ok(ok(false)),
        Scripted::Suboptimal => Ok(ok(true)),
        Scripted::OutOfDate => Err(SwapchainError::classify(
            op,
            vk::Result::ERROR_OUT_OF_DATE_KHR,
        )),
        Scripted::Fail(r) => Err(SwapchainError::classify(op, r)),
    }
}

impl PresentDevice for MockDevice {
    fn surface_capabilities(&self) -> FrameResult<vk::SurfaceCapabilitiesKHR> {
        Ok(self.state().caps)
    }

    fn surface_formats(&self) -> FrameResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(self.state().formats.clone())
    }

    fn present_modes(&self) -> FrameResult<Vec<vk::PresentModeKHR>> {
        Ok(self.state().present_modes.clone())
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> FrameResult<vk::SwapchainKHR> {
        let mut st = self.state();
        if desc.old_swapchain != vk::SwapchainKHR::null() {
            st.assert_live(desc.old_swapchain.as_raw(), Kind::Swapchain);
        }
        let raw = st.mint(Kind::Swapchain);
        st.images.insert(raw, desc.min_image_count as usize);
        st.swapchains.push(*desc);
        st.events.push(Event::CreateSwapchain(raw));
        st.next_image = 0;
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> FrameResult<Vec<vk::Image>> {
        let st = self.state();
        let count = st.images[&swapchain.as_raw()];
        Ok((0..count)
            .map(|i| vk::Image::from_raw(swapchain.as_raw() * 100 + i as u64))
            .collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        let mut st = self.state();
        st.release(swapchain.as_raw(), Kind::Swapchain);
        st.events.push(Event::DestroySwapchain(swapchain.as_raw()));
    }

    fn create_image_view(
        &self,
        _image: vk::Image,
        _format: vk::Format,
    ) -> FrameResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.state().mint(Kind::ImageView)))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.state().release(view.as_raw(), Kind::ImageView);
    }

    fn create_semaphore(&self) -> FrameResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.state().mint(Kind::Semaphore)))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state().release(semaphore.as_raw(), Kind::Semaphore);
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), SwapchainError> {
        let mut st = self.state();
        st.assert_live(swapchain.as_raw(), Kind::Swapchain);
        st.assert_live(signal.as_raw(), Kind::Semaphore);
        let step = st.acquire_script.pop_front().unwrap_or(Scripted::Optimal);
        let count = st.images[&swapchain.as_raw()] as u32;
        let index = st.next_image % count;
        let result = stale_or_fatal("vkAcquireNextImageKHR", step, |sub| (index, sub));
        if result.is_ok() {
            st.next_image += 1;
            st.events.push(Event::Acquire(index));
        }
        result
    }

    fn submit(&self, wait: vk::Semaphore, signal: vk::Semaphore) -> FrameResult<()> {
        let mut st = self.state();
        st.assert_live(wait.as_raw(), Kind::Semaphore);
        st.assert_live(signal.as_raw(), Kind::Semaphore);
        st.events.push(Event::Submit);
        Ok(())
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, SwapchainError> {
        let mut st = self.state();
        st.assert_live(swapchain.as_raw(), Kind::Swapchain);
        st.assert_live(wait.as_raw(), Kind::Semaphore);
        let step = st.present_script.pop_front().unwrap_or(Scripted::Optimal);
        st.events.push(Event::Present(image_index));
        stale_or_fatal("vkQueuePresentKHR", step, |sub| sub)
    }

    fn wait_frame_complete(&self, timeout: Duration) -> FrameResult<()> {
        let mut st = self.state();
        st.events.push(Event::WaitFrame);
        if st.hang {
            return Err(FrameError::DeviceHang {
                op: "vkWaitForFences",
                timeout,
            });
        }
        Ok(())
    }

    fn wait_idle(&self) -> FrameResult<()> {
        self.state().events.push(Event::WaitIdle);
        Ok(())
    }
}

impl RenderTarget for MockDevice {
    fn create_framebuffer(
        &self,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> FrameResult<vk::Framebuffer> {
        let mut st = self.state();
        st.assert_live(view.as_raw(), Kind::ImageView);
        match st.framebuffer_budget {
            Some(0) => {
                return Err(FrameError::api(
                    "vkCreateFramebuffer",
                    vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                ))
            }
            Some(ref mut n) => *n -= 1,
            None => {}
        }
        let raw = st.mint(Kind::Framebuffer);
        st.framebuffer_extents.insert(raw, extent);
        Ok(vk::Framebuffer::from_raw(raw))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        let mut st = self.state();
        st.release(framebuffer.as_raw(), Kind::Framebuffer);
        st.framebuffer_extents.remove(&framebuffer.as_raw());
    }

    fn create_pipeline(&self, _extent: vk::Extent2D) -> FrameResult<vk::Pipeline> {
        Ok(vk::Pipeline::from_raw(self.state().mint(Kind::Pipeline)))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.state().release(pipeline.as_raw(), Kind::Pipeline);
    }

    fn record_frame(&self, frame: &FrameRecording) -> FrameResult<()> {
        let mut st = self.state();
        st.assert_live(frame.framebuffer.as_raw(), Kind::Framebuffer);
        st.assert_live(frame.pipeline.as_raw(), Kind::Pipeline);
        let fb_extent = st.framebuffer_extents[&frame.framebuffer.as_raw()];
        assert_eq!(
            (fb_extent.width, fb_extent.height),
            (frame.extent.width, frame.extent.height),
            "recording extent differs from the framebuffer it targets"
        );
        st.recordings.push(*frame);
        st.events.push(Event::Record(frame.framebuffer.as_raw()));
        Ok(())
    }
}
