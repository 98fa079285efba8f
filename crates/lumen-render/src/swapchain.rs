// SPDX-License-Identifier: CEPL-1.0
//! Swapchain generations and the resources that live and die with them.
//!
//! A generation is one chain plus its image views, framebuffers and the
//! pipeline whose viewport is baked to the chain extent. [`SwapchainManager`]
//! builds the next generation completely before swapping it in, then releases
//! the previous one in dependency order.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::{FrameBackend, PresentDevice, RenderTarget, SwapchainDesc};
use crate::error::{FrameError, FrameResult};
use crate::options::{RenderOptions, UpdateMode};
use crate::present::{
    choose_image_count, choose_present_mode, format_name, is_degenerate, present_mode_name,
    resolve_extent,
};

/// One version of the presentable image chain.
pub struct SwapchainGeneration<D: PresentDevice> {
    device: Arc<D>,
    id: u64,
    format: vk::Format,
    color_space: vk::ColorSpaceKHR,
    extent: vk::Extent2D,
    image_count: usize,
    present_mode: vk::PresentModeKHR,
    handle: vk::SwapchainKHR,
    retired: vk::SwapchainKHR,
}

impl<D: PresentDevice> SwapchainGeneration<D> {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }
    #[inline]
    pub fn color_space(&self) -> vk::ColorSpaceKHR {
        self.color_space
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
    #[inline]
    pub fn image_count(&self) -> usize {
        self.image_count
    }
    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }
    /// Chain this generation replaced. Already destroyed; diagnostics only.
    #[inline]
    pub fn retired(&self) -> vk::SwapchainKHR {
        self.retired
    }
}

impl<D: PresentDevice> Drop for SwapchainGeneration<D> {
    fn drop(&mut self) {
        self.device.destroy_swapchain(self.handle);
        debug!(generation = self.id, "destroyed swapchain");
    }
}

/// View and framebuffer for one image of a generation.
pub struct PresentableImageSlot<D: FrameBackend> {
    device: Arc<D>,
    index: u32,
    image: vk::Image,
    view: vk::ImageView,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl<D: FrameBackend> PresentableImageSlot<D> {
    fn new(
        device: &Arc<D>,
        index: u32,
        image: vk::Image,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> FrameResult<Self> {
        let view = device.create_image_view(image, format)?;
        let framebuffer = match device.create_framebuffer(view, extent) {
            Ok(fb) => fb,
            Err(e) => {
                device.destroy_image_view(view);
                return Err(e);
            }
        };
        Ok(Self {
            device: Arc::clone(device),
            index,
            image,
            view,
            framebuffer,
            extent,
        })
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.index
    }
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image
    }
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }
    #[inline]
    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.framebuffer
    }
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl<D: FrameBackend> Drop for PresentableImageSlot<D> {
    fn drop(&mut self) {
        self.device.destroy_framebuffer(self.framebuffer);
        self.device.destroy_image_view(self.view);
    }
}

/// Pipeline with viewport and scissor fixed to one generation's extent.
pub struct GenerationPipeline<D: RenderTarget> {
    device: Arc<D>,
    pipeline: vk::Pipeline,
}

impl<D: RenderTarget> GenerationPipeline<D> {
    fn new(device: &Arc<D>, extent: vk::Extent2D) -> FrameResult<Self> {
        let pipeline = device.create_pipeline(extent)?;
        Ok(Self {
            device: Arc::clone(device),
            pipeline,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }
}

impl<D: RenderTarget> Drop for GenerationPipeline<D> {
    fn drop(&mut self) {
        self.device.destroy_pipeline(self.pipeline);
    }
}

/// Everything built on top of a generation's images.
pub struct ResourceSet<D: FrameBackend> {
    generation_id: u64,
    slots: Vec<PresentableImageSlot<D>>,
    pipeline: GenerationPipeline<D>,
}

impl<D: FrameBackend> ResourceSet<D> {
    fn build(
        device: &Arc<D>,
        generation: &SwapchainGeneration<D>,
        images: &[vk::Image],
    ) -> FrameResult<Self> {
        let slots = images
            .iter()
            .enumerate()
            .map(|(i, &image)| {
                PresentableImageSlot::new(
                    device,
                    i as u32,
                    image,
                    generation.format,
                    generation.extent,
                )
            })
            .collect::<FrameResult<Vec<_>>>()?;
        let pipeline = GenerationPipeline::new(device, generation.extent)?;
        Ok(Self {
            generation_id: generation.id,
            slots,
            pipeline,
        })
    }

    #[inline]
    pub fn generation_id(&self) -> u64 {
        self.generation_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecreateStatus {
    /// A new generation is current.
    Ready { generation: u64 },
    /// The surface has no area right now; nothing was touched.
    NotReady,
}

/// Owns the current generation and rebuilds it on request.
pub struct SwapchainManager<D: FrameBackend> {
    device: Arc<D>,
    surface_format: vk::SurfaceFormatKHR,
    update_mode: UpdateMode,
    prefer_mailbox: bool,
    requested_image_count: u32,
    next_id: u64,
    // Declared before `current` so views and framebuffers go before the chain.
    resources: Option<ResourceSet<D>>,
    current: Option<SwapchainGeneration<D>>,
}

impl<D: FrameBackend> SwapchainManager<D> {
    /// `surface_format` must be the format the render target's render pass
    /// was built for. No chain exists until the first [`Self::recreate`].
    pub fn new(
        device: Arc<D>,
        surface_format: vk::SurfaceFormatKHR,
        options: &RenderOptions,
        platform_prefers_mailbox: bool,
    ) -> Self {
        Self {
            device,
            surface_format,
            update_mode: options.update_mode,
            prefer_mailbox: options.prefer_mailbox.unwrap_or(platform_prefers_mailbox),
            requested_image_count: options.image_count,
            next_id: 1,
            resources: None,
            current: None,
        }
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn current(&self) -> Option<&SwapchainGeneration<D>> {
        self.current.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.current.is_some() && self.resources.is_some()
    }

    /// Slots of the current generation, indexed by swapchain image index.
    pub fn current_images(&self) -> &[PresentableImageSlot<D>] {
        match &self.resources {
            Some(r) => &r.slots,
            None => &[],
        }
    }

    pub fn slot(&self, image_index: u32) -> FrameResult<&PresentableImageSlot<D>> {
        let slots = self.current_images();
        slots
            .get(image_index as usize)
            .ok_or(FrameError::InvalidImageIndex {
                index: image_index,
                image_count: slots.len(),
            })
    }

    pub fn pipeline(&self) -> Option<vk::Pipeline> {
        self.resources.as_ref().map(|r| r.pipeline.handle())
    }

    /// Replaces the current generation with one sized for `target`.
    ///
    /// Returns [`RecreateStatus::NotReady`] without side effects while the
    /// surface is degenerate. On error the previous generation, if any, stays
    /// installed and everything built for the new one is released.
    pub fn recreate(&mut self, target: vk::Extent2D) -> FrameResult<RecreateStatus> {
        if is_degenerate(target) {
            debug!(
                width = target.width,
                height = target.height,
                "skipping recreation for degenerate target"
            );
            return Ok(RecreateStatus::NotReady);
        }

        let caps = self.device.surface_capabilities()?;
        if self.device.surface_formats()?.is_empty() {
            return Err(FrameError::configuration(
                "surface reports no supported formats",
            ));
        }
        let Some(extent) = resolve_extent(&caps, target) else {
            debug!("surface extent is degenerate, not recreating");
            return Ok(RecreateStatus::NotReady);
        };

        self.device.wait_idle()?;

        let image_count = choose_image_count(self.requested_image_count, &caps);
        let present_mode = choose_present_mode(
            self.prefer_mailbox,
            self.update_mode,
            &self.device.present_modes()?,
        );
        let old = self.current.as_ref().map_or(vk::SwapchainKHR::null(), |g| g.handle);

        info!(
            "Swapchain: target={}x{} extent={}x{} caps.min={} caps.max={} images={} mode={} fmt={}",
            target.width,
            target.height,
            extent.width,
            extent.height,
            caps.min_image_count,
            caps.max_image_count,
            image_count,
            present_mode_name(present_mode),
            format_name(self.surface_format.format),
        );

        let handle = self.device.create_swapchain(&SwapchainDesc {
            surface_format: self.surface_format,
            extent,
            min_image_count: image_count,
            present_mode,
            pre_transform: caps.current_transform,
            old_swapchain: old,
        })?;
        let mut generation = SwapchainGeneration {
            device: Arc::clone(&self.device),
            id: self.next_id,
            format: self.surface_format.format,
            color_space: self.surface_format.color_space,
            extent,
            image_count: 0,
            present_mode,
            handle,
            retired: old,
        };
        let images = self.device.swapchain_images(handle)?;
        generation.image_count = images.len();
        let resources = ResourceSet::build(&self.device, &generation, &images)?;

        let old_resources = self.resources.replace(resources);
        let old_generation = self.current.replace(generation);
        drop(old_resources);
        drop(old_generation);

        let id = self.next_id;
        self.next_id += 1;
        info!(generation = id, images = images.len(), "swapchain ready");
        Ok(RecreateStatus::Ready { generation: id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Event, Kind, MockDevice};
    use ash::vk::Handle;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    fn manager(device: &Arc<MockDevice>, options: RenderOptions) -> SwapchainManager<MockDevice> {
        SwapchainManager::new(
            Arc::clone(device),
            crate::present::PREFERRED_SURFACE_FORMATS[0],
            &options,
            false,
        )
    }

    #[test]
    fn first_generation_matches_surface_limits() {
        let device = MockDevice::new();
        let mut m = manager(&device, RenderOptions::default());
        assert!(!m.is_ready());
        assert!(m.current_images().is_empty());

        let status = m.recreate(extent(1024, 768)).unwrap();
        assert_eq!(status, RecreateStatus::Ready { generation: 1 });

        let g = m.current().unwrap();
        assert_eq!(g.id(), 1);
        assert_eq!(g.image_count(), 2);
        assert_eq!((g.extent().width, g.extent().height), (1024, 768));
        assert_eq!(g.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(g.retired(), vk::SwapchainKHR::null());
        assert_eq!(m.current_images().len(), 2);
        for (i, slot) in m.current_images().iter().enumerate() {
            assert_eq!(slot.index() as usize, i);
            assert_eq!((slot.extent().width, slot.extent().height), (1024, 768));
        }

        let st = device.state();
        assert_eq!(st.swapchains.len(), 1);
        assert_eq!(st.swapchains[0].old_swapchain, vk::SwapchainKHR::null());
    }

    #[test]
    fn recreation_swaps_whole_generation() {
        let device = MockDevice::new();
        let mut m = manager(&device, RenderOptions::default());
        m.recreate(extent(1024, 768)).unwrap();
        let first = m.current().unwrap().handle();
        let first_fbs: Vec<_> = m.current_images().iter().map(|s| s.framebuffer()).collect();
        let first_pipeline = m.pipeline().unwrap();

        let status = m.recreate(extent(800, 600)).unwrap();
        assert_eq!(status, RecreateStatus::Ready { generation: 2 });
        let g = m.current().unwrap();
        assert_eq!(g.retired(), first);
        assert_eq!((g.extent().width, g.extent().height), (800, 600));
        assert!(m
            .current_images()
            .iter()
            .all(|s| !first_fbs.contains(&s.framebuffer())));
        assert_ne!(m.pipeline().unwrap(), first_pipeline);

        assert_eq!(device.live_count(Kind::Swapchain), 1);
        assert_eq!(device.live_count(Kind::ImageView), 2);
        assert_eq!(device.live_count(Kind::Framebuffer), 2);
        assert_eq!(device.live_count(Kind::Pipeline), 1);

        let st = device.state();
        assert_eq!(st.swapchains[1].old_swapchain, first);
        let second = g.handle().as_raw();
        let pos = |e: Event| st.events.iter().position(|x| *x == e).unwrap();
        assert!(pos(Event::CreateSwapchain(second)) < pos(Event::DestroySwapchain(first.as_raw())));
        let last_idle = st.events.iter().rposition(|e| *e == Event::WaitIdle).unwrap();
        assert!(last_idle < pos(Event::CreateSwapchain(second)));
    }

    #[test]
    fn degenerate_target_is_idempotent_and_silent() {
        let device = MockDevice::new();
        let mut m = manager(&device, RenderOptions::default());
        m.recreate(extent(640, 480)).unwrap();
        let before = device.state().events.len();
        let handle = m.current().unwrap().handle();

        for target in [extent(0, 480), extent(640, 0), extent(0, 0)] {
            assert_eq!(m.recreate(target).unwrap(), RecreateStatus::NotReady);
        }
        assert_eq!(device.state().events.len(), before);
        assert_eq!(m.current().unwrap().handle(), handle);
        assert!(m.is_ready());
    }

    #[test]
    fn zero_sized_surface_is_not_ready() {
        let device = MockDevice::new();
        device.state().caps.current_extent = extent(0, 0);
        let mut m = manager(&device, RenderOptions::default());
        assert_eq!(m.recreate(extent(800, 600)).unwrap(), RecreateStatus::NotReady);
        assert!(!m.is_ready());
        assert!(device.state().swapchains.is_empty());
    }

    #[test]
    fn empty_format_list_is_a_configuration_error() {
        let device = MockDevice::new();
        device.state().formats.clear();
        let mut m = manager(&device, RenderOptions::default());
        assert!(matches!(
            m.recreate(extent(800, 600)),
            Err(FrameError::Configuration(_))
        ));
        assert_eq!(device.total_live(), 0);
    }

    #[test]
    fn image_count_and_mode_follow_options() {
        let device = MockDevice::new();
        {
            let mut st = device.state();
            st.caps.max_image_count = 3;
            st.present_modes = vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        }
        let mut m = manager(
            &device,
            RenderOptions {
                image_count: 5,
                update_mode: UpdateMode::MaxFrameRate,
                ..Default::default()
            },
        );
        m.recreate(extent(800, 600)).unwrap();
        let g = m.current().unwrap();
        assert_eq!(g.image_count(), 3);
        assert_eq!(g.present_mode(), vk::PresentModeKHR::IMMEDIATE);
    }

    #[test]
    fn failed_build_releases_partial_generation() {
        let device = MockDevice::new();
        let mut m = manager(&device, RenderOptions::default());
        m.recreate(extent(800, 600)).unwrap();
        let handle = m.current().unwrap().handle();

        device.state().framebuffer_budget = Some(1);
        assert!(matches!(
            m.recreate(extent(1024, 768)),
            Err(FrameError::Api { op: "vkCreateFramebuffer", .. })
        ));
        assert_eq!(m.current().unwrap().handle(), handle);
        assert_eq!(device.live_count(Kind::Swapchain), 1);
        assert_eq!(device.live_count(Kind::ImageView), 2);
        assert_eq!(device.live_count(Kind::Framebuffer), 2);
        assert_eq!(device.live_count(Kind::Pipeline), 1);
    }

    #[test]
    fn out_of_range_slot_is_rejected() {
        let device = MockDevice::new();
        let mut m = manager(&device, RenderOptions::default());
        m.recreate(extent(800, 600)).unwrap();
        assert!(m.slot(1).is_ok());
        assert!(matches!(
            m.slot(2),
            Err(FrameError::InvalidImageIndex {
                index: 2,
                image_count: 2
            })
        ));
    }

    #[test]
    fn drop_releases_everything() {
        let device = MockDevice::new();
        let mut m = manager(&device, RenderOptions::default());
        m.recreate(extent(800, 600)).unwrap();
        m.recreate(extent(640, 480)).unwrap();
        drop(m);
        assert_eq!(device.total_live(), 0);
    }
}
