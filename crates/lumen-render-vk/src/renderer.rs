// SPDX-License-Identifier: CEPL-1.0
use std::sync::Arc;

use ash::khr::surface;
use ash::{vk, Entry, Instance};
use lumen_render::present::{choose_surface_format, format_name};
use lumen_render::{
    FrameError, FrameResult, FrameScheduler, PresentDevice, RenderOptions, RenderSize, Renderer,
    SwapchainManager, TickOutcome, VkResultExt,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use tracing::{info, warn};

use crate::bootstrap::{self, DebugMessenger};
use crate::device::AshDevice;

/// Owns every Vulkan object of the application, from the instance down to
/// the current swapchain generation.
pub struct VkRenderer {
    scheduler: Option<FrameScheduler<AshDevice>>,
    device: Option<Arc<AshDevice>>,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    instance: Instance,
    entry: Entry,
    torn_down: bool,
}

fn handle_error(e: raw_window_handle::HandleError) -> FrameError {
    FrameError::configuration(format!("window handle unavailable: {e}"))
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    options: RenderOptions,
) -> FrameResult<VkRenderer> {
    let dh: RawDisplayHandle = display.display_handle().map_err(handle_error)?.as_raw();
    let wh: RawWindowHandle = window.window_handle().map_err(handle_error)?.as_raw();

    let entry = bootstrap::load_entry()?;
    let instance = unsafe { bootstrap::create_instance(&entry, dh)? };
    let surface_loader = surface::Instance::new(&entry, &instance);

    // From here on, an early return tears down whatever was built.
    let mut r = VkRenderer {
        scheduler: None,
        device: None,
        debug: None,
        surface_loader,
        surface: vk::SurfaceKHR::null(),
        instance,
        entry,
        torn_down: false,
    };

    r.debug = unsafe { bootstrap::create_debug_messenger(&r.entry, &r.instance)? };
    r.surface = unsafe { ash_window::create_surface(&r.entry, &r.instance, dh, wh, None) }
        .op("vkCreateSurfaceKHR")?;

    let (phys, families) =
        unsafe { bootstrap::pick_device_and_queues(&r.instance, &r.surface_loader, r.surface)? };
    let formats = unsafe {
        r.surface_loader
            .get_physical_device_surface_formats(phys, r.surface)
    }
    .op("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
    let surface_format = choose_surface_format(&formats)?;
    info!(
        "vk: surface format {} ({:?})",
        format_name(surface_format.format),
        surface_format.color_space
    );

    let device = Arc::new(unsafe {
        AshDevice::new(
            &r.instance,
            r.surface_loader.clone(),
            r.surface,
            phys,
            families,
            surface_format.format,
        )?
    });
    r.device = Some(Arc::clone(&device));

    let prefers_mailbox = bootstrap::platform_prefers_mailbox(dh);
    let manager = SwapchainManager::new(device, surface_format, &options, prefers_mailbox);
    r.scheduler = Some(FrameScheduler::new(manager, &options, size.into())?);

    info!(
        "vk: renderer ready (mode={:?}, split queues={})",
        options.update_mode,
        families.is_split()
    );
    Ok(r)
}

impl VkRenderer {
    fn scheduler(&mut self) -> FrameResult<&mut FrameScheduler<AshDevice>> {
        self.scheduler
            .as_mut()
            .ok_or_else(|| FrameError::configuration("renderer already torn down"))
    }

    /// Current generation id, if a swapchain exists.
    pub fn generation(&self) -> Option<u64> {
        self.scheduler.as_ref().and_then(|s| s.generation())
    }

    // STRICT TEARDOWN ORDER:
    // - device_wait_idle()
    // - scheduler: generation resources, then the chain, then semaphores
    // - device-level objects, then the device
    // - debug messenger, surface, instance last
    /// Releases everything in reverse creation order. Runs at most once.
    pub fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;

        if let Some(device) = &self.device {
            if let Err(e) = device.wait_idle() {
                warn!("vk: wait_idle during teardown failed: {e}");
            }
        }
        drop(self.scheduler.take());
        if let Some(device) = self.device.take() {
            if Arc::strong_count(&device) > 1 {
                warn!("vk: device still referenced at teardown");
            }
            drop(device);
        }

        unsafe {
            if let Some(debug) = self.debug.take() {
                debug.destroy();
            }
            self.surface_loader.destroy_surface(self.surface, None);
            self.surface = vk::SurfaceKHR::null();
            self.instance.destroy_instance(None);
        }
        info!("vk: teardown complete");
    }
}

impl Drop for VkRenderer {
    fn drop(&mut self) {
        self.teardown();
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        options: RenderOptions,
    ) -> FrameResult<Self> {
        unsafe { build_renderer(window, display, size, options) }
    }

    fn resize(&mut self, size: RenderSize) {
        if let Some(s) = self.scheduler.as_mut() {
            s.notify_resize(size.into());
        }
    }

    fn request_frame(&mut self) {
        if let Some(s) = self.scheduler.as_mut() {
            s.request_frame();
        }
    }

    fn wants_frame(&self) -> bool {
        self.scheduler.as_ref().is_some_and(|s| s.wants_frame())
    }

    fn render(&mut self) -> FrameResult<TickOutcome> {
        self.scheduler()?.tick()
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        if let Some(s) = self.scheduler.as_mut() {
            s.set_clear_color(rgba);
            s.request_frame();
        }
    }
}
