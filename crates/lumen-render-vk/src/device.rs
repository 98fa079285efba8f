// SPDX-License-Identifier: CEPL-1.0
//! Logical device plus the long-lived objects every generation is built on.

use std::io::Cursor;
use std::time::Duration;

use ash::khr::{surface, swapchain};
use ash::util::read_spv;
use ash::{vk, Instance};
use lumen_render::{
    FrameError, FrameRecording, FrameResult, PresentDevice, RenderTarget, SwapchainDesc,
    SwapchainError, VkResultExt,
};
use tracing::debug;

use crate::bootstrap::{create_logical_device, QueueFamilies};

const SHADER_ENTRY: &std::ffi::CStr = c"main";

/// Owns the device and everything that outlives a swapchain generation:
/// render pass, pipeline layout, shader modules, pipeline cache, the single
/// command buffer and the frame fence. The surface stays with the caller.
pub struct AshDevice {
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    swapchain_loader: swapchain::Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,

    render_pass: vk::RenderPass,
    pipeline_layout: vk::PipelineLayout,
    vs: vk::ShaderModule,
    fs: vk::ShaderModule,
    pipeline_cache: vk::PipelineCache,

    cmd_pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
    frame_fence: vk::Fence,
}

impl AshDevice {
    /// # Safety
    /// `surface` must come from `instance`, and both must outlive the result.
    pub(crate) unsafe fn new(
        instance: &Instance,
        surface_loader: surface::Instance,
        surface: vk::SurfaceKHR,
        phys: vk::PhysicalDevice,
        families: QueueFamilies,
        color_format: vk::Format,
    ) -> FrameResult<Self> {
        // SAFETY: caller upholds the instance/surface contract above.
        unsafe {
            let device = create_logical_device(instance, phys, families)?;
            let swapchain_loader = swapchain::Device::new(instance, &device);
            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);

            // Null handles are valid to destroy, so a failure below unwinds through Drop.
            let mut d = AshDevice {
                surface_loader,
                surface,
                phys,
                device,
                swapchain_loader,
                families,
                graphics_queue,
                present_queue,
                render_pass: vk::RenderPass::null(),
                pipeline_layout: vk::PipelineLayout::null(),
                vs: vk::ShaderModule::null(),
                fs: vk::ShaderModule::null(),
                pipeline_cache: vk::PipelineCache::null(),
                cmd_pool: vk::CommandPool::null(),
                cmd: vk::CommandBuffer::null(),
                frame_fence: vk::Fence::null(),
            };
            d.render_pass = create_render_pass(&d.device, color_format)?;
            d.pipeline_layout = d
                .device
                .create_pipeline_layout(
                    &vk::PipelineLayoutCreateInfo {
                        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
                        ..Default::default()
                    },
                    None,
                )
                .op("vkCreatePipelineLayout")?;
            d.vs = load_shader(
                &d.device,
                include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv")),
            )?;
            d.fs = load_shader(
                &d.device,
                include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv")),
            )?;
            d.pipeline_cache = d
                .device
                .create_pipeline_cache(
                    &vk::PipelineCacheCreateInfo {
                        s_type: vk::StructureType::PIPELINE_CACHE_CREATE_INFO,
                        ..Default::default()
                    },
                    None,
                )
                .op("vkCreatePipelineCache")?;

            d.cmd_pool = d
                .device
                .create_command_pool(
                    &vk::CommandPoolCreateInfo {
                        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
                        queue_family_index: families.graphics,
                        flags: vk::CommandPoolCreateFlags::TRANSIENT
                            | vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
                        ..Default::default()
                    },
                    None,
                )
                .op("vkCreateCommandPool")?;
            d.cmd = d
                .device
                .allocate_command_buffers(&vk::CommandBufferAllocateInfo {
                    s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
                    command_pool: d.cmd_pool,
                    level: vk::CommandBufferLevel::PRIMARY,
                    command_buffer_count: 1,
                    ..Default::default()
                })
                .op("vkAllocateCommandBuffers")?
                .into_iter()
                .next()
                .ok_or_else(|| FrameError::configuration("driver returned no command buffer"))?;
            d.frame_fence = d
                .device
                .create_fence(
                    &vk::FenceCreateInfo {
                        s_type: vk::StructureType::FENCE_CREATE_INFO,
                        flags: vk::FenceCreateFlags::SIGNALED,
                        ..Default::default()
                    },
                    None,
                )
                .op("vkCreateFence")?;

            Ok(d)
        }
    }
}

unsafe fn load_shader(device: &ash::Device, bytes: &[u8]) -> FrameResult<vk::ShaderModule> {
    let code = read_spv(&mut Cursor::new(bytes))
        .map_err(|e| FrameError::configuration(format!("invalid SPIR-V: {e}")))?;
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    unsafe { device.create_shader_module(&ci, None) }.op("vkCreateShaderModule")
}

// Single color attachment: cleared, stored, handed to the presentation engine.
unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> FrameResult<vk::RenderPass> {
    let color_att = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let att_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &att_ref,
        ..Default::default()
    };
    // Layout transition must wait for the acquire semaphore's stage.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let rp_info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &color_att,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    unsafe { device.create_render_pass(&rp_info, None) }.op("vkCreateRenderPass")
}

impl PresentDevice for AshDevice {
    fn surface_capabilities(&self) -> FrameResult<vk::SurfaceCapabilitiesKHR> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.phys, self.surface)
                .op("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
        }
    }

    fn surface_formats(&self) -> FrameResult<Vec<vk::SurfaceFormatKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.phys, self.surface)
                .op("vkGetPhysicalDeviceSurfaceFormatsKHR")
        }
    }

    fn present_modes(&self) -> FrameResult<Vec<vk::PresentModeKHR>> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_present_modes(self.phys, self.surface)
                .op("vkGetPhysicalDeviceSurfacePresentModesKHR")
        }
    }

    fn create_swapchain(&self, desc: &SwapchainDesc) -> FrameResult<vk::SwapchainKHR> {
        let indices = self.families.indices();
        let (sharing, index_count, p_indices) = if self.families.is_split() {
            (
                vk::SharingMode::CONCURRENT,
                indices.len() as u32,
                indices.as_ptr(),
            )
        } else {
            (vk::SharingMode::EXCLUSIVE, 0, std::ptr::null())
        };
        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count: desc.min_image_count,
            image_format: desc.surface_format.format,
            image_color_space: desc.surface_format.color_space,
            image_extent: desc.extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing,
            queue_family_index_count: index_count,
            p_queue_family_indices: p_indices,
            pre_transform: desc.pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode: desc.present_mode,
            clipped: vk::TRUE,
            old_swapchain: desc.old_swapchain,
            ..Default::default()
        };
        unsafe {
            self.swapchain_loader
                .create_swapchain(&info, None)
                .op("vkCreateSwapchainKHR")
        }
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> FrameResult<Vec<vk::Image>> {
        unsafe {
            self.swapchain_loader
                .get_swapchain_images(swapchain)
                .op("vkGetSwapchainImagesKHR")
        }
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        unsafe { self.swapchain_loader.destroy_swapchain(swapchain, None) }
    }

    fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
    ) -> FrameResult<vk::ImageView> {
        let iv_info = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image,
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        unsafe {
            self.device
                .create_image_view(&iv_info, None)
                .op("vkCreateImageView")
        }
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        unsafe { self.device.destroy_image_view(view, None) }
    }

    fn create_semaphore(&self) -> FrameResult<vk::Semaphore> {
        unsafe {
            self.device
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .op("vkCreateSemaphore")
        }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<(u32, bool), SwapchainError> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(swapchain, u64::MAX, signal, vk::Fence::null())
                .map_err(|e| SwapchainError::classify("vkAcquireNextImageKHR", e))
        }
    }

    fn submit(&self, wait: vk::Semaphore, signal: vk::Semaphore) -> FrameResult<()> {
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &self.cmd,
            signal_semaphore_count: 1,
            p_signal_semaphores: &signal,
            ..Default::default()
        };
        unsafe {
            self.device
                .reset_fences(&[self.frame_fence])
                .op("vkResetFences")?;
            self.device
                .queue_submit(
                    self.graphics_queue,
                    std::slice::from_ref(&submit),
                    self.frame_fence,
                )
                .op("vkQueueSubmit")
        }
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<bool, SwapchainError> {
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &wait,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image_index,
            ..Default::default()
        };
        unsafe {
            self.swapchain_loader
                .queue_present(self.present_queue, &present)
                .map_err(|e| SwapchainError::classify("vkQueuePresentKHR", e))
        }
    }

    fn wait_frame_complete(&self, timeout: Duration) -> FrameResult<()> {
        let nanos = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        unsafe {
            match self
                .device
                .wait_for_fences(&[self.frame_fence], true, nanos)
            {
                Ok(()) => {}
                Err(vk::Result::TIMEOUT) => {
                    return Err(FrameError::DeviceHang {
                        op: "vkWaitForFences",
                        timeout,
                    })
                }
                Err(e) => return Err(FrameError::api("vkWaitForFences", e)),
            }
            // Unbounded: Vulkan has no timeout for queue idle waits.
            if self.families.present_needs_idle_wait() {
                self.device
                    .queue_wait_idle(self.present_queue)
                    .op("vkQueueWaitIdle")?;
            }
            Ok(())
        }
    }

    fn wait_idle(&self) -> FrameResult<()> {
        unsafe { self.device.device_wait_idle().op("vkDeviceWaitIdle") }
    }
}

impl RenderTarget for AshDevice {
    fn create_framebuffer(
        &self,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> FrameResult<vk::Framebuffer> {
        let fb_info = vk::FramebufferCreateInfo {
            s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
            render_pass: self.render_pass,
            attachment_count: 1,
            p_attachments: &view,
            width: extent.width,
            height: extent.height,
            layers: 1,
            ..Default::default()
        };
        unsafe {
            self.device
                .create_framebuffer(&fb_info, None)
                .op("vkCreateFramebuffer")
        }
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        unsafe { self.device.destroy_framebuffer(framebuffer, None) }
    }

    fn create_pipeline(&self, extent: vk::Extent2D) -> FrameResult<vk::Pipeline> {
        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: self.vs,
                p_name: SHADER_ENTRY.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: self.fs,
                p_name: SHADER_ENTRY.as_ptr(),
                ..Default::default()
            },
        ];

        // Geometry comes from gl_VertexIndex.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        // Static viewport/scissor: the pipeline is rebuilt with every generation.
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            p_viewports: &viewport,
            scissor_count: 1,
            p_scissors: &scissor,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::RGBA,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            layout: self.pipeline_layout,
            render_pass: self.render_pass,
            subpass: 0,
            base_pipeline_index: -1,
            ..Default::default()
        };

        let pipelines = unsafe {
            self.device.create_graphics_pipelines(
                self.pipeline_cache,
                std::slice::from_ref(&pipeline_info),
                None,
            )
        }
        .map_err(|(_, err)| FrameError::api("vkCreateGraphicsPipelines", err))?;
        debug!(
            width = extent.width,
            height = extent.height,
            "created generation pipeline"
        );
        pipelines
            .into_iter()
            .next()
            .ok_or_else(|| FrameError::configuration("driver returned no pipeline"))
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        unsafe { self.device.destroy_pipeline(pipeline, None) }
    }

    fn record_frame(&self, frame: &FrameRecording) -> FrameResult<()> {
        let d = &self.device;
        let cmd = self.cmd;
        let clears = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: frame.clear_color,
            },
        }];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass,
            framebuffer: frame.framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: frame.extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        let begin = vk::CommandBufferBeginInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
            flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            ..Default::default()
        };
        unsafe {
            d.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .op("vkResetCommandBuffer")?;
            d.begin_command_buffer(cmd, &begin)
                .op("vkBeginCommandBuffer")?;
            d.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);
            d.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, frame.pipeline);
            // Frame id rides along as the instance index.
            d.cmd_draw(cmd, 3, 1, 0, frame.frame_id as u32);
            d.cmd_end_render_pass(cmd);
            d.end_command_buffer(cmd).op("vkEndCommandBuffer")
        }
    }
}

// STRICT TEARDOWN ORDER (device-level only; swapchain resources are gone by now):
// pipeline cache, layout, shaders, render pass, fence, command pool, device.
impl Drop for AshDevice {
    fn drop(&mut self) {
        unsafe {
            let d = &self.device;
            d.device_wait_idle().ok();

            d.destroy_pipeline_cache(self.pipeline_cache, None);
            d.destroy_pipeline_layout(self.pipeline_layout, None);
            d.destroy_shader_module(self.vs, None);
            d.destroy_shader_module(self.fs, None);
            d.destroy_render_pass(self.render_pass, None);
            d.destroy_fence(self.frame_fence, None);
            // Frees the command buffer with it.
            d.destroy_command_pool(self.cmd_pool, None);
            d.destroy_device(None);
        }
        debug!("vk: device destroyed");
    }
}
