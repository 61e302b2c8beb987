//! Vulkan swap chain
//!
//! Owns the window surface, the native swap chain and its back-buffer
//! wrappers, plus the acquire/present semaphores. Acquisition is lazy: the
//! first render pass targeting the chain in a frame acquires the image, and
//! the device presents every chain touched by the submitted lists.

use std::sync::{Arc, Mutex};

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use astral_rhi::{
    rhi_err, rhi_warn, RhiError, RhiResult, SwapChain, SwapChainDesc, TextureDesc,
    TextureDimension, TextureUsage, WindowSource, BACK_BUFFER_COUNT, MAX_FRAMES_IN_FLIGHT,
};

use crate::vulkan_context::GpuContext;
use crate::vulkan_convert::format_to_vk;
use crate::vulkan_destroy::Zombie;
use crate::vulkan_texture::VulkanTexture;

/// State replaced wholesale on resize
struct SwapState {
    desc: SwapChainDesc,
    swapchain: vk::SwapchainKHR,
    back_buffers: Vec<Arc<VulkanTexture>>,
    /// One per swap-chain image, waited on by Present
    present_semaphores: Vec<vk::Semaphore>,
    /// Image index acquired for the current frame, cleared at present
    acquired: Option<u32>,
}

/// Vulkan swap chain over a native surface
pub struct VulkanSwapChain {
    surface: vk::SurfaceKHR,
    surface_loader: ash::khr::surface::Instance,
    /// One per frame in flight, signaled by acquire
    acquire_semaphores: Vec<vk::Semaphore>,
    state: Mutex<SwapState>,
    ctx: Arc<GpuContext>,
}

impl VulkanSwapChain {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        entry: &ash::Entry,
        window: &dyn WindowSource,
        desc: SwapChainDesc,
    ) -> RhiResult<Arc<Self>> {
        let display = window
            .display_handle()
            .map_err(|e| rhi_err!("Failed to get display handle: {:?}", e))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| rhi_err!("Failed to get window handle: {:?}", e))?;

        let surface = unsafe {
            ash_window::create_surface(
                entry,
                &ctx.instance,
                display.as_raw(),
                window_handle.as_raw(),
                None,
            )
            .map_err(|e| rhi_err!("Failed to create surface: {:?}", e))?
        };

        let surface_loader = ash::khr::surface::Instance::new(entry, &ctx.instance);

        let supported = unsafe {
            surface_loader
                .get_physical_device_surface_support(
                    ctx.physical_device,
                    ctx.graphics.family,
                    surface,
                )
                .unwrap_or(false)
        };
        if !supported {
            unsafe { surface_loader.destroy_surface(surface, None) };
            return Err(rhi_err!("Surface does not support presentation on the graphics queue"));
        }

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let mut acquire_semaphores = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT as usize);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let semaphore = unsafe {
                ctx.device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(|e| rhi_err!("Failed to create acquire semaphore: {:?}", e))?
            };
            acquire_semaphores.push(semaphore);
        }

        let chain = Self {
            surface,
            surface_loader,
            acquire_semaphores,
            state: Mutex::new(SwapState {
                desc,
                swapchain: vk::SwapchainKHR::null(),
                back_buffers: Vec::new(),
                present_semaphores: Vec::new(),
                acquired: None,
            }),
            ctx,
        };

        {
            let mut state = chain.state.lock().unwrap();
            let (width, height) = (state.desc.width, state.desc.height);
            chain.recreate(&mut state, width, height)?;
        }

        Ok(Arc::new(chain))
    }

    /// Build (or rebuild) the native chain, back buffers and present
    /// semaphores. Old objects go through the deferred-destroy queue.
    fn recreate(&self, state: &mut SwapState, width: u32, height: u32) -> RhiResult<()> {
        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.ctx.physical_device, self.surface)
                .map_err(|e| rhi_err!("Failed to get surface capabilities: {:?}", e))?
        };

        let extent = if caps.current_extent.width != u32::MAX {
            caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
                height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
            }
        };

        let format = state.desc.resolved_format();
        let vk_format = format_to_vk(format);

        let surface_formats = unsafe {
            self.surface_loader
                .get_physical_device_surface_formats(self.ctx.physical_device, self.surface)
                .map_err(|e| rhi_err!("Failed to get surface formats: {:?}", e))?
        };
        let surface_format = surface_formats
            .iter()
            .find(|f| f.format == vk_format)
            .copied()
            .ok_or_else(|| {
                rhi_err!("Surface does not support back-buffer format {:?}", format)
            })?;

        let present_mode = if state.desc.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            let modes = unsafe {
                self.surface_loader
                    .get_physical_device_surface_present_modes(
                        self.ctx.physical_device,
                        self.surface,
                    )
                    .unwrap_or_default()
            };
            if modes.contains(&vk::PresentModeKHR::IMMEDIATE) {
                vk::PresentModeKHR::IMMEDIATE
            } else if modes.contains(&vk::PresentModeKHR::MAILBOX) {
                vk::PresentModeKHR::MAILBOX
            } else {
                vk::PresentModeKHR::FIFO
            }
        };

        let mut image_count = BACK_BUFFER_COUNT.max(caps.min_image_count);
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let old_swapchain = state.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe {
            self.ctx
                .swapchain_loader
                .create_swapchain(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create swapchain: {:?}", e))?
        };

        // Back buffers wrap the views; dropping them queues the old views
        state.back_buffers.clear();
        for semaphore in state.present_semaphores.drain(..) {
            self.ctx.destroy.push(Zombie::Semaphore(semaphore));
        }
        if old_swapchain != vk::SwapchainKHR::null() {
            self.ctx.destroy.push(Zombie::Swapchain(old_swapchain));
        }

        let images = unsafe {
            self.ctx
                .swapchain_loader
                .get_swapchain_images(swapchain)
                .map_err(|e| rhi_err!("Failed to get swapchain images: {:?}", e))?
        };

        let semaphore_info = vk::SemaphoreCreateInfo::default();
        for (index, &image) in images.iter().enumerate() {
            let desc = TextureDesc {
                dimension: TextureDimension::D2,
                format,
                usage: TextureUsage::RENDER_TARGET,
                width: extent.width,
                height: extent.height,
                depth_or_array_size: 1,
                mip_levels: 1,
                sample_count: 1,
                debug_name: Some(format!("back buffer {}", index)),
            };
            state
                .back_buffers
                .push(VulkanTexture::from_native(self.ctx.clone(), desc, image));

            let semaphore = unsafe {
                self.ctx
                    .device
                    .create_semaphore(&semaphore_info, None)
                    .map_err(|e| rhi_err!("Failed to create present semaphore: {:?}", e))?
            };
            state.present_semaphores.push(semaphore);
        }

        state.swapchain = swapchain;
        state.desc.width = extent.width;
        state.desc.height = extent.height;
        state.acquired = None;
        Ok(())
    }

    /// Acquire the image for the current frame, or return the one already
    /// acquired. Called by the first render pass targeting this chain.
    pub(crate) fn acquire(&self) -> RhiResult<u32> {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.acquired {
            return Ok(index);
        }

        let frame_slot = (self.ctx.current_frame() % MAX_FRAMES_IN_FLIGHT) as usize;
        let (index, suboptimal) = unsafe {
            self.ctx
                .swapchain_loader
                .acquire_next_image(
                    state.swapchain,
                    u64::MAX,
                    self.acquire_semaphores[frame_slot],
                    vk::Fence::null(),
                )
                .map_err(|e| match e {
                    vk::Result::ERROR_DEVICE_LOST => RhiError::DeviceLost,
                    other => rhi_err!("Failed to acquire swapchain image: {:?}", other),
                })?
        };
        if suboptimal {
            rhi_warn!("rhi::vulkan", "Swapchain suboptimal during acquire");
        }

        state.acquired = Some(index);
        Ok(index)
    }

    /// Back buffer for the current frame, acquiring it if needed
    pub(crate) fn current_back_buffer(&self) -> RhiResult<Arc<VulkanTexture>> {
        let index = self.acquire()?;
        let state = self.state.lock().unwrap();
        Ok(state.back_buffers[index as usize].clone())
    }

    /// (acquire, present) semaphores for the acquired image; `None` when no
    /// image is held
    pub(crate) fn sync_semaphores(&self) -> Option<(vk::Semaphore, vk::Semaphore)> {
        let state = self.state.lock().unwrap();
        let index = state.acquired?;
        let frame_slot = (self.ctx.current_frame() % MAX_FRAMES_IN_FLIGHT) as usize;
        Some((
            self.acquire_semaphores[frame_slot],
            state.present_semaphores[index as usize],
        ))
    }

    /// Present the acquired image. Called by the device after the last
    /// submission of the frame.
    pub(crate) fn present(&self, queue: vk::Queue) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        let Some(index) = state.acquired.take() else {
            return Ok(());
        };

        let swapchains = [state.swapchain];
        let indices = [index];
        let waits = [state.present_semaphores[index as usize]];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&waits)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(queue, &present_info)
        };
        match result {
            Ok(_) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                rhi_warn!("rhi::vulkan", "Swapchain out of date during present");
                Ok(())
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => Err(RhiError::DeviceLost),
            Err(e) => Err(rhi_err!("Failed to present swapchain image: {:?}", e)),
        }
    }
}

impl SwapChain for VulkanSwapChain {
    fn desc(&self) -> SwapChainDesc {
        self.state.lock().unwrap().desc.clone()
    }

    fn resize(&self, width: u32, height: u32) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        if width == state.desc.width && height == state.desc.height {
            return Ok(());
        }
        self.recreate(&mut state, width, height)
    }

    fn extent(&self) -> (u32, u32) {
        let state = self.state.lock().unwrap();
        (state.desc.width, state.desc.height)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanSwapChain {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.back_buffers.clear();
        for semaphore in state.present_semaphores.drain(..) {
            self.ctx.destroy.push(Zombie::Semaphore(semaphore));
        }
        for &semaphore in &self.acquire_semaphores {
            self.ctx.destroy.push(Zombie::Semaphore(semaphore));
        }
        if state.swapchain != vk::SwapchainKHR::null() {
            self.ctx.destroy.push(Zombie::Swapchain(state.swapchain));
        }
        self.ctx.destroy.push(Zombie::Surface(self.surface));
    }
}
