//! Deferred destruction of native Vulkan objects
//!
//! Resource destructors push their native handles here instead of destroying
//! them; `VulkanDevice::end_frame` releases everything whose frame retired.
//! One queue per object kind keeps release order stable within a kind.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use ash::vk;
use gpu_allocator::vulkan::Allocation;

use astral_rhi::{DestroyQueue, MAX_FRAMES_IN_FLIGHT};

use crate::vulkan_context::GpuContext;

/// A native object waiting for its retire frame
pub enum Zombie {
    Buffer {
        buffer: vk::Buffer,
        allocation: Option<Allocation>,
    },
    BufferView(vk::BufferView),
    Image {
        image: vk::Image,
        allocation: Option<Allocation>,
    },
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Pipeline(vk::Pipeline),
    ShaderModule(vk::ShaderModule),
    QueryPool(vk::QueryPool),
    Swapchain(vk::SwapchainKHR),
    Surface(vk::SurfaceKHR),
    Semaphore(vk::Semaphore),
    CommandPool(vk::CommandPool),
    AccelerationStructure(vk::AccelerationStructureKHR),
}

/// Deferred-destroy queues plus the frame clock mirror destructors read
pub struct DestroyService {
    zombies: Mutex<DestroyQueue<Zombie>>,
    frame: AtomicU64,
    /// Entry loader kept for surface destruction
    surface_loader: ash::khr::surface::Instance,
}

impl DestroyService {
    pub fn new(surface_loader: ash::khr::surface::Instance) -> Self {
        Self {
            zombies: Mutex::new(DestroyQueue::new()),
            frame: AtomicU64::new(0),
            surface_loader,
        }
    }

    pub fn current_frame(&self) -> u64 {
        self.frame.load(Ordering::Acquire)
    }

    pub fn set_frame(&self, frame: u64) {
        self.frame.store(frame, Ordering::Release);
    }

    /// Queue a native object, last referenced no later than the current frame
    pub fn push(&self, zombie: Zombie) {
        let frame = self.current_frame();
        self.zombies.lock().unwrap().push(zombie, frame);
    }

    /// Release every retired object. Called once per frame.
    pub fn update(&self, ctx: &GpuContext, current_frame: u64) {
        self.zombies
            .lock()
            .unwrap()
            .update(current_frame, MAX_FRAMES_IN_FLIGHT, |zombie| {
                release(ctx, &self.surface_loader, zombie)
            });
    }

    /// Release everything unconditionally (shutdown, after `wait_for_gpu`)
    pub fn drain(&self, ctx: &GpuContext) {
        self.zombies
            .lock()
            .unwrap()
            .drain(|zombie| release(ctx, &self.surface_loader, zombie));
    }

    pub fn pending(&self) -> usize {
        self.zombies.lock().unwrap().len()
    }
}

fn release(ctx: &GpuContext, surface_loader: &ash::khr::surface::Instance, zombie: Zombie) {
    unsafe {
        match zombie {
            Zombie::Buffer { buffer, allocation } => {
                if let Some(allocation) = allocation {
                    if let Ok(mut allocator) = ctx.allocator.lock() {
                        allocator.free(allocation).ok();
                    }
                }
                ctx.device.destroy_buffer(buffer, None);
            }
            Zombie::BufferView(view) => ctx.device.destroy_buffer_view(view, None),
            Zombie::Image { image, allocation } => {
                if let Some(allocation) = allocation {
                    if let Ok(mut allocator) = ctx.allocator.lock() {
                        allocator.free(allocation).ok();
                    }
                }
                ctx.device.destroy_image(image, None);
            }
            Zombie::ImageView(view) => ctx.device.destroy_image_view(view, None),
            Zombie::Sampler(sampler) => ctx.device.destroy_sampler(sampler, None),
            Zombie::Pipeline(pipeline) => ctx.device.destroy_pipeline(pipeline, None),
            Zombie::ShaderModule(module) => ctx.device.destroy_shader_module(module, None),
            Zombie::QueryPool(pool) => ctx.device.destroy_query_pool(pool, None),
            Zombie::Swapchain(swapchain) => {
                ctx.swapchain_loader.destroy_swapchain(swapchain, None)
            }
            Zombie::Surface(surface) => surface_loader.destroy_surface(surface, None),
            Zombie::Semaphore(semaphore) => ctx.device.destroy_semaphore(semaphore, None),
            Zombie::CommandPool(pool) => ctx.device.destroy_command_pool(pool, None),
            Zombie::AccelerationStructure(accel) => {
                if let Some(loader) = &ctx.acceleration_loader {
                    loader.destroy_acceleration_structure(accel, None);
                }
            }
        }
    }
}
