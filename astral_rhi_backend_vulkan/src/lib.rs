/*!
# Astral RHI - Vulkan Backend

Vulkan implementation of the Astral RHI device traits.

Built on the Ash bindings and gpu-allocator for memory management.
Requires Vulkan 1.3 with `descriptorIndexing` and `timelineSemaphore`;
raytracing and mesh shading are enabled when the extensions are present
and reported through [`astral_rhi::DeviceCapabilities`].

The backend registers itself as a factory under
[`astral_rhi::BackendKind::Vulkan`]; call [`register`] once before
`astral_rhi::initialize`.
*/

mod vulkan_buffer;
mod vulkan_command_list;
mod vulkan_context;
mod vulkan_convert;
mod vulkan_copy;
mod vulkan_debug;
mod vulkan_descriptors;
mod vulkan_destroy;
mod vulkan_device;
mod vulkan_pipeline;
mod vulkan_query;
mod vulkan_raytracing;
mod vulkan_render_pass;
mod vulkan_sampler;
mod vulkan_shader;
mod vulkan_swapchain;
mod vulkan_texture;

pub use vulkan_device::VulkanDevice;

use astral_rhi::BackendKind;

/// Register the Vulkan backend in the global backend registry
///
/// # Example
///
/// ```no_run
/// astral_rhi_backend_vulkan::register();
/// let device = astral_rhi::initialize(astral_rhi::DeviceConfig {
///     backend: astral_rhi::BackendKind::Vulkan,
///     ..Default::default()
/// })?;
/// # Ok::<(), astral_rhi::RhiError>(())
/// ```
pub fn register() {
    astral_rhi::register_backend(BackendKind::Vulkan, |config| {
        VulkanDevice::new_handle(config.clone())
    });
}
