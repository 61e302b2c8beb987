/*!
# Astral RHI - Direct3D 12 Backend

Direct3D 12 implementation of the Astral RHI device traits.

Built on the `windows` crate. Requires feature level 12.0 and enhanced
barriers; raytracing (DXR 1.1), mesh shading and variable-rate shading
are enabled when the driver reports the tiers and surface through
[`astral_rhi::DeviceCapabilities`].

The backend registers itself as a factory under
[`astral_rhi::BackendKind::D3d12`]; call [`register`] once before
`astral_rhi::initialize`. On non-Windows targets the crate compiles to
a stub and [`register`] is a no-op, so hosts can call it
unconditionally.
*/

#[cfg(windows)]
mod d3d12_buffer;
#[cfg(windows)]
mod d3d12_command_list;
#[cfg(windows)]
mod d3d12_context;
#[cfg(windows)]
mod d3d12_convert;
#[cfg(windows)]
mod d3d12_copy;
#[cfg(windows)]
mod d3d12_debug;
#[cfg(windows)]
mod d3d12_descriptors;
#[cfg(windows)]
mod d3d12_destroy;
#[cfg(windows)]
mod d3d12_device;
#[cfg(windows)]
mod d3d12_pipeline;
#[cfg(windows)]
mod d3d12_query;
#[cfg(windows)]
mod d3d12_raytracing;
#[cfg(windows)]
mod d3d12_render_pass;
#[cfg(windows)]
mod d3d12_sampler;
#[cfg(windows)]
mod d3d12_shader;
#[cfg(windows)]
mod d3d12_swapchain;
#[cfg(windows)]
mod d3d12_texture;

#[cfg(windows)]
pub use d3d12_device::D3d12Device;

/// Register the D3D12 backend in the global backend registry
///
/// # Example
///
/// ```no_run
/// astral_rhi_backend_d3d12::register();
/// let device = astral_rhi::initialize(astral_rhi::DeviceConfig {
///     backend: astral_rhi::BackendKind::D3d12,
///     ..Default::default()
/// })?;
/// # Ok::<(), astral_rhi::RhiError>(())
/// ```
#[cfg(windows)]
pub fn register() {
    astral_rhi::register_backend(astral_rhi::BackendKind::D3d12, |config| {
        D3d12Device::new_handle(config.clone())
    });
}

/// No-op on non-Windows targets; `initialize` falls through to the next
/// backend in probe order
#[cfg(not(windows))]
pub fn register() {}
