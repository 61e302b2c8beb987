//! Common types shared across the RHI surface

/// Frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: u64 = 2;

/// Swap-chain back-buffer count (fixed)
pub const BACK_BUFFER_COUNT: u32 = 3;

/// Default maximum command buffers recorded per frame.
/// Tunable through [`DeviceConfig::command_buffers_per_frame`](crate::DeviceConfig).
pub const DEFAULT_COMMAND_BUFFERS_PER_FRAME: u32 = 32;

/// Push-constant staging capacity per command recorder, in bytes
pub const PUSH_CONSTANT_CAPACITY: usize = 128;

/// Shader-visible descriptor heap capacity for non-sampler resources
pub const BINDLESS_RESOURCE_CAPACITY: u32 = 1_000_000;

/// Shader-visible descriptor heap capacity for samplers (Tier-1 limit)
pub const BINDLESS_SAMPLER_CAPACITY: u32 = 2_048;

/// HLSL register-space shifts used to fold `b/t/u/s` registers into a single
/// numeric binding space on the Vulkan backend. Shader bytecode must be
/// produced with matching shifts.
pub const BINDING_SHIFT_B: u32 = 0;
pub const BINDING_SHIFT_T: u32 = 1000;
pub const BINDING_SHIFT_U: u32 = 2000;
pub const BINDING_SHIFT_S: u32 = 3000;

/// Per-draw binding slots available in each register class (`b/t/u/s`)
pub const PER_DRAW_SLOT_CAPACITY: u32 = 16;

/// Which native API a device runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    /// Probe D3D12 first, fall back to Vulkan
    Auto,
    D3d12,
    Vulkan,
    /// Software device used by the test suite
    Mock,
}

/// Debug-layer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    #[default]
    Disabled,
    /// Debug layer + message callback
    Enabled,
    /// Debug layer with info/verbose messages included
    Verbose,
    /// Adds the backend's GPU-assisted validation where available
    GpuBased,
}

impl ValidationMode {
    /// Whether the native debug layer should be enabled at all
    pub fn is_enabled(self) -> bool {
        self != ValidationMode::Disabled
    }
}

/// GPU queue selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueKind {
    Graphics,
    /// Dedicated async-compute queue
    Compute,
    /// Dedicated transfer queue, fed by the copy allocator
    Copy,
}

/// Index buffer element width
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Coarse shading rate for variable-rate shading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadingRate {
    #[default]
    Rate1x1,
    Rate1x2,
    Rate2x1,
    Rate2x2,
    Rate2x4,
    Rate4x2,
    Rate4x4,
}

/// Viewport dimensions and depth range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Full-extent viewport with the standard [0, 1] depth range
    pub fn from_extent(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// 2D rectangle (scissor)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect2D {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Clear value for an attachment
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClearValue {
    /// RGBA color
    Color([f32; 4]),
    /// Depth/stencil
    DepthStencil { depth: f32, stencil: u32 },
}

/// Adapter and feature information reported by a device
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    /// Adapter name as reported by the driver
    pub adapter_name: String,
    /// Which backend the device runs on
    pub backend: BackendKind,
    /// Hardware raytracing (acceleration structures + RT pipelines)
    pub raytracing: bool,
    /// Mesh/amplification shader dispatch
    pub mesh_shaders: bool,
    /// Per-draw variable-rate shading
    pub variable_rate_shading: bool,
    /// Tearing/immediate presentation available for vsync-off swap chains
    pub tearing: bool,
}

/// Device configuration passed to `initialize`
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    /// Debug layer configuration
    pub validation: ValidationMode,
    /// Backend preference; `Auto` probes D3D12 then Vulkan
    pub backend: BackendKind,
    /// Application name reported to the native API
    pub app_name: String,
    /// Application version (major, minor, patch)
    pub app_version: (u32, u32, u32),
    /// Maximum command buffers recorded per frame
    pub command_buffers_per_frame: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            validation: if cfg!(debug_assertions) {
                ValidationMode::Enabled
            } else {
                ValidationMode::Disabled
            },
            backend: BackendKind::Auto,
            app_name: "Astral Application".to_string(),
            app_version: (1, 0, 0),
            command_buffers_per_frame: DEFAULT_COMMAND_BUFFERS_PER_FRAME,
        }
    }
}
