//! D3D12 swap chain
//!
//! Owns the flip-model DXGI chain and its back-buffer wrappers. Acquisition
//! is lazy: the first render pass targeting the chain in a frame reads the
//! current back-buffer index, and the device presents every chain touched by
//! the submitted lists. There are no acquire or present semaphores; DXGI
//! orders presentation against the graphics queue itself.

use std::sync::{Arc, Mutex};

use raw_window_handle::{HasWindowHandle, RawWindowHandle};
use windows::core::Interface;
use windows::Win32::Foundation::{DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET, HWND};
use windows::Win32::Graphics::Direct3D12::ID3D12Fence;
use windows::Win32::Graphics::Dxgi::Common::{DXGI_ALPHA_MODE_IGNORE, DXGI_SAMPLE_DESC};
use windows::Win32::Graphics::Dxgi::*;

use astral_rhi::{
    rhi_err, RhiError, RhiResult, SwapChain, SwapChainDesc, TextureDesc, TextureDimension,
    TextureUsage, WindowSource, BACK_BUFFER_COUNT,
};

use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::format_to_dxgi;
use crate::d3d12_destroy::Zombie;
use crate::d3d12_texture::D3d12Texture;

/// State replaced wholesale on resize
struct SwapState {
    desc: SwapChainDesc,
    swapchain: IDXGISwapChain3,
    back_buffers: Vec<Arc<D3d12Texture>>,
    /// Back-buffer index acquired for the current frame, cleared at present
    acquired: Option<u32>,
    /// Graphics-queue idle fence for resize; buffers must be unreferenced
    /// before `ResizeBuffers`
    idle_fence: ID3D12Fence,
    idle_value: u64,
}

/// D3D12 swap chain over a window
pub struct D3d12SwapChain {
    state: Mutex<SwapState>,
    flags: u32,
    ctx: Arc<GpuContext>,
}

fn window_hwnd(window: &dyn WindowSource) -> RhiResult<HWND> {
    let handle = window
        .window_handle()
        .map_err(|e| rhi_err!("Failed to get window handle: {:?}", e))?;
    match handle.as_raw() {
        RawWindowHandle::Win32(win32) => Ok(HWND(win32.hwnd.get() as *mut std::ffi::c_void)),
        other => Err(rhi_err!("Unsupported window handle kind: {:?}", other)),
    }
}

impl D3d12SwapChain {
    pub(crate) fn new(
        ctx: Arc<GpuContext>,
        window: &dyn WindowSource,
        desc: SwapChainDesc,
    ) -> RhiResult<Arc<Self>> {
        let hwnd = window_hwnd(window)?;

        let flags = if ctx.allow_tearing {
            DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
        } else {
            0
        };

        let chain_desc = DXGI_SWAP_CHAIN_DESC1 {
            Width: desc.width,
            Height: desc.height,
            Format: format_to_dxgi(desc.resolved_format()),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
            BufferCount: BACK_BUFFER_COUNT,
            SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
            AlphaMode: DXGI_ALPHA_MODE_IGNORE,
            Flags: flags,
            ..Default::default()
        };

        let swapchain: IDXGISwapChain3 = unsafe {
            ctx.factory
                .CreateSwapChainForHwnd(&ctx.graphics.queue, hwnd, &chain_desc, None, None)
                .map_err(|e| rhi_err!("Failed to create swap chain: {:?}", e))?
                .cast()
                .map_err(|e| rhi_err!("Swap chain does not expose IDXGISwapChain3: {:?}", e))?
        };
        // Alt-enter exclusive fullscreen fights the flip model
        unsafe {
            ctx.factory
                .MakeWindowAssociation(hwnd, DXGI_MWA_NO_ALT_ENTER)
                .ok();
        }

        let idle_fence: ID3D12Fence = unsafe {
            ctx.device
                .CreateFence(0, windows::Win32::Graphics::Direct3D12::D3D12_FENCE_FLAG_NONE)
                .map_err(|e| rhi_err!("Failed to create swap-chain fence: {:?}", e))?
        };

        let chain = Self {
            state: Mutex::new(SwapState {
                desc,
                swapchain,
                back_buffers: Vec::new(),
                acquired: None,
                idle_fence,
                idle_value: 0,
            }),
            flags,
            ctx,
        };

        {
            let mut state = chain.state.lock().unwrap();
            chain.wrap_back_buffers(&mut state)?;
        }

        Ok(Arc::new(chain))
    }

    fn wrap_back_buffers(&self, state: &mut SwapState) -> RhiResult<()> {
        let format = state.desc.resolved_format();
        for index in 0..BACK_BUFFER_COUNT {
            let resource = unsafe {
                state
                    .swapchain
                    .GetBuffer(index)
                    .map_err(|e| rhi_err!("Failed to get back buffer {}: {:?}", index, e))?
            };
            let desc = TextureDesc {
                dimension: TextureDimension::D2,
                format,
                usage: TextureUsage::RENDER_TARGET,
                width: state.desc.width,
                height: state.desc.height,
                depth_or_array_size: 1,
                mip_levels: 1,
                sample_count: 1,
                debug_name: Some(format!("back buffer {}", index)),
            };
            state
                .back_buffers
                .push(D3d12Texture::from_native(self.ctx.clone(), desc, resource));
        }
        Ok(())
    }

    /// Block until the graphics queue has consumed every submitted reference
    /// to the back buffers
    fn wait_graphics_idle(&self, state: &mut SwapState) -> RhiResult<()> {
        state.idle_value += 1;
        unsafe {
            self.ctx
                .graphics
                .queue
                .Signal(&state.idle_fence, state.idle_value)
                .map_err(|e| rhi_err!("Failed to signal swap-chain fence: {:?}", e))?;
            state
                .idle_fence
                .SetEventOnCompletion(state.idle_value, None)
                .map_err(|e| rhi_err!("Failed to wait for swap-chain fence: {:?}", e))?;
        }
        Ok(())
    }

    /// Acquire the back buffer for the current frame, or return the one
    /// already acquired. Called by the first render pass targeting this chain.
    pub(crate) fn acquire(&self) -> RhiResult<u32> {
        let mut state = self.state.lock().unwrap();
        if let Some(index) = state.acquired {
            return Ok(index);
        }
        let index = unsafe { state.swapchain.GetCurrentBackBufferIndex() };
        state.acquired = Some(index);
        Ok(index)
    }

    /// Back buffer for the current frame, acquiring it if needed
    pub(crate) fn current_back_buffer(&self) -> RhiResult<Arc<D3d12Texture>> {
        let index = self.acquire()?;
        let state = self.state.lock().unwrap();
        Ok(state.back_buffers[index as usize].clone())
    }

    /// Present the acquired image. Called by the device after the last
    /// submission of the frame.
    pub(crate) fn present(&self) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.acquired.take().is_none() {
            return Ok(());
        }

        let (interval, flags) = if state.desc.vsync {
            (1, DXGI_PRESENT::default())
        } else if self.ctx.allow_tearing {
            (0, DXGI_PRESENT_ALLOW_TEARING)
        } else {
            (0, DXGI_PRESENT::default())
        };

        let result = unsafe { state.swapchain.Present(interval, flags) };
        if result.is_ok() {
            return Ok(());
        }
        if result == DXGI_ERROR_DEVICE_REMOVED || result == DXGI_ERROR_DEVICE_RESET {
            return Err(RhiError::DeviceLost);
        }
        Err(rhi_err!("Failed to present swap chain: {:?}", result))
    }
}

impl SwapChain for D3d12SwapChain {
    fn desc(&self) -> SwapChainDesc {
        self.state.lock().unwrap().desc.clone()
    }

    fn resize(&self, width: u32, height: u32) -> RhiResult<()> {
        let mut state = self.state.lock().unwrap();
        if width == state.desc.width && height == state.desc.height {
            return Ok(());
        }

        // Every COM reference to the buffers must drop before ResizeBuffers
        self.wait_graphics_idle(&mut state)?;
        state.back_buffers.clear();
        state.acquired = None;

        unsafe {
            state
                .swapchain
                .ResizeBuffers(
                    BACK_BUFFER_COUNT,
                    width,
                    height,
                    format_to_dxgi(state.desc.resolved_format()),
                    DXGI_SWAP_CHAIN_FLAG(self.flags as i32),
                )
                .map_err(|e| rhi_err!("Failed to resize swap chain: {:?}", e))?;
        }

        state.desc.width = width;
        state.desc.height = height;
        self.wrap_back_buffers(&mut state)
    }

    fn extent(&self) -> (u32, u32) {
        let state = self.state.lock().unwrap();
        (state.desc.width, state.desc.height)
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for D3d12SwapChain {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.back_buffers.clear();
        self.ctx
            .destroy
            .push(Zombie::SwapChain(state.swapchain.clone()));
        self.ctx
            .destroy
            .push(Zombie::Fence(state.idle_fence.clone()));
    }
}
