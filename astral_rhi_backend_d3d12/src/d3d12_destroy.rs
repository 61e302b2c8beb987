//! Deferred destruction of native D3D12 objects
//!
//! Resource destructors push their COM references here instead of dropping
//! them; `D3d12Device::end_frame` releases everything whose frame retired.
//! Dropping a zombie releases the last COM reference, which is what actually
//! frees the GPU memory for committed resources.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use windows::Win32::Graphics::Direct3D12::*;
use windows::Win32::Graphics::Dxgi::IDXGISwapChain3;

use astral_rhi::{DestroyQueue, MAX_FRAMES_IN_FLIGHT};

/// A native object waiting for its retire frame
pub enum Zombie {
    Resource(ID3D12Resource),
    Pipeline(ID3D12PipelineState),
    StateObject(ID3D12StateObject),
    QueryHeap(ID3D12QueryHeap),
    SwapChain(IDXGISwapChain3),
    Fence(ID3D12Fence),
    CommandAllocator(ID3D12CommandAllocator),
    /// RTV slot to recycle in the CPU render-target heap
    RtvSlot(u32),
    /// DSV slot to recycle in the CPU depth-stencil heap
    DsvSlot(u32),
}

/// Deferred-destroy queues plus the frame clock mirror destructors read
pub struct DestroyService {
    zombies: Mutex<DestroyQueue<Zombie>>,
    frame: AtomicU64,
}

impl DestroyService {
    pub fn new() -> Self {
        Self {
            zombies: Mutex::new(DestroyQueue::new()),
            frame: AtomicU64::new(0),
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

    /// Release every retired object. Called once per frame with the CPU heaps
    /// so freed RTV/DSV slots go back to their free lists.
    pub fn update(&self, heaps: &crate::d3d12_descriptors::BindlessHeaps, current_frame: u64) {
        self.zombies
            .lock()
            .unwrap()
            .update(current_frame, MAX_FRAMES_IN_FLIGHT, |zombie| {
                release(heaps, zombie)
            });
    }

    /// Release everything unconditionally (shutdown, after `wait_for_gpu`)
    pub fn drain(&self, heaps: &crate::d3d12_descriptors::BindlessHeaps) {
        self.zombies
            .lock()
            .unwrap()
            .drain(|zombie| release(heaps, zombie));
    }

    pub fn pending(&self) -> usize {
        self.zombies.lock().unwrap().len()
    }
}

fn release(heaps: &crate::d3d12_descriptors::BindlessHeaps, zombie: Zombie) {
    match zombie {
        // COM references; dropping releases
        Zombie::Resource(_)
        | Zombie::Pipeline(_)
        | Zombie::StateObject(_)
        | Zombie::QueryHeap(_)
        | Zombie::SwapChain(_)
        | Zombie::Fence(_)
        | Zombie::CommandAllocator(_) => {}
        Zombie::RtvSlot(slot) => heaps.recycle_rtv(slot),
        Zombie::DsvSlot(slot) => heaps.recycle_dsv(slot),
    }
}
