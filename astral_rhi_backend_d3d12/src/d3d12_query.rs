//! D3D12 query heap

use std::sync::Arc;

use windows::Win32::Graphics::Direct3D12::*;

use astral_rhi::{rhi_err, QueryHeap, QueryHeapDesc, RhiResult};

use crate::d3d12_context::GpuContext;
use crate::d3d12_convert::{query_heap_type_to_d3d12, query_type_to_d3d12};
use crate::d3d12_destroy::Zombie;

/// D3D12 query heap
pub struct D3d12QueryHeap {
    pub(crate) heap: ID3D12QueryHeap,
    desc: QueryHeapDesc,
    ctx: Arc<GpuContext>,
}

impl D3d12QueryHeap {
    pub fn new(ctx: Arc<GpuContext>, desc: QueryHeapDesc) -> RhiResult<Self> {
        let heap_desc = D3D12_QUERY_HEAP_DESC {
            Type: query_heap_type_to_d3d12(desc.kind),
            Count: desc.count,
            NodeMask: 0,
        };

        let mut heap: Option<ID3D12QueryHeap> = None;
        unsafe {
            ctx.device
                .CreateQueryHeap(&heap_desc, &mut heap)
                .map_err(|e| rhi_err!("Failed to create query heap: {:?}", e))?;
        }
        let heap = heap.ok_or_else(|| rhi_err!("Query heap creation returned no heap"))?;
        ctx.set_object_name(&heap, desc.debug_name.as_deref());

        Ok(Self { heap, desc, ctx })
    }

    /// Native query type for Begin/EndQuery and ResolveQueryData
    pub(crate) fn query_type(&self) -> D3D12_QUERY_TYPE {
        query_type_to_d3d12(self.desc.kind)
    }
}

impl QueryHeap for D3d12QueryHeap {
    fn desc(&self) -> &QueryHeapDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for D3d12QueryHeap {
    fn drop(&mut self) {
        self.ctx.destroy.push(Zombie::QueryHeap(self.heap.clone()));
    }
}
