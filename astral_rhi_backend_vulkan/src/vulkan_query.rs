//! Vulkan query pool

use std::sync::Arc;

use ash::vk;

use astral_rhi::{rhi_err, QueryHeap, QueryHeapDesc, QueryKind, RhiResult};

use crate::vulkan_context::GpuContext;
use crate::vulkan_convert::query_kind_to_vk;
use crate::vulkan_destroy::Zombie;

/// Vulkan query heap backed by a query pool
pub struct VulkanQueryHeap {
    pub(crate) pool: vk::QueryPool,
    desc: QueryHeapDesc,
    ctx: Arc<GpuContext>,
}

impl VulkanQueryHeap {
    pub fn new(ctx: Arc<GpuContext>, desc: QueryHeapDesc) -> RhiResult<Self> {
        let mut create_info = vk::QueryPoolCreateInfo::default()
            .query_type(query_kind_to_vk(desc.kind))
            .query_count(desc.count);
        if desc.kind == QueryKind::PipelineStatistics {
            create_info = create_info.pipeline_statistics(
                vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_VERTICES
                    | vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_PRIMITIVES
                    | vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS
                    | vk::QueryPipelineStatisticFlags::CLIPPING_INVOCATIONS
                    | vk::QueryPipelineStatisticFlags::CLIPPING_PRIMITIVES
                    | vk::QueryPipelineStatisticFlags::FRAGMENT_SHADER_INVOCATIONS
                    | vk::QueryPipelineStatisticFlags::COMPUTE_SHADER_INVOCATIONS,
            );
        }

        let pool = unsafe {
            ctx.device
                .create_query_pool(&create_info, None)
                .map_err(|e| rhi_err!("Failed to create query pool: {:?}", e))?
        };
        ctx.set_object_name(pool, desc.debug_name.as_deref());

        // Queries must be reset before first use
        unsafe { ctx.device.reset_query_pool(pool, 0, desc.count) };

        Ok(Self { pool, desc, ctx })
    }

    /// Whether the heap's occlusion queries use binary (any-samples) precision
    pub(crate) fn is_binary(&self) -> bool {
        self.desc.kind == QueryKind::BinaryOcclusion
    }
}

impl QueryHeap for VulkanQueryHeap {
    fn desc(&self) -> &QueryHeapDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanQueryHeap {
    fn drop(&mut self) {
        self.ctx.destroy.push(Zombie::QueryPool(self.pool));
    }
}
