//! GPU query heaps

use std::sync::Arc;

/// What a query heap measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Timestamp,
    Occlusion,
    BinaryOcclusion,
    PipelineStatistics,
}

/// Descriptor for creating a query heap
#[derive(Debug, Clone)]
pub struct QueryHeapDesc {
    pub kind: QueryKind,
    pub count: u32,
    pub debug_name: Option<String>,
}

/// Query heap trait.
///
/// Queries are begun/ended/resolved through the command recorder; resolve
/// writes results into a readback buffer.
pub trait QueryHeap: Send + Sync {
    fn desc(&self) -> &QueryHeapDesc;

    /// Downcast support for backends
    fn as_any(&self) -> &dyn std::any::Any;
}

/// Shared query-heap handle
pub type QueryHeapHandle = Arc<dyn QueryHeap>;
