//! IR-to-WGSL code generation.
//!
//! The pipeline runs one method graph at a time: the control-flow lowerer
//! drives traversal, the value emitter and type mapper produce lines into a
//! buffered writer, and the kernel emitter wraps the result with the module
//! prologue (struct declarations, emulation library, bindings, entry point).

pub mod control_flow;
pub mod emulation;
pub mod functions;
pub mod intrinsics;
pub mod kernel;
pub mod type_map;
pub mod types;
pub mod values;
pub mod vars;
pub(crate) mod writer;

use anyhow::Result;

use crate::ir::{
    DynamicSharedAllocSpec, KernelDescriptor, MethodGraph, SharedAllocSpec, TypeTable,
};
use self::type_map::TypeMapper;
pub use self::types::{CodegenError, CodegenOptions, WgslKernelBundle};

/// One back-end invocation. Holds the configuration and the process-scoped
/// type-mapping cache; methods may be compiled sequentially against the same
/// backend, or callers may use one backend per thread.
pub struct WgslBackend {
    options: CodegenOptions,
    mapper: TypeMapper,
}

impl WgslBackend {
    pub fn new(options: CodegenOptions) -> Self {
        Self { options, mapper: TypeMapper::new() }
    }

    pub fn options(&self) -> &CodegenOptions {
        &self.options
    }

    pub(crate) fn mapper(&self) -> &TypeMapper {
        &self.mapper
    }

    /// Compile a single kernel method with no helper functions.
    pub fn compile_kernel(
        &self,
        types: &TypeTable,
        kernel: &MethodGraph,
        descriptor: &KernelDescriptor,
        shared: &[SharedAllocSpec],
        dynamic_shared: &[DynamicSharedAllocSpec],
    ) -> Result<WgslKernelBundle> {
        self.compile_module(types, kernel, &[], descriptor, shared, dynamic_shared)
    }
}
