//! A compiler back-end that lowers an SSA compute-kernel IR into WGSL source
//! text suitable for a browser-side WebGPU compute pipeline.
//!
//! The crate takes one method graph at a time (basic blocks of typed SSA
//! values) and produces a complete WGSL module: storage-buffer bindings for
//! the method's parameters, optional 64-bit emulation helpers, workgroup
//! allocations, and a `@compute` entry function. Host-side concerns (bind
//! groups, dispatch, buffer marshaling) belong to the caller.

pub mod analysis;
pub mod codegen;
pub mod ir;

pub use codegen::{
    CodegenError, CodegenOptions, WgslBackend, WgslKernelBundle,
    types::{AccessMode, BindingEntry, ParamShape},
};
pub use ir::{
    AddressSpace, BasicBlock, BlockId, DynamicSharedAllocSpec, IndexKind, KernelDescriptor,
    MethodBuilder, MethodGraph, MethodKind, OpCode, Primitive, SharedAllocSpec, TypeId, TypeNode,
    TypeTable, Value, ValueId,
};
