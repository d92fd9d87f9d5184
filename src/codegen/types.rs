//! Core type definitions for the code generator.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analysis::Analyses;
use crate::ir::{BlockId, IndexKind, MethodGraph, TypeId, TypeTable, ValueId};

use super::emulation::EmulatedClass;
use super::type_map::TypeMapper;
use super::vars::VariableTable;

/// Recognized back-end options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodegenOptions {
    /// Emit `f64` aliases and double-float helpers; treat `f64` IR operands as
    /// `vec2<f32>`; convert IEEE bits at buffer boundaries.
    #[serde(default)]
    pub enable_f64_emulation: bool,
    /// Emit `i64`/`u64` aliases and double-word helpers; treat 64-bit IR
    /// integers as `vec2<u32>`; split/recombine at buffer boundaries.
    #[serde(default)]
    pub enable_i64_emulation: bool,
}

/// Access mode of a storage-buffer binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessMode {
    ReadWrite,
    Read,
}

impl AccessMode {
    pub fn wgsl(self) -> &'static str {
        match self {
            Self::ReadWrite => "read_write",
            Self::Read => "read",
        }
    }
}

/// One `@group(0) @binding(k)` declaration of the generated module.
#[derive(Clone, Debug)]
pub struct BindingEntry {
    pub binding: u32,
    /// Element type as spelled inside `array<...>`.
    pub wgsl_type: String,
    pub access: AccessMode,
    /// Positional index of the originating method parameter.
    pub parameter: u32,
    /// Binding slot of the read-only stride side-band, for 2D/3D views.
    pub stride_companion: Option<u32>,
}

/// Shape classification of a kernel parameter, driving binding layout and the
/// prologue assignment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamShape {
    Scalar,
    Struct,
    View { dims: u8 },
}

/// Result of compiling one kernel method.
#[derive(Clone, Debug)]
pub struct WgslKernelBundle {
    /// The complete WGSL module text.
    pub module: String,
    /// Storage-buffer bindings, dense and ordered by parameter index.
    pub bindings: Vec<BindingEntry>,
    pub workgroup_size: [u32; 3],
    pub f64_emulation: bool,
    pub i64_emulation: bool,
    /// Human-readable notes for conditions that degraded to best-effort
    /// emission (unmapped types, unhandled opcodes).
    pub diagnostics: Vec<String>,
}

/// Non-recoverable code-generation failures. Recoverable conditions degrade
/// to in-source diagnostic comments instead (see the value emitter).
#[derive(Debug, Error)]
pub enum CodegenError {
    #[error(
        "no emulation routine for {category} operation {opcode} \
         (method {method}, block {block}, value {value})"
    )]
    EmulationUnsupported {
        category: &'static str,
        opcode: String,
        method: String,
        block: u32,
        value: u32,
    },
    #[error("missing required analysis for method {method}: {what}")]
    MissingAnalysis { method: String, what: &'static str },
}

/// Per-parameter facts collected before emission.
#[derive(Clone, Debug)]
pub(crate) struct ParamInfo {
    pub value: ValueId,
    pub position: u32,
    pub shape: ParamShape,
    /// Buffer element type: the view element for views, the parameter's own
    /// type otherwise.
    pub element: TypeId,
    /// Set when the element is a 64-bit scalar and its emulation is enabled;
    /// the buffer then stores two `u32` lanes per logical element.
    pub emulated: Option<EmulatedClass>,
    /// Written by at least one atomic operation.
    pub atomic: bool,
    /// WGSL identifier of the primary binding (`param<i>`). Empty for the
    /// kernel-index parameter, which binds to built-ins instead.
    pub buffer: String,
    pub is_index: bool,
}

/// An element address into an emulated-64-bit buffer. The logical element
/// spans lanes `2i` and `2i+1`, so the address is carried as a base index
/// expression instead of a WGSL pointer.
#[derive(Clone, Debug)]
pub(crate) struct TwoLaneAddr {
    pub buffer: String,
    pub index: String,
    pub class: EmulatedClass,
}

/// Per-method emission state shared by the value emitter, the control-flow
/// lowerer, and the kernel/function emitters.
pub(crate) struct MethodEmitter<'a> {
    pub types: &'a TypeTable,
    pub graph: &'a MethodGraph,
    pub analyses: Analyses,
    pub options: &'a CodegenOptions,
    pub mapper: &'a TypeMapper,
    pub vars: VariableTable,
    /// Expression-valued SSA nodes (constants, addresses, built-ins) that are
    /// re-materialized at each use instead of bound to a named variable.
    pub exprs: HashMap<ValueId, String>,
    /// Values whose declaration is lifted to method top as a mutable `var`.
    pub hoisted: HashSet<ValueId>,
    /// Guards against double emission under structured traversal.
    pub visited: HashSet<BlockId>,
    pub params: Vec<ParamInfo>,
    pub param_by_value: HashMap<ValueId, usize>,
    pub two_lane: HashMap<ValueId, TwoLaneAddr>,
    /// Allocas written by atomics; their element type is wrapped `atomic<T>`.
    pub atomic_allocas: HashSet<ValueId>,
    /// Module-scope `var<workgroup>` declarations collected from shared
    /// allocas inside the method body.
    pub workgroup_decls: Vec<String>,
    pub uses_subgroups: bool,
    pub diagnostics: Vec<String>,
    pub is_kernel: bool,
    pub index_kind: IndexKind,
    /// Block currently being emitted; used for diagnostics.
    pub current_block: BlockId,
}

impl<'a> MethodEmitter<'a> {
    pub fn new(
        types: &'a TypeTable,
        graph: &'a MethodGraph,
        options: &'a CodegenOptions,
        mapper: &'a TypeMapper,
        is_kernel: bool,
        index_kind: IndexKind,
    ) -> Self {
        let analyses = Analyses::compute(graph);
        let mut emitter = Self {
            types,
            graph,
            analyses,
            options,
            mapper,
            vars: VariableTable::new(),
            exprs: HashMap::new(),
            hoisted: HashSet::new(),
            visited: HashSet::new(),
            params: Vec::new(),
            param_by_value: HashMap::new(),
            two_lane: HashMap::new(),
            atomic_allocas: HashSet::new(),
            workgroup_decls: Vec::new(),
            uses_subgroups: false,
            diagnostics: Vec::new(),
            is_kernel,
            index_kind,
            current_block: graph.entry,
        };
        emitter.classify_params();
        emitter.scan_atomics();
        emitter.scan_subgroups();
        emitter.discover_hoists();
        emitter
    }

    pub fn diag(&mut self, message: impl Into<String>) {
        self.diagnostics.push(message.into());
    }

    /// WGSL spelling of a value's result type.
    pub fn wgsl_type_of(&mut self, v: ValueId) -> String {
        let ty = self.graph.value(v).ty;
        let (name, unmapped) = self.mapper.map(self.types, ty, self.options);
        if let Some(note) = unmapped {
            self.diag(note);
        }
        name
    }

}
