//! Kernel emitter: the module prologue, storage-buffer bindings, workgroup
//! allocations, and the `@compute` entry function.

use anyhow::Result;
use tracing::debug;

use crate::ir::{
    AddressSpace, DynamicSharedAllocSpec, IndexKind, KernelDescriptor, MethodGraph, MethodKind,
    OpCode, SharedAllocSpec, TypeTable,
};

use super::WgslBackend;
use super::emulation::{self, EmulatedClass};
use super::types::{AccessMode, BindingEntry, MethodEmitter, ParamShape, WgslKernelBundle};
use super::writer::SourceWriter;

/// Workgroup dimensions per index kind: 64 for 1D, 8x8 for 2D, 4x4x4 for 3D.
pub(crate) fn workgroup_size(index_kind: IndexKind) -> [u32; 3] {
    match index_kind {
        IndexKind::None | IndexKind::Index1D => [64, 1, 1],
        IndexKind::Index2D => [8, 8, 1],
        IndexKind::Index3D => [4, 4, 4],
    }
}

fn workgroup_size_attr(index_kind: IndexKind) -> String {
    match index_kind {
        IndexKind::None | IndexKind::Index1D => "64".to_string(),
        IndexKind::Index2D => "8, 8".to_string(),
        IndexKind::Index3D => "4, 4, 4".to_string(),
    }
}

impl WgslBackend {
    /// Compile one kernel plus its helper functions into a complete WGSL
    /// module.
    pub fn compile_module(
        &self,
        types: &TypeTable,
        kernel: &MethodGraph,
        helpers: &[&MethodGraph],
        descriptor: &KernelDescriptor,
        shared: &[SharedAllocSpec],
        dynamic_shared: &[DynamicSharedAllocSpec],
    ) -> Result<WgslKernelBundle> {
        let mut diagnostics = Vec::new();
        let mut workgroup_decls: Vec<String> = Vec::new();
        let mut any_subgroups = false;

        // Helper functions first so their struct declarations are collected
        // before the prologue is assembled. External and intrinsic-flagged
        // methods never get a WGSL function.
        let mut helper_texts = Vec::new();
        for helper in helpers {
            if helper.kind != MethodKind::Device {
                continue;
            }
            let emitted = self.emit_helper(types, helper)?;
            any_subgroups |= emitted.uses_subgroups;
            diagnostics.extend(emitted.diagnostics);
            workgroup_decls.extend(emitted.workgroup_decls);
            helper_texts.push(emitted.text);
        }

        let mut em = MethodEmitter::new(
            types,
            kernel,
            &self.options,
            self.mapper(),
            true,
            descriptor.index_kind,
        );
        any_subgroups |= em.uses_subgroups;

        // Spec-level workgroup allocations; the IR's own shared allocas join
        // them during the prologue scan.
        for spec in shared {
            let (ty, diag) = self.mapper().map(types, spec.element, &self.options);
            if let Some(note) = diag {
                diagnostics.push(note);
            }
            let name = em.vars.fresh(ty.clone()).name;
            workgroup_decls.push(format!("var<workgroup> {name} : array<{ty}, {}>;", spec.count));
        }
        for spec in dynamic_shared {
            let (ty, diag) = self.mapper().map(types, spec.element, &self.options);
            if let Some(note) = diag {
                diagnostics.push(note);
            }
            let name = em.vars.fresh(ty.clone()).name;
            workgroup_decls.push(format!(
                "var<workgroup> {name} : array<{ty}, {}>;",
                spec.max_count
            ));
        }

        let mut body = SourceWriter::new();
        body.indent();

        let wg = workgroup_size(descriptor.index_kind);
        body.line(format!(
            "let workgroup_size = vec3<u32>({}u, {}u, {}u);",
            wg[0], wg[1], wg[2]
        ));

        em.bind_kernel_index(&mut body)?;
        em.bind_kernel_params(&mut body)?;
        em.declare_allocas(&mut body);
        em.declare_hoisted(&mut body);
        em.lower_body(&mut body)?;

        workgroup_decls.extend(em.workgroup_decls.drain(..));

        let (binding_text, bindings) = em.binding_declarations();
        diagnostics.extend(em.diagnostics.drain(..));

        debug!(
            kernel = %kernel.name,
            bindings = bindings.len(),
            helpers = helper_texts.len(),
            "assembled kernel module"
        );

        // Assemble the module in its fixed order: banner, directives, struct
        // declarations, emulation library, bindings, workgroup allocations,
        // helper functions, entry point.
        let mut module = SourceWriter::new();
        module.line(format!(
            "// Generated by wgsl-kernel-backend v{} (kernel {})",
            env!("CARGO_PKG_VERSION"),
            kernel.name
        ));
        if any_subgroups {
            module.line("enable subgroups;");
        }
        module.blank();

        let structs = self.mapper().struct_declarations();
        if !structs.is_empty() {
            module.raw(&structs);
        }
        if self.options.enable_f64_emulation {
            module.raw(emulation::F64_LIBRARY);
            module.blank();
        }
        if self.options.enable_i64_emulation {
            module.raw(emulation::I64_LIBRARY);
            module.blank();
        }
        if !binding_text.is_empty() {
            module.raw(&binding_text);
            module.blank();
        }
        for decl in &workgroup_decls {
            module.line(decl);
        }
        if !workgroup_decls.is_empty() {
            module.blank();
        }
        for text in &helper_texts {
            module.raw(text);
            module.blank();
        }

        module.line(format!("@compute @workgroup_size({})", workgroup_size_attr(descriptor.index_kind)));
        module.line("fn main(");
        module.indent();
        module.line("@builtin(global_invocation_id) global_id : vec3<u32>,");
        module.line("@builtin(local_invocation_id) local_id : vec3<u32>,");
        module.line("@builtin(workgroup_id) group_id : vec3<u32>,");
        module.line("@builtin(num_workgroups) num_groups : vec3<u32>,");
        if em.uses_subgroups {
            module.line("@builtin(local_invocation_index) local_index : u32,");
            module.line("@builtin(subgroup_invocation_id) subgroup_invocation_id : u32,");
        } else {
            module.line("@builtin(local_invocation_index) local_index : u32,");
        }
        module.dedent();
        module.line(") {");
        module.raw(body.as_str());
        module.line("}");

        Ok(WgslKernelBundle {
            module: module.into_string(),
            bindings,
            workgroup_size: wg,
            f64_emulation: self.options.enable_f64_emulation,
            i64_emulation: self.options.enable_i64_emulation,
            diagnostics,
        })
    }
}

impl MethodEmitter<'_> {
    /// Map the kernel-index parameter (when the entry point declares a
    /// non-`None` index type) from the dispatch built-ins.
    pub(crate) fn bind_kernel_index(&mut self, body: &mut SourceWriter) -> Result<()> {
        if self.index_kind == IndexKind::None {
            return Ok(());
        }
        let Some(info) = self.params.iter().find(|p| p.is_index) else {
            return Ok(());
        };
        let value = info.value;
        let expr = match self.index_kind {
            IndexKind::None => unreachable!(),
            IndexKind::Index1D => {
                "i32(local_index + group_id.x * workgroup_size.x)".to_string()
            }
            IndexKind::Index2D => "vec2<i32>(\
                i32(local_id.x + group_id.x * workgroup_size.x), \
                i32(local_id.y + group_id.y * workgroup_size.y))"
                .to_string(),
            IndexKind::Index3D => "vec3<i32>(\
                i32(local_id.x + group_id.x * workgroup_size.x), \
                i32(local_id.y + group_id.y * workgroup_size.y), \
                i32(local_id.z + group_id.z * workgroup_size.z))"
                .to_string(),
        };
        self.assign(body, value, expr);
        Ok(())
    }

    /// Bind each non-index parameter: a scalar load from `paramN[0]`, a
    /// struct-pointer alias `&paramN[0]`, or a view pointer `&paramN`.
    pub(crate) fn bind_kernel_params(&mut self, body: &mut SourceWriter) -> Result<()> {
        let params = self.params.clone();
        for info in params {
            if info.is_index {
                continue;
            }
            let b = &info.buffer;
            match info.shape {
                ParamShape::Scalar => {
                    let expr = match info.emulated {
                        Some(EmulatedClass::F64) => {
                            format!("f64_from_ieee754_bits({b}[0], {b}[1])")
                        }
                        Some(EmulatedClass::I64) => format!("i64({b}[0], {b}[1])"),
                        Some(EmulatedClass::U64) => format!("u64({b}[0], {b}[1])"),
                        None => format!("{b}[0]"),
                    };
                    self.assign_mutable(body, info.value, expr);
                }
                ParamShape::Struct => {
                    self.exprs.insert(info.value, format!("&{b}[0]"));
                }
                ParamShape::View { .. } => {
                    self.exprs.insert(info.value, format!("&{b}"));
                }
            }
        }
        Ok(())
    }

    /// Declare every alloca up front: shared ones become module-scope
    /// `var<workgroup>` declarations, local ones function-scope `var`s. The
    /// value itself binds to the address expression `&<name>`.
    pub(crate) fn declare_allocas(&mut self, body: &mut SourceWriter) {
        for v in self.graph.value_ids().collect::<Vec<_>>() {
            let OpCode::Alloca { element, count, space } = self.graph.value(v).op else {
                continue;
            };
            let (mut ty, diag) = self.mapper.map(self.types, element, self.options);
            if let Some(note) = diag {
                self.diag(note);
            }
            if self.atomic_allocas.contains(&v) {
                ty = format!("atomic<{ty}>");
            }
            let name = self.vars.fresh(ty.clone()).name;
            match space {
                AddressSpace::Shared => {
                    self.workgroup_decls
                        .push(format!("var<workgroup> {name} : array<{ty}, {count}>;"));
                }
                AddressSpace::Local | AddressSpace::Global => {
                    if count > 1 {
                        body.line(format!("var {name} : array<{ty}, {count}>;"));
                    } else {
                        body.line(format!("var {name} : {ty};"));
                    }
                }
            }
            self.exprs.insert(v, format!("&{name}"));
        }
    }

    /// Emit `var` declarations for every hoisted value, in handle order.
    pub(crate) fn declare_hoisted(&mut self, body: &mut SourceWriter) {
        let mut hoisted: Vec<_> = self.hoisted.iter().copied().collect();
        hoisted.sort();
        for v in hoisted {
            let ty = self.wgsl_type_of(v);
            let var = self.vars.load(v, ty);
            self.vars.declare(body, &var);
        }
    }

    /// Binding declarations plus the binding table. Indices are dense and
    /// ordered by parameter index; a 2D/3D view consumes one extra read-only
    /// stride slot immediately after its primary binding.
    pub(crate) fn binding_declarations(&mut self) -> (String, Vec<BindingEntry>) {
        let mut text = SourceWriter::new();
        let mut entries = Vec::new();
        let mut binding = 0u32;
        let params = self.params.clone();
        for info in &params {
            if info.is_index {
                continue;
            }
            let element = if info.emulated.is_some() {
                "u32".to_string()
            } else {
                let (name, diag) = self.mapper.map(self.types, info.element, self.options);
                if let Some(note) = diag {
                    self.diag(note);
                }
                name
            };
            let element = if info.atomic { format!("atomic<{element}>") } else { element };

            let needs_stride = matches!(info.shape, ParamShape::View { dims } if dims >= 2);
            let stride_companion = needs_stride.then_some(binding + 1);

            text.line(format!(
                "@group(0) @binding({binding}) var<storage, read_write> {} : array<{element}>;",
                info.buffer
            ));
            entries.push(BindingEntry {
                binding,
                wgsl_type: element,
                access: AccessMode::ReadWrite,
                parameter: info.position,
                stride_companion,
            });
            binding += 1;

            if needs_stride {
                text.line(format!(
                    "@group(0) @binding({binding}) var<storage, read> {}_stride : array<i32>;",
                    info.buffer
                ));
                entries.push(BindingEntry {
                    binding,
                    wgsl_type: "i32".to_string(),
                    access: AccessMode::Read,
                    parameter: info.position,
                    stride_companion: None,
                });
                binding += 1;
            }
        }
        (text.into_string(), entries)
    }
}
