//! Function emitter: helper (non-entry) device functions.

use anyhow::Result;
use itertools::Itertools;

use crate::ir::{IndexKind, MethodGraph, TypeNode, TypeTable};

use super::WgslBackend;
use super::types::MethodEmitter;
use super::writer::{SourceWriter, sanitize_wgsl_ident};

/// Result of emitting one helper function.
pub(crate) struct EmittedHelper {
    pub text: String,
    pub uses_subgroups: bool,
    pub diagnostics: Vec<String>,
    /// Module-scope `var<workgroup>` declarations from shared allocas inside
    /// the helper body.
    pub workgroup_decls: Vec<String>,
}

impl WgslBackend {
    /// Compile one helper method to a standalone `fn` definition.
    ///
    /// Shared-memory declarations the body may need are only returned through
    /// [`compile_module`](Self::compile_module); use that entry point when a
    /// helper allocates workgroup memory.
    pub fn compile_function(&self, types: &TypeTable, graph: &MethodGraph) -> Result<String> {
        Ok(self.emit_helper(types, graph)?.text)
    }

    pub(crate) fn emit_helper(
        &self,
        types: &TypeTable,
        graph: &MethodGraph,
    ) -> Result<EmittedHelper> {
        let mut em = MethodEmitter::new(
            types,
            graph,
            self.options(),
            self.mapper(),
            false,
            IndexKind::None,
        );

        let returns_void = matches!(types.node(graph.return_type), TypeNode::Void);
        let return_ty = if returns_void {
            None
        } else {
            let (name, diag) = self.mapper().map(types, graph.return_type, self.options());
            if let Some(note) = diag {
                em.diagnostics.push(note);
            }
            Some(name)
        };

        // Signature: parameters are `p_<i>`, copied into mutable locals to
        // unify read/write conventions. Pointer-shaped parameters cannot live
        // in a `var`, so they bind directly to the parameter name.
        let mut sig_params = Vec::new();
        let mut body = SourceWriter::new();
        body.indent();
        for (i, &pv) in graph.params.iter().enumerate() {
            let ty_id = graph.value(pv).ty;
            let (ty, diag) = self.mapper().map(types, ty_id, self.options());
            if let Some(note) = diag {
                em.diagnostics.push(note);
            }
            sig_params.push(format!("p_{i} : {ty}"));
            let is_pointer = matches!(
                types.node(ty_id),
                TypeNode::Pointer { .. } | TypeNode::View { .. }
            );
            if is_pointer {
                em.exprs.insert(pv, format!("p_{i}"));
            } else {
                em.assign_mutable(&mut body, pv, format!("p_{i}"));
            }
        }

        em.declare_allocas(&mut body);
        if let Some(ret) = &return_ty {
            body.line(format!("var _return_val : {ret};"));
        }
        em.declare_hoisted(&mut body);
        em.lower_body(&mut body)?;
        if return_ty.is_some()
            && em.select_strategy() == super::control_flow::LoweringStrategy::StateMachine
        {
            body.line("return _return_val;");
        }

        let name = format!("{}_{}", sanitize_wgsl_ident(&graph.name), graph.id);
        let mut out = SourceWriter::new();
        match &return_ty {
            Some(ret) => out.line(format!(
                "fn {name}({}) -> {ret} {{",
                sig_params.iter().join(", ")
            )),
            None => out.line(format!("fn {name}({}) {{", sig_params.iter().join(", "))),
        }
        out.raw(body.as_str());
        out.line("}");

        Ok(EmittedHelper {
            text: out.into_string(),
            uses_subgroups: em.uses_subgroups,
            diagnostics: em.diagnostics,
            workgroup_decls: em.workgroup_decls,
        })
    }
}
