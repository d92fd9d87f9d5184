//! Control-flow lowering: structured reconstruction for acyclic graphs, a
//! `loop { switch(current_block) }` state machine for everything else.
//!
//! Structured lowering is preferred because it keeps barriers and subgroup
//! operations on uniform textual paths; the state machine is the fallback for
//! cyclic or irreducible graphs. Phi moves always happen on the source side
//! of a transition.

use anyhow::Result;
use tracing::debug;

use crate::ir::{BlockId, OpCode, TypeNode, ValueId};

use super::types::MethodEmitter;
use super::writer::SourceWriter;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum LoweringStrategy {
    Linear,
    Structured,
    StateMachine,
}

impl MethodEmitter<'_> {
    pub(crate) fn select_strategy(&self) -> LoweringStrategy {
        if self.graph.block_count() == 1 {
            LoweringStrategy::Linear
        } else if !self.analyses.loops.has_loops() {
            LoweringStrategy::Structured
        } else {
            LoweringStrategy::StateMachine
        }
    }

    /// Lower the whole method body into `w`. The prologue (hoisted
    /// declarations, parameter binds) must already be in place.
    pub(crate) fn lower_body(&mut self, w: &mut SourceWriter) -> Result<()> {
        let strategy = self.select_strategy();
        debug!(
            method = %self.graph.name,
            blocks = self.graph.block_count(),
            ?strategy,
            "lowering method body"
        );
        match strategy {
            LoweringStrategy::Linear => self.lower_linear(w),
            LoweringStrategy::Structured => self.visit_block(self.graph.entry, None, w),
            LoweringStrategy::StateMachine => self.lower_state_machine(w),
        }
    }

    fn returns_void(&self) -> bool {
        self.is_kernel
            || matches!(self.types.node(self.graph.return_type), TypeNode::Void)
    }

    fn emit_block_values(&mut self, w: &mut SourceWriter, b: BlockId) -> Result<()> {
        self.current_block = b;
        let values = self.graph.block(b).values.clone();
        let term = self.graph.block(b).terminator();
        for v in values {
            if Some(v) == term && self.graph.value(v).op.is_terminator() {
                continue;
            }
            self.emit_value(w, v)?;
        }
        Ok(())
    }

    /// Phi assignments for the `source -> target` transition.
    fn emit_phi_moves(
        &mut self,
        w: &mut SourceWriter,
        source: BlockId,
        target: BlockId,
    ) -> Result<()> {
        let values = self.graph.block(target).values.clone();
        for v in values {
            let OpCode::Phi { incoming } = self.graph.value(v).op.clone() else {
                continue;
            };
            for (pred, inc) in incoming {
                if pred == source {
                    let expr = self.operand(inc)?;
                    let ty = self.wgsl_type_of(v);
                    let var = self.vars.load(v, ty);
                    w.line(format!("{} = {};", var.name, expr));
                }
            }
        }
        Ok(())
    }

    fn has_phi_inputs(&self, block: BlockId, from: BlockId) -> bool {
        self.graph.block(block).values.iter().any(|&v| {
            matches!(
                &self.graph.value(v).op,
                OpCode::Phi { incoming } if incoming.iter().any(|(pred, _)| *pred == from)
            )
        })
    }

    fn emit_return(
        &mut self,
        w: &mut SourceWriter,
        value: Option<ValueId>,
        state_machine: bool,
    ) -> Result<()> {
        if !self.returns_void() {
            if let Some(v) = value {
                let expr = self.operand(v)?;
                w.line(format!("_return_val = {expr};"));
            }
            if state_machine {
                w.line("current_block = -1;");
                w.line("break;");
            } else {
                w.line("return _return_val;");
            }
        } else if state_machine {
            w.line("current_block = -1;");
            w.line("break;");
        } else {
            w.line("return;");
        }
        Ok(())
    }

    // ---- single-block fast path ----------------------------------------

    fn lower_linear(&mut self, w: &mut SourceWriter) -> Result<()> {
        let b = self.graph.entry;
        self.emit_block_values(w, b)?;
        let Some(term) = self.graph.block(b).terminator() else {
            self.diag(format!("method {} has no terminator", self.graph.name));
            return Ok(());
        };
        match self.graph.value(term).op.clone() {
            OpCode::Return { value } => self.emit_return(w, value, false)?,
            OpCode::Throw => {
                w.line("// Unhandled throw-like value");
                self.emit_return(w, None, false)?;
            }
            other => {
                self.diag(format!(
                    "single-block method {} ends in {}",
                    self.graph.name,
                    other.name()
                ));
            }
        }
        Ok(())
    }

    // ---- structured lowering -------------------------------------------

    /// Recursive descent with a `stop_block` marking the current subgraph's
    /// merge point; the caller owns emission of the stop block.
    fn visit_block(
        &mut self,
        b: BlockId,
        stop: Option<BlockId>,
        w: &mut SourceWriter,
    ) -> Result<()> {
        if Some(b) == stop {
            return Ok(());
        }
        if !self.visited.insert(b) {
            return Ok(());
        }
        self.emit_block_values(w, b)?;
        let Some(term) = self.graph.block(b).terminator() else {
            self.diag(format!("block {} of {} has no terminator", b.0, self.graph.name));
            return Ok(());
        };
        match self.graph.value(term).op.clone() {
            OpCode::Branch { target } => {
                self.emit_phi_moves(w, b, target)?;
                self.visit_block(target, stop, w)?;
            }
            OpCode::BranchIf { condition, true_target, false_target } => {
                let cond = self.operand(condition)?;
                let merge = self.analyses.postdom_immediate(b);
                let arm_stop = merge.or(stop);
                let merge_receives_phi =
                    merge.is_some_and(|m| self.has_phi_inputs(m, b));

                if merge == Some(true_target) && !merge_receives_phi {
                    w.line(format!("if (!({cond})) {{"));
                    w.indent();
                    self.emit_phi_moves(w, b, false_target)?;
                    self.visit_block(false_target, arm_stop, w)?;
                    w.dedent();
                    w.line("}");
                } else if merge == Some(false_target) && !merge_receives_phi {
                    w.line(format!("if ({cond}) {{"));
                    w.indent();
                    self.emit_phi_moves(w, b, true_target)?;
                    self.visit_block(true_target, arm_stop, w)?;
                    w.dedent();
                    w.line("}");
                } else {
                    w.line(format!("if ({cond}) {{"));
                    w.indent();
                    self.emit_phi_moves(w, b, true_target)?;
                    self.visit_block(true_target, arm_stop, w)?;
                    w.dedent();
                    w.line("} else {");
                    w.indent();
                    self.emit_phi_moves(w, b, false_target)?;
                    self.visit_block(false_target, arm_stop, w)?;
                    w.dedent();
                    w.line("}");
                }

                if let Some(m) = merge {
                    if Some(m) != stop {
                        self.visit_block(m, stop, w)?;
                    }
                }
            }
            OpCode::BranchSwitch { selector, cases, default } => {
                let sel = self.operand(selector)?;
                let sel_is_u32 = self.wgsl_type_of(selector) == "u32";
                let merge = self.analyses.postdom_immediate(b);
                let arm_stop = merge.or(stop);

                w.line(format!("switch ({sel}) {{"));
                w.indent();
                for (case_value, target) in cases {
                    let lit = if sel_is_u32 {
                        format!("{}u", case_value as u32)
                    } else {
                        format!("{}", case_value as i32)
                    };
                    w.line(format!("case {lit}: {{"));
                    w.indent();
                    self.emit_phi_moves(w, b, target)?;
                    if merge != Some(target) {
                        self.visit_block(target, arm_stop, w)?;
                    }
                    w.dedent();
                    w.line("}");
                }
                w.line("default: {");
                w.indent();
                self.emit_phi_moves(w, b, default)?;
                if merge != Some(default) {
                    self.visit_block(default, arm_stop, w)?;
                }
                w.dedent();
                w.line("}");
                w.dedent();
                w.line("}");

                if let Some(m) = merge {
                    if Some(m) != stop {
                        self.visit_block(m, stop, w)?;
                    }
                }
            }
            OpCode::Return { value } => self.emit_return(w, value, false)?,
            OpCode::Throw => {
                w.line("// Unhandled throw-like value");
                self.emit_return(w, None, false)?;
            }
            other => {
                self.diag(format!(
                    "block {} of {} ends in {}",
                    b.0,
                    self.graph.name,
                    other.name()
                ));
            }
        }
        Ok(())
    }

    // ---- state-machine fallback ----------------------------------------

    fn lower_state_machine(&mut self, w: &mut SourceWriter) -> Result<()> {
        w.line(format!("var current_block : i32 = {};", self.graph.entry.0));
        w.line("loop {");
        w.indent();
        w.line("switch (current_block) {");
        w.indent();
        for b in self.graph.block_ids().collect::<Vec<_>>() {
            w.line(format!("case {}: {{", b.0));
            w.indent();
            self.emit_block_values(w, b)?;
            self.emit_state_transition(w, b)?;
            w.dedent();
            w.line("}");
        }
        w.line("default: {");
        w.indent();
        w.line("break;");
        w.dedent();
        w.line("}");
        w.dedent();
        w.line("}");
        w.line("if (current_block == -1) {");
        w.indent();
        w.line("break;");
        w.dedent();
        w.line("}");
        w.dedent();
        w.line("}");
        Ok(())
    }

    fn emit_state_transition(&mut self, w: &mut SourceWriter, b: BlockId) -> Result<()> {
        let Some(term) = self.graph.block(b).terminator() else {
            self.diag(format!("block {} of {} has no terminator", b.0, self.graph.name));
            w.line("current_block = -1;");
            w.line("break;");
            return Ok(());
        };
        match self.graph.value(term).op.clone() {
            OpCode::Branch { target } => {
                self.emit_phi_moves(w, b, target)?;
                w.line(format!("current_block = {};", target.0));
                w.line("continue;");
            }
            OpCode::BranchIf { condition, true_target, false_target } => {
                let cond = self.operand(condition)?;
                w.line(format!("if ({cond}) {{"));
                w.indent();
                self.emit_phi_moves(w, b, true_target)?;
                w.line(format!("current_block = {};", true_target.0));
                w.dedent();
                w.line("} else {");
                w.indent();
                self.emit_phi_moves(w, b, false_target)?;
                w.line(format!("current_block = {};", false_target.0));
                w.dedent();
                w.line("}");
                w.line("continue;");
            }
            OpCode::BranchSwitch { selector, cases, default } => {
                let sel = self.operand(selector)?;
                let sel_is_u32 = self.wgsl_type_of(selector) == "u32";
                w.line(format!("switch ({sel}) {{"));
                w.indent();
                for (case_value, target) in cases {
                    let lit = if sel_is_u32 {
                        format!("{}u", case_value as u32)
                    } else {
                        format!("{}", case_value as i32)
                    };
                    w.line(format!("case {lit}: {{"));
                    w.indent();
                    self.emit_phi_moves(w, b, target)?;
                    w.line(format!("current_block = {};", target.0));
                    w.dedent();
                    w.line("}");
                }
                w.line("default: {");
                w.indent();
                self.emit_phi_moves(w, b, default)?;
                w.line(format!("current_block = {};", default.0));
                w.dedent();
                w.line("}");
                w.dedent();
                w.line("}");
                w.line("continue;");
            }
            OpCode::Return { value } => self.emit_return(w, value, true)?,
            OpCode::Throw => {
                w.line("// Unhandled throw-like value");
                w.line("current_block = -1;");
                w.line("break;");
            }
            other => {
                self.diag(format!(
                    "block {} of {} ends in {}",
                    b.0,
                    self.graph.name,
                    other.name()
                ));
                w.line("current_block = -1;");
                w.line("break;");
            }
        }
        Ok(())
    }
}
