//! Per-method variable table: a monotonic name allocator mapping SSA values
//! to WGSL identifiers, plus declaration and hoisting bookkeeping.

use std::collections::{HashMap, HashSet};

use crate::ir::ValueId;

use super::writer::SourceWriter;

/// A named WGSL slot bound to one SSA value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub wgsl_ty: String,
}

/// Name allocation is a plain counter, so collisions are impossible by
/// construction.
#[derive(Default)]
pub struct VariableTable {
    next: u32,
    by_value: HashMap<ValueId, Variable>,
    declared: HashSet<String>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn fresh_name(&mut self) -> String {
        let name = format!("v_{}", self.next);
        self.next += 1;
        name
    }

    /// Produce a fresh `v_<n>` bound to `value`.
    pub fn allocate(&mut self, value: ValueId, wgsl_ty: String) -> Variable {
        let var = Variable { name: self.fresh_name(), wgsl_ty };
        self.by_value.insert(value, var.clone());
        var
    }

    /// Produce a fresh name not bound to any SSA value (scratch temporaries,
    /// e.g. the bit pair of an emulated store).
    pub fn fresh(&mut self, wgsl_ty: String) -> Variable {
        Variable { name: self.fresh_name(), wgsl_ty }
    }

    /// The variable bound to `value`, allocating on first use.
    pub fn load(&mut self, value: ValueId, wgsl_ty: String) -> Variable {
        if let Some(var) = self.by_value.get(&value) {
            return var.clone();
        }
        self.allocate(value, wgsl_ty)
    }

    pub fn get(&self, value: ValueId) -> Option<&Variable> {
        self.by_value.get(&value)
    }

    /// Associate a pre-existing variable with a value.
    pub fn bind(&mut self, value: ValueId, variable: Variable) {
        self.by_value.insert(value, variable);
    }

    /// Emit `var <name> : <type>;` at the current position iff not yet
    /// declared. Idempotent.
    pub fn declare(&mut self, w: &mut SourceWriter, variable: &Variable) {
        if self.declared.insert(variable.name.clone()) {
            w.line(format!("var {} : {};", variable.name, variable.wgsl_ty));
        }
    }

    /// Record a name as declared without emitting anything (parameters,
    /// `let`-bound results).
    pub fn mark_declared(&mut self, name: &str) {
        self.declared.insert(name.to_string());
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.declared.contains(name)
    }
}
