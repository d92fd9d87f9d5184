//! Value emitter: the dispatch from SSA opcodes to WGSL lines.
//!
//! Expression-valued nodes (constants, addresses, built-ins) are
//! re-materialized at each use; everything else is bound to a `v_<n>` name by
//! a `let` (or a bare assignment when hoisted). Recoverable problems degrade
//! to `// Unhandled` comments plus a typed zero so the SSA chain stays
//! connected; missing 64-bit emulation routines abort the method.

use anyhow::Result;
use itertools::Itertools;

use crate::ir::{
    AtomicKind, BinaryKind, CompareKind, IndexKind, MethodKind, OpCode, Primitive, TernaryKind,
    TypeId, TypeNode, UnaryKind, ValueId,
};

use super::emulation::{self, EmulatedClass};
use super::intrinsics::{self, Intrinsic};
use super::types::{CodegenError, MethodEmitter, ParamInfo, ParamShape, TwoLaneAddr};
use super::writer::{SourceWriter, fmt_f32, sanitize_wgsl_ident};

/// Where a pointer operand actually points.
pub(crate) enum AddressRepr {
    /// A regular WGSL pointer expression.
    Pointer(String),
    /// A logical element of an emulated-64-bit buffer, spanning lanes
    /// `2i` and `2i+1`.
    TwoLane(TwoLaneAddr),
}

/// What a traced pointer chain roots at.
enum Root {
    Param(usize),
    Alloca(ValueId),
    Unknown,
}

impl<'a> MethodEmitter<'a> {
    // ---- pre-scans ------------------------------------------------------

    pub(crate) fn classify_params(&mut self) {
        let mut bound_ordinal = 0u32;
        for (pos, &pv) in self.graph.params.iter().enumerate() {
            let is_index =
                self.is_kernel && pos == 0 && self.index_kind != IndexKind::None;
            let ty = self.graph.value(pv).ty;
            let (shape, element) = self.classify_param_type(ty);
            let emulated = EmulatedClass::of(self.types, element, self.options);
            let buffer = if is_index {
                String::new()
            } else {
                let name = format!("param{bound_ordinal}");
                bound_ordinal += 1;
                name
            };
            let info = ParamInfo {
                value: pv,
                position: pos as u32,
                shape,
                element,
                emulated,
                atomic: false,
                buffer,
                is_index,
            };
            self.param_by_value.insert(pv, self.params.len());
            self.params.push(info);
        }
    }

    /// Parameter shapes drive binding layout: views (and raw pointers) become
    /// storage arrays, wrapper structs whose first field is a view drill
    /// through to the element, everything else is a scalar or plain struct.
    fn classify_param_type(&self, ty: TypeId) -> (ParamShape, TypeId) {
        match self.types.node(ty) {
            TypeNode::View { element, dims } => (ParamShape::View { dims: *dims }, *element),
            TypeNode::Pointer { element, .. } => (ParamShape::View { dims: 1 }, *element),
            TypeNode::Structure { name, fields } => {
                let first_field_view = fields.first().is_some_and(|&f| {
                    matches!(self.types.node(f), TypeNode::View { .. } | TypeNode::Pointer { .. })
                });
                let name_says_view = name.as_deref().is_some_and(|n| n.contains("View"));
                if first_field_view || name_says_view {
                    let dims = match fields.len() {
                        0..=3 => 1,
                        4 | 5 => 2,
                        _ => 3,
                    };
                    let element = match fields.first().map(|&f| self.types.node(f)) {
                        Some(TypeNode::View { element, .. })
                        | Some(TypeNode::Pointer { element, .. }) => *element,
                        _ => ty,
                    };
                    (ParamShape::View { dims }, element)
                } else {
                    (ParamShape::Struct, ty)
                }
            }
            _ => (ParamShape::Scalar, ty),
        }
    }

    pub(crate) fn scan_atomics(&mut self) {
        for v in self.graph.value_ids() {
            let pointer = match &self.graph.value(v).op {
                OpCode::GenericAtomic { pointer, .. } | OpCode::AtomicCas { pointer, .. } => {
                    *pointer
                }
                _ => continue,
            };
            match self.trace_root(pointer) {
                Root::Param(i) => self.params[i].atomic = true,
                Root::Alloca(a) => {
                    self.atomic_allocas.insert(a);
                }
                Root::Unknown => {}
            }
        }
    }

    pub(crate) fn scan_subgroups(&mut self) {
        self.uses_subgroups = self.graph.value_ids().any(|v| {
            matches!(
                self.graph.value(v).op,
                OpCode::SubgroupBroadcast { .. }
                    | OpCode::SubgroupShuffle { .. }
                    | OpCode::LaneIndex
            )
        });
    }

    /// First pass of the two-pass scheme: find every value whose declaration
    /// must be lifted to method top. Phis always are; a statement value
    /// consumed by (or textually re-materialized in) a block other than its
    /// defining one is hoisted so declare-before-use holds on every path.
    pub(crate) fn discover_hoists(&mut self) {
        for v in self.graph.value_ids() {
            match &self.graph.value(v).op {
                OpCode::Phi { incoming } => {
                    self.hoisted.insert(v);
                    for (pred, inc) in incoming.clone() {
                        self.mark_use(inc, pred.0);
                    }
                }
                op => {
                    let block = self.graph.value(v).block.0;
                    for operand in op.operands() {
                        self.mark_use(operand, block);
                    }
                }
            }
        }
    }

    fn mark_use(&mut self, v: ValueId, user_block: u32) {
        if self.is_inline(v) {
            for operand in self.graph.value(v).op.operands() {
                self.mark_use(operand, user_block);
            }
            return;
        }
        if self.graph.value(v).block.0 != user_block {
            self.hoisted.insert(v);
        }
    }

    /// True for pure expression-valued opcodes that never get a statement of
    /// their own.
    pub(crate) fn is_inline(&self, v: ValueId) -> bool {
        match &self.graph.value(v).op {
            OpCode::Parameter { .. }
            | OpCode::PrimitiveConstant { .. }
            | OpCode::NullConstant
            | OpCode::Alloca { .. }
            | OpCode::GridIndex { .. }
            | OpCode::GroupIndex { .. }
            | OpCode::GroupDimension { .. }
            | OpCode::GridDimension { .. }
            | OpCode::WarpSize
            | OpCode::LaneIndex
            | OpCode::ElementAddress { .. }
            | OpCode::FieldAddress { .. }
            | OpCode::GetField { .. }
            | OpCode::NewView { .. }
            | OpCode::PointerCast { .. }
            | OpCode::AddressSpaceCast { .. }
            | OpCode::AlignTo { .. }
            | OpCode::AsAligned { .. } => true,
            // Pointer arithmetic stays an expression: WGSL forbids pointers
            // in `var` declarations, so it must never be hoisted.
            OpCode::BinaryArith { kind: BinaryKind::Add, lhs, .. } => {
                matches!(self.types.node(self.graph.value(*lhs).ty), TypeNode::Pointer { .. })
            }
            _ => false,
        }
    }

    // ---- operand resolution --------------------------------------------

    /// The WGSL expression for a value: its bound variable name, or the
    /// re-materialized inline expression.
    pub(crate) fn operand(&mut self, v: ValueId) -> Result<String> {
        if let Some(var) = self.vars.get(v) {
            return Ok(var.name.clone());
        }
        if let Some(expr) = self.exprs.get(&v) {
            return Ok(expr.clone());
        }
        if self.is_inline(v) {
            let expr = self.build_inline_expr(v)?;
            self.exprs.insert(v, expr.clone());
            return Ok(expr);
        }
        // Forward reference to a statement value: only legal for hoisted
        // names, which the prologue has already declared.
        let ty = self.wgsl_type_of(v);
        Ok(self.vars.load(v, ty).name)
    }

    fn trace_root(&self, v: ValueId) -> Root {
        match &self.graph.value(v).op {
            OpCode::Parameter { .. } => match self.param_by_value.get(&v) {
                Some(&i) => Root::Param(i),
                None => Root::Unknown,
            },
            OpCode::Alloca { .. } => Root::Alloca(v),
            OpCode::ElementAddress { source, .. }
            | OpCode::FieldAddress { source, .. }
            | OpCode::GetField { source, .. }
            | OpCode::NewView { source } => self.trace_root(*source),
            OpCode::PointerCast { operand }
            | OpCode::AddressSpaceCast { operand }
            | OpCode::AlignTo { operand, .. }
            | OpCode::AsAligned { operand, .. } => self.trace_root(*operand),
            _ => Root::Unknown,
        }
    }

    /// Follows only view-preserving links, so an address one level into the
    /// buffer does not count as the view itself.
    fn trace_view_param(&self, v: ValueId) -> Option<usize> {
        match &self.graph.value(v).op {
            OpCode::Parameter { .. } => {
                let &i = self.param_by_value.get(&v)?;
                matches!(self.params[i].shape, ParamShape::View { .. }).then_some(i)
            }
            OpCode::GetField { source, field: 0 } | OpCode::FieldAddress { source, field: 0 } => {
                self.trace_view_param(*source)
            }
            OpCode::NewView { source } => self.trace_view_param(*source),
            OpCode::PointerCast { operand }
            | OpCode::AddressSpaceCast { operand }
            | OpCode::AlignTo { operand, .. }
            | OpCode::AsAligned { operand, .. } => self.trace_view_param(*operand),
            _ => None,
        }
    }

    fn param_is_atomic(&self, ptr: ValueId) -> bool {
        match self.trace_root(ptr) {
            Root::Param(i) => self.params[i].atomic,
            Root::Alloca(a) => self.atomic_allocas.contains(&a),
            Root::Unknown => false,
        }
    }

    /// Resolve a pointer operand for Load/Store/atomics.
    pub(crate) fn address_repr(&mut self, ptr: ValueId) -> Result<AddressRepr> {
        if let Some(tl) = self.two_lane.get(&ptr) {
            return Ok(AddressRepr::TwoLane(tl.clone()));
        }
        if let OpCode::ElementAddress { source, index } = self.graph.value(ptr).op {
            if let Some(i) = self.trace_view_param(source) {
                if let Some(class) = self.params[i].emulated {
                    let tl = TwoLaneAddr {
                        buffer: self.params[i].buffer.clone(),
                        index: self.operand(index)?,
                        class,
                    };
                    self.two_lane.insert(ptr, tl.clone());
                    return Ok(AddressRepr::TwoLane(tl));
                }
            }
        }
        Ok(AddressRepr::Pointer(self.operand(ptr)?))
    }

    // ---- inline expressions --------------------------------------------

    fn build_inline_expr(&mut self, v: ValueId) -> Result<String> {
        let value = self.graph.value(v).clone();
        let expr = match &value.op {
            OpCode::PrimitiveConstant { bits } => self.constant_expr(value.ty, *bits),
            OpCode::NullConstant => {
                let ty = self.wgsl_type_of(v);
                format!("{ty}()")
            }
            OpCode::GridIndex { dim } => self.builtin_expr(v, format!("i32(group_id.{})", dim.suffix())),
            OpCode::GroupIndex { dim } => {
                self.builtin_expr(v, format!("i32(local_id.{})", dim.suffix()))
            }
            OpCode::GroupDimension { dim } => {
                self.builtin_expr(v, format!("i32(workgroup_size.{})", dim.suffix()))
            }
            OpCode::GridDimension { dim } => self.builtin_expr(
                v,
                format!("i32(num_groups.{d} * workgroup_size.{d})", d = dim.suffix()),
            ),
            OpCode::WarpSize => "32".to_string(),
            OpCode::LaneIndex => self.builtin_expr(v, "i32(subgroup_invocation_id)".to_string()),
            OpCode::ElementAddress { source, index } => {
                let idx = self.operand(*index)?;
                if let Some(i) = self.trace_view_param(*source) {
                    let buffer = self.params[i].buffer.clone();
                    if self.params[i].emulated.is_some() {
                        // Lane-0 pointer; real loads/stores go through the
                        // two-lane path in address_repr.
                        format!("&{buffer}[{idx} * 2]")
                    } else {
                        format!("&{buffer}[{idx}]")
                    }
                } else {
                    let src = self.operand(*source)?;
                    format!("&(*({src}))[{idx}]")
                }
            }
            OpCode::FieldAddress { source, field } => self.field_address_expr(*source, *field)?,
            OpCode::GetField { source, field } => self.get_field_expr(*source, *field)?,
            OpCode::NewView { source } => self.operand(*source)?,
            OpCode::PointerCast { operand }
            | OpCode::AddressSpaceCast { operand }
            | OpCode::AlignTo { operand, .. }
            | OpCode::AsAligned { operand, .. } => self.operand(*operand)?,
            OpCode::BinaryArith { kind: BinaryKind::Add, lhs, rhs } => {
                // Pointer-plus-integer (see is_inline).
                let a = self.operand(*lhs)?;
                let b = self.operand(*rhs)?;
                format!("&(*({a}))[{b}]")
            }
            OpCode::Parameter { .. } | OpCode::Alloca { .. } => {
                // Normally seeded by the prologue; reaching this path means
                // the method body refers to an unbound slot.
                self.diag(format!("unbound {} value in {}", value.op.name(), self.graph.name));
                let ty = self.wgsl_type_of(v);
                format!("{ty}()")
            }
            other => {
                self.diag(format!("non-inline opcode {} reached inline path", other.name()));
                let ty = self.wgsl_type_of(v);
                format!("{ty}()")
            }
        };
        Ok(expr)
    }

    /// Grid/group built-ins only exist in the kernel entry signature.
    fn builtin_expr(&mut self, v: ValueId, expr: String) -> String {
        if self.is_kernel {
            expr
        } else {
            self.diag(format!(
                "built-in value {} referenced inside helper function {}",
                self.graph.value(v).op.name(),
                self.graph.name
            ));
            "0".to_string()
        }
    }

    fn constant_expr(&mut self, ty: TypeId, bits: u64) -> String {
        match self.types.node(ty) {
            TypeNode::Primitive(p) => match p {
                Primitive::Bool => if bits != 0 { "true" } else { "false" }.to_string(),
                Primitive::I8 | Primitive::I16 | Primitive::I32 => {
                    format!("i32({})", bits as u32 as i32)
                }
                Primitive::U8 | Primitive::U16 | Primitive::U32 => {
                    format!("u32({}u)", bits as u32)
                }
                Primitive::F16 => {
                    let v = half::f16::from_bits(bits as u16).to_f32();
                    format!("f32({})", fmt_f32(v))
                }
                Primitive::F32 => format!("f32({})", fmt_f32(f32::from_bits(bits as u32))),
                Primitive::F64 => {
                    if self.options.enable_f64_emulation {
                        let (lo, hi) = emulation::constant_lanes(bits);
                        format!("f64_from_ieee754_bits({lo}u, {hi}u)")
                    } else {
                        format!("f32({})", fmt_f32(f64::from_bits(bits) as f32))
                    }
                }
                Primitive::I64 => {
                    if self.options.enable_i64_emulation {
                        let (lo, hi) = emulation::constant_lanes(bits);
                        format!("i64({lo}u, {hi}u)")
                    } else {
                        format!("i32({})", bits as u32 as i32)
                    }
                }
                Primitive::U64 => {
                    if self.options.enable_i64_emulation {
                        let (lo, hi) = emulation::constant_lanes(bits);
                        format!("u64({lo}u, {hi}u)")
                    } else {
                        format!("u32({}u)", bits as u32)
                    }
                }
            },
            TypeNode::Index { dims: 1 } => format!("i32({})", bits as u32 as i32),
            TypeNode::Index { dims } => {
                format!("vec{dims}<i32>({})", bits as u32 as i32)
            }
            _ => {
                let (name, diag) = self.mapper.map(self.types, ty, self.options);
                if let Some(note) = diag {
                    self.diag(note);
                }
                format!("{name}()")
            }
        }
    }

    fn field_address_expr(&mut self, source: ValueId, field: u32) -> Result<String> {
        if let Some(&i) = self.param_by_value.get(&source) {
            if self.params[i].shape == ParamShape::Struct {
                let src = self.operand(source)?;
                return Ok(format!("&((*({src})).field_{field})"));
            }
        }
        if let Some(i) = self.trace_view_param(source) {
            if field == 0 {
                return Ok(format!("&{}", self.params[i].buffer));
            }
            // Length/stride fields are plain integers; there is no address to
            // take, so fall back to the value itself.
            return self.get_field_expr(source, field);
        }
        let src_ty = self.graph.value(source).ty;
        let src = self.operand(source)?;
        match self.types.node(src_ty) {
            TypeNode::Pointer { .. } => Ok(format!("&((*({src})).field_{field})")),
            _ => {
                self.diag(format!(
                    "field address of a non-pointer value in {}",
                    self.graph.name
                ));
                Ok(src)
            }
        }
    }

    fn get_field_expr(&mut self, source: ValueId, field: u32) -> Result<String> {
        // Struct-shaped parameters bind a pointer alias (`&paramN[0]`), so
        // field reads go through a deref.
        if let Some(&i) = self.param_by_value.get(&source) {
            if self.params[i].shape == ParamShape::Struct {
                let src = self.operand(source)?;
                return Ok(format!("(*({src})).field_{field}"));
            }
        }
        // View wrapper parameters: field 0 is the storage pointer, the rest
        // are length/stride integers served from arrayLength or the stride
        // side-band.
        if let Some(i) = self.trace_view_param(source) {
            let info = &self.params[i];
            let buffer = info.buffer.clone();
            let dims = match info.shape {
                ParamShape::View { dims } => dims,
                _ => 1,
            };
            return Ok(match (dims, field) {
                (_, 0) => format!("&{buffer}"),
                (1, _) => format!("i32(arrayLength(&{buffer}))"),
                (2, 1) => format!("{buffer}_stride[0]"),
                (2, 2) => format!("{buffer}_stride[1]"),
                (2, _) => format!("{buffer}_stride[0]"),
                (_, 1) => format!("{buffer}_stride[0]"),
                (_, 2) => format!("{buffer}_stride[1]"),
                (_, 3) => format!("{buffer}_stride[2]"),
                (_, 4) => format!("{buffer}_stride[0]"),
                (_, _) => format!("{buffer}_stride[1]"),
            });
        }

        let src_ty = self.graph.value(source).ty;
        let src = self.operand(source)?;
        match self.types.node(src_ty) {
            TypeNode::Index { dims: 1 } => Ok(src),
            TypeNode::Index { .. } => {
                let suffix = ["x", "y", "z"].get(field as usize).copied().unwrap_or("x");
                Ok(format!("{src}.{suffix}"))
            }
            TypeNode::Pointer { .. } => Ok(format!("(*({src})).field_{field}")),
            TypeNode::Structure { .. } => Ok(format!("{src}.field_{field}")),
            _ => {
                self.diag(format!("get-field on unexpected type in {}", self.graph.name));
                Ok(src)
            }
        }
    }

    // ---- statement emission --------------------------------------------

    /// Bind the result of `v` to its variable: `let v_<n> = expr;` normally,
    /// a bare assignment when hoisted.
    pub(crate) fn assign(&mut self, w: &mut SourceWriter, v: ValueId, expr: String) {
        let ty = self.wgsl_type_of(v);
        let var = self.vars.load(v, ty);
        if self.hoisted.contains(&v) {
            w.line(format!("{} = {};", var.name, expr));
        } else {
            self.vars.mark_declared(&var.name);
            w.line(format!("let {} = {};", var.name, expr));
        }
    }

    /// Same as [`Self::assign`], but the binding must stay mutable
    /// (set-field targets, parameter copies).
    pub(crate) fn assign_mutable(&mut self, w: &mut SourceWriter, v: ValueId, expr: String) {
        let ty = self.wgsl_type_of(v);
        let var = self.vars.load(v, ty);
        if self.hoisted.contains(&v) {
            w.line(format!("{} = {};", var.name, expr));
        } else {
            self.vars.mark_declared(&var.name);
            w.line(format!("var {} = {};", var.name, expr));
        }
    }

    fn zero_value(&mut self, v: ValueId) -> String {
        let ty = self.wgsl_type_of(v);
        format!("{ty}()")
    }

    fn unhandled(&mut self, w: &mut SourceWriter, v: ValueId, what: &str) {
        w.line(format!("// Unhandled value: {what}"));
        self.diag(format!("unhandled {what} in {}", self.graph.name));
        if !matches!(self.types.node(self.graph.value(v).ty), TypeNode::Void) {
            let zero = self.zero_value(v);
            self.assign(w, v, zero);
        }
    }

    fn emulation_unsupported(
        &self,
        category: &'static str,
        opcode: impl Into<String>,
        v: ValueId,
    ) -> anyhow::Error {
        anyhow::Error::new(CodegenError::EmulationUnsupported {
            category,
            opcode: opcode.into(),
            method: self.graph.name.clone(),
            block: self.current_block.0,
            value: v.0,
        })
    }

    /// Emit the statement(s) for one non-terminator value. Inline values and
    /// phis produce nothing here.
    pub(crate) fn emit_value(&mut self, w: &mut SourceWriter, v: ValueId) -> Result<()> {
        if self.is_inline(v) {
            return Ok(());
        }
        let op = self.graph.value(v).op.clone();
        match op {
            OpCode::Phi { .. } => {}
            OpCode::BinaryArith { kind, lhs, rhs } => {
                let expr = self.binary_expr(v, kind, lhs, rhs)?;
                self.assign(w, v, expr);
            }
            OpCode::UnaryArith { kind, operand } => {
                let expr = self.unary_expr(v, kind, operand)?;
                self.assign(w, v, expr);
            }
            OpCode::TernaryArith { kind, a, b, c } => {
                let expr = self.ternary_expr(v, kind, a, b, c)?;
                self.assign(w, v, expr);
            }
            OpCode::Compare { kind, lhs, rhs } => {
                let expr = self.compare_expr(kind, lhs, rhs)?;
                self.assign(w, v, expr);
            }
            OpCode::Convert { operand } => {
                let expr = self.convert_expr(v, operand)?;
                self.assign(w, v, expr);
            }
            OpCode::FloatIntBitcast { operand } => {
                let ty = self.wgsl_type_of(v);
                let e = self.operand(operand)?;
                self.assign(w, v, format!("bitcast<{ty}>({e})"));
            }
            OpCode::Load { pointer } => self.emit_load(w, v, pointer)?,
            OpCode::Store { pointer, value } => self.emit_store(w, pointer, value)?,
            OpCode::StructureCreate { fields } => {
                let ty = self.wgsl_type_of(v);
                let args: Vec<String> =
                    fields.iter().map(|&f| self.operand(f)).collect::<Result<_>>()?;
                self.assign(w, v, format!("{ty}({})", args.iter().join(", ")));
            }
            OpCode::SetField { target, field, value } => {
                let mut src = self.operand(target)?;
                if let Some(&i) = self.param_by_value.get(&target) {
                    if self.params[i].shape == ParamShape::Struct {
                        src = format!("*({src})");
                    }
                }
                let val = self.operand(value)?;
                self.assign_mutable(w, v, src);
                let name = self.vars.get(v).expect("just bound").name.clone();
                w.line(format!("{name}.field_{field} = {val};"));
            }
            OpCode::GenericAtomic { kind, pointer, operand } => {
                let call = self.atomic_call(kind);
                let arg = self.operand(operand)?;
                match self.address_repr(pointer)? {
                    AddressRepr::Pointer(p) => {
                        self.assign(w, v, format!("{call}({p}, {arg})"));
                    }
                    AddressRepr::TwoLane(_) => {
                        return Err(self.emulation_unsupported("atomic", format!("{kind:?}"), v));
                    }
                }
            }
            OpCode::AtomicCas { pointer, compare, value } => {
                let cmp = self.operand(compare)?;
                let val = self.operand(value)?;
                match self.address_repr(pointer)? {
                    AddressRepr::Pointer(p) => {
                        self.assign(
                            w,
                            v,
                            format!("atomicCompareExchangeWeak({p}, {cmp}, {val}).old_value"),
                        );
                    }
                    AddressRepr::TwoLane(_) => {
                        return Err(self.emulation_unsupported("atomic", "CompareAndSwap", v));
                    }
                }
            }
            OpCode::WorkgroupBarrier => {
                w.line("workgroupBarrier();");
                w.line("storageBarrier();");
            }
            OpCode::MemoryBarrier => w.line("workgroupBarrier();"),
            OpCode::PredicateBarrier { .. } => w.line("workgroupBarrier();"),
            OpCode::SubgroupBroadcast { operand } => {
                let e = self.operand(operand)?;
                self.assign(w, v, format!("subgroupBroadcastFirst({e})"));
            }
            OpCode::SubgroupShuffle { operand, lane, .. } => {
                let e = self.operand(operand)?;
                let l = self.operand(lane)?;
                self.assign(w, v, format!("subgroupShuffle({e}, u32({l}))"));
            }
            OpCode::MethodCall { target, arguments } => {
                self.emit_call(w, v, &target, &arguments)?;
            }
            OpCode::RawEmit { text, operands } => {
                let mut line = text.clone();
                for (i, &operand) in operands.iter().enumerate() {
                    let e = self.operand(operand)?;
                    line = line.replace(&format!("{{{i}}}"), &e);
                }
                if matches!(self.types.node(self.graph.value(v).ty), TypeNode::Void) {
                    w.line(line);
                } else {
                    self.assign(w, v, line);
                }
            }
            OpCode::DebugAssert { condition } => {
                let e = self.operand(condition)?;
                w.line(format!("// debug assert elided: {e}"));
            }
            // Terminators are lowered by the control-flow driver.
            OpCode::Return { .. }
            | OpCode::Branch { .. }
            | OpCode::BranchIf { .. }
            | OpCode::BranchSwitch { .. }
            | OpCode::Throw => {}
            other => self.unhandled(w, v, other.name()),
        }
        Ok(())
    }

    // ---- expression builders -------------------------------------------

    fn atomic_call(&self, kind: AtomicKind) -> &'static str {
        match kind {
            AtomicKind::Add => "atomicAdd",
            AtomicKind::And => "atomicAnd",
            AtomicKind::Or => "atomicOr",
            AtomicKind::Xor => "atomicXor",
            AtomicKind::Max => "atomicMax",
            AtomicKind::Min => "atomicMin",
            AtomicKind::Exchange => "atomicExchange",
        }
    }

    fn binary_expr(
        &mut self,
        v: ValueId,
        kind: BinaryKind,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<String> {
        let lhs_ty = self.graph.value(lhs).ty;
        let a = self.operand(lhs)?;
        let b = self.operand(rhs)?;

        if let Some(class) = EmulatedClass::of(self.types, lhs_ty, self.options) {
            let Some(helper) = emulation::binary_helper(class, kind) else {
                return Err(self.emulation_unsupported("binary arithmetic", format!("{kind:?}"), v));
            };
            if matches!(kind, BinaryKind::Shl | BinaryKind::Shr) {
                let shift = self.shift_amount(rhs, &b);
                return Ok(format!("{helper}({a}, {shift})"));
            }
            return Ok(format!("{helper}({a}, {b})"));
        }

        let is_float = matches!(
            self.types.node(lhs_ty),
            TypeNode::Primitive(p) if p.is_float()
        );
        Ok(match kind {
            BinaryKind::Min => format!("min({a}, {b})"),
            BinaryKind::Max => format!("max({a}, {b})"),
            BinaryKind::Pow => {
                if is_float {
                    format!("pow({a}, {b})")
                } else {
                    // No integral pow in WGSL; degrade with a note.
                    self.diag(format!("integral pow degraded to float in {}", self.graph.name));
                    format!("i32(pow(f32({a}), f32({b})))")
                }
            }
            BinaryKind::Shl => format!("({a} << u32({b}))"),
            BinaryKind::Shr => format!("({a} >> u32({b}))"),
            BinaryKind::Rem if is_float => format!("({a} - {b} * trunc({a} / {b}))"),
            BinaryKind::Add => format!("({a} + {b})"),
            BinaryKind::Sub => format!("({a} - {b})"),
            BinaryKind::Mul => format!("({a} * {b})"),
            BinaryKind::Div => format!("({a} / {b})"),
            BinaryKind::Rem => format!("({a} % {b})"),
            BinaryKind::And => format!("({a} & {b})"),
            BinaryKind::Or => format!("({a} | {b})"),
            BinaryKind::Xor => format!("({a} ^ {b})"),
        })
    }

    /// Shift amounts are forced to `u32`; an emulated 64-bit amount
    /// contributes its low lane.
    fn shift_amount(&mut self, rhs: ValueId, expr: &str) -> String {
        let rhs_ty = self.graph.value(rhs).ty;
        if EmulatedClass::of(self.types, rhs_ty, self.options).is_some() {
            format!("({expr}).x")
        } else {
            format!("u32({expr})")
        }
    }

    fn unary_expr(&mut self, v: ValueId, kind: UnaryKind, operand: ValueId) -> Result<String> {
        let operand_ty = self.graph.value(operand).ty;
        let e = self.operand(operand)?;

        if let Some(class) = EmulatedClass::of(self.types, operand_ty, self.options) {
            let Some(helper) = emulation::unary_helper(class, kind) else {
                return Err(self.emulation_unsupported("unary arithmetic", format!("{kind:?}"), v));
            };
            return Ok(format!("{helper}({e})"));
        }

        let is_bool = matches!(self.types.node(operand_ty), TypeNode::Primitive(Primitive::Bool));
        Ok(match kind {
            UnaryKind::Neg => format!("(-{e})"),
            UnaryKind::Not if is_bool => format!("(!{e})"),
            UnaryKind::Not => format!("(~{e})"),
            UnaryKind::Rsqrt => format!("(1.0 / sqrt({e}))"),
            UnaryKind::Rcp => format!("(1.0 / {e})"),
            UnaryKind::IsNaN => format!("({e} != {e})"),
            UnaryKind::IsInf => format!("({e} != 0.0 && {e} == {e} * 2.0 && {e} == {e})"),
            UnaryKind::Abs => format!("abs({e})"),
            UnaryKind::Sin => format!("sin({e})"),
            UnaryKind::Cos => format!("cos({e})"),
            UnaryKind::Tan => format!("tan({e})"),
            UnaryKind::Asin => format!("asin({e})"),
            UnaryKind::Acos => format!("acos({e})"),
            UnaryKind::Atan => format!("atan({e})"),
            UnaryKind::Sinh => format!("sinh({e})"),
            UnaryKind::Cosh => format!("cosh({e})"),
            UnaryKind::Tanh => format!("tanh({e})"),
            UnaryKind::Exp => format!("exp({e})"),
            UnaryKind::Exp2 => format!("exp2({e})"),
            UnaryKind::Log => format!("log({e})"),
            UnaryKind::Log2 => format!("log2({e})"),
            UnaryKind::Sqrt => format!("sqrt({e})"),
            UnaryKind::Floor => format!("floor({e})"),
            UnaryKind::Ceil => format!("ceil({e})"),
        })
    }

    fn ternary_expr(
        &mut self,
        _v: ValueId,
        kind: TernaryKind,
        a: ValueId,
        b: ValueId,
        c: ValueId,
    ) -> Result<String> {
        let TernaryKind::MultiplyAdd = kind;
        let a_ty = self.graph.value(a).ty;
        let ea = self.operand(a)?;
        let eb = self.operand(b)?;
        let ec = self.operand(c)?;
        if let Some(class) = EmulatedClass::of(self.types, a_ty, self.options) {
            return Ok(match class {
                EmulatedClass::F64 => format!("f64_add(f64_mul({ea}, {eb}), {ec})"),
                EmulatedClass::I64 => format!("i64_add(i64_mul({ea}, {eb}), {ec})"),
                EmulatedClass::U64 => format!("i64_add(u64_mul({ea}, {eb}), {ec})"),
            });
        }
        let is_float = matches!(
            self.types.node(a_ty),
            TypeNode::Primitive(p) if p.is_float()
        );
        Ok(if is_float {
            format!("fma({ea}, {eb}, {ec})")
        } else {
            format!("({ea} * {eb} + {ec})")
        })
    }

    fn compare_expr(&mut self, kind: CompareKind, lhs: ValueId, rhs: ValueId) -> Result<String> {
        let lhs_ty = self.graph.value(lhs).ty;
        let rhs_ty = self.graph.value(rhs).ty;
        let a = self.operand(lhs)?;
        let b = self.operand(rhs)?;
        let op = match kind {
            CompareKind::Eq => "==",
            CompareKind::Ne => "!=",
            CompareKind::Lt => "<",
            CompareKind::Le => "<=",
            CompareKind::Gt => ">",
            CompareKind::Ge => ">=",
        };

        if let Some(class) = EmulatedClass::of(self.types, lhs_ty, self.options)
            .or_else(|| EmulatedClass::of(self.types, rhs_ty, self.options))
        {
            let helper = emulation::compare_helper(class, kind);
            return Ok(format!("{helper}({a}, {b})"));
        }

        // Vector-vs-scalar: splat the scalar and reduce with all().
        let lhs_dims = self.index_dims(lhs_ty);
        let rhs_dims = self.index_dims(rhs_ty);
        Ok(match (lhs_dims, rhs_dims) {
            (Some(d), None) if d > 1 => {
                format!("all({a} {op} vec{d}<i32>({b}))")
            }
            (None, Some(d)) if d > 1 => {
                format!("all(vec{d}<i32>({a}) {op} {b})")
            }
            (Some(d), Some(1)) if d > 1 => {
                format!("all({a} {op} vec{d}<i32>({b}))")
            }
            (Some(1), Some(d)) if d > 1 => {
                format!("all(vec{d}<i32>({a}) {op} {b})")
            }
            (Some(d), Some(e)) if d > 1 && e > 1 => {
                format!("all({a} {op} {b})")
            }
            _ => format!("({a} {op} {b})"),
        })
    }

    fn index_dims(&self, ty: TypeId) -> Option<u8> {
        match self.types.node(ty) {
            TypeNode::Index { dims } => Some(*dims),
            _ => None,
        }
    }

    fn convert_expr(&mut self, v: ValueId, operand: ValueId) -> Result<String> {
        let src_ty = self.graph.value(operand).ty;
        let dst_ty = self.graph.value(v).ty;
        let mut e = self.operand(operand)?;

        // Vector source, scalar target: extract the first lane first.
        if self.index_dims(src_ty).is_some_and(|d| d > 1)
            && !self.index_dims(dst_ty).is_some_and(|d| d > 1)
        {
            e = format!("({e}).x");
        }

        let src_class = EmulatedClass::of(self.types, src_ty, self.options);
        let dst_class = EmulatedClass::of(self.types, dst_ty, self.options);

        match (src_class, dst_class) {
            (None, None) => {
                let ty = self.wgsl_type_of(v);
                Ok(format!("{ty}({e})"))
            }
            (None, Some(EmulatedClass::F64)) => Ok(format!("f64_from_f32(f32({e}))")),
            (None, Some(EmulatedClass::I64)) => {
                let unsigned = matches!(
                    self.types.node(src_ty),
                    TypeNode::Primitive(p) if p.is_unsigned()
                );
                Ok(if unsigned {
                    format!("i64_from_u32({e})")
                } else {
                    format!("i64_from_i32(i32({e}))")
                })
            }
            (None, Some(EmulatedClass::U64)) => Ok(format!("u64_from_u32(u32({e}))")),
            (Some(EmulatedClass::F64), None) => {
                let dst = self.wgsl_type_of(v);
                Ok(if dst == "f32" {
                    format!("f64_to_f32({e})")
                } else {
                    format!("{dst}(f64_to_f32({e}))")
                })
            }
            (Some(EmulatedClass::I64), None) => {
                let dst = self.wgsl_type_of(v);
                Ok(match dst.as_str() {
                    "i32" => format!("i64_to_i32({e})"),
                    "u32" => format!("({e}).x"),
                    "f32" => format!("i64_to_f32({e})"),
                    _ => format!("{dst}(i64_to_i32({e}))"),
                })
            }
            (Some(EmulatedClass::U64), None) => {
                let dst = self.wgsl_type_of(v);
                Ok(match dst.as_str() {
                    "u32" => format!("({e}).x"),
                    "i32" => format!("i32(({e}).x)"),
                    "f32" => format!("u64_to_f32({e})"),
                    _ => format!("{dst}(({e}).x)"),
                })
            }
            (Some(EmulatedClass::F64), Some(EmulatedClass::F64)) => Ok(e),
            (Some(EmulatedClass::I64 | EmulatedClass::U64), Some(EmulatedClass::I64 | EmulatedClass::U64)) => {
                Ok(e)
            }
            (Some(EmulatedClass::F64), Some(_)) => {
                Ok(format!("i64_from_i32(i32(f64_to_f32({e})))"))
            }
            (Some(_), Some(EmulatedClass::F64)) => Ok(format!("f64_from_f32(i64_to_f32({e}))")),
        }
    }

    fn emit_load(&mut self, w: &mut SourceWriter, v: ValueId, pointer: ValueId) -> Result<()> {
        match self.address_repr(pointer)? {
            AddressRepr::TwoLane(tl) => {
                let TwoLaneAddr { buffer, index, class } = tl;
                let expr = match class {
                    EmulatedClass::F64 => format!(
                        "f64_from_ieee754_bits({buffer}[{index} * 2], {buffer}[{index} * 2 + 1])"
                    ),
                    EmulatedClass::I64 => {
                        format!("i64({buffer}[{index} * 2], {buffer}[{index} * 2 + 1])")
                    }
                    EmulatedClass::U64 => {
                        format!("u64({buffer}[{index} * 2], {buffer}[{index} * 2 + 1])")
                    }
                };
                self.assign(w, v, expr);
            }
            AddressRepr::Pointer(p) => {
                if self.param_is_atomic(pointer) {
                    self.assign(w, v, format!("atomicLoad({p})"));
                    return Ok(());
                }
                let result_ty = self.wgsl_type_of(v);
                let pointee = self.pointee_wgsl(pointer);
                let expr = match pointee {
                    Some(pt) if pt != result_ty => format!("bitcast<{result_ty}>(*({p}))"),
                    _ => format!("*({p})"),
                };
                self.assign(w, v, expr);
            }
        }
        Ok(())
    }

    fn pointee_wgsl(&mut self, pointer: ValueId) -> Option<String> {
        let ty = self.graph.value(pointer).ty;
        match self.types.node(ty) {
            TypeNode::Pointer { element, .. } => {
                let element = *element;
                let (name, diag) = self.mapper.map(self.types, element, self.options);
                if let Some(note) = diag {
                    self.diag(note);
                }
                Some(name)
            }
            _ => None,
        }
    }

    fn emit_store(&mut self, w: &mut SourceWriter, pointer: ValueId, value: ValueId) -> Result<()> {
        let val = self.operand(value)?;
        match self.address_repr(pointer)? {
            AddressRepr::TwoLane(tl) => {
                let TwoLaneAddr { buffer, index, class } = tl;
                match class {
                    EmulatedClass::F64 => {
                        let tmp = self.vars.fresh("vec2<u32>".to_string());
                        w.line(format!("let {} = f64_to_ieee754_bits({val});", tmp.name));
                        w.line(format!("{buffer}[{index} * 2] = {}.x;", tmp.name));
                        w.line(format!("{buffer}[{index} * 2 + 1] = {}.y;", tmp.name));
                    }
                    EmulatedClass::I64 | EmulatedClass::U64 => {
                        w.line(format!("{buffer}[{index} * 2] = ({val}).x;"));
                        w.line(format!("{buffer}[{index} * 2 + 1] = ({val}).y;"));
                    }
                }
            }
            AddressRepr::Pointer(p) => {
                if self.param_is_atomic(pointer) {
                    w.line(format!("atomicStore({p}, {val});"));
                } else {
                    w.line(format!("*({p}) = {val};"));
                }
            }
        }
        Ok(())
    }

    fn emit_call(
        &mut self,
        w: &mut SourceWriter,
        v: ValueId,
        target: &crate::ir::MethodRef,
        arguments: &[ValueId],
    ) -> Result<()> {
        let args: Vec<String> =
            arguments.iter().map(|&a| self.operand(a)).collect::<Result<_>>()?;
        let emulated_arg = arguments
            .iter()
            .find_map(|&a| EmulatedClass::of(self.types, self.graph.value(a).ty, self.options));

        if target.kind != MethodKind::Device {
            if let Some(routed) = intrinsics::route(&target.name) {
                let expr = self.routed_expr(v, routed, target, &args, emulated_arg)?;
                self.assign(w, v, expr);
                return Ok(());
            }
            // Fall through to the heuristic method-call path.
            if let Some(builtin) = intrinsics::heuristic(&target.name) {
                if emulated_arg.is_some() {
                    return Err(self.emulation_unsupported("intrinsic", target.name.clone(), v));
                }
                self.assign(w, v, format!("{builtin}({})", args.iter().join(", ")));
                return Ok(());
            }
            self.unhandled(w, v, &format!("call to {}", target.name));
            return Ok(());
        }

        let callee = format!("{}_{}", sanitize_wgsl_ident(&target.name), target.id);
        let call = format!("{callee}({})", args.iter().join(", "));
        if matches!(self.types.node(self.graph.value(v).ty), TypeNode::Void) {
            w.line(format!("{call};"));
        } else {
            self.assign(w, v, call);
        }
        Ok(())
    }

    fn routed_expr(
        &mut self,
        v: ValueId,
        routed: Intrinsic,
        target: &crate::ir::MethodRef,
        args: &[String],
        emulated_arg: Option<EmulatedClass>,
    ) -> Result<String> {
        if let Some(class) = emulated_arg {
            // Only the catalog's min/max/abs survive on emulated operands;
            // 64-bit transcendentals are a hard error.
            let helper = match routed {
                Intrinsic::Direct("min") => emulation::binary_helper(class, BinaryKind::Min),
                Intrinsic::Direct("max") => emulation::binary_helper(class, BinaryKind::Max),
                Intrinsic::Direct("abs") => emulation::unary_helper(class, UnaryKind::Abs),
                _ => None,
            };
            let Some(helper) = helper else {
                return Err(self.emulation_unsupported("intrinsic", target.name.clone(), v));
            };
            return Ok(format!("{helper}({})", args.iter().join(", ")));
        }

        Ok(match routed {
            Intrinsic::Direct(name) => format!("{name}({})", args.iter().join(", ")),
            Intrinsic::Sign => {
                let ty = self.wgsl_type_of(v);
                if ty == "i32" {
                    format!("i32(sign({}))", args[0])
                } else {
                    format!("sign({})", args[0])
                }
            }
            Intrinsic::Rsqrt => format!("(1.0 / sqrt({}))", args[0]),
            Intrinsic::Rcp => format!("(1.0 / {})", args[0]),
        })
    }
}
