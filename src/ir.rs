//! Input IR data model: typed SSA values, basic blocks, and method graphs.
//!
//! The IR is produced by an upstream front-end; this crate only consumes it.
//! Values live in a per-method arena and are addressed by integer handles, so
//! the use-def graph (including phi cycles) needs no reference counting.

use std::collections::HashMap;

/// Handle into a [`TypeTable`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(pub u32);

/// Handle into a method's value arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Handle into a method's block list. The index is the block's ordinal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// Address space of a pointer or allocation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    /// Device-global storage buffer memory.
    Global,
    /// Workgroup-shared memory.
    Shared,
    /// Function-local memory.
    Local,
}

/// Primitive scalar types the IR can express.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Primitive {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F16,
    F32,
    F64,
}

impl Primitive {
    pub fn is_signed(self) -> bool {
        matches!(self, Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, Self::U8 | Self::U16 | Self::U32 | Self::U64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    pub fn bit_width(self) -> u32 {
        match self {
            Self::Bool => 1,
            Self::I8 | Self::U8 => 8,
            Self::I16 | Self::U16 | Self::F16 => 16,
            Self::I32 | Self::U32 | Self::F32 => 32,
            Self::I64 | Self::U64 | Self::F64 => 64,
        }
    }
}

/// One node in the IR type graph.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeNode {
    Void,
    Primitive(Primitive),
    /// Kernel index types: 1D is a scalar, 2D/3D are integer vectors.
    Index { dims: u8 },
    Pointer { element: TypeId, space: AddressSpace },
    /// A bounded, typed reference into a storage buffer.
    View { element: TypeId, dims: u8 },
    Structure { name: Option<String>, fields: Vec<TypeId> },
}

/// Interning table for IR types. Shared by every method of a compilation.
#[derive(Default, Debug)]
pub struct TypeTable {
    nodes: Vec<TypeNode>,
    interned: HashMap<TypeNode, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, node: TypeNode) -> TypeId {
        if let Some(&id) = self.interned.get(&node) {
            return id;
        }
        let id = TypeId(self.nodes.len() as u32);
        self.interned.insert(node.clone(), id);
        self.nodes.push(node);
        id
    }

    pub fn node(&self, id: TypeId) -> &TypeNode {
        &self.nodes[id.0 as usize]
    }

    pub fn void(&mut self) -> TypeId {
        self.intern(TypeNode::Void)
    }

    pub fn primitive(&mut self, p: Primitive) -> TypeId {
        self.intern(TypeNode::Primitive(p))
    }

    pub fn index(&mut self, dims: u8) -> TypeId {
        self.intern(TypeNode::Index { dims })
    }

    pub fn pointer(&mut self, element: TypeId, space: AddressSpace) -> TypeId {
        self.intern(TypeNode::Pointer { element, space })
    }

    pub fn view(&mut self, element: TypeId, dims: u8) -> TypeId {
        self.intern(TypeNode::View { element, dims })
    }

    pub fn structure(&mut self, name: Option<String>, fields: Vec<TypeId>) -> TypeId {
        self.intern(TypeNode::Structure { name, fields })
    }

    /// True when the type spells a 64-bit scalar (`i64`, `u64`, or `f64`).
    pub fn is_64_bit(&self, id: TypeId) -> bool {
        matches!(
            self.node(id),
            TypeNode::Primitive(Primitive::I64 | Primitive::U64 | Primitive::F64)
        )
    }
}

/// Binary arithmetic sub-kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryKind {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Min,
    Max,
    Pow,
}

/// Unary arithmetic sub-kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryKind {
    Neg,
    Not,
    Abs,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Exp,
    Exp2,
    Log,
    Log2,
    Sqrt,
    Rsqrt,
    Rcp,
    Floor,
    Ceil,
    IsNaN,
    IsInf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TernaryKind {
    MultiplyAdd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareKind {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AtomicKind {
    Add,
    And,
    Or,
    Xor,
    Max,
    Min,
    Exchange,
}

/// Subgroup shuffle addressing variants. All lower to `subgroupShuffle`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShuffleKind {
    Direct,
    Up,
    Down,
    Xor,
}

/// Component selector for grid/group built-ins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dim3 {
    X,
    Y,
    Z,
}

impl Dim3 {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::X => "x",
            Self::Y => "y",
            Self::Z => "z",
        }
    }
}

/// How a referenced method participates in code generation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodKind {
    /// Regular device function; gets a WGSL `fn` of its own.
    Device,
    /// Provided by the target or the runtime; never emitted.
    External,
    /// Known math intrinsic; routed to a WGSL built-in call.
    Intrinsic,
}

/// Identity of a called method, carried inline on the call site.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodRef {
    pub id: u32,
    pub name: String,
    pub kind: MethodKind,
}

/// The closed set of SSA opcodes.
#[derive(Clone, Debug, PartialEq)]
pub enum OpCode {
    Parameter { index: u32 },
    PrimitiveConstant { bits: u64 },
    NullConstant,
    BinaryArith { kind: BinaryKind, lhs: ValueId, rhs: ValueId },
    UnaryArith { kind: UnaryKind, operand: ValueId },
    TernaryArith { kind: TernaryKind, a: ValueId, b: ValueId, c: ValueId },
    Compare { kind: CompareKind, lhs: ValueId, rhs: ValueId },
    /// Conversion to the value's own result type.
    Convert { operand: ValueId },
    Load { pointer: ValueId },
    Store { pointer: ValueId, value: ValueId },
    ElementAddress { source: ValueId, index: ValueId },
    FieldAddress { source: ValueId, field: u32 },
    GetField { source: ValueId, field: u32 },
    SetField { target: ValueId, field: u32, value: ValueId },
    StructureCreate { fields: Vec<ValueId> },
    Alloca { element: TypeId, count: u32, space: AddressSpace },
    /// Wraps a pointer into a view value.
    NewView { source: ValueId },
    Phi { incoming: Vec<(BlockId, ValueId)> },
    GridIndex { dim: Dim3 },
    GroupIndex { dim: Dim3 },
    GroupDimension { dim: Dim3 },
    GridDimension { dim: Dim3 },
    WarpSize,
    LaneIndex,
    Return { value: Option<ValueId> },
    Branch { target: BlockId },
    BranchIf { condition: ValueId, true_target: BlockId, false_target: BlockId },
    BranchSwitch { selector: ValueId, cases: Vec<(i64, BlockId)>, default: BlockId },
    PointerCast { operand: ValueId },
    AddressSpaceCast { operand: ValueId },
    FloatIntBitcast { operand: ValueId },
    GenericAtomic { kind: AtomicKind, pointer: ValueId, operand: ValueId },
    AtomicCas { pointer: ValueId, compare: ValueId, value: ValueId },
    MemoryBarrier,
    WorkgroupBarrier,
    PredicateBarrier { predicate: ValueId },
    SubgroupBroadcast { operand: ValueId },
    SubgroupShuffle { kind: ShuffleKind, operand: ValueId, lane: ValueId },
    MethodCall { target: MethodRef, arguments: Vec<ValueId> },
    /// Escape hatch: literal WGSL with `{n}` operand placeholders.
    RawEmit { text: String, operands: Vec<ValueId> },
    AlignTo { operand: ValueId, alignment: u32 },
    AsAligned { operand: ValueId, alignment: u32 },
    DebugAssert { condition: ValueId },
    /// Throw-like value from the source language. Not modeled; lowering is
    /// best-effort (diagnostic comment, terminal transition).
    Throw,
}

impl OpCode {
    /// A short display name used in diagnostics and `// Unhandled` comments.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Parameter { .. } => "Parameter",
            Self::PrimitiveConstant { .. } => "PrimitiveConstant",
            Self::NullConstant => "NullConstant",
            Self::BinaryArith { .. } => "BinaryArith",
            Self::UnaryArith { .. } => "UnaryArith",
            Self::TernaryArith { .. } => "TernaryArith",
            Self::Compare { .. } => "Compare",
            Self::Convert { .. } => "Convert",
            Self::Load { .. } => "Load",
            Self::Store { .. } => "Store",
            Self::ElementAddress { .. } => "ElementAddress",
            Self::FieldAddress { .. } => "FieldAddress",
            Self::GetField { .. } => "GetField",
            Self::SetField { .. } => "SetField",
            Self::StructureCreate { .. } => "StructureCreate",
            Self::Alloca { .. } => "Alloca",
            Self::NewView { .. } => "NewView",
            Self::Phi { .. } => "Phi",
            Self::GridIndex { .. } => "GridIndex",
            Self::GroupIndex { .. } => "GroupIndex",
            Self::GroupDimension { .. } => "GroupDimension",
            Self::GridDimension { .. } => "GridDimension",
            Self::WarpSize => "WarpSize",
            Self::LaneIndex => "LaneIndex",
            Self::Return { .. } => "Return",
            Self::Branch { .. } => "Branch",
            Self::BranchIf { .. } => "BranchIf",
            Self::BranchSwitch { .. } => "BranchSwitch",
            Self::PointerCast { .. } => "PointerCast",
            Self::AddressSpaceCast { .. } => "AddressSpaceCast",
            Self::FloatIntBitcast { .. } => "FloatIntBitcast",
            Self::GenericAtomic { .. } => "GenericAtomic",
            Self::AtomicCas { .. } => "AtomicCas",
            Self::MemoryBarrier => "MemoryBarrier",
            Self::WorkgroupBarrier => "WorkgroupBarrier",
            Self::PredicateBarrier { .. } => "PredicateBarrier",
            Self::SubgroupBroadcast { .. } => "SubgroupBroadcast",
            Self::SubgroupShuffle { .. } => "SubgroupShuffle",
            Self::MethodCall { .. } => "MethodCall",
            Self::RawEmit { .. } => "RawEmit",
            Self::AlignTo { .. } => "AlignTo",
            Self::AsAligned { .. } => "AsAligned",
            Self::DebugAssert { .. } => "DebugAssert",
            Self::Throw => "Throw",
        }
    }

    /// Value operands, in evaluation order.
    pub fn operands(&self) -> Vec<ValueId> {
        match self {
            Self::Parameter { .. }
            | Self::PrimitiveConstant { .. }
            | Self::NullConstant
            | Self::Alloca { .. }
            | Self::GridIndex { .. }
            | Self::GroupIndex { .. }
            | Self::GroupDimension { .. }
            | Self::GridDimension { .. }
            | Self::WarpSize
            | Self::LaneIndex
            | Self::MemoryBarrier
            | Self::WorkgroupBarrier
            | Self::Branch { .. }
            | Self::Throw => Vec::new(),
            Self::BinaryArith { lhs, rhs, .. } | Self::Compare { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Self::UnaryArith { operand, .. }
            | Self::Convert { operand }
            | Self::NewView { source: operand }
            | Self::PointerCast { operand }
            | Self::AddressSpaceCast { operand }
            | Self::FloatIntBitcast { operand }
            | Self::SubgroupBroadcast { operand }
            | Self::AlignTo { operand, .. }
            | Self::AsAligned { operand, .. } => vec![*operand],
            Self::TernaryArith { a, b, c, .. } => vec![*a, *b, *c],
            Self::Load { pointer } => vec![*pointer],
            Self::Store { pointer, value } => vec![*pointer, *value],
            Self::ElementAddress { source, index } => vec![*source, *index],
            Self::FieldAddress { source, .. } | Self::GetField { source, .. } => vec![*source],
            Self::SetField { target, value, .. } => vec![*target, *value],
            Self::StructureCreate { fields } => fields.clone(),
            Self::Phi { incoming } => incoming.iter().map(|(_, v)| *v).collect(),
            Self::Return { value } => value.iter().copied().collect(),
            Self::BranchIf { condition, .. } => vec![*condition],
            Self::BranchSwitch { selector, .. } => vec![*selector],
            Self::GenericAtomic { pointer, operand, .. } => vec![*pointer, *operand],
            Self::AtomicCas { pointer, compare, value } => vec![*pointer, *compare, *value],
            Self::PredicateBarrier { predicate } => vec![*predicate],
            Self::SubgroupShuffle { operand, lane, .. } => vec![*operand, *lane],
            Self::MethodCall { arguments, .. } => arguments.clone(),
            Self::RawEmit { operands, .. } => operands.clone(),
            Self::DebugAssert { condition } => vec![*condition],
        }
    }

    /// True for opcodes that end a basic block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Return { .. } | Self::Branch { .. } | Self::BranchIf { .. } | Self::BranchSwitch { .. }
        )
    }
}

/// One SSA value: a typed result plus the opcode that produces it.
#[derive(Clone, Debug)]
pub struct Value {
    pub ty: TypeId,
    pub op: OpCode,
    /// The block this value is defined in.
    pub block: BlockId,
}

/// Ordered sequence of values ending in one terminator.
#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
    pub values: Vec<ValueId>,
}

impl BasicBlock {
    pub fn terminator(&self) -> Option<ValueId> {
        self.values.last().copied()
    }
}

/// A method: the value arena, its blocks, and its parameter list.
#[derive(Clone, Debug)]
pub struct MethodGraph {
    pub id: u32,
    pub name: String,
    pub kind: MethodKind,
    pub return_type: TypeId,
    values: Vec<Value>,
    blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    /// Parameter values in positional order.
    pub params: Vec<ValueId>,
}

impl MethodGraph {
    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.0 as usize]
    }

    /// Rewrite a phi's incoming list. Front-ends create the phi before its
    /// predecessor blocks exist, then patch the edges in.
    pub fn set_phi_incoming(&mut self, phi: ValueId, incoming: Vec<(BlockId, ValueId)>) {
        let value = &mut self.values[phi.0 as usize];
        debug_assert!(matches!(value.op, OpCode::Phi { .. }));
        value.op = OpCode::Phi { incoming };
    }

    pub fn block(&self, id: BlockId) -> &BasicBlock {
        &self.blocks[id.0 as usize]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> + '_ {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    pub fn value_ids(&self) -> impl Iterator<Item = ValueId> + '_ {
        (0..self.values.len() as u32).map(ValueId)
    }

    /// Successor blocks of `id`, in terminator order.
    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        let Some(term) = self.block(id).terminator() else {
            return Vec::new();
        };
        match &self.value(term).op {
            OpCode::Branch { target } => vec![*target],
            OpCode::BranchIf { true_target, false_target, .. } => {
                vec![*true_target, *false_target]
            }
            OpCode::BranchSwitch { cases, default, .. } => {
                let mut out: Vec<BlockId> = cases.iter().map(|(_, b)| *b).collect();
                out.push(*default);
                out
            }
            _ => Vec::new(),
        }
    }
}

/// Kernel index dimensionality of an entry point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IndexKind {
    #[default]
    None,
    Index1D,
    Index2D,
    Index3D,
}

impl IndexKind {
    pub fn dims(self) -> u8 {
        match self {
            Self::None => 0,
            Self::Index1D => 1,
            Self::Index2D => 2,
            Self::Index3D => 3,
        }
    }
}

/// Entry-point descriptor handed in alongside the kernel method.
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelDescriptor {
    pub index_kind: IndexKind,
}

/// A statically sized workgroup-shared allocation.
#[derive(Clone, Copy, Debug)]
pub struct SharedAllocSpec {
    pub element: TypeId,
    pub count: u32,
}

/// A dynamically sized workgroup-shared allocation. WGSL has no runtime-sized
/// workgroup arrays, so the declared maximum becomes the emitted capacity.
#[derive(Clone, Copy, Debug)]
pub struct DynamicSharedAllocSpec {
    pub element: TypeId,
    pub max_count: u32,
}

/// Incremental construction of a [`MethodGraph`].
///
/// Used by front-ends and by every test in this crate. Blocks are created up
/// front or on demand; values are appended to the current block.
pub struct MethodBuilder {
    id: u32,
    name: String,
    kind: MethodKind,
    return_type: TypeId,
    values: Vec<Value>,
    blocks: Vec<BasicBlock>,
    params: Vec<ValueId>,
    current: BlockId,
}

impl MethodBuilder {
    pub fn new(name: impl Into<String>, id: u32, return_type: TypeId) -> Self {
        Self {
            id,
            name: name.into(),
            kind: MethodKind::Device,
            return_type,
            values: Vec::new(),
            blocks: vec![BasicBlock::default()],
            params: Vec::new(),
            current: BlockId(0),
        }
    }

    pub fn with_kind(mut self, kind: MethodKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    /// Create a new (empty) block without switching to it.
    pub fn block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(BasicBlock::default());
        id
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Append a value to the current block.
    pub fn push(&mut self, ty: TypeId, op: OpCode) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value { ty, op, block: self.current });
        self.blocks[self.current.0 as usize].values.push(id);
        id
    }

    /// Declare the next positional parameter.
    pub fn parameter(&mut self, ty: TypeId) -> ValueId {
        let index = self.params.len() as u32;
        let id = self.push(ty, OpCode::Parameter { index });
        self.params.push(id);
        id
    }

    pub fn const_bits(&mut self, ty: TypeId, bits: u64) -> ValueId {
        self.push(ty, OpCode::PrimitiveConstant { bits })
    }

    pub fn const_i32(&mut self, ty: TypeId, v: i32) -> ValueId {
        self.const_bits(ty, v as u32 as u64)
    }

    pub fn const_f32(&mut self, ty: TypeId, v: f32) -> ValueId {
        self.const_bits(ty, v.to_bits() as u64)
    }

    pub fn const_f64(&mut self, ty: TypeId, v: f64) -> ValueId {
        self.const_bits(ty, v.to_bits())
    }

    pub fn binary(&mut self, ty: TypeId, kind: BinaryKind, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.push(ty, OpCode::BinaryArith { kind, lhs, rhs })
    }

    pub fn ret(&mut self, value: Option<ValueId>) -> ValueId {
        let ty = self.return_type;
        self.push(ty, OpCode::Return { value })
    }

    pub fn branch(&mut self, void: TypeId, target: BlockId) -> ValueId {
        self.push(void, OpCode::Branch { target })
    }

    pub fn branch_if(
        &mut self,
        void: TypeId,
        condition: ValueId,
        true_target: BlockId,
        false_target: BlockId,
    ) -> ValueId {
        self.push(void, OpCode::BranchIf { condition, true_target, false_target })
    }

    pub fn finish(self) -> MethodGraph {
        MethodGraph {
            id: self.id,
            name: self.name,
            kind: self.kind,
            return_type: self.return_type,
            values: self.values,
            blocks: self.blocks,
            entry: BlockId(0),
            params: self.params,
        }
    }
}
