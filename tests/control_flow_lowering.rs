//! Structured vs state-machine lowering shape, phi hoisting, and the textual
//! declare-before-use / name-uniqueness properties.

use std::collections::HashSet;

use wgsl_kernel_backend::{
    AddressSpace, CodegenOptions, IndexKind, KernelDescriptor, MethodBuilder, MethodGraph,
    Primitive, TypeTable, WgslBackend,
    ir::{BinaryKind, CompareKind, OpCode},
};

fn compile(types: &TypeTable, graph: &MethodGraph, index_kind: IndexKind) -> String {
    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(types, graph, &KernelDescriptor { index_kind }, &[], &[])
        .expect("compile");
    naga::front::wgsl::parse_str(&bundle.module).unwrap_or_else(|e| {
        panic!("WGSL parse failed: {e:?}\n{}", bundle.module);
    });
    bundle.module
}

/// All `v_<n>` identifiers on a line, left to right.
fn extract_idents(line: &str) -> Vec<String> {
    let bytes = line.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        let boundary = i == 0 || !(bytes[i - 1].is_ascii_alphanumeric() || bytes[i - 1] == b'_');
        if boundary && bytes[i] == b'v' && bytes[i + 1] == b'_' {
            let mut j = i + 2;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 2 {
                out.push(line[i..j].to_string());
                i = j;
                continue;
            }
        }
        i += 1;
    }
    out
}

/// Every `v_<n>` used in an expression must have a textual declaration (a
/// `let`, a `var`, or a hoisted `var` at method top) on an earlier line.
fn check_declare_before_use(module: &str) {
    let mut declared: HashSet<String> = HashSet::new();
    for (line_no, line) in module.lines().enumerate() {
        let trimmed = line.trim_start();
        for ident in extract_idents(trimmed) {
            let declares = trimmed.starts_with(&format!("let {ident} ="))
                || trimmed.starts_with(&format!("var {ident} ="))
                || trimmed.starts_with(&format!("var {ident} :"))
                || trimmed.starts_with(&format!("var<workgroup> {ident} :"));
            if declares {
                declared.insert(ident);
            } else {
                assert!(
                    declared.contains(&ident),
                    "line {}: `{ident}` used before declaration:\n{module}",
                    line_no + 1
                );
            }
        }
    }
}

/// No `v_<n>` may be declared twice.
fn check_unique_declarations(module: &str) {
    let mut declared: HashSet<String> = HashSet::new();
    for line in module.lines() {
        let trimmed = line.trim_start();
        for ident in extract_idents(trimmed) {
            let declares = trimmed.starts_with(&format!("let {ident} ="))
                || trimmed.starts_with(&format!("var {ident} ="))
                || trimmed.starts_with(&format!("var {ident} :"))
                || trimmed.starts_with(&format!("var<workgroup> {ident} :"));
            if declares {
                assert!(declared.insert(ident.clone()), "`{ident}` declared twice:\n{module}");
            }
        }
    }
}

/// entry --(cond)--> then / else --> merge(phi) --> return
fn diamond_with_phi(types: &mut TypeTable) -> MethodGraph {
    let void = types.void();
    let bool_t = types.primitive(Primitive::Bool);
    let i32_t = types.primitive(Primitive::I32);

    let mut b = MethodBuilder::new("pick", 0, void);
    let one = b.const_i32(i32_t, 1);
    let two = b.const_i32(i32_t, 2);
    let cond = b.push(bool_t, OpCode::Compare { kind: CompareKind::Lt, lhs: one, rhs: two });
    let then_b = b.block();
    let else_b = b.block();
    let merge = b.block();
    b.branch_if(void, cond, then_b, else_b);

    b.switch_to(then_b);
    let ten = b.const_i32(i32_t, 10);
    b.branch(void, merge);

    b.switch_to(else_b);
    let twenty = b.const_i32(i32_t, 20);
    b.branch(void, merge);

    b.switch_to(merge);
    let phi = b.push(i32_t, OpCode::Phi { incoming: vec![] });
    // Keep the phi alive.
    let _use = b.binary(i32_t, BinaryKind::Add, phi, phi);
    b.ret(None);

    let mut graph = b.finish();
    graph.set_phi_incoming(phi, vec![(then_b, ten), (else_b, twenty)]);
    graph
}

#[test]
fn acyclic_graphs_lower_structured_with_phi_assignments_in_both_arms() {
    let mut types = TypeTable::new();
    let graph = diamond_with_phi(&mut types);
    let module = compile(&types, &graph, IndexKind::None);

    assert!(!module.contains("current_block"), "diamond must not use the state machine");
    assert!(module.contains("if ("));
    assert!(module.contains("} else {"));
    // The phi is hoisted once (named before any body `let`) and written on
    // both arms.
    assert!(module.contains("var v_0 : i32;"));
    assert!(module.contains("v_0 = i32(10);"));
    assert!(module.contains("v_0 = i32(20);"));

    check_declare_before_use(&module);
    check_unique_declarations(&module);
}

#[test]
fn arm_equal_to_merge_becomes_a_one_sided_if() {
    let mut types = TypeTable::new();
    let void = types.void();
    let bool_t = types.primitive(Primitive::Bool);
    let i32_t = types.primitive(Primitive::I32);
    let f32_t = types.primitive(Primitive::F32);
    let view = types.view(f32_t, 1);
    let ptr_f32 = types.pointer(f32_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("guarded_store", 0, void);
    let idx = b.parameter(types.index(1));
    let out = b.parameter(view);
    let zero = b.const_i32(i32_t, 0);
    let cond = b.push(bool_t, OpCode::Compare { kind: CompareKind::Gt, lhs: idx, rhs: zero });
    let then_b = b.block();
    let merge = b.block();
    b.branch_if(void, cond, then_b, merge);

    b.switch_to(then_b);
    let value = b.const_f32(f32_t, 1.5);
    let addr = b.push(ptr_f32, OpCode::ElementAddress { source: out, index: idx });
    b.push(void, OpCode::Store { pointer: addr, value });
    b.branch(void, merge);

    b.switch_to(merge);
    b.ret(None);
    let graph = b.finish();

    let module = compile(&types, &graph, IndexKind::Index1D);
    assert!(module.contains("if ("));
    assert!(!module.contains("else"), "merge arm should produce a one-sided if:\n{module}");
    assert!(module.contains("*(&param0[v_0]) = f32(1.5);"));
    check_declare_before_use(&module);
    check_unique_declarations(&module);
}

#[test]
fn block_values_keep_their_ir_order() {
    let mut types = TypeTable::new();
    let void = types.void();
    let f32_t = types.primitive(Primitive::F32);
    let i32_t = types.primitive(Primitive::I32);
    let view = types.view(f32_t, 1);
    let ptr_f32 = types.pointer(f32_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("ordered", 0, void);
    let idx = b.parameter(types.index(1));
    let out = b.parameter(view);
    let first = b.const_f32(f32_t, 1.0);
    let second = b.const_f32(f32_t, 2.0);
    let addr0 = {
        let zero = b.const_i32(i32_t, 0);
        b.push(ptr_f32, OpCode::ElementAddress { source: out, index: zero })
    };
    b.push(void, OpCode::Store { pointer: addr0, value: first });
    let addr1 = b.push(ptr_f32, OpCode::ElementAddress { source: out, index: idx });
    b.push(void, OpCode::Store { pointer: addr1, value: second });
    b.ret(None);
    let graph = b.finish();

    let module = compile(&types, &graph, IndexKind::Index1D);
    let first_store = module.find("*(&param0[i32(0)]) = f32(1.0);").expect("first store");
    let second_store = module.find("*(&param0[v_0]) = f32(2.0);").expect("second store");
    assert!(first_store < second_store, "stores must keep IR order");
}

#[test]
fn state_machine_hoists_cross_block_values() {
    let mut types = TypeTable::new();
    let void = types.void();
    let bool_t = types.primitive(Primitive::Bool);
    let i32_t = types.primitive(Primitive::I32);
    let view = types.view(i32_t, 1);
    let ptr_i32 = types.pointer(i32_t, AddressSpace::Global);

    // A loop that accumulates into a phi; the accumulator crosses blocks.
    let mut b = MethodBuilder::new("accumulate", 0, void);
    let idx = b.parameter(types.index(1));
    let out = b.parameter(view);
    let zero = b.const_i32(i32_t, 0);
    let header = b.block();
    let body = b.block();
    let exit = b.block();
    b.branch(void, header);

    b.switch_to(header);
    let acc = b.push(i32_t, OpCode::Phi { incoming: vec![] });
    let limit = b.const_i32(i32_t, 4);
    let cond = b.push(bool_t, OpCode::Compare { kind: CompareKind::Lt, lhs: acc, rhs: limit });
    b.branch_if(void, cond, body, exit);

    b.switch_to(body);
    let step = b.const_i32(i32_t, 1);
    let next = b.binary(i32_t, BinaryKind::Add, acc, step);
    b.branch(void, header);

    b.switch_to(exit);
    let addr = b.push(ptr_i32, OpCode::ElementAddress { source: out, index: idx });
    b.push(void, OpCode::Store { pointer: addr, value: acc });
    b.ret(None);

    let mut graph = b.finish();
    let entry = graph.entry;
    graph.set_phi_incoming(acc, vec![(entry, zero), (body, next)]);

    let module = compile(&types, &graph, IndexKind::Index1D);
    assert!(module.contains("var current_block : i32 = 0;"));
    // Phi declared at method top, assigned on both incoming transitions.
    assert!(module.contains("var v_1 : i32;"));
    assert!(module.contains("v_1 = i32(0);"));
    assert!(module.contains("v_1 = v_3;"));
    assert!(module.contains("continue;"));
    assert!(module.contains("default: {"));
    check_declare_before_use(&module);
    check_unique_declarations(&module);
}

#[test]
fn switch_terminators_reconstruct_wgsl_switch() {
    let mut types = TypeTable::new();
    let void = types.void();
    let i32_t = types.primitive(Primitive::I32);
    let f32_t = types.primitive(Primitive::F32);
    let view = types.view(f32_t, 1);
    let ptr_f32 = types.pointer(f32_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("select_case", 0, void);
    let idx = b.parameter(types.index(1));
    let out = b.parameter(view);
    let case_a = b.block();
    let case_b = b.block();
    let merge = b.block();
    b.push(void, OpCode::BranchSwitch {
        selector: idx,
        cases: vec![(0, case_a), (1, case_b)],
        default: merge,
    });

    b.switch_to(case_a);
    let va = b.const_f32(f32_t, 1.0);
    let addr_a = b.push(ptr_f32, OpCode::ElementAddress { source: out, index: idx });
    b.push(void, OpCode::Store { pointer: addr_a, value: va });
    b.branch(void, merge);

    b.switch_to(case_b);
    let vb = b.const_f32(f32_t, 2.0);
    let addr_b = b.push(ptr_f32, OpCode::ElementAddress { source: out, index: idx });
    b.push(void, OpCode::Store { pointer: addr_b, value: vb });
    b.branch(void, merge);

    b.switch_to(merge);
    b.ret(None);
    let graph = b.finish();

    let module = compile(&types, &graph, IndexKind::Index1D);
    assert!(!module.contains("current_block"), "acyclic switch stays structured");
    assert!(module.contains("switch (v_0) {"));
    assert!(module.contains("case 0: {"));
    assert!(module.contains("case 1: {"));
    assert!(module.contains("default: {"));
    check_declare_before_use(&module);
    check_unique_declarations(&module);
}
