//! End-to-end kernel generation scenarios. Every produced module is parsed
//! with naga so the emitted WGSL is at least syntactically well-formed.

use wgsl_kernel_backend::{
    AddressSpace, CodegenOptions, IndexKind, KernelDescriptor, MethodBuilder, MethodGraph,
    Primitive, TypeTable, WgslBackend,
    ir::{AtomicKind, BinaryKind, CompareKind, MethodKind, MethodRef, OpCode},
};

fn parse_wgsl(module: &str) {
    naga::front::wgsl::parse_str(module).unwrap_or_else(|e| {
        let numbered: String = module
            .lines()
            .enumerate()
            .map(|(i, l)| format!("{:4} | {l}\n", i + 1))
            .collect();
        panic!("WGSL parse failed: {e:?}\nWGSL:\n{numbered}")
    });
}

fn descriptor(index_kind: IndexKind) -> KernelDescriptor {
    KernelDescriptor { index_kind }
}

/// out[idx] = a[idx] + b[idx] over three 1D f32 views.
fn vector_add_graph(types: &mut TypeTable) -> MethodGraph {
    let void = types.void();
    let f32_t = types.primitive(Primitive::F32);
    let view = types.view(f32_t, 1);
    let idx_t = types.index(1);
    let ptr_f32 = types.pointer(f32_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("vector_add", 0, void);
    let idx = b.parameter(idx_t);
    let src_a = b.parameter(view);
    let src_b = b.parameter(view);
    let dst = b.parameter(view);

    let addr_a = b.push(ptr_f32, OpCode::ElementAddress { source: src_a, index: idx });
    let load_a = b.push(f32_t, OpCode::Load { pointer: addr_a });
    let addr_b = b.push(ptr_f32, OpCode::ElementAddress { source: src_b, index: idx });
    let load_b = b.push(f32_t, OpCode::Load { pointer: addr_b });
    let sum = b.binary(f32_t, BinaryKind::Add, load_a, load_b);
    let addr_dst = b.push(ptr_f32, OpCode::ElementAddress { source: dst, index: idx });
    b.push(void, OpCode::Store { pointer: addr_dst, value: sum });
    b.ret(None);
    b.finish()
}

#[test]
fn vector_add_emits_dense_bindings_and_index_mapping() {
    let mut types = TypeTable::new();
    let graph = vector_add_graph(&mut types);
    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile vector_add");

    assert!(bundle.module.contains("@compute @workgroup_size(64)"));
    assert!(bundle.module.contains(
        "@group(0) @binding(0) var<storage, read_write> param0 : array<f32>;"
    ));
    assert!(bundle.module.contains(
        "@group(0) @binding(1) var<storage, read_write> param1 : array<f32>;"
    ));
    assert!(bundle.module.contains(
        "@group(0) @binding(2) var<storage, read_write> param2 : array<f32>;"
    ));
    assert!(!bundle.module.contains("_stride"));

    // The 1D kernel index comes from the dispatch built-ins.
    assert!(
        bundle
            .module
            .contains("let v_0 = i32(local_index + group_id.x * workgroup_size.x);")
    );
    assert!(bundle.module.contains("let v_1 = *(&param0[v_0]);"));
    assert!(bundle.module.contains("let v_2 = *(&param1[v_0]);"));
    assert!(bundle.module.contains("let v_3 = (v_1 + v_2);"));
    assert!(bundle.module.contains("*(&param2[v_0]) = v_3;"));

    assert_eq!(bundle.bindings.len(), 3);
    for (i, entry) in bundle.bindings.iter().enumerate() {
        assert_eq!(entry.binding, i as u32);
        assert_eq!(entry.stride_companion, None);
    }
    assert_eq!(bundle.workgroup_size, [64, 1, 1]);

    parse_wgsl(&bundle.module);
}

#[test]
fn atomic_increment_wraps_the_binding_and_uses_atomic_add() {
    let mut types = TypeTable::new();
    let void = types.void();
    let i32_t = types.primitive(Primitive::I32);
    let view = types.view(i32_t, 1);
    let idx_t = types.index(1);
    let ptr_i32 = types.pointer(i32_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("atomic_increment", 0, void);
    let idx = b.parameter(idx_t);
    let counter = b.parameter(view);
    let one = b.const_i32(i32_t, 1);
    let addr = b.push(ptr_i32, OpCode::ElementAddress { source: counter, index: idx });
    b.push(i32_t, OpCode::GenericAtomic { kind: AtomicKind::Add, pointer: addr, operand: one });
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile atomic_increment");

    assert!(bundle.module.contains(
        "@group(0) @binding(0) var<storage, read_write> param0 : array<atomic<i32>>;"
    ));
    assert!(bundle.module.contains("= atomicAdd(&param0[v_0], i32(1));"));
    parse_wgsl(&bundle.module);
}

#[test]
fn two_dimensional_view_gets_a_stride_companion_and_field_mapping() {
    let mut types = TypeTable::new();
    let void = types.void();
    let f32_t = types.primitive(Primitive::F32);
    let i32_t = types.primitive(Primitive::I32);
    let view2 = types.view(f32_t, 2);
    let idx_t = types.index(2);
    let ptr_f32 = types.pointer(f32_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("matrix_extents", 0, void);
    let _idx = b.parameter(idx_t);
    let matrix = b.parameter(view2);
    let width = b.push(i32_t, OpCode::GetField { source: matrix, field: 1 });
    let height = b.push(i32_t, OpCode::GetField { source: matrix, field: 2 });
    let row_stride = b.push(i32_t, OpCode::GetField { source: matrix, field: 3 });
    let a = b.binary(i32_t, BinaryKind::Add, width, height);
    let total = b.binary(i32_t, BinaryKind::Add, a, row_stride);
    let as_f32 = b.push(f32_t, OpCode::Convert { operand: total });
    let zero = b.const_i32(i32_t, 0);
    let addr = b.push(ptr_f32, OpCode::ElementAddress { source: matrix, index: zero });
    b.push(void, OpCode::Store { pointer: addr, value: as_f32 });
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index2D), &[], &[])
        .expect("compile matrix_extents");

    assert!(bundle.module.contains("@compute @workgroup_size(8, 8)"));
    assert!(bundle.module.contains(
        "@group(0) @binding(0) var<storage, read_write> param0 : array<f32>;"
    ));
    assert!(bundle.module.contains(
        "@group(0) @binding(1) var<storage, read> param0_stride : array<i32>;"
    ));
    // Fields 1/2/3 of a 2D view: width, height, and the (row) stride.
    assert!(bundle.module.contains("(param0_stride[0] + param0_stride[1])"));
    assert!(bundle.module.contains(" + param0_stride[0])"));

    assert_eq!(bundle.bindings.len(), 2);
    assert_eq!(bundle.bindings[0].stride_companion, Some(1));
    assert_eq!(bundle.bindings[1].stride_companion, None);
    parse_wgsl(&bundle.module);
}

#[test]
fn f64_add_with_emulation_splits_ieee_bits_at_the_buffer_boundary() {
    let mut types = TypeTable::new();
    let void = types.void();
    let f64_t = types.primitive(Primitive::F64);
    let view = types.view(f64_t, 1);
    let idx_t = types.index(1);
    let ptr_f64 = types.pointer(f64_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("f64_add_kernel", 0, void);
    let idx = b.parameter(idx_t);
    let a = b.parameter(f64_t);
    let bb = b.parameter(f64_t);
    let out = b.parameter(view);
    let sum = b.binary(f64_t, BinaryKind::Add, a, bb);
    let addr = b.push(ptr_f64, OpCode::ElementAddress { source: out, index: idx });
    b.push(void, OpCode::Store { pointer: addr, value: sum });
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions {
        enable_f64_emulation: true,
        enable_i64_emulation: false,
    });
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile f64_add_kernel");

    assert!(bundle.module.contains("alias f64 = vec2<f32>;"));
    assert!(bundle.module.contains("fn f64_add(a: f64, b: f64) -> f64"));
    // Scalar f64 parameters reconstruct from two u32 lanes, low lane first.
    assert!(bundle.module.contains("var v_1 = f64_from_ieee754_bits(param0[0], param0[1]);"));
    assert!(bundle.module.contains("var v_2 = f64_from_ieee754_bits(param1[0], param1[1]);"));
    assert!(bundle.module.contains("let v_3 = f64_add(v_1, v_2);"));
    // The store splits back into lanes 2i and 2i+1.
    assert!(bundle.module.contains("let v_4 = f64_to_ieee754_bits(v_3);"));
    assert!(bundle.module.contains("param2[v_0 * 2] = v_4.x;"));
    assert!(bundle.module.contains("param2[v_0 * 2 + 1] = v_4.y;"));
    // All three buffers store raw u32 lanes.
    for binding in &bundle.bindings {
        assert_eq!(binding.wgsl_type, "u32");
    }
    assert!(bundle.f64_emulation);
    parse_wgsl(&bundle.module);
}

#[test]
fn cyclic_control_flow_falls_back_to_the_state_machine() {
    let mut types = TypeTable::new();
    let void = types.void();
    let bool_t = types.primitive(Primitive::Bool);
    let i32_t = types.primitive(Primitive::I32);
    let view = types.view(i32_t, 1);
    let idx_t = types.index(1);
    let ptr_i32 = types.pointer(i32_t, AddressSpace::Global);

    // entry -> header; header: phi(i) < 10 ? body : exit; body: i+1 -> header
    let mut b = MethodBuilder::new("count_up", 0, void);
    let idx = b.parameter(idx_t);
    let out = b.parameter(view);
    let zero = b.const_i32(i32_t, 0);
    let header = b.block();
    let body = b.block();
    let exit = b.block();
    b.branch(void, header);

    b.switch_to(header);
    let phi = b.push(i32_t, OpCode::Phi { incoming: vec![] });
    let limit = b.const_i32(i32_t, 10);
    let cond = b.push(bool_t, OpCode::Compare { kind: CompareKind::Lt, lhs: phi, rhs: limit });
    b.branch_if(void, cond, body, exit);

    b.switch_to(body);
    let one = b.const_i32(i32_t, 1);
    let next = b.binary(i32_t, BinaryKind::Add, phi, one);
    b.branch(void, header);

    b.switch_to(exit);
    let addr = b.push(ptr_i32, OpCode::ElementAddress { source: out, index: idx });
    b.push(void, OpCode::Store { pointer: addr, value: phi });
    b.ret(None);

    let mut graph = b.finish();
    let entry = graph.entry;
    graph.set_phi_incoming(phi, vec![(entry, zero), (body, next)]);

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile count_up");

    assert!(bundle.module.contains("var current_block : i32 = 0;"));
    assert!(bundle.module.contains("switch (current_block) {"));
    assert!(bundle.module.contains("case 0: {"));
    assert!(bundle.module.contains("case 1: {"));
    assert!(bundle.module.contains("case 2: {"));
    assert!(bundle.module.contains("case 3: {"));
    assert!(bundle.module.contains("if (current_block == -1) {"));
    assert!(bundle.module.contains("current_block = -1;"));
    parse_wgsl(&bundle.module);
}

#[test]
fn i64_shift_routes_to_the_emulation_helper() {
    let mut types = TypeTable::new();
    let void = types.void();
    let i64_t = types.primitive(Primitive::I64);
    let i32_t = types.primitive(Primitive::I32);
    let view = types.view(i64_t, 1);
    let idx_t = types.index(1);
    let ptr_i64 = types.pointer(i64_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("i64_shift", 0, void);
    let idx = b.parameter(idx_t);
    let data = b.parameter(view);
    let addr = b.push(ptr_i64, OpCode::ElementAddress { source: data, index: idx });
    let loaded = b.push(i64_t, OpCode::Load { pointer: addr });
    let amount = b.const_i32(i32_t, 3);
    let shifted = b.binary(i64_t, BinaryKind::Shl, loaded, amount);
    b.push(void, OpCode::Store { pointer: addr, value: shifted });
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions {
        enable_f64_emulation: false,
        enable_i64_emulation: true,
    });
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile i64_shift");

    assert!(bundle.module.contains("alias i64 = vec2<u32>;"));
    assert!(bundle.module.contains("alias u64 = vec2<u32>;"));
    assert!(bundle.module.contains("i64_shl(v_1, u32(i32(3)))"));
    // 64-bit elements load and store as lane pairs.
    assert!(bundle.module.contains("let v_1 = i64(param0[v_0 * 2], param0[v_0 * 2 + 1]);"));
    assert!(bundle.module.contains("param0[v_0 * 2] = (v_2).x;"));
    assert!(bundle.module.contains("param0[v_0 * 2 + 1] = (v_2).y;"));
    parse_wgsl(&bundle.module);
}

#[test]
fn empty_method_produces_prologue_and_return_only() {
    let mut types = TypeTable::new();
    let void = types.void();
    let mut b = MethodBuilder::new("noop", 0, void);
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::None), &[], &[])
        .expect("compile noop");

    assert!(bundle.module.contains("@compute @workgroup_size(64)"));
    assert!(bundle.module.contains("return;"));
    assert!(bundle.bindings.is_empty());
    parse_wgsl(&bundle.module);
}

#[test]
fn scalar_parameter_binds_as_a_single_element_load() {
    let mut types = TypeTable::new();
    let void = types.void();
    let f32_t = types.primitive(Primitive::F32);

    let mut b = MethodBuilder::new("scalar_param", 0, void);
    b.parameter(f32_t);
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::None), &[], &[])
        .expect("compile scalar_param");

    assert!(bundle.module.contains(
        "@group(0) @binding(0) var<storage, read_write> param0 : array<f32>;"
    ));
    assert!(bundle.module.contains("var v_0 = param0[0];"));
    assert_eq!(bundle.bindings.len(), 1);
    parse_wgsl(&bundle.module);
}

#[test]
fn helper_functions_and_calls_share_one_module() {
    let mut types = TypeTable::new();
    let void = types.void();
    let i32_t = types.primitive(Primitive::I32);
    let view = types.view(i32_t, 1);
    let idx_t = types.index(1);
    let ptr_i32 = types.pointer(i32_t, AddressSpace::Global);

    // Helper: fn add_one(x) -> x + 1
    let mut h = MethodBuilder::new("add_one", 7, i32_t);
    let p = h.parameter(i32_t);
    let one = h.const_i32(i32_t, 1);
    let sum = h.binary(i32_t, BinaryKind::Add, p, one);
    h.ret(Some(sum));
    let helper = h.finish();

    // Kernel: out[idx] = add_one(out[idx])
    let mut b = MethodBuilder::new("apply_add_one", 0, void);
    let idx = b.parameter(idx_t);
    let out = b.parameter(view);
    let addr = b.push(ptr_i32, OpCode::ElementAddress { source: out, index: idx });
    let loaded = b.push(i32_t, OpCode::Load { pointer: addr });
    let call = b.push(
        i32_t,
        OpCode::MethodCall {
            target: MethodRef { id: 7, name: "add_one".to_string(), kind: MethodKind::Device },
            arguments: vec![loaded],
        },
    );
    b.push(void, OpCode::Store { pointer: addr, value: call });
    b.ret(None);
    let kernel = b.finish();

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_module(&types, &kernel, &[&helper], &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile module");

    assert!(bundle.module.contains("fn add_one_7(p_0 : i32) -> i32 {"));
    assert!(bundle.module.contains("var v_0 = p_0;"));
    assert!(bundle.module.contains("var _return_val : i32;"));
    assert!(bundle.module.contains("_return_val = v_1;"));
    assert!(bundle.module.contains("return _return_val;"));
    assert!(bundle.module.contains("= add_one_7(v_1);"));
    parse_wgsl(&bundle.module);
}

#[test]
fn subgroup_operations_enable_the_directive() {
    let mut types = TypeTable::new();
    let void = types.void();
    let f32_t = types.primitive(Primitive::F32);
    let view = types.view(f32_t, 1);
    let idx_t = types.index(1);
    let ptr_f32 = types.pointer(f32_t, AddressSpace::Global);

    let mut b = MethodBuilder::new("broadcast_first", 0, void);
    let idx = b.parameter(idx_t);
    let data = b.parameter(view);
    let addr = b.push(ptr_f32, OpCode::ElementAddress { source: data, index: idx });
    let loaded = b.push(f32_t, OpCode::Load { pointer: addr });
    let broadcast = b.push(f32_t, OpCode::SubgroupBroadcast { operand: loaded });
    b.push(void, OpCode::Store { pointer: addr, value: broadcast });
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile broadcast_first");

    assert!(bundle.module.contains("enable subgroups;"));
    assert!(bundle.module.contains("subgroupBroadcastFirst(v_1)"));
    assert!(bundle.module.contains("@builtin(subgroup_invocation_id)"));
    parse_wgsl(&bundle.module);
}

#[test]
fn workgroup_barrier_emits_both_barriers() {
    let mut types = TypeTable::new();
    let void = types.void();
    let f32_t = types.primitive(Primitive::F32);
    let shared_ptr = types.pointer(f32_t, AddressSpace::Shared);
    let idx_t = types.index(1);

    let mut b = MethodBuilder::new("with_barrier", 0, void);
    let _idx = b.parameter(idx_t);
    let _scratch = b.push(
        shared_ptr,
        OpCode::Alloca { element: f32_t, count: 64, space: AddressSpace::Shared },
    );
    b.push(void, OpCode::WorkgroupBarrier);
    b.ret(None);
    let graph = b.finish();

    let backend = WgslBackend::new(CodegenOptions::default());
    let bundle = backend
        .compile_kernel(&types, &graph, &descriptor(IndexKind::Index1D), &[], &[])
        .expect("compile with_barrier");

    assert!(bundle.module.contains("workgroupBarrier();"));
    assert!(bundle.module.contains("storageBarrier();"));
    assert!(bundle.module.contains("var<workgroup>"));
    assert!(bundle.module.contains("array<f32, 64>;"));
    parse_wgsl(&bundle.module);
}
