//! Lazily populated mapping from IR type nodes to WGSL type spellings.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::ir::{AddressSpace, Primitive, TypeId, TypeNode, TypeTable};

use super::types::CodegenOptions;

/// Declarations for user-defined aggregates, in deterministic first-use order.
#[derive(Default)]
struct StructRegistry {
    order: Vec<TypeId>,
    decls: HashMap<TypeId, String>,
}

/// Maps IR types to WGSL spellings, caching results. Lookups are guarded by a
/// read-write lock so a backend can be shared across methods; readers vastly
/// dominate.
pub struct TypeMapper {
    cache: RwLock<HashMap<TypeId, (String, Option<String>)>>,
    structs: Mutex<StructRegistry>,
}

impl TypeMapper {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            structs: Mutex::new(StructRegistry::default()),
        }
    }

    /// WGSL spelling for `id`. The second element carries a diagnostic note
    /// when the type had no mapping and degraded to the `u32` placeholder;
    /// the note is cached with the spelling so every occurrence of the type
    /// surfaces it, not just the first.
    pub fn map(
        &self,
        types: &TypeTable,
        id: TypeId,
        options: &CodegenOptions,
    ) -> (String, Option<String>) {
        if let Some(hit) = self.cache.read().expect("type cache poisoned").get(&id) {
            return hit.clone();
        }
        let mapped = self.compute(types, id, options);
        self.cache
            .write()
            .expect("type cache poisoned")
            .insert(id, mapped.clone());
        mapped
    }

    fn compute(
        &self,
        types: &TypeTable,
        id: TypeId,
        options: &CodegenOptions,
    ) -> (String, Option<String>) {
        let node = types.node(id).clone();
        match node {
            TypeNode::Primitive(p) => (primitive_wgsl(p, options).to_string(), None),
            TypeNode::Index { dims: 1 } => ("i32".to_string(), None),
            TypeNode::Index { dims: 2 } => ("vec2<i32>".to_string(), None),
            TypeNode::Index { dims: 3 } => ("vec3<i32>".to_string(), None),
            TypeNode::Pointer { element, space } => {
                let (inner, diag) = self.map(types, element, options);
                let spelled = match space {
                    AddressSpace::Global => format!("ptr<storage, {inner}, read_write>"),
                    AddressSpace::Shared => format!("ptr<workgroup, {inner}>"),
                    AddressSpace::Local => format!("ptr<function, {inner}>"),
                };
                (spelled, diag)
            }
            TypeNode::View { element, .. } => {
                // A view value is a storage pointer; its extents travel in the
                // per-parameter stride side-band.
                let (inner, diag) = self.map(types, element, options);
                (format!("ptr<storage, array<{inner}>, read_write>"), diag)
            }
            TypeNode::Structure { ref fields, .. } => {
                let name = format!("struct_{}", id.0);
                let mut decl = format!("struct {name} {{\n");
                let mut first_diag = None;
                for (i, &field) in fields.iter().enumerate() {
                    let (field_ty, diag) = self.map(types, field, options);
                    if first_diag.is_none() {
                        first_diag = diag;
                    }
                    decl.push_str(&format!("    field_{i} : {field_ty},\n"));
                }
                decl.push_str("}\n");
                let mut registry = self.structs.lock().expect("struct registry poisoned");
                if !registry.decls.contains_key(&id) {
                    registry.order.push(id);
                    registry.decls.insert(id, decl);
                }
                (name, first_diag)
            }
            other => (
                "u32".to_string(),
                Some(format!("unmappable type {other:?} lowered to u32 placeholder")),
            ),
        }
    }

    /// All collected `struct` declarations, in first-use order.
    pub fn struct_declarations(&self) -> String {
        let registry = self.structs.lock().expect("struct registry poisoned");
        let mut out = String::new();
        for id in &registry.order {
            out.push_str(&registry.decls[id]);
            out.push('\n');
        }
        out
    }
}

impl Default for TypeMapper {
    fn default() -> Self {
        Self::new()
    }
}

fn primitive_wgsl(p: Primitive, options: &CodegenOptions) -> &'static str {
    match p {
        Primitive::Bool => "bool",
        // Narrow integers are promoted; WGSL has no 8/16-bit integer types.
        Primitive::I8 | Primitive::I16 | Primitive::I32 => "i32",
        Primitive::U8 | Primitive::U16 | Primitive::U32 => "u32",
        Primitive::I64 => {
            if options.enable_i64_emulation {
                "i64"
            } else {
                "i32"
            }
        }
        Primitive::U64 => {
            if options.enable_i64_emulation {
                "u64"
            } else {
                "u32"
            }
        }
        // f16 is promoted; the `f16` WGSL extension is not assumed.
        Primitive::F16 | Primitive::F32 => "f32",
        Primitive::F64 => {
            if options.enable_f64_emulation {
                "f64"
            } else {
                "f32"
            }
        }
    }
}
