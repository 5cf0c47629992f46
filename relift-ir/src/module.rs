//! A module: function declarations, function bodies, metadata kinds.
//!
//! Declarations and definitions are separate so that a function body can be
//! constructed off to the side and only installed once it is complete; an
//! abandoned construction never pollutes the module.

use crate::entities::{FuncId, MdKind};
use crate::entity::{PrimaryMap, SecondaryMap};
use crate::function::{Function, Signature};
use crate::write::write_function;
use core::fmt;
use hashbrown::HashMap;

/// A function declaration: a callable name and signature.
#[derive(Clone, Debug)]
pub struct FuncDecl {
    /// The symbol name.
    pub name: String,
    /// The signature callers must use.
    pub signature: Signature,
}

/// A module owning function declarations and bodies.
pub struct Module {
    decls: PrimaryMap<FuncId, FuncDecl>,
    bodies: SecondaryMap<FuncId, Option<Function>>,
    md_names: PrimaryMap<MdKind, String>,
    md_index: HashMap<String, MdKind>,
}

impl Module {
    /// Create an empty module.
    pub fn new() -> Self {
        Self {
            decls: PrimaryMap::new(),
            bodies: SecondaryMap::new(),
            md_names: PrimaryMap::new(),
            md_index: HashMap::new(),
        }
    }

    /// Declare a function so it can be referenced by call instructions.
    pub fn declare_function(&mut self, name: impl Into<String>, signature: Signature) -> FuncId {
        let name = name.into();
        log::debug!("declaring function {name}{signature}");
        self.decls.push(FuncDecl { name, signature })
    }

    /// The declaration of a function.
    pub fn decl(&self, id: FuncId) -> &FuncDecl {
        &self.decls[id]
    }

    /// Iterate over all declared functions.
    pub fn declared_functions(&self) -> impl Iterator<Item = (FuncId, &FuncDecl)> {
        self.decls.iter()
    }

    /// Install a completed body for a declared function.
    pub fn define_function(&mut self, id: FuncId, func: Function) {
        debug_assert_eq!(self.decls[id].signature, func.signature);
        log::debug!(
            "defining {} with {} instructions",
            self.decls[id].name,
            func.dfg.num_insts()
        );
        self.bodies[id] = Some(func);
    }

    /// The body of a function, if one has been defined.
    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.bodies[id].as_ref()
    }

    /// Intern a metadata kind string, e.g. `asm.instr`.
    pub fn metadata_kind(&mut self, name: &str) -> MdKind {
        if let Some(&kind) = self.md_index.get(name) {
            return kind;
        }
        let kind = self.md_names.push(name.to_string());
        self.md_index.insert(name.to_string(), kind);
        kind
    }

    /// The string for an interned metadata kind.
    pub fn metadata_name(&self, kind: MdKind) -> &str {
        &self.md_names[kind]
    }

    /// Display a defined function with metadata kinds resolved to strings.
    pub fn display_function(&self, id: FuncId) -> DisplayFunction<'_> {
        DisplayFunction { module: self, id }
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrapper displaying a function in the context of its module.
pub struct DisplayFunction<'a> {
    module: &'a Module,
    id: FuncId,
}

impl fmt::Display for DisplayFunction<'_> {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self.module.function(self.id) {
            Some(func) => write_function(fmt, func, Some(self.module)),
            None => write!(fmt, "; {} is declared but not defined", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Type;

    #[test]
    fn metadata_interning() {
        let mut m = Module::new();
        let a = m.metadata_kind("asm.instr");
        let b = m.metadata_kind("asm.reg.rsp");
        let c = m.metadata_kind("asm.instr");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(m.metadata_name(b), "asm.reg.rsp");
    }

    #[test]
    fn define_after_declare() {
        let mut m = Module::new();
        let sig = Signature::new(Type::Void);
        let id = m.declare_function("f", sig.clone());
        assert!(m.function(id).is_none());
        m.define_function(id, Function::with_signature("f", sig));
        assert!(m.function(id).is_some());
    }
}
