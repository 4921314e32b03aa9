//! Symbol table and scope stack.
//!
//! Two namespaces per spec.md 3/4.4: ordinary identifiers (which also
//! hosts `typedef` names) and tag names (`struct`/`union`). Scopes nest
//! in a stack; lookup walks outward. File scope is index 0 and is kept
//! alive for the whole translation unit so tentative-definition
//! resolution can run over it at the end (spec.md 4.4).

use crate::ast::StorageClass;
use crate::il::Val;
use crate::types::{RecordRef, Type};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    External,
    Internal,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefState {
    Declared,
    Tentative,
    Defined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    File,
    Block,
}

/// An ordinary-namespace symbol: a variable, function, or parameter.
/// Shared by `Rc` so the semantic analyzer can flip `def_state` in
/// place and every prior reference to the symbol observes the update.
#[derive(Debug)]
pub struct Symbol {
    pub name: String,
    pub ty: Type,
    pub storage: Option<StorageClass>,
    pub linkage: Linkage,
    pub def_state: DefState,
    /// The assembly label codegen should emit references to. Computed
    /// once at first declaration: the symbol name itself for external
    /// linkage, a mangled per-function-instance name for `static`
    /// locals (spec.md 4.4's "independent counters" test), and the bare
    /// name for automatic storage (which never becomes a label).
    pub asm_label: String,
    pub scope_kind: ScopeKind,
    /// The stack slot backing this symbol, for automatic-storage
    /// variables and parameters analyzed within the current function.
    /// `None` for anything reached through a symbol (globals, statics,
    /// functions), which codegen addresses via `asm_label` instead.
    pub il_local: Option<Val>,
}

pub type SymbolRef = Rc<RefCell<Symbol>>;

#[derive(Debug, Default)]
pub struct Scope {
    pub kind_is_file: bool,
    ordinary: HashMap<String, SymbolRef>,
    /// Names bound as ordinary declarations where no full `Symbol` is
    /// available (the parser's own bookkeeping: it knows a name is a
    /// variable/parameter before any type has been resolved). Kept
    /// alongside `ordinary` rather than merged into it so callers that
    /// do have a `Symbol` aren't forced to fabricate one.
    ordinary_names: HashSet<String>,
    typedefs: HashMap<String, Type>,
    tags: HashMap<String, RecordRef>,
}

#[derive(Default)]
pub struct SymbolTable {
    scopes: Vec<Scope>,
    /// Monotonic counter used to mangle block-scope `static` locals into
    /// unique assembly labels (two functions' `static int i;` must not
    /// collide, spec.md 4.4).
    static_local_counter: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        let mut table = SymbolTable {
            scopes: Vec::new(),
            static_local_counter: 0,
        };
        table.scopes.push(Scope {
            kind_is_file: true,
            ..Scope::default()
        });
        table
    }

    pub fn push_block_scope(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn pop_scope(&mut self) {
        assert!(self.scopes.len() > 1, "cannot pop file scope");
        self.scopes.pop();
    }

    pub fn is_file_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    pub fn file_scope(&self) -> &Scope {
        &self.scopes[0]
    }

    pub fn fresh_static_label(&mut self, name: &str) -> String {
        self.static_local_counter += 1;
        format!(".L{}${}", name, self.static_local_counter)
    }

    pub fn declare_ordinary(&mut self, symbol: Symbol) -> SymbolRef {
        let sym = Rc::new(RefCell::new(symbol));
        let scope = self.scopes.last_mut().unwrap();
        scope.ordinary.insert(sym.borrow().name.clone(), sym.clone());
        sym
    }

    /// Records `name` as an ordinary declaration in the current scope
    /// without a backing `Symbol` — used by the parser, which needs to
    /// know a name is a variable (not a type) well before any type is
    /// resolved, so it can stop treating it as a typedef-name start for
    /// an enclosing typedef it shadows.
    pub fn declare_ordinary_name(&mut self, name: &str) {
        self.scopes
            .last_mut()
            .unwrap()
            .ordinary_names
            .insert(name.to_string());
    }

    /// Binds `symbol` into file scope regardless of the current scope
    /// depth — used for the implicit `int f()` declarations K&R-style
    /// calls to undeclared functions introduce (spec.md 4.5), which
    /// always have file-scope external linkage no matter how deeply
    /// nested the call expression is.
    pub fn declare_ordinary_at_file_scope(&mut self, symbol: Symbol) -> SymbolRef {
        let sym = Rc::new(RefCell::new(symbol));
        self.scopes[0]
            .ordinary
            .insert(sym.borrow().name.clone(), sym.clone());
        sym
    }

    pub fn lookup_file_scope(&self, name: &str) -> Option<SymbolRef> {
        self.scopes[0].ordinary.get(name).cloned()
    }

    /// Look up an ordinary identifier, walking outward through enclosing
    /// scopes.
    pub fn lookup_ordinary(&self, name: &str) -> Option<SymbolRef> {
        for scope in self.scopes.iter().rev() {
            if let Some(sym) = scope.ordinary.get(name) {
                return Some(sym.clone());
            }
        }
        None
    }

    /// Look up an ordinary identifier only in the *current* (innermost)
    /// scope — used to detect redeclaration-in-same-scope errors.
    pub fn lookup_current_scope(&self, name: &str) -> Option<SymbolRef> {
        self.scopes.last().unwrap().ordinary.get(name).cloned()
    }

    pub fn declare_typedef(&mut self, name: &str, ty: Type) {
        self.scopes
            .last_mut()
            .unwrap()
            .typedefs
            .insert(name.to_string(), ty);
    }

    pub fn lookup_typedef(&self, name: &str) -> Option<Type> {
        for scope in self.scopes.iter().rev() {
            if let Some(ty) = scope.typedefs.get(name) {
                return Some(ty.clone());
            }
        }
        None
    }

    pub fn typedef_in_current_scope(&self, name: &str) -> bool {
        self.scopes.last().unwrap().typedefs.contains_key(name)
    }

    /// True if the nearest declaration of `name`, searching from the
    /// current scope outward, is a typedef rather than an ordinary
    /// identifier — this is what the parser consults when deciding
    /// whether an identifier starts a declaration. An ordinary
    /// declaration in a given scope shadows a typedef of the same name
    /// from an enclosing scope, so each scope level is checked as a
    /// whole (ordinary before typedef) before moving outward, rather
    /// than checking "is there a typedef anywhere" first.
    pub fn is_typedef_name(&self, name: &str) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.ordinary.contains_key(name) || scope.ordinary_names.contains(name) {
                return false;
            }
            if scope.typedefs.contains_key(name) {
                return true;
            }
        }
        false
    }

    pub fn declare_tag(&mut self, name: &str, record: RecordRef) {
        self.scopes
            .last_mut()
            .unwrap()
            .tags
            .insert(name.to_string(), record);
    }

    pub fn lookup_tag(&self, name: &str) -> Option<RecordRef> {
        for scope in self.scopes.iter().rev() {
            if let Some(r) = scope.tags.get(name) {
                return Some(r.clone());
            }
        }
        None
    }

    pub fn tag_in_current_scope(&self, name: &str) -> Option<RecordRef> {
        self.scopes.last().unwrap().tags.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Arith;

    fn make_symbol(name: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            ty: Type::Arith(Arith::int()),
            storage: None,
            linkage: Linkage::None,
            def_state: DefState::Declared,
            asm_label: name.to_string(),
            scope_kind: ScopeKind::Block,
            il_local: None,
        }
    }

    #[test]
    fn inner_scope_shadows_outer() {
        let mut table = SymbolTable::new();
        table.declare_ordinary(make_symbol("x"));
        table.push_block_scope();
        table.declare_ordinary(make_symbol("x"));
        assert!(table.lookup_current_scope("x").is_some());
        table.pop_scope();
        assert!(table.lookup_ordinary("x").is_some());
    }

    #[test]
    fn typedef_lookup_walks_outward() {
        let mut table = SymbolTable::new();
        table.declare_typedef("my_int", Type::Arith(Arith::int()));
        table.push_block_scope();
        assert!(table.is_typedef_name("my_int"));
    }

    #[test]
    fn an_inner_ordinary_declaration_shadows_an_outer_typedef() {
        let mut table = SymbolTable::new();
        table.declare_typedef("T", Type::Arith(Arith::int()));
        table.push_block_scope();
        assert!(table.is_typedef_name("T"));
        table.declare_ordinary_name("T");
        assert!(!table.is_typedef_name("T"));
        table.pop_scope();
        assert!(table.is_typedef_name("T"));
    }

    #[test]
    fn static_labels_are_unique_per_call() {
        let mut table = SymbolTable::new();
        let a = table.fresh_static_label("i");
        let b = table.fresh_static_label("i");
        assert_ne!(a, b);
    }
}
