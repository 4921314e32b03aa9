//! Abstract syntax tree for the C subset.
//!
//! Every node carries its source line so diagnostics raised during
//! semantic analysis can be attributed precisely. Types are *not*
//! attached to expression nodes here: the semantic analyzer (`sema.rs`)
//! walks this tree once and produces a typed IL directly, which keeps
//! the parse tree plain data instead of threading interior mutability
//! through every node (see DESIGN.md).

use crate::diagnostics::Line;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    Extern,
    Static,
    Auto,
    Register,
    Typedef,
}

/// The base type specifier set of a declaration, before any declarator
/// (pointer/array/function) wrapping is applied.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeSpec {
    Void,
    Bool,
    Char,
    Short,
    Int,
    Long,
    Signed,
    Unsigned,
    /// `signed`/`unsigned` combined with an explicit width, e.g. `unsigned long`.
    SignedWidth(Box<TypeSpec>),
    UnsignedWidth(Box<TypeSpec>),
    /// `struct Tag { ... }` or `struct Tag;` or bare `struct Tag`.
    Struct {
        tag: Option<String>,
        members: Option<Vec<MemberDecl>>,
    },
    Union {
        tag: Option<String>,
        members: Option<Vec<MemberDecl>>,
    },
    /// A name previously declared with `typedef`.
    TypedefName(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Qualifiers {
    pub is_const: bool,
}

#[derive(Debug, Clone)]
pub struct DeclSpec {
    pub storage: Option<StorageClass>,
    pub type_spec: TypeSpec,
    pub qualifiers: Qualifiers,
    pub line: Line,
}

#[derive(Debug, Clone)]
pub struct MemberDecl {
    pub spec: DeclSpec,
    pub declarator: Declarator,
    pub line: Line,
}

/// The declarator grammar: wraps an identifier (or an abstract
/// placeholder, used in casts/`sizeof`) with pointer/array/function
/// modifiers. `(*f)(int)` is `Function(Pointer(Ident("f")), [int])`.
#[derive(Debug, Clone)]
pub enum Declarator {
    Ident(String),
    Abstract,
    Pointer {
        qualifiers: Qualifiers,
        inner: Box<Declarator>,
    },
    Array {
        inner: Box<Declarator>,
        size: Option<Box<Expr>>,
    },
    Function {
        inner: Box<Declarator>,
        params: Vec<ParamDecl>,
        /// `f()` (no prototype) vs `f(void)`/`f(int)` (prototyped).
        has_prototype: bool,
    },
}

impl Declarator {
    /// The identifier this declarator ultimately names, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Declarator::Ident(s) => Some(s),
            Declarator::Abstract => None,
            Declarator::Pointer { inner, .. }
            | Declarator::Array { inner, .. }
            | Declarator::Function { inner, .. } => inner.name(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub spec: DeclSpec,
    pub declarator: Declarator,
    pub line: Line,
}

#[derive(Debug, Clone)]
pub struct InitDeclarator {
    pub declarator: Declarator,
    pub init: Option<Expr>,
    pub line: Line,
}

#[derive(Debug, Clone)]
pub struct Declaration {
    pub spec: DeclSpec,
    pub declarators: Vec<InitDeclarator>,
    pub line: Line,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub spec: DeclSpec,
    pub declarator: Declarator,
    pub body: Vec<Stmt>,
    pub line: Line,
}

#[derive(Debug, Clone)]
pub enum ExternalDecl {
    Declaration(Declaration),
    FunctionDef(FunctionDef),
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub externals: Vec<ExternalDecl>,
}

// ---------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Declaration(Declaration),
    Compound(Vec<Stmt>),
    If {
        cond: Expr,
        then_branch: Vec<Stmt>,
        else_branch: Option<Vec<Stmt>>,
        line: Line,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        line: Line,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        step: Option<Expr>,
        body: Vec<Stmt>,
        line: Line,
    },
    Return {
        expr: Option<Expr>,
        line: Line,
    },
    Break(Line),
    Continue(Line),
    Empty,
}

// ---------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogAnd,
    LogOr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    BitNot,
}

/// A type name as it appears in a cast or `sizeof(type)` — a declaration
/// specifier with an abstract declarator, no identifier.
#[derive(Debug, Clone)]
pub struct TypeName {
    pub spec: DeclSpec,
    pub declarator: Declarator,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    IntLiteral(i128),
    StringLiteral(Vec<u8>),
    Ident(String),
    Unary(UnOp, Box<Expr>),
    PreIncDec {
        is_inc: bool,
        operand: Box<Expr>,
    },
    PostIncDec {
        is_inc: bool,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Assign {
        /// `Some(op)` for compound assignment (`+=` etc.), `None` for `=`.
        op: Option<BinOp>,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Subscript {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        field: String,
        arrow: bool,
    },
    Cast {
        type_name: Box<TypeName>,
        operand: Box<Expr>,
    },
    SizeofExpr(Box<Expr>),
    SizeofType(Box<TypeName>),
    AddressOf(Box<Expr>),
    Deref(Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub line: Line,
}

impl Expr {
    pub fn new(kind: ExprKind, line: Line) -> Self {
        Expr { kind, line }
    }
}
