//! Recursive-descent parser for the C subset.
//!
//! Declarations parse as a base specifier followed by a comma-separated
//! declarator list (spec.md 4.3); the declarator grammar is the hardest
//! part of this parser, since `(*f)(int)` and `int arr[3]` wrap the same
//! identifier-production differently. Because a `typedef` name must be
//! recognized as a type specifier as soon as it is declared, the parser
//! is threaded a mutable reference to the symbol table the way spec.md
//! 4.3/9 describes, and declares typedef names into it the moment their
//! declarator is parsed.

use crate::ast::*;
use crate::diagnostics::{DiagnosticBag, Line};
use crate::lexer::{Keyword, Lexer, Token, TokenKind};
use crate::symtab::SymbolTable;

pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    symtab: &'a mut SymbolTable,
    diags: &'a mut DiagnosticBag,
}

impl<'a> Parser<'a> {
    pub fn new(source: &str, symtab: &'a mut SymbolTable, diags: &'a mut DiagnosticBag) -> Self {
        let tokens = {
            // The lexer only needs the diagnostics bag for its own
            // duration; reborrow rather than move so `diags` is still
            // ours to store afterward.
            let lexer = Lexer::new(source, &mut *diags);
            lexer.tokenize()
        };
        Parser {
            tokens,
            pos: 0,
            symtab,
            diags,
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut program = Program::default();
        while !self.at_eof() {
            match self.parse_external_decl() {
                Some(ext) => program.externals.push(ext),
                None => self.resync_to_statement_boundary(),
            }
        }
        program
    }

    // -------------------------------------------------------------
    // Token stream primitives
    // -------------------------------------------------------------

    fn at_eof(&self) -> bool {
        matches!(self.tokens[self.pos].kind, TokenKind::Eof)
    }

    fn kind(&self) -> &TokenKind {
        &self.tokens[self.pos].kind
    }

    fn line(&self) -> Line {
        self.tokens[self.pos].line
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        tok
    }

    fn check_punct(&self, p: &str) -> bool {
        matches!(self.kind(), TokenKind::Punct(s) if *s == p)
    }

    fn check_keyword(&self, kw: Keyword) -> bool {
        matches!(self.kind(), TokenKind::Keyword(k) if *k == kw)
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: &str) -> bool {
        if self.eat_punct(p) {
            true
        } else {
            self.diags
                .error(self.line(), format!("expected '{}'", p));
            false
        }
    }

    fn ident_text(&self) -> Option<String> {
        match self.kind() {
            TokenKind::Ident(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn resync_to_statement_boundary(&mut self) {
        loop {
            if self.at_eof() {
                return;
            }
            if self.check_punct(";") {
                self.advance();
                return;
            }
            if self.check_punct("}") {
                return;
            }
            self.advance();
        }
    }

    // -------------------------------------------------------------
    // Declaration specifiers
    // -------------------------------------------------------------

    fn is_type_start(&self) -> bool {
        use Keyword::*;
        match self.kind() {
            TokenKind::Keyword(
                Bool | Void | Char | Short | Int | Long | Signed | Unsigned | Struct | Union
                | Const | Static | Extern | Auto | Register | Typedef,
            ) => true,
            TokenKind::Ident(name) => self.symtab.is_typedef_name(name),
            _ => false,
        }
    }

    /// Parse a full declaration-specifier list: storage class,
    /// qualifiers, and type specifiers mixed in any order (spec's
    /// corpus uses e.g. `short signed`, `int long unsigned`).
    fn parse_decl_spec(&mut self) -> DeclSpec {
        let line = self.line();
        let mut storage: Option<StorageClass> = None;
        let mut qualifiers = Qualifiers::default();

        let mut n_void = 0;
        let mut n_bool = 0;
        let mut n_char = 0;
        let mut n_short = 0;
        let mut n_int = 0;
        let mut n_long = 0;
        let mut n_signed = 0;
        let mut n_unsigned = 0;
        let mut record_spec: Option<TypeSpec> = None;
        let mut typedef_name: Option<String> = None;

        loop {
            match self.kind().clone() {
                TokenKind::Keyword(Keyword::Const) => {
                    qualifiers.is_const = true;
                    self.advance();
                }
                TokenKind::Keyword(kw @ (Keyword::Extern
                | Keyword::Static
                | Keyword::Auto
                | Keyword::Register
                | Keyword::Typedef)) => {
                    let new_sc = match kw {
                        Keyword::Extern => StorageClass::Extern,
                        Keyword::Static => StorageClass::Static,
                        Keyword::Auto => StorageClass::Auto,
                        Keyword::Register => StorageClass::Register,
                        Keyword::Typedef => StorageClass::Typedef,
                        _ => unreachable!(),
                    };
                    if storage.is_some() {
                        self.diags
                            .error(self.line(), "too many storage classes in declaration specifiers");
                    } else {
                        storage = Some(new_sc);
                    }
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Void) => {
                    n_void += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Bool) => {
                    n_bool += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Char) => {
                    n_char += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Short) => {
                    n_short += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Int) => {
                    n_int += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Long) => {
                    n_long += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Signed) => {
                    n_signed += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Unsigned) => {
                    n_unsigned += 1;
                    self.advance();
                }
                TokenKind::Keyword(Keyword::Struct) => {
                    record_spec = Some(self.parse_record_spec(false));
                }
                TokenKind::Keyword(Keyword::Union) => {
                    record_spec = Some(self.parse_record_spec(true));
                }
                TokenKind::Ident(name) if self.symtab.is_typedef_name(&name) && typedef_name.is_none() => {
                    typedef_name = Some(name);
                    self.advance();
                }
                _ => break,
            }
        }

        let type_spec = if let Some(rs) = record_spec {
            rs
        } else if let Some(name) = typedef_name {
            TypeSpec::TypedefName(name)
        } else if n_bool > 0 {
            TypeSpec::Bool
        } else if n_void > 0 {
            TypeSpec::Void
        } else {
            build_arithmetic_spec(n_char, n_short, n_int, n_long, n_signed, n_unsigned, self.diags, line)
        };

        DeclSpec {
            storage,
            type_spec,
            qualifiers,
            line,
        }
    }

    fn parse_record_spec(&mut self, is_union: bool) -> TypeSpec {
        self.advance(); // `struct` / `union`
        let tag = self.ident_text();
        if tag.is_some() {
            self.advance();
        }
        let members = if self.check_punct("{") {
            self.advance();
            let mut members = Vec::new();
            while !self.check_punct("}") && !self.at_eof() {
                members.extend(self.parse_member_decl());
            }
            self.expect_punct("}");
            Some(members)
        } else {
            None
        };
        if is_union {
            TypeSpec::Union { tag, members }
        } else {
            TypeSpec::Struct { tag, members }
        }
    }

    fn parse_member_decl(&mut self) -> Vec<MemberDecl> {
        let spec = self.parse_decl_spec();
        let mut out = Vec::new();
        if self.check_punct(";") {
            // Bare `int;` inside a struct body: a vacuous member-less
            // declaration, tolerated (declares nothing).
            self.advance();
            return out;
        }
        loop {
            let line = self.line();
            let declarator = self.parse_declarator();
            out.push(MemberDecl {
                spec: spec.clone(),
                declarator,
                line,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        self.expect_punct(";");
        out
    }

    // -------------------------------------------------------------
    // Declarators
    // -------------------------------------------------------------

    fn parse_declarator(&mut self) -> Declarator {
        if self.eat_punct("*") {
            let mut qualifiers = Qualifiers::default();
            while self.check_keyword(Keyword::Const) {
                qualifiers.is_const = true;
                self.advance();
            }
            let inner = self.parse_declarator();
            return Declarator::Pointer {
                qualifiers,
                inner: Box::new(inner),
            };
        }
        let mut base = if self.check_punct("(") {
            self.advance();
            let inner = self.parse_declarator();
            self.expect_punct(")");
            inner
        } else if let Some(name) = self.ident_text() {
            self.advance();
            Declarator::Ident(name)
        } else {
            Declarator::Abstract
        };

        loop {
            if self.eat_punct("[") {
                let size = if self.check_punct("]") {
                    None
                } else {
                    Some(Box::new(self.parse_assignment_expr()))
                };
                self.expect_punct("]");
                base = Declarator::Array {
                    inner: Box::new(base),
                    size,
                };
            } else if self.check_punct("(") {
                self.advance();
                let (params, has_prototype) = self.parse_param_list();
                self.expect_punct(")");
                base = Declarator::Function {
                    inner: Box::new(base),
                    params,
                    has_prototype,
                };
            } else {
                break;
            }
        }
        base
    }

    fn parse_param_list(&mut self) -> (Vec<ParamDecl>, bool) {
        if self.check_punct(")") {
            return (Vec::new(), false);
        }
        if self.check_keyword(Keyword::Void) {
            // Lookahead: `(void)` (prototyped, zero params) vs `(void *x)`.
            let save = self.pos;
            self.advance();
            if self.check_punct(")") {
                return (Vec::new(), true);
            }
            self.pos = save;
        }
        let mut params = Vec::new();
        loop {
            let line = self.line();
            let spec = self.parse_decl_spec();
            let declarator = self.parse_declarator();
            params.push(ParamDecl {
                spec,
                declarator,
                line,
            });
            if !self.eat_punct(",") {
                break;
            }
        }
        (params, true)
    }

    /// A type name is a declaration specifier with an abstract
    /// declarator (no identifier) — used by casts and `sizeof(type)`.
    fn parse_type_name(&mut self) -> TypeName {
        let spec = self.parse_decl_spec();
        let declarator = self.parse_declarator();
        TypeName { spec, declarator }
    }

    // -------------------------------------------------------------
    // External declarations / function definitions
    // -------------------------------------------------------------

    fn parse_external_decl(&mut self) -> Option<ExternalDecl> {
        if !self.is_type_start() {
            self.diags.error(
                self.line(),
                "missing identifier name in declaration",
            );
            return None;
        }
        let spec = self.parse_decl_spec();
        let line = spec.line;

        if self.check_punct(";") {
            self.advance();
            return Some(ExternalDecl::Declaration(Declaration {
                spec,
                declarators: Vec::new(),
                line,
            }));
        }

        let declarator = self.parse_declarator();
        self.declare_if_typedef(&spec, &declarator);

        if self.check_punct("{") {
            // Parameters live in a scope enclosing the body's own block
            // scope (pushed inside `parse_compound_stmt`), so a local
            // declaration that shadows a parameter name is caught at
            // the inner level without disturbing this one.
            self.symtab.push_block_scope();
            if let Declarator::Function { params, .. } = &declarator {
                for param in params {
                    if let Some(name) = param.declarator.name() {
                        self.symtab.declare_ordinary_name(name);
                    }
                }
            }
            let body = self.parse_compound_stmt();
            self.symtab.pop_scope();
            return Some(ExternalDecl::FunctionDef(FunctionDef {
                spec,
                declarator,
                body,
                line,
            }));
        }

        let init = if self.eat_punct("=") {
            Some(self.parse_assignment_expr())
        } else {
            None
        };
        let mut declarators = vec![InitDeclarator {
            declarator,
            init,
            line,
        }];
        while self.eat_punct(",") {
            let decl_line = self.line();
            let declarator = self.parse_declarator();
            self.declare_if_typedef(&spec, &declarator);
            let init = if self.eat_punct("=") {
                Some(self.parse_assignment_expr())
            } else {
                None
            };
            declarators.push(InitDeclarator {
                declarator,
                init,
                line: decl_line,
            });
        }
        self.expect_punct(";");
        Some(ExternalDecl::Declaration(Declaration {
            spec,
            declarators,
            line,
        }))
    }

    /// Both namespaces the parser needs to disambiguate a later
    /// identifier against are recorded here: `typedef` names must be
    /// visible as soon as they are declared, and ordinary
    /// declarations must be recorded too so one can shadow an outer
    /// typedef of the same name in an inner scope (`is_typedef_name`
    /// checks ordinary before typedef at each scope level). We do not
    /// yet know the canonical `Type` for a typedef here (that needs the
    /// symbol table's struct/union bookkeeping the semantic analyzer
    /// owns), so a placeholder marker type is registered and replaced by
    /// the analyzer on first use — what matters for parsing is only that
    /// the *name* is now recognized, and in which namespace.
    fn declare_if_typedef(&mut self, spec: &DeclSpec, declarator: &Declarator) {
        let Some(name) = declarator.name() else {
            return;
        };
        if spec.storage == Some(StorageClass::Typedef) {
            self.symtab
                .declare_typedef(name, crate::types::Type::Error);
        } else {
            self.symtab.declare_ordinary_name(name);
        }
    }

    // -------------------------------------------------------------
    // Statements
    // -------------------------------------------------------------

    fn parse_compound_stmt(&mut self) -> Vec<Stmt> {
        self.expect_punct("{");
        self.symtab.push_block_scope();
        let mut stmts = Vec::new();
        while !self.check_punct("}") && !self.at_eof() {
            stmts.push(self.parse_stmt());
        }
        self.symtab.pop_scope();
        self.expect_punct("}");
        stmts
    }

    fn parse_stmt(&mut self) -> Stmt {
        let line = self.line();
        if self.check_punct("{") {
            return Stmt::Compound(self.parse_compound_stmt());
        }
        if self.check_punct(";") {
            self.advance();
            return Stmt::Empty;
        }
        if self.check_keyword(Keyword::If) {
            self.advance();
            self.expect_punct("(");
            let cond = self.parse_expr();
            self.expect_punct(")");
            let then_branch = self.parse_stmt_list_or_single();
            let else_branch = if self.check_keyword(Keyword::Else) {
                self.advance();
                Some(self.parse_stmt_list_or_single())
            } else {
                None
            };
            return Stmt::If {
                cond,
                then_branch,
                else_branch,
                line,
            };
        }
        if self.check_keyword(Keyword::While) {
            self.advance();
            self.expect_punct("(");
            let cond = self.parse_expr();
            self.expect_punct(")");
            let body = self.parse_stmt_list_or_single();
            return Stmt::While { cond, body, line };
        }
        if self.check_keyword(Keyword::For) {
            self.advance();
            self.expect_punct("(");
            let init = if self.check_punct(";") {
                None
            } else if self.is_type_start() {
                Some(Box::new(Stmt::Declaration(self.parse_local_declaration())))
            } else {
                let e = self.parse_expr();
                self.expect_punct(";");
                Some(Box::new(Stmt::Expr(e)))
            };
            if init.is_none() {
                self.expect_punct(";");
            }
            let cond = if self.check_punct(";") {
                None
            } else {
                Some(self.parse_expr())
            };
            self.expect_punct(";");
            let step = if self.check_punct(")") {
                None
            } else {
                Some(self.parse_expr())
            };
            self.expect_punct(")");
            let body = self.parse_stmt_list_or_single();
            return Stmt::For {
                init,
                cond,
                step,
                body,
                line,
            };
        }
        if self.check_keyword(Keyword::Return) {
            self.advance();
            let expr = if self.check_punct(";") {
                None
            } else {
                Some(self.parse_expr())
            };
            self.expect_punct(";");
            return Stmt::Return { expr, line };
        }
        if self.check_keyword(Keyword::Break) {
            self.advance();
            self.expect_punct(";");
            return Stmt::Break(line);
        }
        if self.check_keyword(Keyword::Continue) {
            self.advance();
            self.expect_punct(";");
            return Stmt::Continue(line);
        }
        if self.is_type_start() {
            return Stmt::Declaration(self.parse_local_declaration());
        }
        let expr = self.parse_expr();
        self.expect_punct(";");
        Stmt::Expr(expr)
    }

    /// `if`/`while`/`for` bodies accept either a brace-enclosed block or
    /// a single statement; both are normalized to `Vec<Stmt>` here so
    /// `sema.rs` doesn't need to special-case the single-statement form.
    fn parse_stmt_list_or_single(&mut self) -> Vec<Stmt> {
        if self.check_punct("{") {
            self.parse_compound_stmt()
        } else {
            vec![self.parse_stmt()]
        }
    }

    fn parse_local_declaration(&mut self) -> Declaration {
        let spec = self.parse_decl_spec();
        let line = spec.line;
        let mut declarators = Vec::new();
        if !self.check_punct(";") {
            loop {
                let decl_line = self.line();
                let declarator = self.parse_declarator();
                self.declare_if_typedef(&spec, &declarator);
                let init = if self.eat_punct("=") {
                    Some(self.parse_assignment_expr())
                } else {
                    None
                };
                declarators.push(InitDeclarator {
                    declarator,
                    init,
                    line: decl_line,
                });
                if !self.eat_punct(",") {
                    break;
                }
            }
        }
        self.expect_punct(";");
        Declaration {
            spec,
            declarators,
            line,
        }
    }

    // -------------------------------------------------------------
    // Expressions
    // -------------------------------------------------------------

    fn parse_expr(&mut self) -> Expr {
        self.parse_assignment_expr()
    }

    fn parse_assignment_expr(&mut self) -> Expr {
        let lhs = self.parse_logical_or_expr();
        let assign_op = match self.kind() {
            TokenKind::Punct("=") => Some(None),
            TokenKind::Punct("+=") => Some(Some(BinOp::Add)),
            TokenKind::Punct("-=") => Some(Some(BinOp::Sub)),
            TokenKind::Punct("*=") => Some(Some(BinOp::Mul)),
            TokenKind::Punct("/=") => Some(Some(BinOp::Div)),
            TokenKind::Punct("%=") => Some(Some(BinOp::Mod)),
            _ => None,
        };
        if let Some(op) = assign_op {
            let line = self.line();
            self.advance();
            let rhs = self.parse_assignment_expr();
            return Expr::new(
                ExprKind::Assign {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            );
        }
        lhs
    }

    fn parse_logical_or_expr(&mut self) -> Expr {
        let mut lhs = self.parse_logical_and_expr();
        while self.check_punct("||") {
            let line = self.line();
            self.advance();
            let rhs = self.parse_logical_and_expr();
            lhs = Expr::new(
                ExprKind::Binary {
                    op: BinOp::LogOr,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            );
        }
        lhs
    }

    fn parse_logical_and_expr(&mut self) -> Expr {
        let mut lhs = self.parse_bitor_expr();
        while self.check_punct("&&") {
            let line = self.line();
            self.advance();
            let rhs = self.parse_bitor_expr();
            lhs = Expr::new(
                ExprKind::Binary {
                    op: BinOp::LogAnd,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            );
        }
        lhs
    }

    fn parse_bin_level(&mut self, ops: &[(&'static str, BinOp)], next: fn(&mut Self) -> Expr) -> Expr {
        let mut lhs = next(self);
        loop {
            let mut matched = None;
            for (tok, op) in ops {
                if self.check_punct(tok) {
                    matched = Some(*op);
                    break;
                }
            }
            let Some(op) = matched else { break };
            let line = self.line();
            self.advance();
            let rhs = next(self);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                line,
            );
        }
        lhs
    }

    fn parse_bitor_expr(&mut self) -> Expr {
        self.parse_bin_level(&[("|", BinOp::BitOr)], Self::parse_bitxor_expr)
    }

    fn parse_bitxor_expr(&mut self) -> Expr {
        self.parse_bin_level(&[("^", BinOp::BitXor)], Self::parse_bitand_expr)
    }

    fn parse_bitand_expr(&mut self) -> Expr {
        self.parse_bin_level(&[("&", BinOp::BitAnd)], Self::parse_equality_expr)
    }

    fn parse_equality_expr(&mut self) -> Expr {
        self.parse_bin_level(
            &[("==", BinOp::Eq), ("!=", BinOp::Ne)],
            Self::parse_relational_expr,
        )
    }

    fn parse_relational_expr(&mut self) -> Expr {
        self.parse_bin_level(
            &[
                ("<=", BinOp::Le),
                (">=", BinOp::Ge),
                ("<", BinOp::Lt),
                (">", BinOp::Gt),
            ],
            Self::parse_shift_expr,
        )
    }

    fn parse_shift_expr(&mut self) -> Expr {
        self.parse_bin_level(
            &[("<<", BinOp::Shl), (">>", BinOp::Shr)],
            Self::parse_additive_expr,
        )
    }

    fn parse_additive_expr(&mut self) -> Expr {
        self.parse_bin_level(
            &[("+", BinOp::Add), ("-", BinOp::Sub)],
            Self::parse_multiplicative_expr,
        )
    }

    fn parse_multiplicative_expr(&mut self) -> Expr {
        self.parse_bin_level(
            &[("*", BinOp::Mul), ("/", BinOp::Div), ("%", BinOp::Mod)],
            Self::parse_cast_expr,
        )
    }

    /// Disambiguates `(type-name) expr` from a parenthesized expression
    /// by checking whether the parenthesized content starts with a
    /// known type specifier.
    fn parse_cast_expr(&mut self) -> Expr {
        if self.check_punct("(") {
            let save = self.pos;
            self.advance();
            if self.is_type_start() {
                let type_name = self.parse_type_name();
                if self.expect_punct(")") {
                    let line = self.tokens[save].line;
                    let operand = self.parse_cast_expr();
                    return Expr::new(
                        ExprKind::Cast {
                            type_name: Box::new(type_name),
                            operand: Box::new(operand),
                        },
                        line,
                    );
                }
            }
            self.pos = save;
        }
        self.parse_unary_expr()
    }

    fn parse_unary_expr(&mut self) -> Expr {
        let line = self.line();
        if self.check_punct("++") {
            self.advance();
            let operand = self.parse_unary_expr();
            return Expr::new(
                ExprKind::PreIncDec {
                    is_inc: true,
                    operand: Box::new(operand),
                },
                line,
            );
        }
        if self.check_punct("--") {
            self.advance();
            let operand = self.parse_unary_expr();
            return Expr::new(
                ExprKind::PreIncDec {
                    is_inc: false,
                    operand: Box::new(operand),
                },
                line,
            );
        }
        if self.check_punct("&") {
            self.advance();
            let operand = self.parse_cast_expr();
            return Expr::new(ExprKind::AddressOf(Box::new(operand)), line);
        }
        if self.check_punct("*") {
            self.advance();
            let operand = self.parse_cast_expr();
            return Expr::new(ExprKind::Deref(Box::new(operand)), line);
        }
        if self.check_punct("-") {
            self.advance();
            let operand = self.parse_cast_expr();
            return Expr::new(ExprKind::Unary(UnOp::Neg, Box::new(operand)), line);
        }
        if self.check_punct("+") {
            // Unary plus is a no-op; parse and discard the operator.
            self.advance();
            return self.parse_cast_expr();
        }
        if self.check_punct("!") {
            self.advance();
            let operand = self.parse_cast_expr();
            return Expr::new(ExprKind::Unary(UnOp::Not, Box::new(operand)), line);
        }
        if self.check_punct("~") {
            self.advance();
            let operand = self.parse_cast_expr();
            return Expr::new(ExprKind::Unary(UnOp::BitNot, Box::new(operand)), line);
        }
        if self.check_keyword(Keyword::Sizeof) {
            self.advance();
            if self.check_punct("(") {
                let save = self.pos;
                self.advance();
                if self.is_type_start() {
                    let type_name = self.parse_type_name();
                    self.expect_punct(")");
                    return Expr::new(ExprKind::SizeofType(Box::new(type_name)), line);
                }
                self.pos = save;
            }
            let operand = self.parse_unary_expr();
            return Expr::new(ExprKind::SizeofExpr(Box::new(operand)), line);
        }
        self.parse_postfix_expr()
    }

    fn parse_postfix_expr(&mut self) -> Expr {
        let mut expr = self.parse_primary_expr();
        loop {
            let line = self.line();
            if self.eat_punct("[") {
                let index = self.parse_expr();
                self.expect_punct("]");
                expr = Expr::new(
                    ExprKind::Subscript {
                        base: Box::new(expr),
                        index: Box::new(index),
                    },
                    line,
                );
            } else if self.eat_punct("(") {
                let mut args = Vec::new();
                if !self.check_punct(")") {
                    loop {
                        args.push(self.parse_assignment_expr());
                        if !self.eat_punct(",") {
                            break;
                        }
                    }
                }
                self.expect_punct(")");
                expr = Expr::new(
                    ExprKind::Call {
                        callee: Box::new(expr),
                        args,
                    },
                    line,
                );
            } else if self.eat_punct(".") {
                let field = self.ident_text().unwrap_or_default();
                if !field.is_empty() {
                    self.advance();
                }
                expr = Expr::new(
                    ExprKind::Member {
                        base: Box::new(expr),
                        field,
                        arrow: false,
                    },
                    line,
                );
            } else if self.eat_punct("->") {
                let field = self.ident_text().unwrap_or_default();
                if !field.is_empty() {
                    self.advance();
                }
                expr = Expr::new(
                    ExprKind::Member {
                        base: Box::new(expr),
                        field,
                        arrow: true,
                    },
                    line,
                );
            } else if self.eat_punct("++") {
                expr = Expr::new(
                    ExprKind::PostIncDec {
                        is_inc: true,
                        operand: Box::new(expr),
                    },
                    line,
                );
            } else if self.eat_punct("--") {
                expr = Expr::new(
                    ExprKind::PostIncDec {
                        is_inc: false,
                        operand: Box::new(expr),
                    },
                    line,
                );
            } else {
                break;
            }
        }
        expr
    }

    fn parse_primary_expr(&mut self) -> Expr {
        let line = self.line();
        match self.kind().clone() {
            TokenKind::IntLiteral { text } => {
                self.advance();
                let value = parse_int_literal(&text);
                Expr::new(ExprKind::IntLiteral(value), line)
            }
            TokenKind::CharLiteral(v) => {
                self.advance();
                Expr::new(ExprKind::IntLiteral(v as i128), line)
            }
            TokenKind::StringLiteral(bytes) => {
                self.advance();
                Expr::new(ExprKind::StringLiteral(bytes), line)
            }
            TokenKind::Ident(name) => {
                self.advance();
                Expr::new(ExprKind::Ident(name), line)
            }
            TokenKind::Punct("(") => {
                self.advance();
                let inner = self.parse_expr();
                self.expect_punct(")");
                inner
            }
            _ => {
                self.diags
                    .error(line, "expected expression");
                self.advance();
                Expr::new(ExprKind::IntLiteral(0), line)
            }
        }
    }
}

/// Parse a decimal integer literal's exact value. Decimal-only per
/// spec.md 4.2; the semantic analyzer picks the narrowest of
/// int/long/unsigned long that fits (spec.md 3).
fn parse_int_literal(text: &str) -> i128 {
    text.parse::<i128>().unwrap_or(0)
}

#[allow(clippy::too_many_arguments)]
fn build_arithmetic_spec(
    n_char: u32,
    n_short: u32,
    n_int: u32,
    n_long: u32,
    n_signed: u32,
    n_unsigned: u32,
    diags: &mut DiagnosticBag,
    line: Line,
) -> TypeSpec {
    let width_markers = [n_char > 0, n_short > 0, n_long > 0];
    if width_markers.iter().filter(|b| **b).count() > 1 {
        diags.error(line, "unrecognized set of type specifiers");
        return TypeSpec::Int;
    }
    let base = if n_char > 0 {
        TypeSpec::Char
    } else if n_short > 0 {
        TypeSpec::Short
    } else if n_long > 0 {
        TypeSpec::Long
    } else if n_int > 0 || n_signed > 0 || n_unsigned > 0 {
        TypeSpec::Int
    } else {
        diags.error(line, "unrecognized set of type specifiers");
        TypeSpec::Int
    };
    if n_unsigned > 0 {
        TypeSpec::UnsignedWidth(Box::new(base))
    } else if n_signed > 0 {
        TypeSpec::SignedWidth(Box::new(base))
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> (Program, DiagnosticBag) {
        let mut symtab = SymbolTable::new();
        let mut diags = DiagnosticBag::new();
        let program = {
            let mut parser = Parser::new(src, &mut symtab, &mut diags);
            parser.parse_program()
        };
        (program, diags)
    }

    #[test]
    fn parses_simple_function_definition() {
        let (program, diags) = parse("int main() { return 0; }");
        assert!(!diags.has_errors());
        assert_eq!(program.externals.len(), 1);
        assert!(matches!(
            program.externals[0],
            ExternalDecl::FunctionDef(_)
        ));
    }

    #[test]
    fn parses_pointer_to_function_declarator() {
        let (program, diags) = parse("int (*f)(int);");
        assert!(!diags.has_errors());
        match &program.externals[0] {
            ExternalDecl::Declaration(d) => {
                assert!(matches!(
                    d.declarators[0].declarator,
                    Declarator::Pointer { .. }
                ));
            }
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn typedef_name_is_recognized_in_later_declarations() {
        let (program, diags) = parse("typedef int T; T x;");
        assert!(!diags.has_errors());
        assert_eq!(program.externals.len(), 2);
    }

    #[test]
    fn parses_multiple_declarators_with_mixed_pointer_and_array() {
        let (program, diags) = parse("int arr[3], *p, scalar;");
        assert!(!diags.has_errors());
        match &program.externals[0] {
            ExternalDecl::Declaration(d) => assert_eq!(d.declarators.len(), 3),
            _ => panic!("expected declaration"),
        }
    }

    #[test]
    fn sizeof_parenthesized_type_vs_expression() {
        let (program, diags) = parse("int main() { sizeof(int); sizeof(x); }");
        assert!(!diags.has_errors());
        match &program.externals[0] {
            ExternalDecl::FunctionDef(f) => {
                assert!(matches!(
                    f.body[0],
                    Stmt::Expr(Expr {
                        kind: ExprKind::SizeofType(_),
                        ..
                    })
                ));
                assert!(matches!(
                    f.body[1],
                    Stmt::Expr(Expr {
                        kind: ExprKind::SizeofExpr(_),
                        ..
                    })
                ));
            }
            _ => panic!("expected function def"),
        }
    }

    #[test]
    fn reports_missing_identifier_name() {
        let (_, diags) = parse("= 5;");
        assert!(diags.has_errors());
    }
}
