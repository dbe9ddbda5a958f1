use std::io::Write;
use std::rc::Rc;

use super::ast::{self, node, Ast, Kind, NodeKind};
use super::diagnostic::{Diagnostic, Diagnostics};
use super::dnf;
use super::ident::Ident;
use super::lexer::{escaped_content, lex, Token, TokenKind};
use super::source::{load_source, synthetic_source, Location, Source};
use super::suggest;
use crate::paths;

const EXT: &str = "quill";

/// Every production returns one of these. `Skip` commits nothing, so the
/// caller may try an alternative; `Error` means at least one diagnostic was
/// emitted but the recognized region was still consumed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Skip,
    Success,
    Error,
}

use Outcome::{Error, Skip, Success};

pub struct Parser {
    source: Rc<Source>,
    pos: usize,
    la: usize,
    previous: Option<Token>,
    lookahead: Vec<Token>,

    // Scope stack. Strong references live here only while a scope is open;
    // symbol tables themselves hold weak links.
    scopes: Vec<Ast>,

    ident: Ident,
    name_apply: Location,
    name_create: Location,

    final_result: Outcome,
    imports: Vec<String>,
    stdlib: String,
    pub diags: Diagnostics,
}

/// Parse `path` (a `.quill` file for single-module testing, or a directory)
/// plus everything it imports, rendering diagnostics into `out`. Always
/// returns a program node, partial if errors occurred.
pub fn parse(path: &str, stdlib: &str, out: &mut dyn Write) -> (bool, Ast) {
    let mut parser = Parser::new(stdlib);
    let program_loc = parser.ident.ident("$program");
    let program = node(
        program_loc,
        NodeKind::Class {
            typeparams: vec![],
            inherits: None,
            members: vec![],
        },
    );

    parser.push_scope(&program);
    parser
        .imports
        .push(paths::canonical(path).unwrap_or_else(|| path.to_string()));

    // The import list grows while it is being walked.
    let mut i = 0;
    while i < parser.imports.len() {
        let import = parser.imports[i].clone();
        parser.load_module(&import, i, &program);
        i += 1;
    }
    parser.pop_scope();

    let _ = parser.diags.render(out);
    (parser.final_result == Success, program)
}

impl Parser {
    pub fn new(stdlib: &str) -> Self {
        let mut ident = Ident::default();
        let name_apply = ident.ident("apply");
        let name_create = ident.ident("create");
        Parser {
            source: synthetic_source(""),
            pos: 0,
            la: 0,
            previous: None,
            lookahead: Vec::new(),
            scopes: Vec::new(),
            ident,
            name_apply,
            name_create,
            final_result: Success,
            imports: Vec::new(),
            stdlib: stdlib.to_string(),
            diags: Diagnostics::default(),
        }
    }

    fn start(&mut self, source: Rc<Source>) {
        self.source = source;
        self.pos = 0;
        self.la = 0;
        self.previous = None;
        self.lookahead.clear();
    }

    // ---- token stream adapter ----

    fn fill(&mut self) {
        while self.la >= self.lookahead.len() {
            let tok = lex(&self.source, &mut self.pos);
            self.lookahead.push(tok);
        }
    }

    /// Match the token at the lookahead cursor, advancing the cursor on a
    /// hit. Nothing is committed until `take`.
    fn peek(&mut self, kind: TokenKind) -> bool {
        self.peek_text(kind, None)
    }

    fn peek_symbol(&mut self, text: &str) -> bool {
        self.peek_text(TokenKind::Symbol, Some(text))
    }

    fn peek_text(&mut self, kind: TokenKind, text: Option<&str>) -> bool {
        self.fill();
        let tok = &self.lookahead[self.la];
        if tok.kind == kind && text.map_or(true, |t| tok.location.view() == t) {
            self.la += 1;
            return true;
        }
        false
    }

    fn rewind(&mut self) {
        self.la = 0;
    }

    fn take(&mut self) -> Token {
        debug_assert_eq!(self.la, 0, "take with outstanding lookahead");
        let tok = if self.lookahead.is_empty() {
            lex(&self.source, &mut self.pos)
        } else {
            self.lookahead.remove(0)
        };
        self.previous = Some(tok.clone());
        tok
    }

    fn has(&mut self, kind: TokenKind) -> bool {
        self.has_text(kind, None)
    }

    fn has_symbol(&mut self, text: &str) -> bool {
        self.has_text(TokenKind::Symbol, Some(text))
    }

    fn has_text(&mut self, kind: TokenKind, text: Option<&str>) -> bool {
        debug_assert_eq!(self.la, 0, "has with outstanding lookahead");
        if self.peek_text(kind, text) {
            self.rewind();
            self.take();
            return true;
        }
        false
    }

    /// Location of the next unconsumed token, falling back to the last
    /// consumed one.
    fn loc(&mut self) -> Location {
        if let Some(tok) = self.lookahead.first() {
            return tok.location.clone();
        }
        if let Some(prev) = &self.previous {
            return prev.location.clone();
        }
        let tok = lex(&self.source, &mut self.pos);
        let loc = tok.location.clone();
        self.lookahead.push(tok);
        loc
    }

    fn prev_loc(&mut self) -> Location {
        match &self.previous {
            Some(tok) => tok.location.clone(),
            None => self.loc(),
        }
    }

    /// Pure lookahead: is `kind` ahead of `terminator` at this bracket
    /// depth? The caller rewinds.
    fn peek_delimited(&mut self, kind: TokenKind, terminator: TokenKind) -> bool {
        while !self.peek(TokenKind::End) {
            if self.peek(kind) {
                return true;
            }
            if self.peek(terminator) {
                return false;
            }
            if self.peek(TokenKind::LParen) {
                self.peek_delimited(TokenKind::RParen, TokenKind::End);
            } else if self.peek(TokenKind::LSquare) {
                self.peek_delimited(TokenKind::RSquare, TokenKind::End);
            } else if self.peek(TokenKind::LBrace) {
                self.peek_delimited(TokenKind::RBrace, TokenKind::End);
            } else {
                self.la += 1;
            }
        }
        false
    }

    /// Consume tokens, skipping balanced bracket groups, until one of
    /// `kinds` (left unconsumed) or `End`.
    fn restart_before(&mut self, kinds: &[TokenKind]) {
        while !self.has(TokenKind::End) {
            for &kind in kinds {
                if self.peek(kind) {
                    self.rewind();
                    return;
                }
            }
            if self.has(TokenKind::LParen) {
                self.restart_before(&[TokenKind::RParen]);
            } else if self.has(TokenKind::LSquare) {
                self.restart_before(&[TokenKind::RSquare]);
            } else if self.has(TokenKind::LBrace) {
                self.restart_before(&[TokenKind::RBrace]);
            } else {
                self.take();
            }
        }
    }

    fn restart_after(&mut self, kinds: &[TokenKind]) {
        self.restart_before(kinds);
        self.take();
    }

    // ---- diagnostics ----

    fn report(&mut self, diag: Diagnostic) {
        self.final_result = Error;
        self.diags.push(diag);
    }

    fn error_here(&mut self, message: &str) {
        let loc = self.loc();
        self.report(Diagnostic::new(Some(loc), message));
    }

    fn error_at(&mut self, loc: Location, message: &str) {
        self.report(Diagnostic::new(Some(loc), message));
    }

    // ---- scopes ----

    fn push_scope(&mut self, scope: &Ast) {
        if let Some(top) = self.scopes.last() {
            let mut n = scope.borrow_mut();
            let table = n.symbols.as_mut().expect("pushed a scope-bearing node");
            table.parent = Some(Rc::downgrade(top));
        }
        self.scopes.push(scope.clone());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    /// Run `f` with `scope` on the stack, popping on every exit path.
    fn in_scope<T>(&mut self, scope: &Ast, f: impl FnOnce(&mut Self) -> T) -> T {
        self.push_scope(scope);
        let result = f(self);
        self.pop_scope();
        result
    }

    fn lookup(&self, name: &str) -> Option<Ast> {
        let top = self.scopes.last()?;
        ast::get_scope(top, name)
    }

    fn set_sym(&mut self, id: &Location, target: &Ast) {
        let key = id.view().to_string();
        let target_loc = target.borrow().location.clone();
        let top = self.scopes.last().expect("a scope is open").clone();
        let prev = {
            let mut n = top.borrow_mut();
            let table = n.symbols.as_mut().expect("scope-bearing node");
            table.set(&key, target)
        };
        if let Some(prev) = prev {
            let prev_loc = prev.borrow().location.clone();
            self.report(
                Diagnostic::new(
                    Some(target_loc),
                    format!("there is a previous definition of \"{}\"", key),
                )
                .note(prev_loc, "the previous definition is here"),
            );
        }
    }

    // ---- expressions ----

    fn opt_when(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // when <- 'when' postfix lambda
        if !self.has(TokenKind::When) {
            return Skip;
        }

        let mut r = Success;
        let when = node(
            self.prev_loc(),
            NodeKind::When {
                waitfor: None,
                behaviour: None,
            },
        );
        *expr = Some(when.clone());

        let mut waitfor = None;
        if self.opt_postfix(&mut waitfor) != Success {
            self.error_here("expected a when condition");
            r = Error;
        }
        if let NodeKind::When { waitfor: w, .. } = &mut when.borrow_mut().kind {
            *w = waitfor;
        }

        let mut behaviour = None;
        if self.opt_lambda(&mut behaviour, false) != Success {
            self.error_here("expected a when body");
            r = Error;
        }
        if let NodeKind::When { behaviour: b, .. } = &mut when.borrow_mut().kind {
            *b = behaviour;
        }

        r
    }

    fn opt_try(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // try <- 'try' lambda 'catch' '{' lambda* '}'
        if !self.has(TokenKind::Try) {
            return Skip;
        }

        let mut r = Success;
        let tr = node(
            self.prev_loc(),
            NodeKind::Try {
                body: None,
                catches: vec![],
            },
        );
        *expr = Some(tr.clone());

        let mut body = None;
        if self.opt_lambda(&mut body, false) != Success {
            self.error_here("expected a try block");
            r = Error;
        }

        if let Some(b) = &body {
            let (first_tp, first_param) = match &b.borrow().kind {
                NodeKind::Lambda {
                    typeparams, params, ..
                } => (
                    typeparams.first().map(|t| t.borrow().location.clone()),
                    params.first().map(|p| p.borrow().location.clone()),
                ),
                _ => (None, None),
            };
            if let Some(loc) = first_tp {
                self.error_at(loc, "a try block can't have type parameters");
                r = Error;
            }
            if let Some(loc) = first_param {
                self.error_at(loc, "a try block can't have parameters");
                r = Error;
            }
        }
        if let NodeKind::Try { body: b, .. } = &mut tr.borrow_mut().kind {
            *b = body;
        }

        if !self.has(TokenKind::Catch) {
            self.error_here("expected a catch block");
            return Error;
        }
        if !self.has(TokenKind::LBrace) {
            self.error_here("expected {");
            return Error;
        }

        loop {
            let mut clause = None;
            let r2 = self.opt_lambda(&mut clause, false);
            if r2 == Skip {
                break;
            }
            if let Some(clause) = clause {
                if let NodeKind::Try { catches, .. } = &mut tr.borrow_mut().kind {
                    catches.push(clause);
                }
            }
            if r2 == Error {
                r = Error;
            }
        }

        if !self.has(TokenKind::RBrace) {
            self.error_here("expected }");
            return Error;
        }

        r
    }

    fn opt_match(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // match <- 'match' postfix '{' lambda* '}'
        if !self.has(TokenKind::Match) {
            return Skip;
        }

        let mut r = Success;
        let m = node(
            self.prev_loc(),
            NodeKind::Match {
                test: None,
                cases: vec![],
            },
        );
        *expr = Some(m.clone());

        let mut test = None;
        if self.opt_postfix(&mut test) != Success {
            self.error_here("expected a match test-expression");
            r = Error;
        }
        if let NodeKind::Match { test: t, .. } = &mut m.borrow_mut().kind {
            *t = test;
        }

        if !self.has(TokenKind::LBrace) {
            self.error_here("expected { to start match cases");
            return Error;
        }

        while !self.has(TokenKind::RBrace) {
            if self.has(TokenKind::End) {
                self.error_here("expected a case or } to end match cases");
                r = Error;
                break;
            }

            let mut clause = None;
            let r2 = self.opt_lambda(&mut clause, false);
            if r2 == Skip {
                break;
            }
            if let Some(clause) = clause {
                if let NodeKind::Match { cases, .. } = &mut m.borrow_mut().kind {
                    cases.push(clause);
                }
            }
            if r2 == Error {
                r = Error;
            }
        }

        r
    }

    fn opt_tuple(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // tuple <- '(' (expr (',' expr)*)? ')'
        if !self.has(TokenKind::LParen) {
            return Skip;
        }

        let tup = node(self.prev_loc(), NodeKind::Tuple { seq: vec![] });
        *expr = Some(tup.clone());

        if self.has(TokenKind::RParen) {
            return Success;
        }

        let mut r = Success;
        loop {
            let mut elem = None;
            let r2 = self.opt_expr(&mut elem);
            if r2 == Skip {
                break;
            }
            if r2 == Error {
                self.error_here("expected an expression");
                self.restart_before(&[TokenKind::Comma, TokenKind::RParen]);
                r = Error;
            }
            if let Some(elem) = elem {
                if let NodeKind::Tuple { seq } = &mut tup.borrow_mut().kind {
                    seq.push(elem);
                }
            }
            if !self.has(TokenKind::Comma) {
                break;
            }
        }

        if !self.has(TokenKind::RParen) {
            self.error_here("expected , or )");
            r = Error;
        }

        let end = self.prev_loc();
        tup.borrow_mut().location.extend(&end);
        r
    }

    fn opt_lambda(&mut self, expr: &mut Option<Ast>, is_func: bool) -> Outcome {
        // lambda <- '{' (typeparams? (param (',' param)*)? '=>')? (expr ';'*)* '}'
        if !self.has(TokenKind::LBrace) {
            return Skip;
        }

        let lambda = if is_func {
            expr.clone().expect("function lambda is preallocated")
        } else {
            let loc = self.prev_loc();
            let infer = node(loc.clone(), NodeKind::InferType);
            node(
                loc,
                NodeKind::Lambda {
                    typeparams: vec![],
                    params: vec![],
                    result: Some(infer),
                    body: vec![],
                },
            )
        };
        let open = self.prev_loc();
        lambda.borrow_mut().location = open;
        *expr = Some(lambda.clone());

        self.in_scope(&lambda.clone(), |p| {
            let mut typeparams = Vec::new();
            let mut r = p.opt_type_params(&mut typeparams);
            let last_tp = typeparams.last().map(|t| t.borrow().location.clone());
            if let NodeKind::Lambda { typeparams: tp, .. } = &mut lambda.borrow_mut().kind {
                tp.extend(typeparams);
            }
            if is_func && r != Skip {
                if let Some(loc) = last_tp {
                    p.error_at(loc, "function type parameters can't be placed in lambda position");
                }
            }

            let mut has_fatarrow = true;
            if r == Skip {
                has_fatarrow = p.peek_delimited(TokenKind::FatArrow, TokenKind::RBrace);
                r = Success;
                p.rewind();
            }

            if has_fatarrow {
                let mut params = Vec::new();
                let r2 = p.opt_param_list(&mut params, TokenKind::FatArrow);
                let last_param = params.last().map(|t| t.borrow().location.clone());
                if let NodeKind::Lambda { params: ps, .. } = &mut lambda.borrow_mut().kind {
                    ps.extend(params);
                }
                if is_func && r2 != Skip {
                    if let Some(loc) = last_param {
                        p.error_at(loc, "function parameters can't be placed in lambda position");
                    }
                }
                if r2 == Error {
                    r = Error;
                }
                if !p.has(TokenKind::FatArrow) {
                    p.error_here("expected =>");
                    r = Error;
                }
            }

            while !p.has(TokenKind::RBrace) {
                if p.has(TokenKind::End) {
                    let loc = lambda.borrow().location.clone();
                    p.error_at(loc, "unexpected EOF in lambda body");
                    return Error;
                }

                let mut e = None;
                let r2 = p.opt_expr(&mut e);
                if r2 == Skip {
                    break;
                }
                if let Some(e) = e {
                    if let NodeKind::Lambda { body, .. } = &mut lambda.borrow_mut().kind {
                        body.push(e);
                    }
                }
                if r2 == Error {
                    r = Error;
                }
                while p.has(TokenKind::Semicolon) {}
            }

            r
        })
    }

    fn opt_ref(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // ref <- ident, only when it resolves to a param/let/var in scope
        if !self.peek(TokenKind::Ident) {
            return Skip;
        }

        let name = self.lookahead[self.la - 1].location.view().to_string();
        let local = self.lookup(&name).is_some_and(|def| {
            matches!(
                def.borrow().kind(),
                Kind::Param | Kind::Let | Kind::Var
            )
        });
        self.rewind();

        if !local {
            return Skip;
        }
        if !self.has(TokenKind::Ident) {
            return Skip;
        }

        *expr = Some(node(self.prev_loc(), NodeKind::Ref));
        Success
    }

    fn opt_constant(&mut self, expr: &mut Option<Ast>) -> Outcome {
        let kind = if self.has(TokenKind::EscapedString) {
            NodeKind::EscapedString
        } else if self.has(TokenKind::UnescapedString) {
            NodeKind::UnescapedString
        } else if self.has(TokenKind::Character) {
            NodeKind::Character
        } else if self.has(TokenKind::Int) {
            NodeKind::Int
        } else if self.has(TokenKind::Float) {
            NodeKind::Float
        } else if self.has(TokenKind::Hex) {
            NodeKind::Hex
        } else if self.has(TokenKind::Binary) {
            NodeKind::Binary
        } else if self.has(TokenKind::Bool) {
            NodeKind::Bool
        } else {
            return Skip;
        };

        *expr = Some(node(self.prev_loc(), kind));
        Success
    }

    fn object_literal(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // objectliteral <- 'new' ('@' ident)? type? typebody
        let obj = node(
            self.prev_loc(),
            NodeKind::ObjectLiteral {
                in_region: None,
                inherits: None,
                members: vec![],
            },
        );
        *expr = Some(obj.clone());

        self.in_scope(&obj.clone(), |p| {
            let mut r = Success;

            if p.has_symbol("@") {
                if p.has(TokenKind::Ident) {
                    let loc = p.prev_loc();
                    if let NodeKind::ObjectLiteral { in_region, .. } = &mut obj.borrow_mut().kind {
                        *in_region = Some(loc);
                    }
                } else {
                    p.error_here("expected an identifier");
                    r = Error;
                }
            }

            // If the body doesn't open immediately, an inheritance clause
            // comes first.
            let inherits = !p.peek(TokenKind::LBrace);
            p.rewind();

            if inherits {
                let mut ty = None;
                if p.type_expr(&mut ty) == Error {
                    r = Error;
                }
                if p.check_inherit(ty.as_ref()) == Error {
                    r = Error;
                }
                if let NodeKind::ObjectLiteral { inherits: i, .. } = &mut obj.borrow_mut().kind {
                    *i = ty;
                }
            }

            let mut members = Vec::new();
            if p.type_body(&mut members) != Success {
                r = Error;
            }
            if let NodeKind::ObjectLiteral { members: m, .. } = &mut obj.borrow_mut().kind {
                m.extend(members);
            }

            r
        })
    }

    fn opt_new(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // new <- 'new' ('@' ident)? (tuple / typebody / type typebody)
        if !self.has(TokenKind::New) {
            return Skip;
        }

        let ctor = self.peek(TokenKind::LParen)
            || (self.peek_symbol("@") && self.peek(TokenKind::Ident) && self.peek(TokenKind::LParen));
        self.rewind();

        if !ctor {
            return self.object_literal(expr);
        }

        let mut r = Success;
        let n = node(
            self.prev_loc(),
            NodeKind::New {
                args: None,
                in_region: None,
            },
        );
        *expr = Some(n.clone());

        if self.has_symbol("@") {
            if self.has(TokenKind::Ident) {
                let loc = self.prev_loc();
                if let NodeKind::New { in_region, .. } = &mut n.borrow_mut().kind {
                    *in_region = Some(loc);
                }
            } else {
                self.error_here("expected an identifier");
                r = Error;
            }
        }

        let mut args = None;
        if self.opt_tuple(&mut args) != Success {
            r = Error;
        }
        if let NodeKind::New { args: a, .. } = &mut n.borrow_mut().kind {
            *a = args;
        }

        r
    }

    fn opt_atom(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // atom <- tuple / constant / new / when / try / match / lambda
        let r = self.opt_tuple(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_constant(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_new(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_when(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_try(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_match(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_lambda(expr, false);
        if r != Skip {
            return r;
        }
        Skip
    }

    fn opt_typeargs(&mut self, typeargs: &mut Vec<Ast>) -> Outcome {
        // typeargs <- '[' type (',' type)* ']'
        if !self.has(TokenKind::LSquare) {
            return Skip;
        }

        let mut r = Success;
        loop {
            let mut arg = None;
            if self.type_expr(&mut arg) != Success {
                self.restart_before(&[TokenKind::Comma, TokenKind::RSquare]);
                r = Error;
            }
            if let Some(arg) = arg {
                typeargs.push(arg);
            }
            if !self.has(TokenKind::Comma) {
                break;
            }
        }

        if !self.has(TokenKind::RSquare) {
            self.error_here("expected , or ]");
            r = Error;
        }

        r
    }

    fn opt_selector(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // selector <- name typeargs? ('::' name typeargs?)*
        let ok = self.peek(TokenKind::Ident) || self.peek(TokenKind::Symbol);
        self.rewind();
        if !ok {
            return Skip;
        }

        let mut r = Success;

        // The previous expression becomes the left-hand side.
        let placeholder = self.loc();
        let sel = node(
            placeholder,
            NodeKind::Select {
                expr: expr.take(),
                typeref: None,
                args: None,
            },
        );
        *expr = Some(sel.clone());

        let mut ty = None;
        if self.opt_type_ref(&mut ty) != Success {
            r = Error;
        }
        if let Some(tr) = ty {
            let loc = tr.borrow().location.clone();
            let mut n = sel.borrow_mut();
            n.location = loc;
            if let NodeKind::Select { typeref, .. } = &mut n.kind {
                *typeref = Some(tr);
            }
        }

        r
    }

    fn opt_select(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // select <- '.' selector tuple?
        if !self.has(TokenKind::Dot) {
            return Skip;
        }

        let mut r = Success;
        if self.opt_selector(expr) != Success {
            self.error_here("expected a selector");
            r = Error;
        }

        let mut args = None;
        if self.opt_tuple(&mut args) == Error {
            r = Error;
        }
        if args.is_some() {
            if let Some(sel) = expr {
                if let NodeKind::Select { args: a, .. } = &mut sel.borrow_mut().kind {
                    *a = args;
                }
            }
        }

        r
    }

    fn opt_apply_sugar(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // applysugar <- ref (typeargs? tuple?)?
        let mut r = self.opt_ref(expr);
        if r == Skip {
            return Skip;
        }

        let ok = self.peek(TokenKind::LSquare) || self.peek(TokenKind::LParen);
        self.rewind();
        if !ok {
            return r;
        }

        // `f[A](x)` is `f.apply[A](x)`.
        let mut typeargs = Vec::new();
        if self.opt_typeargs(&mut typeargs) == Error {
            r = Error;
        }
        let apply = node(self.name_apply.clone(), NodeKind::TypeName { typeargs });
        let tr = node(
            self.name_apply.clone(),
            NodeKind::TypeRef {
                typenames: vec![apply],
            },
        );

        let mut args = None;
        if self.opt_tuple(&mut args) == Error {
            r = Error;
        }

        let sel = node(
            self.name_apply.clone(),
            NodeKind::Select {
                expr: expr.take(),
                typeref: Some(tr),
                args,
            },
        );
        *expr = Some(sel);
        r
    }

    fn opt_postfix_start(&mut self, expr: &mut Option<Ast>) -> Outcome {
        let r = self.opt_atom(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_apply_sugar(expr);
        if r != Skip {
            return r;
        }
        Skip
    }

    fn opt_postfix(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // postfix <- postfixstart select*
        let mut r = self.opt_postfix_start(expr);
        if r == Skip {
            return Skip;
        }

        loop {
            let r2 = self.opt_select(expr);
            if r2 == Skip {
                break;
            }
            if r2 == Error {
                r = Error;
            }
        }

        r
    }

    fn opt_infix(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // infix <- (postfix / selector)+
        let mut r = Success;

        loop {
            let mut next = None;
            if self.opt_postfix(&mut next) != Skip {
                match expr.take() {
                    None => {
                        // First element of the expression.
                        *expr = next;
                    }
                    Some(prev) => {
                        let pending = matches!(
                            &prev.borrow().kind,
                            NodeKind::Select { args: None, .. }
                        );
                        if pending {
                            // Right-hand side of an infix operator.
                            if let NodeKind::Select { args, .. } = &mut prev.borrow_mut().kind {
                                *args = next;
                            }
                            *expr = Some(prev);
                        } else {
                            // Adjacency means `prev.apply(next)`.
                            let loc = prev.borrow().location.clone();
                            let apply = node(
                                self.name_apply.clone(),
                                NodeKind::TypeName { typeargs: vec![] },
                            );
                            let tr = node(
                                loc.clone(),
                                NodeKind::TypeRef {
                                    typenames: vec![apply],
                                },
                            );
                            let sel = node(
                                loc,
                                NodeKind::Select {
                                    expr: Some(prev),
                                    typeref: Some(tr),
                                    args: next,
                                },
                            );
                            *expr = Some(sel);
                        }
                    }
                }
            } else {
                let r2 = self.opt_selector(expr);
                if r2 == Skip {
                    break;
                }
                if r2 == Error {
                    r = Error;
                }
            }
        }

        if expr.is_none() {
            return Skip;
        }
        r
    }

    fn decl(&mut self, expr: &mut Option<Ast>, var: bool) -> Outcome {
        if !self.has(TokenKind::Ident) {
            self.error_here("expected an identifier");
            return Error;
        }

        let loc = self.prev_loc();
        let infer = node(loc.clone(), NodeKind::InferType);
        let kind = if var {
            NodeKind::Var { ty: infer }
        } else {
            NodeKind::Let { ty: infer }
        };
        let d = node(loc.clone(), kind);
        self.set_sym(&loc, &d);
        *expr = Some(d);
        Success
    }

    fn opt_let(&mut self, expr: &mut Option<Ast>) -> Outcome {
        if !self.has(TokenKind::Let) {
            return Skip;
        }
        self.decl(expr, false)
    }

    fn opt_var(&mut self, expr: &mut Option<Ast>) -> Outcome {
        if !self.has(TokenKind::Var) {
            return Skip;
        }
        self.decl(expr, true)
    }

    fn opt_throw(&mut self, expr: &mut Option<Ast>) -> Outcome {
        if !self.has(TokenKind::Throw) {
            return Skip;
        }

        let thr = node(self.prev_loc(), NodeKind::Throw { expr: None });
        *expr = Some(thr.clone());

        let mut inner = None;
        let mut r = self.opt_expr(&mut inner);
        if r == Skip {
            self.error_here("expected a throw expression");
            r = Error;
        }
        if let NodeKind::Throw { expr: e } = &mut thr.borrow_mut().kind {
            *e = inner;
        }

        r
    }

    fn opt_expr_start(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // exprstart <- let / var / throw / infix
        let r = self.opt_let(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_var(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_throw(expr);
        if r != Skip {
            return r;
        }
        let r = self.opt_infix(expr);
        if r != Skip {
            return r;
        }
        Skip
    }

    fn opt_expr(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // expr <- exprstart oftype? ('=' expr)?
        let mut r = self.opt_expr_start(expr);
        if r == Skip {
            return Skip;
        }

        if self.peek(TokenKind::Colon) {
            self.rewind();
            let inner = expr.take();
            let loc = inner
                .as_ref()
                .map(|e| e.borrow().location.clone())
                .unwrap_or_else(|| self.loc());
            let ot = node(
                loc,
                NodeKind::Oftype {
                    expr: inner,
                    ty: None,
                },
            );
            *expr = Some(ot.clone());

            let mut ty = None;
            if self.oftype(&mut ty) != Success {
                r = Error;
            }
            if let NodeKind::Oftype { ty: t, .. } = &mut ot.borrow_mut().kind {
                *t = ty;
            };
        }

        if self.has(TokenKind::Equals) {
            let asgn = node(
                self.prev_loc(),
                NodeKind::Assign {
                    left: expr.take(),
                    right: None,
                },
            );
            *expr = Some(asgn.clone());

            let mut right = None;
            if self.opt_expr(&mut right) != Success {
                self.error_here("expected an expression on the right-hand side");
                r = Error;
            }
            if let NodeKind::Assign { right: rhs, .. } = &mut asgn.borrow_mut().kind {
                *rhs = right;
            };
        }

        r
    }

    fn init_expr(&mut self, expr: &mut Option<Ast>) -> Outcome {
        // initexpr <- '=' expr, encoded as a zero-argument lambda
        if !self.has(TokenKind::Equals) {
            return Skip;
        }

        let loc = self.prev_loc();
        let infer = node(loc.clone(), NodeKind::InferType);
        let lambda = node(
            loc,
            NodeKind::Lambda {
                typeparams: vec![],
                params: vec![],
                result: Some(infer),
                body: vec![],
            },
        );
        *expr = Some(lambda.clone());

        self.in_scope(&lambda.clone(), |p| {
            let mut init = None;
            let r = p.opt_expr(&mut init);
            if r == Skip {
                p.error_here("expected an initializer expression");
                return Error;
            }
            if let Some(init) = init {
                if let NodeKind::Lambda { body, .. } = &mut lambda.borrow_mut().kind {
                    body.push(init);
                }
            }
            r
        })
    }

    // ---- types ----

    fn opt_tuple_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // tupletype <- '(' (type (',' type)*)? ')'
        if !self.has(TokenKind::LParen) {
            return Skip;
        }

        let tup = node(self.prev_loc(), NodeKind::TupleType { types: vec![] });
        *ty = Some(tup.clone());

        if self.has(TokenKind::RParen) {
            return Success;
        }

        let mut r = Success;
        loop {
            let mut elem = None;
            if self.type_expr(&mut elem) != Success {
                r = Error;
                self.restart_before(&[TokenKind::Comma, TokenKind::RParen]);
            }
            if let Some(elem) = elem {
                if let NodeKind::TupleType { types } = &mut tup.borrow_mut().kind {
                    types.push(elem);
                }
            }
            if !self.has(TokenKind::Comma) {
                break;
            }
        }

        if !self.has(TokenKind::RParen) {
            self.error_here("expected )");
            r = Error;
        }

        let end = self.prev_loc();
        tup.borrow_mut().location.extend(&end);

        // A singleton collapses to its element.
        let single = match &tup.borrow().kind {
            NodeKind::TupleType { types } if types.len() == 1 => Some(types[0].clone()),
            _ => None,
        };
        if let Some(single) = single {
            *ty = Some(single);
        }

        r
    }

    fn opt_module_name(&mut self, name: &mut Option<Ast>) -> Outcome {
        // modulename <- escapedstring typeargs?
        if !self.has(TokenKind::EscapedString) {
            return Skip;
        }

        let mut r = Success;
        let mn = node(self.prev_loc(), NodeKind::ModuleName { typeargs: vec![] });
        *name = Some(mn.clone());

        // Resolve relative to the importing file first, then the stdlib.
        let string_loc = self.prev_loc();
        let base = paths::to_directory(&escaped_content(&string_loc));
        let origin = self.source.origin.clone();
        let relative = paths::join(&origin, &base);
        let std_path = paths::join(&self.stdlib, &base);
        let found = paths::canonical(&relative).or_else(|| paths::canonical(&std_path));

        match found {
            Some(found) => {
                let index = match self.imports.iter().position(|i| *i == found) {
                    Some(i) => i,
                    None => {
                        self.imports.push(found);
                        self.imports.len() - 1
                    }
                };
                mn.borrow_mut().location = self.ident.ident(&format!("$module-{}", index));
            }
            None => {
                let mut diag = Diagnostic::new(
                    Some(string_loc),
                    format!("couldn't locate module \"{}\"", base),
                )
                .plain_note(format!("tried {}", relative))
                .plain_note(format!("tried {}", std_path));

                let leaf = base.rsplit('/').next().unwrap_or(&base);
                let mut candidates = paths::directories(&paths::parent(&origin));
                candidates.extend(paths::directories(&self.stdlib));
                if let Some(hint) = suggest::did_you_mean(leaf, candidates) {
                    diag = diag.plain_note(hint);
                }

                self.report(diag);
                r = Error;
            }
        }

        let mut typeargs = Vec::new();
        if self.opt_typeargs(&mut typeargs) == Error {
            r = Error;
        }
        if !typeargs.is_empty() {
            if let NodeKind::ModuleName { typeargs: ta } = &mut mn.borrow_mut().kind {
                *ta = typeargs;
            }
        }

        r
    }

    fn opt_type_ref(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // typeref <- (modulename / typename) ('::' typename)*
        let ok = self.peek(TokenKind::Ident)
            || self.peek(TokenKind::Symbol)
            || self.peek(TokenKind::EscapedString)
            || self.peek(TokenKind::UnescapedString);
        self.rewind();
        if !ok {
            return Skip;
        }

        let typeref = node(self.loc(), NodeKind::TypeRef { typenames: vec![] });
        *ty = Some(typeref.clone());

        let mut r = Success;

        // A typeref can start with a module name.
        let mut name = None;
        let rm = self.opt_module_name(&mut name);
        if rm != Skip {
            if rm == Error {
                r = Error;
            }
            if let Some(name) = name {
                let loc = name.borrow().location.clone();
                let mut t = typeref.borrow_mut();
                t.location = loc;
                if let NodeKind::TypeRef { typenames } = &mut t.kind {
                    typenames.push(name);
                }
            }
            if !self.has(TokenKind::DoubleColon) {
                return r;
            }
        }

        loop {
            if !self.has(TokenKind::Ident) && !self.has(TokenKind::Symbol) {
                self.error_here("expected a type identifier");
                return Error;
            }

            let tn = node(self.prev_loc(), NodeKind::TypeName { typeargs: vec![] });
            if let NodeKind::TypeRef { typenames } = &mut typeref.borrow_mut().kind {
                typenames.push(tn.clone());
            }

            let mut typeargs = Vec::new();
            if self.opt_typeargs(&mut typeargs) == Error {
                r = Error;
            }
            if !typeargs.is_empty() {
                if let NodeKind::TypeName { typeargs: ta } = &mut tn.borrow_mut().kind {
                    *ta = typeargs;
                }
            }

            let end = self.prev_loc();
            typeref.borrow_mut().location.extend(&end);

            if !self.has(TokenKind::DoubleColon) {
                break;
            }
        }

        r
    }

    fn opt_type_list(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // typelist <- ident '...', resolving to a typeparam list
        let ok = self.peek(TokenKind::Ident) && self.peek(TokenKind::Ellipsis);
        self.rewind();
        if !ok {
            return Skip;
        }

        self.has(TokenKind::Ident);
        let tl = node(self.prev_loc(), NodeKind::TypeList);
        *ty = Some(tl.clone());
        self.has(TokenKind::Ellipsis);

        let mut r = Success;
        let loc = tl.borrow().location.clone();
        match self.lookup(loc.view()) {
            None => {
                self.error_at(loc, "couldn't find a definition of this type list");
                r = Error;
            }
            Some(def) if def.borrow().kind() != Kind::TypeParamList => {
                let def_loc = def.borrow().location.clone();
                let kind_name = def.borrow().kind().name();
                self.report(
                    Diagnostic::new(
                        Some(loc),
                        format!("expected a type list, but got a {}", kind_name),
                    )
                    .note(def_loc, "the definition is here"),
                );
                r = Error;
            }
            Some(_) => {}
        }

        r
    }

    fn opt_cap_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // captype <- 'iso' / 'mut' / 'imm' / 'Self' / tupletype / typelist / typeref
        if self.has(TokenKind::Iso) {
            *ty = Some(node(self.prev_loc(), NodeKind::Iso));
            return Success;
        }
        if self.has(TokenKind::Mut) {
            *ty = Some(node(self.prev_loc(), NodeKind::Mut));
            return Success;
        }
        if self.has(TokenKind::Imm) {
            *ty = Some(node(self.prev_loc(), NodeKind::Imm));
            return Success;
        }
        if self.has(TokenKind::SelfType) {
            *ty = Some(node(self.prev_loc(), NodeKind::SelfType));
            return Success;
        }

        let r = self.opt_tuple_type(ty);
        if r != Skip {
            return r;
        }
        let r = self.opt_type_list(ty);
        if r != Skip {
            return r;
        }
        let r = self.opt_type_ref(ty);
        if r != Skip {
            return r;
        }
        Skip
    }

    fn opt_view_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // viewtype <- captype (('~>' / '<~') captype)*
        let mut r = self.opt_cap_type(ty);
        if r == Skip {
            return r;
        }

        while self.peek_symbol("~>") || self.peek_symbol("<~") {
            self.rewind();

            let view = self.has_symbol("~>");
            if !view {
                self.has_symbol("<~");
            }

            let left = ty.take().expect("captype succeeded");
            let location = left.borrow().location.range(&self.prev_loc());
            let pair = node(
                location,
                if view {
                    NodeKind::ViewType { left, right: None }
                } else {
                    NodeKind::ExtractType { left, right: None }
                },
            );
            *ty = Some(pair.clone());

            let mut right = None;
            let r2 = self.opt_cap_type(&mut right);
            if r2 != Success {
                if r2 == Skip {
                    self.error_here("expected a type");
                }
                r = Error;
                break;
            }

            if let Some(right) = right {
                pair.borrow_mut().location.extend(&right.borrow().location);
                match &mut pair.borrow_mut().kind {
                    NodeKind::ViewType { right: rhs, .. }
                    | NodeKind::ExtractType { right: rhs, .. } => *rhs = Some(right),
                    _ => {}
                }
            }
        }

        self.rewind();
        r
    }

    fn opt_function_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // functiontype <- viewtype ('->' functiontype)?  (right associative)
        let r = self.opt_view_type(ty);
        if r != Success {
            return r;
        }

        if !self.has_symbol("->") {
            return Success;
        }

        let left = ty.take().expect("viewtype succeeded");
        let location = left.borrow().location.range(&self.prev_loc());
        let functype = node(location, NodeKind::FunctionType { left, right: None });
        *ty = Some(functype.clone());

        let mut right = None;
        let r2 = self.opt_function_type(&mut right);
        if let Some(right) = right {
            functype
                .borrow_mut()
                .location
                .extend(&right.borrow().location);
            if let NodeKind::FunctionType { right: rhs, .. } = &mut functype.borrow_mut().kind {
                *rhs = Some(right);
            }
        }
        if r2 != Success {
            return Error;
        }

        Success
    }

    fn opt_isect_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // isecttype <- functiontype ('&' functiontype)*
        let mut r = self.opt_function_type(ty);
        if r != Success {
            return r;
        }

        while self.has_symbol("&") {
            let mut next = None;
            let r2 = self.opt_function_type(&mut next);
            if r2 != Success {
                if r2 == Skip {
                    self.error_here("expected a type");
                }
                r = Error;
            }
            if let Some(next) = next {
                let left = ty.take().expect("isect operand present");
                *ty = Some(dnf::conjunction(left, next));
            }
        }

        r
    }

    fn opt_throw_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // throwtype <- 'throw'? isecttype
        let throwing = self.has(TokenKind::Throw);

        let r = self.opt_isect_type(ty);
        if r == Skip {
            return Skip;
        }

        if throwing {
            let inner = ty.take().expect("isecttype succeeded");
            *ty = Some(dnf::throwtype(inner));
        }

        r
    }

    fn opt_union_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // uniontype <- throwtype ('|' throwtype)*
        let mut r = self.opt_throw_type(ty);
        if r != Success {
            return r;
        }

        while self.has_symbol("|") {
            let mut next = None;
            let r2 = self.opt_throw_type(&mut next);
            if r2 != Success {
                if r2 == Skip {
                    self.error_here("expected a type");
                }
                r = Error;
            }
            if let Some(next) = next {
                let left = ty.take().expect("union operand present");
                *ty = Some(dnf::disjunction(left, next));
            }
        }

        r
    }

    fn type_expr(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // type <- uniontype
        let mut r = self.opt_union_type(ty);
        if r == Skip {
            self.error_here("expected a type");
            r = Error;
        }
        r
    }

    fn init_type(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // inittype <- '=' type
        if !self.has(TokenKind::Equals) {
            return Skip;
        }
        if self.type_expr(ty) != Success {
            return Error;
        }
        Success
    }

    fn oftype(&mut self, ty: &mut Option<Ast>) -> Outcome {
        // oftype <- ':' type
        if !self.has(TokenKind::Colon) {
            return Skip;
        }
        self.type_expr(ty)
    }

    // ---- parameters ----

    fn opt_param(&mut self, param: &mut Option<Ast>) -> Outcome {
        // An identifier followed by `:`, `=`, `,`, `=>`, or `)` is a
        // parameter; anything else is an expression pattern.
        if self.peek(TokenKind::Ident) {
            let isparam = self.peek(TokenKind::Colon)
                || self.peek(TokenKind::Equals)
                || self.peek(TokenKind::Comma)
                || self.peek(TokenKind::FatArrow)
                || self.peek(TokenKind::RParen);
            self.rewind();

            if isparam {
                let mut r = Success;
                self.has(TokenKind::Ident);
                let loc = self.prev_loc();
                let p = node(
                    loc.clone(),
                    NodeKind::Param {
                        ty: None,
                        dflt: None,
                    },
                );

                let mut ty = None;
                if self.oftype(&mut ty) == Error {
                    r = Error;
                }
                let mut dflt = None;
                if self.init_expr(&mut dflt) == Error {
                    r = Error;
                }

                let ty = ty.unwrap_or_else(|| node(loc.clone(), NodeKind::InferType));
                if let NodeKind::Param { ty: t, dflt: d } = &mut p.borrow_mut().kind {
                    *t = Some(ty);
                    *d = dflt;
                }

                self.set_sym(&loc, &p);
                *param = Some(p);
                return r;
            }
        }

        self.opt_expr(param)
    }

    fn opt_param_list(&mut self, params: &mut Vec<Ast>, terminator: TokenKind) -> Outcome {
        let mut r = Success;
        loop {
            let mut param = None;
            let r2 = self.opt_param(&mut param);
            if r2 == Skip {
                break;
            }
            if let Some(param) = param {
                params.push(param);
            }
            if r2 == Error {
                r = Error;
                self.restart_before(&[TokenKind::Comma, terminator]);
            }
            if !self.has(TokenKind::Comma) {
                break;
            }
        }
        r
    }

    fn opt_params(&mut self, params: &mut Vec<Ast>) -> Outcome {
        // params <- '(' (param (',' param)*)? ')'
        if !self.has(TokenKind::LParen) {
            return Skip;
        }

        let mut r = self.opt_param_list(params, TokenKind::RParen);

        if !self.has(TokenKind::RParen) {
            self.error_here("expected )");
            r = Error;
        }

        r
    }

    // ---- members ----

    fn opt_field(&mut self, member: &mut Option<Ast>) -> Outcome {
        // field <- ident oftype? initexpr? ';'
        if !self.has(TokenKind::Ident) {
            return Skip;
        }

        let loc = self.prev_loc();
        let field = node(
            loc.clone(),
            NodeKind::Field {
                ty: None,
                init: None,
            },
        );
        *member = Some(field.clone());

        let mut r = Success;

        let mut ty = None;
        if self.oftype(&mut ty) == Error {
            r = Error;
        }
        let mut init = None;
        if self.init_expr(&mut init) == Error {
            r = Error;
        }
        if let NodeKind::Field { ty: t, init: i } = &mut field.borrow_mut().kind {
            *t = ty;
            *i = init;
        }

        if !self.has(TokenKind::Semicolon) {
            self.error_here("expected ;");
            r = Error;
        }

        self.set_sym(&loc, &field);
        r
    }

    fn opt_function(&mut self, member: &mut Option<Ast>) -> Outcome {
        // function <- (ident / symbol)? typeparams? params oftype? (lambda / ';')
        let ok = self.peek(TokenKind::Symbol)
            || (self.peek(TokenKind::Ident)
                && (self.peek(TokenKind::LSquare) || self.peek(TokenKind::LParen)))
            || (self.peek(TokenKind::LSquare) || self.peek(TokenKind::LParen));
        self.rewind();
        if !ok {
            return Skip;
        }

        let mut r = Success;
        let (location, name) = if self.has(TokenKind::Ident) || self.has(TokenKind::Symbol) {
            (self.prev_loc(), self.prev_loc())
        } else {
            // An unnamed function is `apply`.
            (self.lookahead[0].location.clone(), self.name_apply.clone())
        };

        let func = node(
            location.clone(),
            NodeKind::Function {
                name: name.clone(),
                lambda: None,
            },
        );
        *member = Some(func.clone());
        self.set_sym(&name, &func);

        let lambda = node(
            location,
            NodeKind::Lambda {
                typeparams: vec![],
                params: vec![],
                result: None,
                body: vec![],
            },
        );
        if let NodeKind::Function { lambda: l, .. } = &mut func.borrow_mut().kind {
            *l = Some(lambda.clone());
        }

        // The signature lives in the lambda's scope; the scope is re-entered
        // when the body is parsed below.
        let r2 = self.in_scope(&lambda.clone(), |p| {
            let mut r = Success;

            let mut typeparams = Vec::new();
            if p.opt_type_params(&mut typeparams) == Error {
                r = Error;
            }
            if let NodeKind::Lambda { typeparams: tp, .. } = &mut lambda.borrow_mut().kind {
                tp.extend(typeparams);
            }

            let mut params = Vec::new();
            if p.opt_params(&mut params) != Success {
                r = Error;
            }
            for param in &params {
                let (kind, loc, untyped) = {
                    let b = param.borrow();
                    let untyped = matches!(
                        &b.kind,
                        NodeKind::Param { ty: Some(t), .. }
                            if t.borrow().kind() == Kind::InferType
                    );
                    (b.kind(), b.location.clone(), untyped)
                };
                if kind != Kind::Param {
                    p.error_at(loc, "function parameters can't be patterns");
                } else if untyped {
                    p.error_at(loc, "function parameters must have types");
                }
            }
            if let NodeKind::Lambda { params: ps, .. } = &mut lambda.borrow_mut().kind {
                ps.extend(params);
            }

            let mut result = None;
            if p.oftype(&mut result) == Error {
                r = Error;
            }
            if result.is_some() {
                if let NodeKind::Lambda { result: res, .. } = &mut lambda.borrow_mut().kind {
                    *res = result;
                }
            }

            r
        });
        if r2 == Error {
            r = Error;
        }

        let mut body = Some(lambda);
        let r2 = self.opt_lambda(&mut body, true);
        if r2 != Skip {
            if r2 == Error {
                r = Error;
            }
        } else if !self.has(TokenKind::Semicolon) {
            self.error_here("expected a lambda or ;");
            r = Error;
        }

        r
    }

    fn opt_type_param(&mut self, tp: &mut Option<Ast>) -> Outcome {
        // typeparam <- ident '...'? oftype? inittype?
        if !self.has(TokenKind::Ident) {
            return Skip;
        }

        let loc = self.prev_loc();
        let list = self.has(TokenKind::Ellipsis);
        let param = node(
            loc.clone(),
            if list {
                NodeKind::TypeParamList {
                    upper: None,
                    dflt: None,
                }
            } else {
                NodeKind::TypeParam {
                    upper: None,
                    dflt: None,
                }
            },
        );
        *tp = Some(param.clone());

        let mut r = Success;

        let mut upper = None;
        if self.oftype(&mut upper) == Error {
            r = Error;
        }
        let mut dflt = None;
        if self.init_type(&mut dflt) == Error {
            r = Error;
        }
        match &mut param.borrow_mut().kind {
            NodeKind::TypeParam { upper: u, dflt: d }
            | NodeKind::TypeParamList { upper: u, dflt: d } => {
                *u = upper;
                *d = dflt;
            }
            _ => {}
        }

        self.set_sym(&loc, &param);
        r
    }

    fn opt_type_params(&mut self, typeparams: &mut Vec<Ast>) -> Outcome {
        // typeparams <- '[' typeparam (',' typeparam)* ']'
        if !self.has(TokenKind::LSquare) {
            return Skip;
        }

        let mut r = Success;
        loop {
            let mut tp = None;
            let r2 = self.opt_type_param(&mut tp);
            if r2 != Success {
                self.error_here("expected a type parameter");
                r = Error;
                self.restart_before(&[TokenKind::Comma, TokenKind::RSquare]);
            }
            if r2 != Skip {
                if let Some(tp) = tp {
                    typeparams.push(tp);
                }
            }
            if !self.has(TokenKind::Comma) {
                break;
            }
        }

        if !self.has(TokenKind::RSquare) {
            self.error_here("expected , or ]");
            r = Error;
        }

        r
    }

    /// Inheritance positions parse any type, then reject everything that is
    /// not a type reference or an intersection of them.
    fn check_inherit(&mut self, inherit: Option<&Ast>) -> Outcome {
        let Some(ty) = inherit else {
            return Skip;
        };

        let mut r = Success;
        let kind = ty.borrow().kind();

        if kind == Kind::IsectType {
            let types = match &ty.borrow().kind {
                NodeKind::IsectType { types } => types.clone(),
                _ => vec![],
            };
            for t in &types {
                if self.check_inherit(Some(t)) == Error {
                    r = Error;
                }
            }
        } else if kind != Kind::TypeRef {
            let loc = ty.borrow().location.clone();
            self.report(Diagnostic::new(
                Some(loc),
                format!("a type can't inherit from a {}", kind.name()),
            ));
            r = Error;
        }

        r
    }

    fn opt_using(&mut self, member: &mut Option<Ast>) -> Outcome {
        // using <- 'using' typeref ';'
        if !self.has(TokenKind::Using) {
            return Skip;
        }

        let use_node = node(self.prev_loc(), NodeKind::Using { ty: None });
        *member = Some(use_node.clone());

        let mut ty = None;
        let mut r = self.opt_type_ref(&mut ty);
        if r != Success {
            if r == Skip {
                self.error_here("expected a type reference");
            }
            r = Error;
        }
        if let NodeKind::Using { ty: t } = &mut use_node.borrow_mut().kind {
            *t = ty;
        }

        if !self.has(TokenKind::Semicolon) {
            self.error_here("expected ;");
            r = Error;
        }

        r
    }

    fn opt_type_alias(&mut self, member: &mut Option<Ast>) -> Outcome {
        // typealias <- 'type' ident typeparams? '=' type ';'
        if !self.has(TokenKind::Type) {
            return Skip;
        }

        let mut r = Success;
        if !self.has(TokenKind::Ident) {
            self.error_here("expected an identifier");
            r = Error;
        }

        let loc = self.prev_loc();
        let alias = node(
            loc.clone(),
            NodeKind::TypeAlias {
                typeparams: vec![],
                inherits: None,
            },
        );
        self.set_sym(&loc, &alias);
        *member = Some(alias.clone());

        let r2 = self.in_scope(&alias.clone(), |p| {
            let mut r = Success;

            let mut typeparams = Vec::new();
            if p.opt_type_params(&mut typeparams) == Error {
                r = Error;
            }

            if !p.has(TokenKind::Equals) {
                p.error_here("expected =");
                r = Error;
            }

            let mut inherits = None;
            if p.type_expr(&mut inherits) == Error {
                r = Error;
            }

            if !p.has(TokenKind::Semicolon) {
                p.error_here("expected ;");
                r = Error;
            }

            if let NodeKind::TypeAlias {
                typeparams: tp,
                inherits: i,
            } = &mut alias.borrow_mut().kind
            {
                tp.extend(typeparams);
                *i = inherits;
            }

            r
        });
        if r2 == Error {
            r = Error;
        }

        r
    }

    fn entity(&mut self, member: &mut Option<Ast>, interface: bool) -> Outcome {
        let kind = if interface {
            NodeKind::Interface {
                typeparams: vec![],
                inherits: None,
                members: vec![],
            }
        } else {
            NodeKind::Class {
                typeparams: vec![],
                inherits: None,
                members: vec![],
            }
        };
        let ent = node(self.loc(), kind);
        *member = Some(ent.clone());

        // The scope is released before the entity's own name is bound, so
        // the name lands in the enclosing scope.
        let mut r = self.in_scope(&ent.clone(), |p| {
            let mut r = Success;

            if p.has(TokenKind::Ident) {
                ent.borrow_mut().location = p.prev_loc();
            } else {
                p.error_here("expected an identifier");
                r = Error;
            }

            let mut typeparams = Vec::new();
            if p.opt_type_params(&mut typeparams) == Error {
                r = Error;
            }

            let mut inherits = None;
            if p.oftype(&mut inherits) == Error {
                r = Error;
            }

            let mut members = Vec::new();
            if p.type_body(&mut members) == Error {
                r = Error;
            }

            match &mut ent.borrow_mut().kind {
                NodeKind::Class {
                    typeparams: tp,
                    inherits: i,
                    members: m,
                }
                | NodeKind::Interface {
                    typeparams: tp,
                    inherits: i,
                    members: m,
                } => {
                    tp.extend(typeparams);
                    *i = inherits;
                    m.extend(members);
                }
                _ => {}
            }

            r
        });

        let name = ent.borrow().location.clone();
        self.set_sym(&name, &ent);

        let inherits = match &ent.borrow().kind {
            NodeKind::Class { inherits, .. } | NodeKind::Interface { inherits, .. } => {
                inherits.clone()
            }
            _ => None,
        };
        if self.check_inherit(inherits.as_ref()) == Error {
            r = Error;
        }

        r
    }

    fn opt_interface(&mut self, member: &mut Option<Ast>) -> Outcome {
        // interface <- 'interface' ident typeparams? oftype? typebody
        if !self.has(TokenKind::Interface) {
            return Skip;
        }
        self.entity(member, true)
    }

    fn opt_class(&mut self, member: &mut Option<Ast>) -> Outcome {
        // class <- 'class' ident typeparams? oftype? typebody
        if !self.has(TokenKind::Class) {
            return Skip;
        }

        let r = self.entity(member, false);
        let cls = member.clone().expect("entity allocated the class");
        self.synthesize_create(&cls);
        r
    }

    /// A class with no user `create` whose fields all have initializers
    /// gains `create(): (C[...] & iso) { new }`.
    fn synthesize_create(&mut self, cls: &Ast) {
        {
            let b = cls.borrow();
            let table = match b.symbols.as_ref() {
                Some(table) => table,
                None => return,
            };
            if table.get(self.name_create.view()).is_some() {
                return;
            }
            let members = match &b.kind {
                NodeKind::Class { members, .. } => members,
                _ => return,
            };
            for m in members {
                if let NodeKind::Field { init, .. } = &m.borrow().kind {
                    if init.is_none() {
                        return;
                    }
                }
            }
        }

        let loc = cls.borrow().location.clone();
        let typeparams = match &cls.borrow().kind {
            NodeKind::Class { typeparams, .. } => typeparams.clone(),
            _ => vec![],
        };

        let mut typeargs = Vec::new();
        for tp in &typeparams {
            let tp_loc = tp.borrow().location.clone();
            if tp.borrow().kind() == Kind::TypeParamList {
                typeargs.push(node(tp_loc, NodeKind::TypeList));
            } else {
                let ta = node(tp_loc, NodeKind::TypeName { typeargs: vec![] });
                let tr = node(
                    loc.clone(),
                    NodeKind::TypeRef {
                        typenames: vec![ta],
                    },
                );
                typeargs.push(tr);
            }
        }

        let tn = node(loc.clone(), NodeKind::TypeName { typeargs });
        let tr = node(
            loc.clone(),
            NodeKind::TypeRef {
                typenames: vec![tn],
            },
        );
        let iso = node(loc.clone(), NodeKind::Iso);
        let isect = node(
            loc.clone(),
            NodeKind::IsectType {
                types: vec![tr, iso],
            },
        );

        let new_expr = node(
            loc.clone(),
            NodeKind::New {
                args: None,
                in_region: None,
            },
        );
        let lambda = node(
            loc.clone(),
            NodeKind::Lambda {
                typeparams: vec![],
                params: vec![],
                result: Some(isect),
                body: vec![new_expr],
            },
        );
        if let Some(table) = lambda.borrow_mut().symbols.as_mut() {
            table.parent = Some(Rc::downgrade(cls));
        }

        let create = node(
            loc,
            NodeKind::Function {
                name: self.name_create.clone(),
                lambda: Some(lambda),
            },
        );

        let mut b = cls.borrow_mut();
        if let NodeKind::Class { members, .. } = &mut b.kind {
            members.push(create.clone());
        }
        if let Some(table) = b.symbols.as_mut() {
            table.set(self.name_create.view(), &create);
        }
    }

    fn opt_module_def(&mut self, module: &mut Option<Ast>) -> Outcome {
        // moduledef <- 'module' typeparams? oftype? ';'
        if !self.has(TokenKind::Module) {
            return Skip;
        }

        if let Some(prev) = module {
            let prev_loc = prev.borrow().location.clone();
            let here = self.prev_loc();
            self.report(
                Diagnostic::new(Some(here), "the module has already been defined")
                    .note(prev_loc, "the previous definition is here"),
            );
            self.restart_after(&[TokenKind::Semicolon]);
            return Error;
        }

        let m = node(
            self.prev_loc(),
            NodeKind::Module {
                typeparams: vec![],
                inherits: None,
            },
        );
        *module = Some(m.clone());

        let mut r = Success;

        let mut typeparams = Vec::new();
        if self.opt_type_params(&mut typeparams) == Error {
            r = Error;
        }

        let mut inherits = None;
        if self.oftype(&mut inherits) == Error {
            r = Error;
        }
        if self.check_inherit(inherits.as_ref()) == Error {
            r = Error;
        }

        if let NodeKind::Module {
            typeparams: tp,
            inherits: i,
        } = &mut m.borrow_mut().kind
        {
            tp.extend(typeparams);
            *i = inherits;
        }

        if !self.has(TokenKind::Semicolon) {
            self.error_here("expected ;");
            r = Error;
        }

        r
    }

    fn opt_member(&mut self, member: &mut Option<Ast>) -> Outcome {
        // member <- class / interface / typealias / using / function / field
        let r = self.opt_class(member);
        if r != Skip {
            return r;
        }
        let r = self.opt_interface(member);
        if r != Skip {
            return r;
        }
        let r = self.opt_type_alias(member);
        if r != Skip {
            return r;
        }
        let r = self.opt_using(member);
        if r != Skip {
            return r;
        }
        let r = self.opt_function(member);
        if r != Skip {
            return r;
        }
        let r = self.opt_field(member);
        if r != Skip {
            return r;
        }
        Skip
    }

    fn type_body(&mut self, members: &mut Vec<Ast>) -> Outcome {
        // typebody <- '{' member* '}'
        let mut r = Success;

        if !self.has(TokenKind::LBrace) {
            self.error_here("expected {");
            r = Error;
        }

        if self.has(TokenKind::RBrace) {
            return r;
        }

        while !self.has(TokenKind::RBrace) {
            if self.has(TokenKind::End) {
                self.error_here("expected }");
                return Error;
            }

            let mut member = None;
            let r2 = self.opt_member(&mut member);
            if r2 == Skip {
                self.error_here("expected a class, interface, type alias, field, or function");
                self.restart_before(&[
                    TokenKind::RBrace,
                    TokenKind::Class,
                    TokenKind::Interface,
                    TokenKind::Type,
                    TokenKind::Ident,
                    TokenKind::Symbol,
                    TokenKind::LSquare,
                    TokenKind::LParen,
                ]);
            }
            if let Some(member) = member {
                members.push(member);
            }
            if r2 == Error {
                r = Error;
            }
        }

        r
    }

    // ---- module loading ----

    fn source_file(&mut self, file: &str, module: &Ast, moduledef: &mut Option<Ast>) -> Outcome {
        let source = match load_source(file) {
            Ok(source) => source,
            Err(_) => {
                self.report(Diagnostic::new(None, format!("couldn't read file {}", file)));
                return Error;
            }
        };
        self.start(source);

        // file <- (moduledef / member)*
        while !self.has(TokenKind::End) {
            let mut member = None;
            let mut r = self.opt_module_def(moduledef);
            if r == Skip {
                r = self.opt_member(&mut member);
                if r != Skip {
                    if let Some(member) = member {
                        if let NodeKind::Class { members, .. } = &mut module.borrow_mut().kind {
                            members.push(member);
                        }
                    }
                }
            }

            if r == Skip {
                self.error_here(
                    "expected a module, class, interface, type alias, field, or function",
                );
                self.restart_before(&[
                    TokenKind::Module,
                    TokenKind::Class,
                    TokenKind::Interface,
                    TokenKind::Type,
                    TokenKind::Ident,
                    TokenKind::Symbol,
                    TokenKind::LSquare,
                    TokenKind::LParen,
                ]);
            }
        }

        self.final_result
    }

    fn load_module(&mut self, path: &str, index: usize, program: &Ast) -> Outcome {
        let modulename = self.ident.ident(&format!("$module-{}", index));

        // Already loaded.
        let bound = program
            .borrow()
            .symbols
            .as_ref()
            .map(|t| t.get(modulename.view()).is_some())
            .unwrap_or(false);
        if bound {
            return self.final_result;
        }

        let module = node(
            modulename.clone(),
            NodeKind::Class {
                typeparams: vec![],
                inherits: None,
                members: vec![],
            },
        );
        self.set_sym(&modulename, &module);
        if let NodeKind::Class { members, .. } = &mut program.borrow_mut().kind {
            members.push(module.clone());
        }

        let mut moduledef = None;
        let r = self.in_scope(&module.clone(), |p| {
            if !paths::is_directory(path) {
                // Single-file parse, used for testing.
                return p.source_file(path, &module, &mut moduledef);
            }

            let mut r = Success;
            let mut count = 0;
            for file in paths::files(path) {
                if paths::extension(&file) != Some(EXT) {
                    continue;
                }
                let filename = paths::join(path, &file);
                count += 1;
                if p.source_file(&filename, &module, &mut moduledef) == Error {
                    r = Error;
                }
            }

            if count == 0 {
                p.report(Diagnostic::new(
                    None,
                    format!("no {} files found in {}", EXT, path),
                ));
                r = Error;
            }

            r
        });

        // Fold a parsed moduledef into the module node.
        if let Some(md) = moduledef {
            let (typeparams, inherits) = match &mut md.borrow_mut().kind {
                NodeKind::Module {
                    typeparams,
                    inherits,
                } => (std::mem::take(typeparams), inherits.take()),
                _ => (vec![], None),
            };
            if let NodeKind::Class {
                typeparams: tp,
                inherits: i,
                ..
            } = &mut module.borrow_mut().kind
            {
                *tp = typeparams;
                *i = inherits;
            }
        }

        r
    }
}
