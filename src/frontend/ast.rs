use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use super::source::Location;

/// Shared-ownership handle to an AST node. Parents own their children;
/// symbol tables and parent links hold weak references only.
pub type Ast = Rc<RefCell<Node>>;
pub type WeakAst = Weak<RefCell<Node>>;

pub struct Node {
    pub location: Location,
    pub symbols: Option<SymbolTable>,
    pub kind: NodeKind,
}

pub enum NodeKind {
    // Types.
    TypeRef {
        typenames: Vec<Ast>,
    },
    TypeName {
        typeargs: Vec<Ast>,
    },
    ModuleName {
        typeargs: Vec<Ast>,
    },
    TupleType {
        types: Vec<Ast>,
    },
    TypeList,
    Iso,
    Mut,
    Imm,
    SelfType,
    IsectType {
        types: Vec<Ast>,
    },
    UnionType {
        types: Vec<Ast>,
    },
    ThrowType {
        ty: Ast,
    },
    ViewType {
        left: Ast,
        right: Option<Ast>,
    },
    ExtractType {
        left: Ast,
        right: Option<Ast>,
    },
    FunctionType {
        left: Ast,
        right: Option<Ast>,
    },
    InferType,

    // Expressions.
    Tuple {
        seq: Vec<Ast>,
    },
    Ref,
    Select {
        expr: Option<Ast>,
        typeref: Option<Ast>,
        args: Option<Ast>,
    },
    New {
        args: Option<Ast>,
        in_region: Option<Location>,
    },
    ObjectLiteral {
        in_region: Option<Location>,
        inherits: Option<Ast>,
        members: Vec<Ast>,
    },
    When {
        waitfor: Option<Ast>,
        behaviour: Option<Ast>,
    },
    Try {
        body: Option<Ast>,
        catches: Vec<Ast>,
    },
    Match {
        test: Option<Ast>,
        cases: Vec<Ast>,
    },
    Lambda {
        typeparams: Vec<Ast>,
        params: Vec<Ast>,
        result: Option<Ast>,
        body: Vec<Ast>,
    },
    Throw {
        expr: Option<Ast>,
    },
    Let {
        ty: Ast,
    },
    Var {
        ty: Ast,
    },
    Param {
        ty: Option<Ast>,
        dflt: Option<Ast>,
    },
    Oftype {
        expr: Option<Ast>,
        ty: Option<Ast>,
    },
    Assign {
        left: Option<Ast>,
        right: Option<Ast>,
    },
    Int,
    Float,
    Hex,
    Binary,
    Bool,
    EscapedString,
    UnescapedString,
    Character,

    // Members.
    Field {
        ty: Option<Ast>,
        init: Option<Ast>,
    },
    Function {
        name: Location,
        lambda: Option<Ast>,
    },
    TypeAlias {
        typeparams: Vec<Ast>,
        inherits: Option<Ast>,
    },
    Using {
        ty: Option<Ast>,
    },
    Class {
        typeparams: Vec<Ast>,
        inherits: Option<Ast>,
        members: Vec<Ast>,
    },
    Interface {
        typeparams: Vec<Ast>,
        inherits: Option<Ast>,
        members: Vec<Ast>,
    },
    Module {
        typeparams: Vec<Ast>,
        inherits: Option<Ast>,
    },

    // Type parameters.
    TypeParam {
        upper: Option<Ast>,
        dflt: Option<Ast>,
    },
    TypeParamList {
        upper: Option<Ast>,
        dflt: Option<Ast>,
    },
}

/// Fieldless discriminator for dispatch and diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    TypeRef,
    TypeName,
    ModuleName,
    TupleType,
    TypeList,
    Iso,
    Mut,
    Imm,
    SelfType,
    IsectType,
    UnionType,
    ThrowType,
    ViewType,
    ExtractType,
    FunctionType,
    InferType,
    Tuple,
    Ref,
    Select,
    New,
    ObjectLiteral,
    When,
    Try,
    Match,
    Lambda,
    Throw,
    Let,
    Var,
    Param,
    Oftype,
    Assign,
    Int,
    Float,
    Hex,
    Binary,
    Bool,
    EscapedString,
    UnescapedString,
    Character,
    Field,
    Function,
    TypeAlias,
    Using,
    Class,
    Interface,
    Module,
    TypeParam,
    TypeParamList,
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::TypeRef => "type reference",
            Kind::TypeName => "type name",
            Kind::ModuleName => "module name",
            Kind::TupleType => "tuple type",
            Kind::TypeList => "type list",
            Kind::Iso => "iso",
            Kind::Mut => "mut",
            Kind::Imm => "imm",
            Kind::SelfType => "Self",
            Kind::IsectType => "intersection type",
            Kind::UnionType => "union type",
            Kind::ThrowType => "throw type",
            Kind::ViewType => "view type",
            Kind::ExtractType => "extract type",
            Kind::FunctionType => "function type",
            Kind::InferType => "inferred type",
            Kind::Tuple => "tuple",
            Kind::Ref => "reference",
            Kind::Select => "selector",
            Kind::New => "new",
            Kind::ObjectLiteral => "object literal",
            Kind::When => "when",
            Kind::Try => "try",
            Kind::Match => "match",
            Kind::Lambda => "lambda",
            Kind::Throw => "throw",
            Kind::Let => "let",
            Kind::Var => "var",
            Kind::Param => "parameter",
            Kind::Oftype => "type ascription",
            Kind::Assign => "assignment",
            Kind::Int => "integer literal",
            Kind::Float => "float literal",
            Kind::Hex => "hex literal",
            Kind::Binary => "binary literal",
            Kind::Bool => "bool literal",
            Kind::EscapedString => "string literal",
            Kind::UnescapedString => "raw string literal",
            Kind::Character => "character literal",
            Kind::Field => "field",
            Kind::Function => "function",
            Kind::TypeAlias => "type alias",
            Kind::Using => "using",
            Kind::Class => "class",
            Kind::Interface => "interface",
            Kind::Module => "module",
            Kind::TypeParam => "type parameter",
            Kind::TypeParamList => "type parameter list",
        }
    }
}

impl Node {
    pub fn kind(&self) -> Kind {
        match &self.kind {
            NodeKind::TypeRef { .. } => Kind::TypeRef,
            NodeKind::TypeName { .. } => Kind::TypeName,
            NodeKind::ModuleName { .. } => Kind::ModuleName,
            NodeKind::TupleType { .. } => Kind::TupleType,
            NodeKind::TypeList => Kind::TypeList,
            NodeKind::Iso => Kind::Iso,
            NodeKind::Mut => Kind::Mut,
            NodeKind::Imm => Kind::Imm,
            NodeKind::SelfType => Kind::SelfType,
            NodeKind::IsectType { .. } => Kind::IsectType,
            NodeKind::UnionType { .. } => Kind::UnionType,
            NodeKind::ThrowType { .. } => Kind::ThrowType,
            NodeKind::ViewType { .. } => Kind::ViewType,
            NodeKind::ExtractType { .. } => Kind::ExtractType,
            NodeKind::FunctionType { .. } => Kind::FunctionType,
            NodeKind::InferType => Kind::InferType,
            NodeKind::Tuple { .. } => Kind::Tuple,
            NodeKind::Ref => Kind::Ref,
            NodeKind::Select { .. } => Kind::Select,
            NodeKind::New { .. } => Kind::New,
            NodeKind::ObjectLiteral { .. } => Kind::ObjectLiteral,
            NodeKind::When { .. } => Kind::When,
            NodeKind::Try { .. } => Kind::Try,
            NodeKind::Match { .. } => Kind::Match,
            NodeKind::Lambda { .. } => Kind::Lambda,
            NodeKind::Throw { .. } => Kind::Throw,
            NodeKind::Let { .. } => Kind::Let,
            NodeKind::Var { .. } => Kind::Var,
            NodeKind::Param { .. } => Kind::Param,
            NodeKind::Oftype { .. } => Kind::Oftype,
            NodeKind::Assign { .. } => Kind::Assign,
            NodeKind::Int => Kind::Int,
            NodeKind::Float => Kind::Float,
            NodeKind::Hex => Kind::Hex,
            NodeKind::Binary => Kind::Binary,
            NodeKind::Bool => Kind::Bool,
            NodeKind::EscapedString => Kind::EscapedString,
            NodeKind::UnescapedString => Kind::UnescapedString,
            NodeKind::Character => Kind::Character,
            NodeKind::Field { .. } => Kind::Field,
            NodeKind::Function { .. } => Kind::Function,
            NodeKind::TypeAlias { .. } => Kind::TypeAlias,
            NodeKind::Using { .. } => Kind::Using,
            NodeKind::Class { .. } => Kind::Class,
            NodeKind::Interface { .. } => Kind::Interface,
            NodeKind::Module { .. } => Kind::Module,
            NodeKind::TypeParam { .. } => Kind::TypeParam,
            NodeKind::TypeParamList { .. } => Kind::TypeParamList,
        }
    }
}

fn scope_bearing(kind: &NodeKind) -> bool {
    matches!(
        kind,
        NodeKind::Class { .. }
            | NodeKind::Interface { .. }
            | NodeKind::Module { .. }
            | NodeKind::TypeAlias { .. }
            | NodeKind::Function { .. }
            | NodeKind::Lambda { .. }
            | NodeKind::ObjectLiteral { .. }
    )
}

/// Allocate a node, attaching an empty symbol table to scope-bearing kinds.
pub fn node(location: Location, kind: NodeKind) -> Ast {
    let symbols = scope_bearing(&kind).then(SymbolTable::default);
    Rc::new(RefCell::new(Node {
        location,
        symbols,
        kind,
    }))
}

/// Per-scope name bindings. Values are aliases into the owning node's
/// children, so entries are weak and may be dead once the parent drops.
#[derive(Default)]
pub struct SymbolTable {
    map: HashMap<String, WeakAst>,
    pub parent: Option<WeakAst>,
}

impl SymbolTable {
    pub fn get(&self, name: &str) -> Option<Ast> {
        self.map.get(name).and_then(Weak::upgrade)
    }

    /// Bind `name`, returning the existing binding instead if one is
    /// already present. Callers report the collision.
    pub fn set(&mut self, name: &str, node: &Ast) -> Option<Ast> {
        if let Some(prev) = self.get(name) {
            return Some(prev);
        }
        self.map.insert(name.to_string(), Rc::downgrade(node));
        None
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }
}

/// Look `name` up through the scope chain starting at `scope`.
pub fn get_scope(scope: &Ast, name: &str) -> Option<Ast> {
    let mut current = scope.clone();
    loop {
        let next = {
            let node = current.borrow();
            let table = node.symbols.as_ref()?;
            if let Some(found) = table.get(name) {
                return Some(found);
            }
            table.parent.as_ref().and_then(Weak::upgrade)?
        };
        current = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ident::Ident;
    use std::rc::Rc;

    #[test]
    fn set_keeps_the_first_binding() {
        let mut ident = Ident::default();
        let scope = node(
            ident.ident("s"),
            NodeKind::Class {
                typeparams: vec![],
                inherits: None,
                members: vec![],
            },
        );
        let a = node(ident.ident("a"), NodeKind::Ref);
        let b = node(ident.ident("b"), NodeKind::Ref);

        let mut guard = scope.borrow_mut();
        let table = guard.symbols.as_mut().unwrap();
        assert!(table.set("x", &a).is_none());
        let prev = table.set("x", &b).unwrap();
        assert!(Rc::ptr_eq(&prev, &a));
    }

    #[test]
    fn get_scope_walks_parents() {
        let mut ident = Ident::default();
        let outer = node(
            ident.ident("outer"),
            NodeKind::Class {
                typeparams: vec![],
                inherits: None,
                members: vec![],
            },
        );
        let inner = node(
            ident.ident("inner"),
            NodeKind::Lambda {
                typeparams: vec![],
                params: vec![],
                result: None,
                body: vec![],
            },
        );
        let target = node(ident.ident("target"), NodeKind::Ref);

        outer
            .borrow_mut()
            .symbols
            .as_mut()
            .unwrap()
            .set("t", &target);
        inner.borrow_mut().symbols.as_mut().unwrap().parent = Some(Rc::downgrade(&outer));

        let found = get_scope(&inner, "t").unwrap();
        assert!(Rc::ptr_eq(&found, &target));
        assert!(get_scope(&inner, "missing").is_none());
    }
}
