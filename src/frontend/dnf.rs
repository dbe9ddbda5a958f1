use super::ast::{node, Ast, Kind, NodeKind};
use super::source::Location;

// Types are kept in disjunctive normal form while parsing: a top-level
// union whose operands are intersections or atomic types, with `throw`
// markers allowed only directly under the union.

fn loc_of(ty: &Ast) -> Location {
    ty.borrow().location.clone()
}

fn union_operands(ty: &Ast) -> Option<Vec<Ast>> {
    match &ty.borrow().kind {
        NodeKind::UnionType { types } => Some(types.clone()),
        _ => None,
    }
}

fn throw_operand(ty: &Ast) -> Option<Ast> {
    match &ty.borrow().kind {
        NodeKind::ThrowType { ty } => Some(ty.clone()),
        _ => None,
    }
}

fn isect_operands(ty: &Ast) -> Vec<Ast> {
    match &ty.borrow().kind {
        NodeKind::IsectType { types } => types.clone(),
        _ => vec![ty.clone()],
    }
}

fn throw(ty: Ast) -> Ast {
    let location = loc_of(&ty);
    node(location, NodeKind::ThrowType { ty })
}

/// `a & b`, distributing intersection over union and pushing the
/// intersection inside `throw` markers.
pub fn conjunction(left: Ast, right: Ast) -> Ast {
    if let Some(operands) = union_operands(&left) {
        let types = operands
            .into_iter()
            .map(|op| conjunction(op, right.clone()))
            .collect();
        return node(loc_of(&left), NodeKind::UnionType { types });
    }

    if let Some(operands) = union_operands(&right) {
        let types = operands
            .into_iter()
            .map(|op| conjunction(left.clone(), op))
            .collect();
        return node(loc_of(&left), NodeKind::UnionType { types });
    }

    match (throw_operand(&left), throw_operand(&right)) {
        (Some(l), Some(r)) => throw(conjunction(l, r)),
        (Some(l), None) => throw(conjunction(l, right)),
        (None, Some(r)) => throw(conjunction(left, r)),
        (None, None) => {
            let mut types = isect_operands(&left);
            types.extend(isect_operands(&right));
            node(loc_of(&left), NodeKind::IsectType { types })
        }
    }
}

/// `a | b`, flattening nested unions.
pub fn disjunction(left: Ast, right: Ast) -> Ast {
    let mut types = union_operands(&left).unwrap_or_else(|| vec![left.clone()]);
    types.extend(union_operands(&right).unwrap_or_else(|| vec![right.clone()]));
    node(loc_of(&left), NodeKind::UnionType { types })
}

/// `throw t`: maps over union operands and is idempotent on throws.
pub fn throwtype(ty: Ast) -> Ast {
    if let Some(operands) = union_operands(&ty) {
        let types = operands.into_iter().map(throwtype).collect();
        return node(loc_of(&ty), NodeKind::UnionType { types });
    }
    if ty.borrow().kind() == Kind::ThrowType {
        return ty;
    }
    throw(ty)
}

/// True if `ty` satisfies the DNF invariants: unions and intersections are
/// flat, and `throw` appears only directly under a union or at the root.
pub fn wellformed(ty: &Ast) -> bool {
    let n = ty.borrow();
    match &n.kind {
        NodeKind::UnionType { types } => types
            .iter()
            .all(|t| t.borrow().kind() != Kind::UnionType && wellformed(t)),
        NodeKind::ThrowType { ty } => {
            let kind = ty.borrow().kind();
            kind != Kind::UnionType && kind != Kind::ThrowType && wellformed(ty)
        }
        NodeKind::IsectType { types } => types.iter().all(|t| {
            let kind = t.borrow().kind();
            kind != Kind::IsectType
                && kind != Kind::UnionType
                && kind != Kind::ThrowType
                && wellformed(t)
        }),
        NodeKind::ViewType { left, right }
        | NodeKind::ExtractType { left, right }
        | NodeKind::FunctionType { left, right } => {
            let mut ok = left.borrow().kind() != Kind::ThrowType && wellformed(left);
            if let Some(right) = right {
                ok = ok && right.borrow().kind() != Kind::ThrowType && wellformed(right);
            }
            ok
        }
        NodeKind::TupleType { types } => types.iter().all(wellformed),
        NodeKind::TypeRef { typenames } => typenames.iter().all(wellformed),
        NodeKind::TypeName { typeargs } | NodeKind::ModuleName { typeargs } => {
            typeargs.iter().all(wellformed)
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ident::Ident;
    use std::rc::Rc;

    fn tref(ident: &mut Ident, name: &str) -> Ast {
        let loc = ident.ident(name);
        let tn = node(loc.clone(), NodeKind::TypeName { typeargs: vec![] });
        node(loc, NodeKind::TypeRef { typenames: vec![tn] })
    }

    fn atom_name(ty: &Ast) -> String {
        ty.borrow().location.view().to_string()
    }

    fn operand_names(ty: &Ast) -> Vec<String> {
        let mut names = match &ty.borrow().kind {
            NodeKind::IsectType { types } | NodeKind::UnionType { types } => {
                types.iter().map(atom_name).collect()
            }
            _ => vec![atom_name(ty)],
        };
        names.sort();
        names
    }

    #[test]
    fn conjunction_flattens_intersections() {
        let mut i = Ident::default();
        let ab = conjunction(tref(&mut i, "A"), tref(&mut i, "B"));
        let abc = conjunction(ab, tref(&mut i, "C"));
        assert_eq!(abc.borrow().kind(), Kind::IsectType);
        assert_eq!(operand_names(&abc), vec!["A", "B", "C"]);
        assert!(wellformed(&abc));
    }

    #[test]
    fn conjunction_distributes_over_union() {
        let mut i = Ident::default();
        let bc = disjunction(tref(&mut i, "B"), tref(&mut i, "C"));
        let out = conjunction(tref(&mut i, "A"), bc);
        let ops = union_operands(&out).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(operand_names(&ops[0]), vec!["A", "B"]);
        assert_eq!(operand_names(&ops[1]), vec!["A", "C"]);
        assert!(wellformed(&out));
    }

    #[test]
    fn conjunction_pushes_inside_throw() {
        let mut i = Ident::default();
        let thrown = throwtype(tref(&mut i, "A"));
        let out = conjunction(thrown, tref(&mut i, "B"));
        let inner = throw_operand(&out).expect("throw at the root");
        assert_eq!(operand_names(&inner), vec!["A", "B"]);
    }

    #[test]
    fn two_throws_combine() {
        let mut i = Ident::default();
        let out = conjunction(throwtype(tref(&mut i, "A")), throwtype(tref(&mut i, "B")));
        let inner = throw_operand(&out).expect("throw at the root");
        assert_eq!(inner.borrow().kind(), Kind::IsectType);
        assert_eq!(operand_names(&inner), vec!["A", "B"]);
        assert!(wellformed(&out));
    }

    #[test]
    fn disjunction_flattens_unions() {
        let mut i = Ident::default();
        let ab = disjunction(tref(&mut i, "A"), tref(&mut i, "B"));
        let abc = disjunction(ab, tref(&mut i, "C"));
        assert_eq!(operand_names(&abc), vec!["A", "B", "C"]);
        assert!(wellformed(&abc));
    }

    #[test]
    fn throwtype_maps_over_unions_and_is_idempotent() {
        let mut i = Ident::default();
        let ab = disjunction(tref(&mut i, "A"), tref(&mut i, "B"));
        let thrown = throwtype(ab);
        let ops = union_operands(&thrown).unwrap();
        assert!(ops
            .iter()
            .all(|op| op.borrow().kind() == Kind::ThrowType));
        assert!(wellformed(&thrown));

        let single = throwtype(tref(&mut i, "C"));
        let again = throwtype(single.clone());
        assert!(Rc::ptr_eq(&single, &again));
    }

    #[test]
    fn conjunction_commutes_up_to_operand_order() {
        let mut i = Ident::default();
        let l = conjunction(tref(&mut i, "A"), tref(&mut i, "B"));
        let r = conjunction(tref(&mut i, "B"), tref(&mut i, "A"));
        assert_eq!(operand_names(&l), operand_names(&r));
    }

    #[test]
    fn normalized_form_is_a_fixed_point() {
        let mut i = Ident::default();
        // (A & (B | C)) | throw D
        let bc = disjunction(tref(&mut i, "B"), tref(&mut i, "C"));
        let left = conjunction(tref(&mut i, "A"), bc);
        let out = disjunction(left, throwtype(tref(&mut i, "D")));

        let ops = union_operands(&out).unwrap();
        assert_eq!(ops.len(), 3);
        assert_eq!(operand_names(&ops[0]), vec!["A", "B"]);
        assert_eq!(operand_names(&ops[1]), vec!["A", "C"]);
        assert_eq!(ops[2].borrow().kind(), Kind::ThrowType);
        assert!(wellformed(&out));

        // Re-running disjunction over the operands reproduces the same shape.
        let rebuilt = ops
            .clone()
            .into_iter()
            .reduce(disjunction)
            .unwrap();
        let rebuilt_ops = union_operands(&rebuilt).unwrap();
        assert_eq!(rebuilt_ops.len(), 3);
        for (a, b) in ops.iter().zip(rebuilt_ops.iter()) {
            assert!(Rc::ptr_eq(a, b));
        }
    }
}
