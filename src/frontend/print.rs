use super::ast::{Ast, NodeKind};

/// Render a node and its children as an indented tree, one node per line:
/// the kind tag, then the source text the node is anchored to.
pub fn dump(ast: &Ast) -> String {
    let mut out = String::new();
    write_node(&mut out, ast, 0);
    out
}

fn write_node(out: &mut String, ast: &Ast, depth: usize) {
    let node = ast.borrow();
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(&format!("{:?}", node.kind()));

    let label = match &node.kind {
        NodeKind::Function { name, .. } => name.view(),
        _ => node.location.view(),
    };
    if !label.is_empty() && label.len() <= 40 && !label.contains('\n') {
        out.push(' ');
        out.push_str(label);
    }
    out.push('\n');

    for child in children(&node.kind) {
        write_node(out, &child, depth + 1);
    }
}

/// The owned children of a node, in source order.
pub fn children(kind: &NodeKind) -> Vec<Ast> {
    fn push(out: &mut Vec<Ast>, item: &Option<Ast>) {
        if let Some(node) = item {
            out.push(node.clone());
        }
    }

    let mut out = Vec::new();
    match kind {
        NodeKind::TypeRef { typenames } => out.extend(typenames.iter().cloned()),
        NodeKind::TypeName { typeargs } | NodeKind::ModuleName { typeargs } => {
            out.extend(typeargs.iter().cloned())
        }
        NodeKind::TupleType { types }
        | NodeKind::IsectType { types }
        | NodeKind::UnionType { types } => out.extend(types.iter().cloned()),
        NodeKind::ThrowType { ty } => out.push(ty.clone()),
        NodeKind::ViewType { left, right }
        | NodeKind::ExtractType { left, right }
        | NodeKind::FunctionType { left, right } => {
            out.push(left.clone());
            push(&mut out, right);
        }
        NodeKind::Tuple { seq } => out.extend(seq.iter().cloned()),
        NodeKind::Select {
            expr,
            typeref,
            args,
        } => {
            push(&mut out, expr);
            push(&mut out, typeref);
            push(&mut out, args);
        }
        NodeKind::New { args, .. } => push(&mut out, args),
        NodeKind::ObjectLiteral {
            inherits, members, ..
        } => {
            push(&mut out, inherits);
            out.extend(members.iter().cloned());
        }
        NodeKind::When { waitfor, behaviour } => {
            push(&mut out, waitfor);
            push(&mut out, behaviour);
        }
        NodeKind::Try { body, catches } => {
            push(&mut out, body);
            out.extend(catches.iter().cloned());
        }
        NodeKind::Match { test, cases } => {
            push(&mut out, test);
            out.extend(cases.iter().cloned());
        }
        NodeKind::Lambda {
            typeparams,
            params,
            result,
            body,
        } => {
            out.extend(typeparams.iter().cloned());
            out.extend(params.iter().cloned());
            push(&mut out, result);
            out.extend(body.iter().cloned());
        }
        NodeKind::Throw { expr } => push(&mut out, expr),
        NodeKind::Let { ty } | NodeKind::Var { ty } => out.push(ty.clone()),
        NodeKind::Param { ty, dflt } => {
            push(&mut out, ty);
            push(&mut out, dflt);
        }
        NodeKind::Oftype { expr, ty } => {
            push(&mut out, expr);
            push(&mut out, ty);
        }
        NodeKind::Assign { left, right } => {
            push(&mut out, left);
            push(&mut out, right);
        }
        NodeKind::Field { ty, init } => {
            push(&mut out, ty);
            push(&mut out, init);
        }
        NodeKind::Function { lambda, .. } => push(&mut out, lambda),
        NodeKind::TypeAlias {
            typeparams,
            inherits,
        }
        | NodeKind::Module {
            typeparams,
            inherits,
        } => {
            out.extend(typeparams.iter().cloned());
            push(&mut out, inherits);
        }
        NodeKind::Using { ty } => push(&mut out, ty),
        NodeKind::Class {
            typeparams,
            inherits,
            members,
        }
        | NodeKind::Interface {
            typeparams,
            inherits,
            members,
        } => {
            out.extend(typeparams.iter().cloned());
            push(&mut out, inherits);
            out.extend(members.iter().cloned());
        }
        NodeKind::TypeParam { upper, dflt } | NodeKind::TypeParamList { upper, dflt } => {
            push(&mut out, upper);
            push(&mut out, dflt);
        }
        _ => {}
    }
    out
}
