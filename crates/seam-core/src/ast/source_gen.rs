// Source code generation from the syntax tree.
// Prints parsed and rewritten trees alike; rewriter nodes get their own
// surface form (`let .. in ..`, `seam::guard<T>(..) ?? ..`) which is for
// reading, not for feeding back to the parser.

use super::*;

const INDENT: &str = "    ";

/// Trait for types that can generate their source code representation
pub trait ToSource {
    fn to_source(&self) -> String;
}

impl ToSource for CompilationUnit {
    fn to_source(&self) -> String {
        self.classes
            .iter()
            .map(|class| format_class(class, 0))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl ToSource for ClassDecl {
    fn to_source(&self) -> String {
        format_class(self, 0)
    }
}

impl ToSource for TypeRef {
    fn to_source(&self) -> String {
        self.to_string()
    }
}

impl ToSource for Stmt {
    fn to_source(&self) -> String {
        format_stmt(self, 0)
    }
}

impl ToSource for Expr {
    fn to_source(&self) -> String {
        format_expr(self)
    }
}

impl ToSource for LValue {
    fn to_source(&self) -> String {
        match self {
            LValue::Name { name, .. } => name.clone(),
            LValue::Field { target, name, .. } => format!("{}.{}", postfix_operand(target), name),
            LValue::Index { target, index } => {
                format!("{}[{}]", postfix_operand(target), index.to_source())
            }
        }
    }
}

fn pad(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn format_modifiers(modifiers: &Modifiers) -> String {
    let mut out = String::new();
    if let Some(keyword) = modifiers.visibility.keyword() {
        out.push_str(keyword);
        out.push(' ');
    }
    if modifiers.is_static {
        out.push_str("static ");
    }
    if modifiers.is_final {
        out.push_str("final ");
    }
    out
}

fn format_params(params: &[Param]) -> String {
    params
        .iter()
        .map(|p| format!("{} {}", p.ty, p.name))
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_class(class: &ClassDecl, depth: usize) -> String {
    let mut result = String::new();
    for annotation in &class.annotations {
        result.push_str(&format!("{}@{}\n", pad(depth), annotation));
    }
    result.push_str(&format!(
        "{}{}class {}",
        pad(depth),
        format_modifiers(&class.modifiers),
        class.name
    ));
    if let Some(parent) = &class.superclass {
        result.push_str(&format!(" extends {parent}"));
    }
    result.push_str(" {\n");
    for member in &class.members {
        result.push_str(&format_member(member, &class.name, depth + 1));
    }
    result.push_str(&format!("{}}}\n", pad(depth)));
    result
}

// Helper function to format a Member to reduce nesting
fn format_member(member: &Member, class_name: &str, depth: usize) -> String {
    match member {
        Member::Field(field) => {
            let mut result = format!(
                "{}{}{} {}",
                pad(depth),
                format_modifiers(&field.modifiers),
                field.ty,
                field.name
            );
            if let Some(init) = &field.init {
                result.push_str(&format!(" = {}", init.to_source()));
            }
            result.push_str(";\n");
            result
        }
        Member::Constructor(ctor) => {
            let mut result = format!(
                "{}{}{}({}) ",
                pad(depth),
                format_modifiers(&ctor.modifiers),
                class_name,
                format_params(&ctor.params)
            );
            result.push_str(&format_body(&ctor.body, depth));
            result.push('\n');
            result
        }
        Member::Method(method) => {
            let mut result = format!(
                "{}{}{} {}({}) ",
                pad(depth),
                format_modifiers(&method.modifiers),
                method.return_type,
                method.name,
                format_params(&method.params)
            );
            result.push_str(&format_body(&method.body, depth));
            result.push('\n');
            result
        }
        Member::Class(nested) => format_class(nested, depth),
        Member::Malformed { text, .. } => format!("{}{}\n", pad(depth), text.trim()),
    }
}

fn format_body(stmts: &[Stmt], depth: usize) -> String {
    let mut result = String::from("{\n");
    for stmt in stmts {
        result.push_str(&format_stmt(stmt, depth + 1));
        result.push('\n');
    }
    result.push_str(&format!("{}}}", pad(depth)));
    result
}

fn format_stmt(stmt: &Stmt, depth: usize) -> String {
    let indent = pad(depth);
    match stmt {
        Stmt::Local { name, ty, init, .. } => match init {
            Some(init) => format!("{indent}{ty} {name} = {};", init.to_source()),
            None => format!("{indent}{ty} {name};"),
        },
        Stmt::Expr(expr) => format!("{indent}{};", expr.to_source()),
        Stmt::Return { value, .. } => match value {
            Some(value) => format!("{indent}return {};", value.to_source()),
            None => format!("{indent}return;"),
        },
        Stmt::If {
            condition,
            then_branch,
            else_branch,
        } => {
            let mut result = format!(
                "{indent}if ({}) {}",
                condition.to_source(),
                format_branch(then_branch, depth)
            );
            if let Some(else_branch) = else_branch {
                result.push_str(&format!(" else {}", format_branch(else_branch, depth)));
            }
            result
        }
        Stmt::While { condition, body } => format!(
            "{indent}while ({}) {}",
            condition.to_source(),
            format_branch(body, depth)
        ),
        Stmt::Block(stmts) => format!("{indent}{}", format_body(stmts, depth)),
        Stmt::Throw { value, .. } => format!("{indent}throw {};", value.to_source()),
        Stmt::Try {
            body,
            catch_type,
            catch_var,
            handler,
        } => format!(
            "{indent}try {} catch ({catch_type} {catch_var}) {}",
            format_body(body, depth),
            format_body(handler, depth)
        ),
    }
}

/// Branches print as blocks so nested statements keep their indentation
fn format_branch(stmt: &Stmt, depth: usize) -> String {
    match stmt {
        Stmt::Block(stmts) => format_body(stmts, depth),
        other => format_body(std::slice::from_ref(other), depth),
    }
}

fn format_args(args: &[Expr]) -> String {
    args.iter()
        .map(|a| a.to_source())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Operands of `.`, `[]` and calls need parentheses unless they are atoms
fn postfix_operand(expr: &Expr) -> String {
    match expr {
        Expr::Literal(_)
        | Expr::This
        | Expr::Name { .. }
        | Expr::Field { .. }
        | Expr::Index { .. }
        | Expr::Call { .. }
        | Expr::New { .. }
        | Expr::ListLiteral { .. } => expr.to_source(),
        _ => format!("({})", expr.to_source()),
    }
}

fn binary_operand(expr: &Expr, parent: BinaryOp, right_side: bool) -> String {
    match expr {
        Expr::Binary { op, .. }
            if op.precedence() < parent.precedence()
                || (right_side && op.precedence() == parent.precedence()) =>
        {
            format!("({})", expr.to_source())
        }
        Expr::Assign { .. } | Expr::Let { .. } | Expr::Guarded(_) => {
            format!("({})", expr.to_source())
        }
        _ => expr.to_source(),
    }
}

fn format_literal(literal: &Literal) -> String {
    match literal {
        Literal::Int(n) => n.to_string(),
        Literal::Double(d) => {
            let text = d.to_string();
            if text.contains('.') || text.contains('e') || !d.is_finite() {
                text
            } else {
                format!("{text}.0")
            }
        }
        Literal::Bool(b) => b.to_string(),
        Literal::Str(s) => format!("\"{}\"", escape_string(s)),
        Literal::Null => "null".to_string(),
    }
}

fn format_expr(expr: &Expr) -> String {
    match expr {
        Expr::Literal(literal) => format_literal(literal),
        Expr::This => "this".to_string(),
        Expr::Name { name, .. } => name.clone(),
        Expr::Field { target, name, .. } => format!("{}.{}", postfix_operand(target), name),
        Expr::Index { target, index } => {
            format!("{}[{}]", postfix_operand(target), index.to_source())
        }
        Expr::Call {
            receiver,
            method,
            args,
            ..
        } => match receiver {
            Some(receiver) => format!(
                "{}.{}({})",
                postfix_operand(receiver),
                method,
                format_args(args)
            ),
            None => format!("{}({})", method, format_args(args)),
        },
        Expr::New { class, args, .. } => format!("new {}({})", class, format_args(args)),
        Expr::NewArray { elem, elements } => {
            format!("new {}[] {{{}}}", elem, format_args(elements))
        }
        Expr::ListLiteral { elements } => format!("[{}]", format_args(elements)),
        Expr::Binary { op, left, right } => format!(
            "{} {} {}",
            binary_operand(left, *op, false),
            op.symbol(),
            binary_operand(right, *op, true)
        ),
        Expr::Unary { op, operand } => {
            let symbol = match op {
                UnaryOp::Not => "!",
                UnaryOp::Neg => "-",
            };
            match operand.as_ref() {
                Expr::Binary { .. } | Expr::Assign { .. } | Expr::Let { .. } => {
                    format!("{symbol}({})", operand.to_source())
                }
                _ => format!("{symbol}{}", operand.to_source()),
            }
        }
        Expr::Assign { target, value } => {
            format!("{} = {}", target.to_source(), value.to_source())
        }
        Expr::Let {
            name,
            ty,
            init,
            body,
        } => match ty {
            Some(ty) => format!(
                "let {name}: {ty} = {} in {}",
                init.to_source(),
                body.to_source()
            ),
            None => format!("let {name} = {} in {}", init.to_source(), body.to_source()),
        },
        Expr::Guarded(guard) => {
            let scope = match guard.scope {
                GuardScope::Instance => "this",
                GuardScope::Static => "static",
            };
            format!(
                "seam::guard<{}>(\"{}\", {}, [{}]) ?? {}",
                guard.result,
                escape_string(guard.site.as_str()),
                scope,
                format_args(&guard.args),
                postfix_operand(&guard.fallback)
            )
        }
    }
}

fn escape_string(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '"' => r#"\""#.to_string(),
            '\\' => r"\\".to_string(),
            '\n' => r"\n".to_string(),
            '\r' => r"\r".to_string(),
            '\t' => r"\t".to_string(),
            c => c.to_string(),
        })
        .collect()
}
