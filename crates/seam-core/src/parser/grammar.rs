//! Seam source parser using nom
//!
//! Recursive descent over a small class-based language. Member-level errors
//! are recovered: the offending member is skipped up to the next `;` or
//! balanced `}` and kept as `Member::Malformed`.
//!
//! # EBNF Grammar
//!
//! ```ebnf
//! unit        = { class } ;
//! class       = { annotation } modifiers "class" IDENT [ "extends" name ] "{" { member } "}" ;
//! annotation  = "@" IDENT [ "(" ")" ] ;
//! member      = class | constructor | method | field ;
//! constructor = modifiers IDENT "(" params ")" block ;        (* IDENT = class name *)
//! method      = modifiers type IDENT "(" params ")" block ;
//! field       = modifiers type IDENT [ "=" expr ] ";" ;
//! params      = [ type IDENT { "," type IDENT } ] ;
//! type        = ( "void" | "int" | "double" | "boolean" | name ) [ "<" types ">" ] { "[" "]" } ;
//! block       = "{" { stmt } "}" ;
//! stmt        = block
//!             | "return" [ expr ] ";"
//!             | "if" "(" expr ")" stmt [ "else" stmt ]
//!             | "while" "(" expr ")" stmt
//!             | "throw" expr ";"
//!             | "try" block "catch" "(" name IDENT ")" block
//!             | type IDENT [ "=" expr ] ";"
//!             | expr ";" ;
//! expr        = "let" TEMP [ ":" type ] "=" expr "in" expr
//!             | binary [ "=" expr ] ;
//! binary      = unary { binop unary } ;                   (* precedence climbing *)
//! unary       = ( "!" | "-" ) unary | postfix ;
//! postfix     = primary { "." IDENT [ "(" args ")" ] | "[" expr "]" } ;
//! primary     = literal | "this" | "(" expr ")" | "[" args "]"
//!             | "new" type "(" args ")" | "new" type "[" "]" "{" args "}"
//!             | guard | IDENT "(" args ")" | IDENT | TEMP ;
//! guard       = "seam::guard" "<" type ">" "(" STRING "," ( "this" | "static" ) ","
//!               "[" args "]" ")" "??" postfix ;
//! TEMP        = "$" IDENT ;                               (* rewriter temporaries *)
//! ```
//!
//! `let` and `guard` only appear in instrumented output; accepting them lets a
//! build's output be parsed and run again. Statements, expressions and
//! classes nest at most [`DEFAULT_MAX_NESTING`] levels deep unless configured
//! otherwise with [`SeamParser::with_max_depth`].

use std::cell::Cell;

use nom::{
    branch::alt,
    bytes::complete::{tag, take_until, take_while},
    character::complete::{char, digit1, multispace1, not_line_ending, satisfy},
    combinator::{cut, not, opt, recognize, value},
    error::{Error, ErrorKind},
    multi::{many0, separated_list0},
    sequence::{pair, preceded, terminated, tuple},
    IResult,
};

use super::{ParseError, Parser};
use crate::ast::{
    BinaryOp, ClassDecl, CompilationUnit, ConstructorDecl, Expr, FieldDecl, Guard, GuardScope,
    LValue, Literal, Member, MethodDecl, Modifiers, Param, SiteId, Span, Stmt, TypeRef, UnaryOp,
    Visibility,
};

/// Nesting limit of statements, expressions and classes
pub const DEFAULT_MAX_NESTING: usize = 100;

const RESERVED: &[&str] = &[
    "class", "extends", "public", "private", "protected", "static", "final", "return", "if",
    "else", "while", "throw", "try", "catch", "new", "this", "true", "false", "null", "void",
    "int", "double", "boolean",
];

/// Binary operators, longest spelling first so `<=` wins over `<`
const BINARY_OPS: &[(&str, BinaryOp)] = &[
    ("||", BinaryOp::Or),
    ("&&", BinaryOp::And),
    ("==", BinaryOp::Eq),
    ("!=", BinaryOp::Ne),
    ("<=", BinaryOp::Le),
    (">=", BinaryOp::Ge),
    ("<", BinaryOp::Lt),
    (">", BinaryOp::Gt),
    ("+", BinaryOp::Add),
    ("-", BinaryOp::Sub),
    ("*", BinaryOp::Mul),
    ("/", BinaryOp::Div),
    ("%", BinaryOp::Rem),
];

/// Parser for `.seam` sources
#[derive(Debug, Clone)]
pub struct SeamParser {
    max_depth: usize,
}

impl Default for SeamParser {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_NESTING,
        }
    }
}

impl SeamParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

impl Parser for SeamParser {
    fn parse_unit(&mut self, source: &str) -> Result<CompilationUnit, ParseError> {
        let grammar = Grammar::new(source, self.max_depth);
        match grammar.unit(source) {
            Ok((_, unit)) => Ok(unit),
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                Err(grammar.error_at(e.input, e.code))
            }
            Err(nom::Err::Incomplete(_)) => Err(grammar.error_at("", ErrorKind::Eof)),
        }
    }

    fn name(&self) -> &'static str {
        "seam"
    }
}

// ---------------------------------------------------------------------------
// Lexical helpers

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Skip whitespace and comments
fn ws(i: &str) -> IResult<&str, ()> {
    value(
        (),
        many0(alt((
            value((), multispace1),
            value((), pair(tag("//"), not_line_ending)),
            value((), tuple((tag("/*"), take_until("*/"), tag("*/")))),
        ))),
    )(i)
}

fn sym<'a>(s: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(ws, tag(s))
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    preceded(ws, terminated(tag(kw), not(satisfy(is_ident_char))))
}

/// `=` that is not the start of `==`
fn assign_op(i: &str) -> IResult<&str, &str> {
    terminated(sym("="), not(char('=')))(i)
}

fn raw_identifier(i: &str) -> IResult<&str, &str> {
    let (rest, name) = recognize(pair(satisfy(is_ident_start), take_while(is_ident_char)))(i)?;
    if RESERVED.contains(&name) {
        return Err(nom::Err::Error(Error::new(i, ErrorKind::Tag)));
    }
    Ok((rest, name))
}

fn identifier(i: &str) -> IResult<&str, &str> {
    preceded(ws, raw_identifier)(i)
}

/// `$`-prefixed names bound by `let`; never declared in source
fn temp_identifier(i: &str) -> IResult<&str, &str> {
    preceded(
        ws,
        recognize(tuple((char('$'), satisfy(is_ident_start), take_while(is_ident_char)))),
    )(i)
}

/// `Outer.Inner` style names; segments must be adjacent to the dots
fn qualified_name(i: &str) -> IResult<&str, String> {
    let (mut rest, first) = identifier(i)?;
    let mut name = first.to_string();
    while let Some(after_dot) = rest.strip_prefix('.') {
        match raw_identifier(after_dot) {
            Ok((after, segment)) => {
                name.push('.');
                name.push_str(segment);
                rest = after;
            }
            Err(_) => break,
        }
    }
    Ok((rest, name))
}

fn type_ref(i: &str) -> IResult<&str, TypeRef> {
    let (i, base) = alt((
        value(TypeRef::Void, keyword("void")),
        value(TypeRef::Int, keyword("int")),
        value(TypeRef::Double, keyword("double")),
        value(TypeRef::Boolean, keyword("boolean")),
        nom::combinator::map(qualified_name, |name| match name.as_str() {
            "String" => TypeRef::Str,
            "Object" => TypeRef::Object,
            "List" => TypeRef::List,
            "Map" => TypeRef::Map,
            other => TypeRef::Class(other.to_string()),
        }),
    ))(i)?;
    // Generic arguments are erased
    let (i, _) = opt(tuple((sym("<"), separated_list0(sym(","), type_ref), sym(">"))))(i)?;
    let (i, dims) = many0(pair(sym("["), sym("]")))(i)?;
    let ty = dims.into_iter().fold(base, |ty, _| TypeRef::array_of(ty));
    Ok((i, ty))
}

fn annotation(i: &str) -> IResult<&str, String> {
    let (i, name) = preceded(sym("@"), identifier)(i)?;
    let (i, _) = opt(pair(sym("("), sym(")")))(i)?;
    Ok((i, name.to_string()))
}

fn modifiers(i: &str) -> IResult<&str, Modifiers> {
    let (i, words) = many0(alt((
        keyword("public"),
        keyword("private"),
        keyword("protected"),
        keyword("static"),
        keyword("final"),
    )))(i)?;

    let mut modifiers = Modifiers::default();
    for word in words {
        match word {
            "public" => modifiers.visibility = Visibility::Public,
            "private" => modifiers.visibility = Visibility::Private,
            "protected" => modifiers.visibility = Visibility::Protected,
            "static" => modifiers.is_static = true,
            "final" => modifiers.is_final = true,
            _ => {}
        }
    }
    Ok((i, modifiers))
}

fn number(i: &str) -> IResult<&str, Literal> {
    let (rest, text) = preceded(ws, recognize(pair(digit1, opt(pair(char('.'), digit1)))))(i)?;
    let literal = if text.contains('.') {
        text.parse::<f64>().map(Literal::Double).ok()
    } else {
        text.parse::<i64>().map(Literal::Int).ok()
    };
    match literal {
        Some(literal) => Ok((rest, literal)),
        None => Err(nom::Err::Failure(Error::new(i, ErrorKind::Digit))),
    }
}

fn string_literal(i: &str) -> IResult<&str, String> {
    let (rest, _) = preceded(ws, char('"'))(i)?;
    let mut out = String::new();
    let mut chars = rest.char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((&rest[idx + 1..], out)),
            '\\' => match chars.next() {
                Some((_, 'n')) => out.push('\n'),
                Some((_, 't')) => out.push('\t'),
                Some((_, 'r')) => out.push('\r'),
                Some((_, other)) => out.push(other),
                None => break,
            },
            c => out.push(c),
        }
    }
    Err(nom::Err::Failure(Error::new(i, ErrorKind::Char)))
}

fn binary_op(i: &str) -> Option<(&str, BinaryOp)> {
    let (rest, _) = ws(i).ok()?;
    BINARY_OPS
        .iter()
        .find_map(|(symbol, op)| rest.strip_prefix(symbol).map(|after| (after, *op)))
}

/// Consume one unparseable member: up to and including the next `;` at
/// brace depth zero, or through the balanced `{ .. }` that follows.
/// Stops in front of the `}` that closes the enclosing class.
fn skip_member(i: &str) -> (&str, &str) {
    let bytes = i.as_bytes();
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        if in_string {
            if b == b'\\' {
                idx += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            idx += 1;
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                if depth == 0 {
                    idx += 1;
                    break;
                }
            }
            b';' if depth == 0 => {
                idx += 1;
                break;
            }
            _ => {}
        }
        idx += 1;
    }

    let mut idx = idx.min(bytes.len());
    if idx == 0 {
        // Always make progress
        idx = i.chars().next().map_or(0, char::len_utf8);
    }
    (&i[idx..], &i[..idx])
}

fn describe(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Tag => "expected token",
        ErrorKind::Char => "unterminated or unexpected character",
        ErrorKind::Digit => "invalid number literal",
        ErrorKind::Eof => "unexpected input",
        ErrorKind::Verify => "invalid assignment target",
        ErrorKind::TooLarge => "nesting too deep",
        _ => "syntax error",
    }
}

fn snippet(input: &str) -> String {
    let line = input.trim_start().lines().next().unwrap_or("");
    line.chars().take(24).collect()
}

// ---------------------------------------------------------------------------
// Grammar: position-aware parsing over one source text

struct Grammar<'s> {
    source: &'s str,
    line_starts: Vec<usize>,
    depth: Cell<usize>,
    max_depth: usize,
}

impl<'s> Grammar<'s> {
    fn new(source: &'s str, max_depth: usize) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            source
                .char_indices()
                .filter(|(_, c)| *c == '\n')
                .map(|(idx, _)| idx + 1),
        );
        Self {
            source,
            line_starts,
            depth: Cell::new(0),
            max_depth,
        }
    }

    /// Run `f` one nesting level down; past the limit parsing stops for good
    fn nested<T>(
        &self,
        i: &'s str,
        f: impl FnOnce(&'s str) -> IResult<&'s str, T>,
    ) -> IResult<&'s str, T> {
        let depth = self.depth.get();
        if depth >= self.max_depth {
            return Err(nom::Err::Failure(Error::new(i, ErrorKind::TooLarge)));
        }
        self.depth.set(depth + 1);
        let result = f(i);
        self.depth.set(depth);
        result
    }

    fn span(&self, i: &str) -> Span {
        let offset = self.source.len().saturating_sub(i.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line - 1,
        };
        Span::new(line as u32 + 1, (offset - self.line_starts[line]) as u32 + 1)
    }

    /// Span of the next token
    fn here(&self, i: &'s str) -> Span {
        let rest = ws(i).map(|(rest, _)| rest).unwrap_or(i);
        self.span(rest)
    }

    fn error_at(&self, input: &str, kind: ErrorKind) -> ParseError {
        let span = self.span(input);
        let near = snippet(input);
        let message = if near.is_empty() {
            format!("{} at end of input", describe(kind))
        } else {
            format!("{} near '{}'", describe(kind), near)
        };
        ParseError {
            line: span.line,
            column: span.column,
            message,
        }
    }

    fn unit(&self, i: &'s str) -> IResult<&'s str, CompilationUnit> {
        let (i, classes) = many0(|i| self.class_decl(i))(i)?;
        let (i, _) = ws(i)?;
        if !i.is_empty() {
            return Err(nom::Err::Error(Error::new(i, ErrorKind::Eof)));
        }
        Ok((i, CompilationUnit { classes }))
    }

    fn class_decl(&self, i: &'s str) -> IResult<&'s str, ClassDecl> {
        let (i, annotations) = many0(annotation)(i)?;
        let span = self.here(i);
        let (i, modifiers) = modifiers(i)?;
        self.class_rest(i, annotations, modifiers, span)
    }

    /// Everything from the `class` keyword on
    fn class_rest(
        &self,
        i: &'s str,
        annotations: Vec<String>,
        modifiers: Modifiers,
        span: Span,
    ) -> IResult<&'s str, ClassDecl> {
        self.nested(i, |i| self.class_tail(i, annotations, modifiers, span))
    }

    fn class_tail(
        &self,
        i: &'s str,
        annotations: Vec<String>,
        modifiers: Modifiers,
        span: Span,
    ) -> IResult<&'s str, ClassDecl> {
        let (i, _) = keyword("class")(i)?;
        let (i, name) = cut(identifier)(i)?;
        let (i, superclass) = opt(preceded(keyword("extends"), cut(qualified_name)))(i)?;
        let (i, _) = cut(sym("{"))(i)?;
        let (i, members) = self.class_body(i, name)?;
        let (i, _) = cut(sym("}"))(i)?;
        Ok((
            i,
            ClassDecl {
                name: name.to_string(),
                annotations,
                modifiers,
                superclass,
                members,
                span,
            },
        ))
    }

    fn class_body(&self, mut i: &'s str, class_name: &str) -> IResult<&'s str, Vec<Member>> {
        let mut members = Vec::new();
        loop {
            let (rest, _) = ws(i)?;
            if rest.is_empty() || rest.starts_with('}') {
                return Ok((rest, members));
            }
            match self.member(rest, class_name) {
                Ok((next, member)) => {
                    members.push(member);
                    i = next;
                }
                Err(nom::Err::Failure(e)) if e.code == ErrorKind::TooLarge => {
                    return Err(nom::Err::Failure(e));
                }
                Err(err) => {
                    let reason = match &err {
                        nom::Err::Error(e) | nom::Err::Failure(e) => {
                            self.error_at(e.input, e.code).to_string()
                        }
                        nom::Err::Incomplete(_) => "incomplete member".to_string(),
                    };
                    let span = self.span(rest);
                    let (next, text) = skip_member(rest);
                    members.push(Member::Malformed {
                        span,
                        text: text.trim().to_string(),
                        reason,
                    });
                    i = next;
                }
            }
        }
    }

    fn member(&self, i: &'s str, class_name: &str) -> IResult<&'s str, Member> {
        let (i, annotations) = many0(annotation)(i)?;
        let span = self.here(i);
        let (i, modifiers) = modifiers(i)?;

        if keyword("class")(i).is_ok() {
            let (rest, nested) = self.class_rest(i, annotations, modifiers, span)?;
            return Ok((rest, Member::Class(nested)));
        }

        // Constructor: the class name directly followed by a parameter list
        if let Ok((rest, name)) = identifier(i) {
            if name == class_name {
                if let Ok((rest, _)) = sym("(")(rest) {
                    let (rest, params) = self.params(rest)?;
                    let (rest, body) = self.block(rest)?;
                    return Ok((
                        rest,
                        Member::Constructor(ConstructorDecl {
                            modifiers,
                            params,
                            body,
                            span,
                        }),
                    ));
                }
            }
        }

        let (i, ty) = type_ref(i)?;
        let (i, name) = identifier(i)?;

        if let Ok((rest, _)) = sym("(")(i) {
            let (rest, params) = self.params(rest)?;
            let (rest, body) = self.block(rest)?;
            return Ok((
                rest,
                Member::Method(MethodDecl {
                    name: name.to_string(),
                    modifiers,
                    params,
                    return_type: ty,
                    body,
                    span,
                }),
            ));
        }

        let (i, init) = opt(preceded(assign_op, |i| self.expr(i)))(i)?;
        let (i, _) = sym(";")(i)?;
        Ok((
            i,
            Member::Field(FieldDecl {
                name: name.to_string(),
                ty,
                modifiers,
                init,
                span,
            }),
        ))
    }

    /// Parameter list after the opening parenthesis
    fn params(&self, i: &'s str) -> IResult<&'s str, Vec<Param>> {
        let (i, params) = separated_list0(sym(","), pair(type_ref, identifier))(i)?;
        let (i, _) = sym(")")(i)?;
        Ok((
            i,
            params
                .into_iter()
                .map(|(ty, name)| Param {
                    name: name.to_string(),
                    ty,
                })
                .collect(),
        ))
    }

    fn block(&self, i: &'s str) -> IResult<&'s str, Vec<Stmt>> {
        let (mut i, _) = sym("{")(i)?;
        let mut stmts = Vec::new();
        loop {
            if let Ok((rest, _)) = sym("}")(i) {
                return Ok((rest, stmts));
            }
            let (rest, stmt) = self.stmt(i)?;
            stmts.push(stmt);
            i = rest;
        }
    }

    fn stmt(&self, i: &'s str) -> IResult<&'s str, Stmt> {
        self.nested(i, |i| self.stmt_inner(i))
    }

    fn stmt_inner(&self, i: &'s str) -> IResult<&'s str, Stmt> {
        let span = self.here(i);

        if sym("{")(i).is_ok() {
            let (rest, stmts) = self.block(i)?;
            return Ok((rest, Stmt::Block(stmts)));
        }

        if let Ok((rest, _)) = keyword("return")(i) {
            if let Ok((rest, _)) = sym(";")(rest) {
                return Ok((rest, Stmt::Return { value: None, span }));
            }
            let (rest, value) = self.expr(rest)?;
            let (rest, _) = sym(";")(rest)?;
            return Ok((
                rest,
                Stmt::Return {
                    value: Some(value),
                    span,
                },
            ));
        }

        if let Ok((rest, _)) = keyword("if")(i) {
            let (rest, condition) = self.parenthesized(rest)?;
            let (rest, then_branch) = self.stmt(rest)?;
            let (rest, else_branch) = match keyword("else")(rest) {
                Ok((rest, _)) => {
                    let (rest, stmt) = self.stmt(rest)?;
                    (rest, Some(Box::new(stmt)))
                }
                Err(_) => (rest, None),
            };
            return Ok((
                rest,
                Stmt::If {
                    condition,
                    then_branch: Box::new(then_branch),
                    else_branch,
                },
            ));
        }

        if let Ok((rest, _)) = keyword("while")(i) {
            let (rest, condition) = self.parenthesized(rest)?;
            let (rest, body) = self.stmt(rest)?;
            return Ok((
                rest,
                Stmt::While {
                    condition,
                    body: Box::new(body),
                },
            ));
        }

        if let Ok((rest, _)) = keyword("throw")(i) {
            let (rest, value) = self.expr(rest)?;
            let (rest, _) = sym(";")(rest)?;
            return Ok((rest, Stmt::Throw { value, span }));
        }

        if let Ok((rest, _)) = keyword("try")(i) {
            let (rest, body) = self.block(rest)?;
            let (rest, _) = keyword("catch")(rest)?;
            let (rest, _) = sym("(")(rest)?;
            let (rest, catch_type) = qualified_name(rest)?;
            let (rest, catch_var) = identifier(rest)?;
            let (rest, _) = sym(")")(rest)?;
            let (rest, handler) = self.block(rest)?;
            return Ok((
                rest,
                Stmt::Try {
                    body,
                    catch_type,
                    catch_var: catch_var.to_string(),
                    handler,
                },
            ));
        }

        if let Ok(result) = self.local_decl(i) {
            return Ok(result);
        }

        let (rest, expr) = self.expr(i)?;
        let (rest, _) = sym(";")(rest)?;
        Ok((rest, Stmt::Expr(expr)))
    }

    fn local_decl(&self, i: &'s str) -> IResult<&'s str, Stmt> {
        let span = self.here(i);
        let (i, ty) = type_ref(i)?;
        let (i, name) = identifier(i)?;
        let (i, init) = opt(preceded(assign_op, |i| self.expr(i)))(i)?;
        let (i, _) = sym(";")(i)?;
        Ok((
            i,
            Stmt::Local {
                name: name.to_string(),
                ty,
                init,
                span,
            },
        ))
    }

    fn parenthesized(&self, i: &'s str) -> IResult<&'s str, Expr> {
        let (i, _) = sym("(")(i)?;
        let (i, expr) = self.expr(i)?;
        let (i, _) = sym(")")(i)?;
        Ok((i, expr))
    }

    fn expr(&self, i: &'s str) -> IResult<&'s str, Expr> {
        self.nested(i, |i| match preceded(keyword("let"), temp_identifier)(i) {
            Ok((rest, name)) => self.let_expr(rest, name),
            Err(_) => self.assignment(i),
        })
    }

    /// Everything after `let $name`
    fn let_expr(&self, i: &'s str, name: &str) -> IResult<&'s str, Expr> {
        let (i, ty) = opt(preceded(sym(":"), type_ref))(i)?;
        let (i, _) = cut(assign_op)(i)?;
        let (i, init) = self.expr(i)?;
        let (i, _) = cut(keyword("in"))(i)?;
        let (i, body) = self.expr(i)?;
        Ok((
            i,
            Expr::Let {
                name: name.to_string(),
                ty,
                init: Box::new(init),
                body: Box::new(body),
            },
        ))
    }

    /// Everything after `seam::guard`
    fn guard(&self, i: &'s str) -> IResult<&'s str, Expr> {
        let (i, _) = sym("<")(i)?;
        let (i, result) = type_ref(i)?;
        let (i, _) = sym(">")(i)?;
        let (i, _) = sym("(")(i)?;
        let (i, site) = string_literal(i)?;
        let (i, _) = sym(",")(i)?;
        let (i, scope) = alt((
            value(GuardScope::Instance, keyword("this")),
            value(GuardScope::Static, keyword("static")),
        ))(i)?;
        let (i, _) = sym(",")(i)?;
        let (i, _) = sym("[")(i)?;
        let (i, args) = terminated(separated_list0(sym(","), |i| self.expr(i)), sym("]"))(i)?;
        let (i, _) = sym(")")(i)?;
        let (i, _) = sym("??")(i)?;
        let (i, fallback) = self.postfix(i)?;
        Ok((
            i,
            Expr::Guarded(Box::new(Guard {
                site: SiteId::new(site),
                scope,
                args,
                result,
                fallback: Box::new(fallback),
            })),
        ))
    }

    fn assignment(&self, i: &'s str) -> IResult<&'s str, Expr> {
        let (rest, lhs) = self.binary(i, 1)?;
        let Ok((after, _)) = assign_op(rest) else {
            return Ok((rest, lhs));
        };
        let (after, value) = self.assignment(after)?;
        let target = match lhs {
            Expr::Name { name, span } => LValue::Name { name, span },
            Expr::Field { target, name, span } => LValue::Field { target, name, span },
            Expr::Index { target, index } => LValue::Index { target, index },
            _ => return Err(nom::Err::Error(Error::new(rest, ErrorKind::Verify))),
        };
        Ok((
            after,
            Expr::Assign {
                target,
                value: Box::new(value),
            },
        ))
    }

    /// Precedence climbing; every level is left associative
    fn binary(&self, i: &'s str, min_precedence: u8) -> IResult<&'s str, Expr> {
        let (mut i, mut left) = self.unary(i)?;
        while let Some((rest, op)) = binary_op(i) {
            if op.precedence() < min_precedence {
                break;
            }
            let (rest, right) = self.binary(rest, op.precedence() + 1)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
            i = rest;
        }
        Ok((i, left))
    }

    fn unary(&self, i: &'s str) -> IResult<&'s str, Expr> {
        if let Ok((rest, _)) = terminated(sym("!"), not(char('=')))(i) {
            let (rest, operand) = self.nested(rest, |i| self.unary(i))?;
            return Ok((
                rest,
                Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
            ));
        }
        if let Ok((rest, _)) = sym("-")(i) {
            let (rest, operand) = self.nested(rest, |i| self.unary(i))?;
            let negated = match operand {
                Expr::Literal(Literal::Int(n)) => Expr::Literal(Literal::Int(-n)),
                Expr::Literal(Literal::Double(d)) => Expr::Literal(Literal::Double(-d)),
                other => Expr::Unary {
                    op: UnaryOp::Neg,
                    operand: Box::new(other),
                },
            };
            return Ok((rest, negated));
        }
        self.postfix(i)
    }

    fn postfix(&self, i: &'s str) -> IResult<&'s str, Expr> {
        let (mut i, mut expr) = self.primary(i)?;
        loop {
            if let Ok((rest, _)) = sym(".")(i) {
                let span = self.here(rest);
                let (rest, name) = identifier(rest)?;
                if let Ok((rest, _)) = sym("(")(rest) {
                    let (rest, args) = self.args(rest)?;
                    expr = Expr::Call {
                        receiver: Some(Box::new(expr)),
                        method: name.to_string(),
                        args,
                        span,
                    };
                    i = rest;
                } else {
                    expr = Expr::Field {
                        target: Box::new(expr),
                        name: name.to_string(),
                        span,
                    };
                    i = rest;
                }
                continue;
            }
            if let Ok((rest, _)) = sym("[")(i) {
                let (rest, index) = self.expr(rest)?;
                let (rest, _) = sym("]")(rest)?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
                i = rest;
                continue;
            }
            break;
        }
        Ok((i, expr))
    }

    /// Argument list after the opening parenthesis
    fn args(&self, i: &'s str) -> IResult<&'s str, Vec<Expr>> {
        terminated(separated_list0(sym(","), |i| self.expr(i)), sym(")"))(i)
    }

    fn primary(&self, i: &'s str) -> IResult<&'s str, Expr> {
        let span = self.here(i);

        if let Ok((rest, _)) = sym("(")(i) {
            let (rest, expr) = self.expr(rest)?;
            let (rest, _) = sym(")")(rest)?;
            return Ok((rest, expr));
        }

        if let Ok((rest, _)) = sym("[")(i) {
            let (rest, elements) =
                terminated(separated_list0(sym(","), |i| self.expr(i)), sym("]"))(rest)?;
            return Ok((rest, Expr::ListLiteral { elements }));
        }

        match string_literal(i) {
            Ok((rest, s)) => return Ok((rest, Expr::Literal(Literal::Str(s)))),
            Err(nom::Err::Failure(e)) => return Err(nom::Err::Failure(e)),
            Err(_) => {}
        }

        match number(i) {
            Ok((rest, literal)) => return Ok((rest, Expr::Literal(literal))),
            Err(nom::Err::Failure(e)) => return Err(nom::Err::Failure(e)),
            Err(_) => {}
        }

        if let Ok((rest, _)) = keyword("true")(i) {
            return Ok((rest, Expr::Literal(Literal::Bool(true))));
        }
        if let Ok((rest, _)) = keyword("false")(i) {
            return Ok((rest, Expr::Literal(Literal::Bool(false))));
        }
        if let Ok((rest, _)) = keyword("null")(i) {
            return Ok((rest, Expr::Literal(Literal::Null)));
        }
        if let Ok((rest, _)) = keyword("this")(i) {
            return Ok((rest, Expr::This));
        }

        if let Ok((rest, _)) = keyword("new")(i) {
            let (rest, ty) = type_ref(rest)?;
            return match ty {
                TypeRef::Array(elem) => {
                    let (rest, _) = sym("{")(rest)?;
                    let (rest, elements) =
                        terminated(separated_list0(sym(","), |i| self.expr(i)), sym("}"))(rest)?;
                    Ok((
                        rest,
                        Expr::NewArray {
                            elem: *elem,
                            elements,
                        },
                    ))
                }
                other => {
                    let (rest, _) = sym("(")(rest)?;
                    let (rest, args) = self.args(rest)?;
                    Ok((
                        rest,
                        Expr::New {
                            class: other.to_string(),
                            args,
                            span,
                        },
                    ))
                }
            };
        }

        if let Ok((rest, _)) = sym("seam::guard")(i) {
            return self.guard(rest);
        }
        if let Ok((rest, name)) = temp_identifier(i) {
            return Ok((
                rest,
                Expr::Name {
                    name: name.to_string(),
                    span,
                },
            ));
        }

        let (rest, name) = identifier(i)?;
        if let Ok((rest, _)) = sym("(")(rest) {
            let (rest, args) = self.args(rest)?;
            return Ok((
                rest,
                Expr::Call {
                    receiver: None,
                    method: name.to_string(),
                    args,
                    span,
                },
            ));
        }
        Ok((
            rest,
            Expr::Name {
                name: name.to_string(),
                span,
            },
        ))
    }
}
