//! Parser for the cell language: `nom` combinators over the logos token stream.
//!
//! ```text
//! program := stmt*                       (separated by newlines or ';')
//! stmt    := 'import' IDENT ('as' IDENT)?
//!          | 'fn' IDENT '(' params ')' block
//!          | 'return' expr?
//!          | 'if' expr block ('else' 'if' expr block)* ('else' block)?
//!          | 'for' IDENT 'in' expr block
//!          | IDENT '=' expr
//!          | expr
//! expr    := or ; or := and ('or' and)* ; and := not ('and' not)*
//! not     := 'not'* cmp ; cmp := sum (cmp-op sum)?
//! sum     := term (('+'|'-') term)* ; term := unary (('*'|'/'|'%') unary)*
//! unary   := '-'* postfix ; postfix := primary ('(' args ')' | '.' IDENT | '[' expr ']')*
//! primary := INT | FLOAT | STR | 'true' | 'false' | 'none' | IDENT | '[' exprs ']' | '(' expr ')'
//! ```
//!
//! Operator chains are collected iteratively and folded, so only brackets
//! recurse. Bracket nesting and expression-tree depth are both bounded, which
//! keeps parsing, evaluation and drop of any accepted cell within the kernel
//! stack.

use super::lexer::{tokenize, Token};
use nom::branch::alt;
use nom::combinator::{cut, map, opt};
use nom::error::ErrorKind;
use nom::multi::{many0, separated_list0};
use nom::sequence::{pair, preceded, terminated};
use nom::{Err, IResult};
use std::sync::Arc;

/// Deepest expression tree (and `else if` chain) a cell may contain
pub const MAX_EXPR_DEPTH: usize = 256;

/// Deepest `(`, `[` and `{` nesting a cell may contain
pub const MAX_BRACKET_NESTING: usize = 100;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `<=`
    LtEq,
    /// `>`
    Gt,
    /// `>=`
    GtEq,
}

/// Literal constants
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `none`
    None,
    /// `true` / `false`
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f64),
    /// String
    Str(String),
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Constant
    Literal(Literal),
    /// Variable reference
    Name(String),
    /// `[a, b, ...]`
    List(Vec<Expr>),
    /// `obj.attr`
    Attr(Box<Expr>, String),
    /// `obj[key]`
    Index(Box<Expr>, Box<Expr>),
    /// `callee(args, key=value)`
    Call {
        /// Called expression
        callee: Box<Expr>,
        /// Positional arguments
        args: Vec<Expr>,
        /// Keyword arguments
        kwargs: Vec<(String, Expr)>,
    },
    /// `-x`
    Neg(Box<Expr>),
    /// `not x`
    Not(Box<Expr>),
    /// `a and b`
    And(Box<Expr>, Box<Expr>),
    /// `a or b`
    Or(Box<Expr>, Box<Expr>),
    /// Arithmetic or comparison
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

/// A function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name
    pub name: String,
    /// Default value, evaluated at call time
    pub default: Option<Expr>,
}

/// A user-defined function
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDef {
    /// Function name
    pub name: String,
    /// Parameters in order
    pub params: Vec<Param>,
    /// Body statements
    pub body: Vec<Stmt>,
}

/// Statements
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `import module [as alias]`
    Import {
        /// Module name
        module: String,
        /// Binding name
        alias: String,
    },
    /// `fn name(...) { ... }`
    FnDef(Arc<FunctionDef>),
    /// `return [expr]`
    Return(Option<Expr>),
    /// `if cond { ... } else { ... }`
    If {
        /// Condition
        cond: Expr,
        /// Taken branch
        then: Vec<Stmt>,
        /// Other branch (empty when absent)
        otherwise: Vec<Stmt>,
    },
    /// `for var in iter { ... }`
    For {
        /// Loop variable
        var: String,
        /// Iterated expression
        iter: Expr,
        /// Body
        body: Vec<Stmt>,
    },
    /// `name = expr`
    Assign {
        /// Target name
        name: String,
        /// Assigned value
        value: Expr,
    },
    /// Expression evaluated for effect (or as the cell result)
    Expr(Expr),
}

/// Parse error with position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line
    pub line: usize,
    /// Description
    pub message: String,
}

/// Parse a cell's source into statements.
///
/// # Errors
/// Returns the first lexical or syntactic error
pub fn parse_program(source: &str) -> Result<Vec<Stmt>, ParseError> {
    let tokens = tokenize(source).map_err(|e| ParseError {
        line: e.line,
        message: format!("invalid syntax near '{}'", e.snippet),
    })?;
    check_nesting(&tokens)?;

    match statements(&tokens) {
        Ok((rest, stmts)) if rest.is_empty() => Ok(stmts),
        Ok((rest, _)) => Err(error_at(&tokens, rest, None)),
        Err(Err::Error(e) | Err::Failure(e)) => Err(error_at(&tokens, e.input, e.message)),
        Err(Err::Incomplete(_)) => Err(error_at(&tokens, &[], None)),
    }
}

fn check_nesting(tokens: Tokens<'_>) -> Result<(), ParseError> {
    let mut depth = 0usize;
    for (token, line) in tokens {
        match token {
            Token::LParen | Token::LBracket | Token::LBrace => {
                depth += 1;
                if depth > MAX_BRACKET_NESTING {
                    return Err(ParseError {
                        line: *line,
                        message: "too many nested brackets".to_string(),
                    });
                }
            }
            Token::RParen | Token::RBracket | Token::RBrace => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

fn error_at(all: Tokens<'_>, at: Tokens<'_>, message: Option<String>) -> ParseError {
    let line = at
        .first()
        .or_else(|| all.last())
        .map_or(1, |(_, line)| *line);
    let message = message.unwrap_or_else(|| {
        at.first().map_or_else(
            || "unexpected end of input".to_string(),
            |(token, _)| format!("unexpected {token:?}"),
        )
    });
    ParseError { line, message }
}

// ============================================================================
// Token-level combinators
// ============================================================================

/// Parser input is a slice of `(token, line)` pairs
type Tokens<'a> = &'a [(Token, usize)];

type PResult<'a, T> = IResult<Tokens<'a>, T, TokenError<'a>>;

/// Where parsing stopped, with a message once the grammar has committed
#[derive(Debug, Clone, PartialEq)]
struct TokenError<'a> {
    input: Tokens<'a>,
    message: Option<String>,
}

impl<'a> TokenError<'a> {
    const fn new(input: Tokens<'a>) -> Self {
        Self {
            input,
            message: None,
        }
    }

    fn fail(input: Tokens<'a>, message: impl Into<String>) -> Err<Self> {
        Err::Failure(Self {
            input,
            message: Some(message.into()),
        })
    }
}

impl<'a> nom::error::ParseError<Tokens<'a>> for TokenError<'a> {
    fn from_error_kind(input: Tokens<'a>, _kind: ErrorKind) -> Self {
        Self::new(input)
    }

    fn append(_input: Tokens<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }

    fn or(self, other: Self) -> Self {
        // report the alternative that got furthest
        if other.input.len() <= self.input.len() {
            other
        } else {
            self
        }
    }
}

/// Consume one token mapped by `f`
fn single<'a, T>(input: Tokens<'a>, f: impl FnOnce(&Token) -> Option<T>) -> PResult<'a, T> {
    input
        .first()
        .and_then(|(token, _)| f(token))
        .map(|value| (&input[1..], value))
        .ok_or_else(|| Err::Error(TokenError::new(input)))
}

/// Match one specific token
fn token<'a>(expected: Token) -> impl Fn(Tokens<'a>) -> PResult<'a, ()> {
    move |input: Tokens<'a>| single(input, |t| (*t == expected).then_some(()))
}

/// Match one specific token or fail with "expected `what`"
fn expect<'a>(expected: Token, what: &'static str) -> impl Fn(Tokens<'a>) -> PResult<'a, ()> {
    move |input: Tokens<'a>| match input.first() {
        Some((t, _)) if *t == expected => Ok((&input[1..], ())),
        _ => Err(TokenError::fail(input, format!("expected {what}"))),
    }
}

fn identifier(input: Tokens<'_>) -> PResult<'_, String> {
    single(input, |t| match t {
        Token::Ident(name) => Some(name.clone()),
        _ => None,
    })
}

fn expect_ident<'a>(what: &'static str) -> impl Fn(Tokens<'a>) -> PResult<'a, String> {
    move |input: Tokens<'a>| {
        identifier(input).map_err(|_| TokenError::fail(input, format!("expected {what}")))
    }
}

/// Optional trailing comma, only after at least one item
fn trailing_comma<'a, T>(input: Tokens<'a>, items: &[T]) -> PResult<'a, ()> {
    if items.is_empty() {
        return Ok((input, ()));
    }
    map(opt(token(Token::Comma)), |_| ())(input)
}

fn separators(input: Tokens<'_>) -> PResult<'_, ()> {
    map(
        many0(alt((token(Token::Newline), token(Token::Semicolon)))),
        |_| (),
    )(input)
}

// ============================================================================
// Statements
// ============================================================================

fn statements(input: Tokens<'_>) -> PResult<'_, Vec<Stmt>> {
    preceded(separators, many0(terminated(statement, end_of_statement)))(input)
}

fn end_of_statement(input: Tokens<'_>) -> PResult<'_, ()> {
    match input.first() {
        None | Some((Token::RBrace, _)) => Ok((input, ())),
        Some((Token::Newline | Token::Semicolon, _)) => separators(input),
        Some((other, _)) => Err(TokenError::fail(
            input,
            format!("unexpected {other:?} after statement"),
        )),
    }
}

fn statement(input: Tokens<'_>) -> PResult<'_, Stmt> {
    alt((
        import_stmt,
        fn_def,
        return_stmt,
        if_stmt,
        for_stmt,
        assign_or_expr,
    ))(input)
}

fn block(input: Tokens<'_>) -> PResult<'_, Vec<Stmt>> {
    let (rest, ()) = expect(Token::LBrace, "'{'")(input)?;
    let (rest, body) = statements(rest)?;
    match rest.first() {
        Some((Token::RBrace, _)) => Ok((&rest[1..], body)),
        None => Err(TokenError::fail(rest, "unclosed block, expected '}'")),
        Some((other, _)) => Err(TokenError::fail(rest, format!("unexpected {other:?}"))),
    }
}

fn import_stmt(input: Tokens<'_>) -> PResult<'_, Stmt> {
    let (rest, ()) = token(Token::Import)(input)?;
    let (rest, module) = expect_ident("module name")(rest)?;
    let (rest, alias) = opt(preceded(token(Token::As), expect_ident("alias")))(rest)?;
    let alias = alias.unwrap_or_else(|| module.clone());
    Ok((rest, Stmt::Import { module, alias }))
}

fn param(input: Tokens<'_>) -> PResult<'_, Param> {
    let (rest, name) = identifier(input)?;
    let (rest, default) = opt(preceded(token(Token::Assign), cut(expr)))(rest)?;
    Ok((
        rest,
        Param {
            name,
            default: default.map(|node| node.expr),
        },
    ))
}

fn fn_def(input: Tokens<'_>) -> PResult<'_, Stmt> {
    let (rest, ()) = token(Token::Fn)(input)?;
    let (rest, name) = expect_ident("function name")(rest)?;
    let (rest, ()) = expect(Token::LParen, "'('")(rest)?;
    let (rest, raw) = separated_list0(token(Token::Comma), param)(rest)?;
    let (rest, ()) = trailing_comma(rest, &raw)?;
    let (rest, ()) = expect(Token::RParen, "')'")(rest)?;

    let mut params: Vec<Param> = Vec::with_capacity(raw.len());
    for p in raw {
        if params.iter().any(|q| q.name == p.name) {
            return Err(TokenError::fail(rest, format!("duplicate parameter '{}'", p.name)));
        }
        if p.default.is_none() && params.iter().any(|q| q.default.is_some()) {
            return Err(TokenError::fail(
                rest,
                "non-default parameter follows default parameter",
            ));
        }
        params.push(p);
    }

    let (rest, body) = block(rest)?;
    Ok((rest, Stmt::FnDef(Arc::new(FunctionDef { name, params, body }))))
}

fn return_stmt(input: Tokens<'_>) -> PResult<'_, Stmt> {
    let (rest, ()) = token(Token::Return)(input)?;
    let (rest, value) = opt(expr)(rest)?;
    Ok((rest, Stmt::Return(value.map(|node| node.expr))))
}

/// `else`, possibly on the line after the closing brace
fn else_keyword(input: Tokens<'_>) -> PResult<'_, ()> {
    map(
        pair(many0(token(Token::Newline)), token(Token::Else)),
        |_| (),
    )(input)
}

fn branch(input: Tokens<'_>) -> PResult<'_, (Expr, Vec<Stmt>)> {
    let (rest, cond) = expr(input)?;
    let (rest, body) = block(rest)?;
    Ok((rest, (cond.expr, body)))
}

fn if_stmt(input: Tokens<'_>) -> PResult<'_, Stmt> {
    let (rest, ()) = token(Token::If)(input)?;
    let (rest, (cond, then)) = cut(branch)(rest)?;
    let (rest, chained) = many0(preceded(
        pair(else_keyword, token(Token::If)),
        cut(branch),
    ))(rest)?;
    let (rest, last) = opt(preceded(else_keyword, cut(block)))(rest)?;
    if chained.len() > MAX_EXPR_DEPTH {
        return Err(TokenError::fail(rest, "'else if' chain too long"));
    }

    let mut otherwise = last.unwrap_or_default();
    for (cond, then) in chained.into_iter().rev() {
        otherwise = vec![Stmt::If {
            cond,
            then,
            otherwise,
        }];
    }
    Ok((
        rest,
        Stmt::If {
            cond,
            then,
            otherwise,
        },
    ))
}

fn for_stmt(input: Tokens<'_>) -> PResult<'_, Stmt> {
    let (rest, ()) = token(Token::For)(input)?;
    let (rest, var) = expect_ident("loop variable")(rest)?;
    let (rest, ()) = expect(Token::In, "'in'")(rest)?;
    let (rest, iter) = cut(expr)(rest)?;
    let (rest, body) = block(rest)?;
    Ok((
        rest,
        Stmt::For {
            var,
            iter: iter.expr,
            body,
        },
    ))
}

fn assign_or_expr(input: Tokens<'_>) -> PResult<'_, Stmt> {
    let (rest, target) = expr(input)?;
    let (rest, value) = opt(preceded(token(Token::Assign), cut(expr)))(rest)?;
    match (target.expr, value) {
        (target, None) => Ok((rest, Stmt::Expr(target))),
        (Expr::Name(name), Some(value)) => Ok((
            rest,
            Stmt::Assign {
                name,
                value: value.expr,
            },
        )),
        (_, Some(_)) => Err(TokenError::fail(input, "can only assign to a name")),
    }
}

// ============================================================================
// Expressions
// ============================================================================

/// Expression plus the depth of its tree
struct Node {
    expr: Expr,
    depth: usize,
}

impl Node {
    fn leaf(expr: Expr) -> Self {
        Self { expr, depth: 1 }
    }
}

/// Put `expr` one level above children of depth `below`
fn nest<'a>(at: Tokens<'a>, below: usize, expr: Expr) -> Result<Node, Err<TokenError<'a>>> {
    let depth = below + 1;
    if depth > MAX_EXPR_DEPTH {
        return Err(TokenError::fail(at, "expression too deeply nested"));
    }
    Ok(Node { expr, depth })
}

/// Left-fold `first op operand op operand ...`
fn fold_left<'a, Op>(
    at: Tokens<'a>,
    first: Node,
    rest: Vec<(Op, Node)>,
    join: impl Fn(Op, Box<Expr>, Box<Expr>) -> Expr,
) -> Result<Node, Err<TokenError<'a>>> {
    rest.into_iter().try_fold(first, |left, (op, right)| {
        let below = left.depth.max(right.depth);
        nest(at, below, join(op, Box::new(left.expr), Box::new(right.expr)))
    })
}

fn expr(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, first) = and_expr(input)?;
    let (rest, others) = many0(pair(token(Token::Or), cut(and_expr)))(rest)?;
    Ok((rest, fold_left(rest, first, others, |(), l, r| Expr::Or(l, r))?))
}

fn and_expr(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, first) = not_expr(input)?;
    let (rest, others) = many0(pair(token(Token::And), cut(not_expr)))(rest)?;
    Ok((rest, fold_left(rest, first, others, |(), l, r| Expr::And(l, r))?))
}

fn not_expr(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, nots) = many0(token(Token::Not))(input)?;
    let (rest, mut node) = if nots.is_empty() {
        comparison(rest)?
    } else {
        cut(comparison)(rest)?
    };
    for () in nots {
        node = nest(rest, node.depth, Expr::Not(Box::new(node.expr)))?;
    }
    Ok((rest, node))
}

fn compare_op(input: Tokens<'_>) -> PResult<'_, BinOp> {
    single(input, |t| match t {
        Token::Eq => Some(BinOp::Eq),
        Token::NotEq => Some(BinOp::NotEq),
        Token::Lt => Some(BinOp::Lt),
        Token::LtEq => Some(BinOp::LtEq),
        Token::Gt => Some(BinOp::Gt),
        Token::GtEq => Some(BinOp::GtEq),
        _ => None,
    })
}

fn comparison(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, left) = sum(input)?;
    let (rest, right) = opt(pair(compare_op, cut(sum)))(rest)?;
    let node = match right {
        Some(tail) => fold_left(rest, left, vec![tail], Expr::Binary)?,
        None => left,
    };
    Ok((rest, node))
}

fn sum_op(input: Tokens<'_>) -> PResult<'_, BinOp> {
    single(input, |t| match t {
        Token::Plus => Some(BinOp::Add),
        Token::Minus => Some(BinOp::Sub),
        _ => None,
    })
}

fn sum(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, first) = term(input)?;
    let (rest, others) = many0(pair(sum_op, cut(term)))(rest)?;
    Ok((rest, fold_left(rest, first, others, Expr::Binary)?))
}

fn term_op(input: Tokens<'_>) -> PResult<'_, BinOp> {
    single(input, |t| match t {
        Token::Star => Some(BinOp::Mul),
        Token::Slash => Some(BinOp::Div),
        Token::Percent => Some(BinOp::Rem),
        _ => None,
    })
}

fn term(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, first) = unary(input)?;
    let (rest, others) = many0(pair(term_op, cut(unary)))(rest)?;
    Ok((rest, fold_left(rest, first, others, Expr::Binary)?))
}

fn unary(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, negations) = many0(token(Token::Minus))(input)?;
    let (rest, mut node) = if negations.is_empty() {
        postfix(rest)?
    } else {
        cut(postfix)(rest)?
    };
    for () in negations {
        node = nest(rest, node.depth, Expr::Neg(Box::new(node.expr)))?;
    }
    Ok((rest, node))
}

enum Suffix {
    Call {
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
        depth: usize,
    },
    Attr(String),
    Index(Node),
}

enum Arg {
    Positional(Node),
    Keyword(String, Node),
}

fn argument(input: Tokens<'_>) -> PResult<'_, Arg> {
    alt((
        map(
            pair(terminated(identifier, token(Token::Assign)), cut(expr)),
            |(name, value)| Arg::Keyword(name, value),
        ),
        map(expr, Arg::Positional),
    ))(input)
}

fn call_args(input: Tokens<'_>) -> PResult<'_, Suffix> {
    let (rest, items) = separated_list0(token(Token::Comma), argument)(input)?;
    let (rest, ()) = trailing_comma(rest, &items)?;
    let (rest, ()) = expect(Token::RParen, "')'")(rest)?;

    let mut args = Vec::new();
    let mut kwargs: Vec<(String, Expr)> = Vec::new();
    let mut depth = 0;
    for item in items {
        match item {
            Arg::Positional(node) => {
                if !kwargs.is_empty() {
                    return Err(TokenError::fail(
                        rest,
                        "positional argument follows keyword argument",
                    ));
                }
                depth = depth.max(node.depth);
                args.push(node.expr);
            }
            Arg::Keyword(name, node) => {
                if kwargs.iter().any(|(k, _)| *k == name) {
                    return Err(TokenError::fail(
                        rest,
                        format!("keyword argument repeated: '{name}'"),
                    ));
                }
                depth = depth.max(node.depth);
                kwargs.push((name, node.expr));
            }
        }
    }
    Ok((rest, Suffix::Call { args, kwargs, depth }))
}

fn suffix(input: Tokens<'_>) -> PResult<'_, Suffix> {
    alt((
        preceded(token(Token::LParen), cut(call_args)),
        map(
            preceded(token(Token::Dot), expect_ident("attribute name")),
            Suffix::Attr,
        ),
        map(
            preceded(
                token(Token::LBracket),
                cut(terminated(expr, expect(Token::RBracket, "']'"))),
            ),
            Suffix::Index,
        ),
    ))(input)
}

fn postfix(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, base) = primary(input)?;
    let (rest, suffixes) = many0(suffix)(rest)?;
    let node = suffixes.into_iter().try_fold(base, |node, s| match s {
        Suffix::Call {
            args,
            kwargs,
            depth,
        } => nest(
            rest,
            node.depth.max(depth),
            Expr::Call {
                callee: Box::new(node.expr),
                args,
                kwargs,
            },
        ),
        Suffix::Attr(attr) => nest(rest, node.depth, Expr::Attr(Box::new(node.expr), attr)),
        Suffix::Index(index) => nest(
            rest,
            node.depth.max(index.depth),
            Expr::Index(Box::new(node.expr), Box::new(index.expr)),
        ),
    })?;
    Ok((rest, node))
}

fn literal(input: Tokens<'_>) -> PResult<'_, Node> {
    single(input, |t| {
        let lit = match t {
            Token::Int(v) => Literal::Int(*v),
            Token::Float(v) => Literal::Float(*v),
            Token::Str(s) => Literal::Str(s.clone()),
            Token::True => Literal::Bool(true),
            Token::False => Literal::Bool(false),
            Token::NoneLit => Literal::None,
            _ => return None,
        };
        Some(Node::leaf(Expr::Literal(lit)))
    })
}

fn list_items(input: Tokens<'_>) -> PResult<'_, Node> {
    let (rest, items) = separated_list0(token(Token::Comma), expr)(input)?;
    let (rest, ()) = trailing_comma(rest, &items)?;
    let (rest, ()) = expect(Token::RBracket, "']'")(rest)?;
    let below = items.iter().map(|n| n.depth).max().unwrap_or(0);
    let list = Expr::List(items.into_iter().map(|n| n.expr).collect());
    Ok((rest, nest(rest, below, list)?))
}

fn primary(input: Tokens<'_>) -> PResult<'_, Node> {
    alt((
        literal,
        map(identifier, |name| Node::leaf(Expr::Name(name))),
        preceded(
            token(Token::LParen),
            cut(terminated(expr, expect(Token::RParen, "')'"))),
        ),
        preceded(token(Token::LBracket), cut(list_items)),
    ))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_and_call() {
        let stmts = parse_program("x = f(1, key=\"v\")").unwrap();
        let Stmt::Assign { name, value } = &stmts[0] else {
            panic!("expected assignment");
        };
        assert_eq!(name, "x");
        let Expr::Call { args, kwargs, .. } = value else {
            panic!("expected call");
        };
        assert_eq!(args.len(), 1);
        assert_eq!(kwargs[0].0, "key");
    }

    #[test]
    fn test_precedence() {
        let stmts = parse_program("1 + 2 * 3").unwrap();
        let Stmt::Expr(Expr::Binary(BinOp::Add, _, rhs)) = &stmts[0] else {
            panic!("expected addition at the root");
        };
        assert!(matches!(**rhs, Expr::Binary(BinOp::Mul, _, _)));
    }

    #[test]
    fn test_function_with_defaults() {
        let stmts = parse_program("fn f(a, b=2) {\n return a + b\n}").unwrap();
        let Stmt::FnDef(def) = &stmts[0] else {
            panic!("expected function");
        };
        assert_eq!(def.name, "f");
        assert_eq!(def.params.len(), 2);
        assert!(def.params[1].default.is_some());
        assert_eq!(def.body.len(), 1);
    }

    #[test]
    fn test_else_on_next_line() {
        let stmts = parse_program("if x {\n y = 1\n}\nelse {\n y = 2\n}").unwrap();
        assert_eq!(stmts.len(), 1);
        let Stmt::If { otherwise, .. } = &stmts[0] else {
            panic!("expected if");
        };
        assert_eq!(otherwise.len(), 1);
    }

    #[test]
    fn test_multiline_call() {
        let stmts = parse_program("f(\n  1,\n  2,\n)\ng()").unwrap();
        assert_eq!(stmts.len(), 2);
    }

    #[test]
    fn test_positional_after_keyword_rejected() {
        let err = parse_program("f(a=1, 2)").unwrap_err();
        assert!(err.message.contains("positional argument follows keyword"));
    }

    #[test]
    fn test_unclosed_block_reports_line() {
        let err = parse_program("fn f() {\n x = 1\n").unwrap_err();
        assert!(err.message.contains("unclosed block"));
    }

    #[test]
    fn test_invalid_assignment_target() {
        let err = parse_program("f() = 1").unwrap_err();
        assert!(err.message.contains("can only assign to a name"));
    }

    #[test]
    fn test_else_if_chain() {
        let stmts = parse_program("if a { x = 1 } else if b { x = 2 } else { x = 3 }").unwrap();
        let Stmt::If { otherwise, .. } = &stmts[0] else {
            panic!("expected if");
        };
        let [Stmt::If { otherwise: last, .. }] = otherwise.as_slice() else {
            panic!("expected nested if");
        };
        assert_eq!(last.len(), 1);
    }

    #[test]
    fn test_long_unary_chain_rejected() {
        let source = format!("x = {}1", "-".repeat(50_000));
        let err = parse_program(&source).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("too deeply nested"));
    }

    #[test]
    fn test_long_operator_chain_rejected() {
        let source = format!("x = 1{}", " + 1".repeat(MAX_EXPR_DEPTH + 1));
        let err = parse_program(&source).unwrap_err();
        assert!(err.message.contains("too deeply nested"));

        let source = format!("x = 1{}", " + 1".repeat(MAX_EXPR_DEPTH / 2));
        assert!(parse_program(&source).is_ok());
    }

    #[test]
    fn test_bracket_nesting_limit() {
        let deep = format!("x = {}1{}", "(".repeat(150), ")".repeat(150));
        let err = parse_program(&deep).unwrap_err();
        assert!(err.message.contains("too many nested brackets"));

        let shallow = format!("x = {}1{}", "(".repeat(50), ")".repeat(50));
        assert!(parse_program(&shallow).is_ok());
    }

    #[test]
    fn test_unexpected_token_after_statement() {
        let err = parse_program("x = 1 2").unwrap_err();
        assert!(err.message.contains("after statement"));
    }
}
