//! Abstract Syntax Tree for the subject language.
//!
//! The same node types describe both input programs and the residual
//! (reduced) programs the partial evaluator emits, so this module also
//! carries a handful of builders for synthesizing residual nodes.

use std::rc::Rc;

pub type Ident = String;

/// Source location for error reporting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(&self, other: &Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Human-readable source position (1-indexed line and column)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Maps byte offsets to line:column positions.
///
/// Pre-computes line boundaries from source text, enabling O(log n)
/// lookup of positions from byte offsets.
#[derive(Debug, Clone)]
pub struct SourceMap {
    source: String,
    /// Byte offset of the start of each line (0-indexed)
    line_starts: Vec<usize>,
}

impl SourceMap {
    pub fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, c) in source.char_indices() {
            if c == '\n' {
                line_starts.push(i + 1);
            }
        }
        Self {
            source: source.to_string(),
            line_starts,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Convert a byte offset to a Position (1-indexed line and column)
    pub fn position(&self, byte_offset: usize) -> Position {
        let line_idx = match self.line_starts.binary_search(&byte_offset) {
            Ok(idx) => idx,
            Err(idx) => idx - 1,
        };
        let line_start = self.line_starts[line_idx];
        let column = self.source[line_start..byte_offset.min(self.source.len())]
            .chars()
            .count()
            + 1;
        Position {
            line: line_idx + 1,
            column,
        }
    }

    /// Get the text content of a line (1-indexed), without the trailing newline
    pub fn line(&self, line_num: usize) -> Option<&str> {
        if line_num == 0 || line_num > self.line_starts.len() {
            return None;
        }
        let line_idx = line_num - 1;
        let start = self.line_starts[line_idx];
        let end = if line_idx + 1 < self.line_starts.len() {
            self.line_starts[line_idx + 1] - 1
        } else {
            self.source.len()
        };
        Some(self.source[start..end].trim_end_matches('\r'))
    }
}

/// A spanned AST node
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    /// A node synthesized by the evaluator, with no source location.
    pub fn synthetic(node: T) -> Self {
        Self {
            node,
            span: Span::default(),
        }
    }
}

// ============================================================================
// Expressions
// ============================================================================

pub type Expr = Spanned<ExprKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Lit(Literal),

    /// Variable reference
    Var(Ident),

    /// Assignment: `x = e` or `o.k = e` (an expression, as in JS)
    Assign {
        target: Rc<Expr>,
        value: Rc<Expr>,
    },

    Binary {
        op: BinOp,
        left: Rc<Expr>,
        right: Rc<Expr>,
    },

    Unary {
        op: UnaryOp,
        operand: Rc<Expr>,
    },

    /// Short-circuit `&&` / `||`
    Logical {
        op: LogicalOp,
        left: Rc<Expr>,
        right: Rc<Expr>,
    },

    /// Ternary `cond ? a : b`
    Conditional {
        cond: Rc<Expr>,
        consequent: Rc<Expr>,
        alternate: Rc<Expr>,
    },

    /// Member access: `o.k` or `o[k]`
    Member {
        object: Rc<Expr>,
        property: Rc<Expr>,
        /// true for `o.k` (property is a string literal), false for `o[k]`
        dot: bool,
    },

    /// Object literal `{ k: v, ... }`
    ObjectLit(Vec<(Ident, Expr)>),

    /// Call. Only intrinsics (`__abstract` and friends) are evaluable;
    /// anything else raises a static diagnostic.
    Call {
        callee: Rc<Expr>,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Str(String),
    Bool(bool),
    Null,
    Undefined,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    EqLoose,
    NeqLoose,
    EqStrict,
    NeqStrict,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::EqLoose => "==",
            BinOp::NeqLoose => "!=",
            BinOp::EqStrict => "===",
            BinOp::NeqStrict => "!==",
            BinOp::Lt => "<",
            BinOp::Lte => "<=",
            BinOp::Gt => ">",
            BinOp::Gte => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    TypeOf,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Not => "!",
            UnaryOp::Neg => "-",
            UnaryOp::TypeOf => "typeof ",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            LogicalOp::And => "&&",
            LogicalOp::Or => "||",
        }
    }
}

// ============================================================================
// Statements
// ============================================================================

pub type Stmt = Spanned<StmtKind>;

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Empty,

    Expression(Expr),

    /// `let x = e;` (initializer optional)
    Let {
        name: Ident,
        init: Option<Expr>,
    },

    Block(Vec<Stmt>),

    If {
        test: Expr,
        consequent: Rc<Stmt>,
        alternate: Option<Rc<Stmt>>,
    },

    While {
        test: Expr,
        body: Rc<Stmt>,
    },

    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },

    Return(Option<Expr>),

    Break(Option<Ident>),

    Continue(Option<Ident>),

    Throw(Expr),

    Try {
        block: Rc<Stmt>,
        param: Ident,
        handler: Rc<Stmt>,
    },

    Labeled {
        label: Ident,
        body: Rc<Stmt>,
    },
}

/// One `case test:` arm (or `default:` when `test` is None).
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Vec<Stmt>,
}

// ============================================================================
// Residual-node builders
// ============================================================================

/// An empty statement with no source location.
pub fn empty_stmt() -> Stmt {
    Stmt::synthetic(StmtKind::Empty)
}

/// Wrap an expression in an expression statement.
pub fn expr_stmt(expr: Expr) -> Stmt {
    let span = expr.span.clone();
    Stmt::new(StmtKind::Expression(expr), span)
}

/// Wrap statements in a block.
pub fn block_stmt(stmts: Vec<Stmt>) -> Stmt {
    Stmt::synthetic(StmtKind::Block(stmts))
}

/// Build a residual `if` node.
pub fn if_stmt(test: Expr, consequent: Stmt, alternate: Option<Stmt>) -> Stmt {
    let span = test.span.clone();
    Stmt::new(
        StmtKind::If {
            test,
            consequent: Rc::new(consequent),
            alternate: alternate.map(Rc::new),
        },
        span,
    )
}

/// Prepend pending statements to a statement, wrapping in a block if needed.
/// Mirrors how branch arms absorb their pending residual statements.
pub fn absorb_pending(pending: Vec<Stmt>, stmt: Stmt) -> Stmt {
    if pending.is_empty() {
        stmt
    } else {
        let mut stmts = pending;
        stmts.push(stmt);
        block_stmt(stmts)
    }
}

/// True if a statement is trivially empty (empty statement or empty block).
pub fn is_trivial(stmt: &Stmt) -> bool {
    match &stmt.node {
        StmtKind::Empty => true,
        StmtKind::Block(body) => body.iter().all(is_trivial),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_merge_covers_both() {
        let a = Span::new(4, 10);
        let b = Span::new(7, 20);
        assert_eq!(a.merge(&b), Span::new(4, 20));
    }

    #[test]
    fn source_map_positions() {
        let map = SourceMap::new("let x = 1;\nlet y = 2;\n");
        assert_eq!(map.position(0).line, 1);
        assert_eq!(map.position(11).line, 2);
        assert_eq!(map.position(11).column, 1);
        assert_eq!(map.line(2), Some("let y = 2;"));
    }

    #[test]
    fn absorb_pending_wraps_in_block() {
        let wrapped = absorb_pending(vec![empty_stmt()], empty_stmt());
        assert!(matches!(wrapped.node, StmtKind::Block(ref b) if b.len() == 2));
        let bare = absorb_pending(vec![], empty_stmt());
        assert!(matches!(bare.node, StmtKind::Empty));
    }

    #[test]
    fn trivial_statements() {
        assert!(is_trivial(&empty_stmt()));
        assert!(is_trivial(&block_stmt(vec![empty_stmt()])));
        assert!(!is_trivial(&expr_stmt(Expr::synthetic(ExprKind::Lit(
            Literal::Null
        )))));
    }
}
