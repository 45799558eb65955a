//! Query AST
//!
//! Closed sum types over the DML subset the analyzer understands. Nodes carry
//! only what analysis needs, each with a [`Span`] back into the source block.

use crate::diagnostics::Span;

/// An identifier as written, with its span. Comparison for name resolution
/// goes through [`Ident::normalized`]; the original spelling is preserved
/// for display.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

impl Ident {
    /// Canonical lower-cased key for case-insensitive comparison.
    pub fn normalized(&self) -> String {
        self.name.to_lowercase()
    }

    pub fn matches(&self, other: &str) -> bool {
        self.name.eq_ignore_ascii_case(other)
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStatement),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

impl Statement {
    pub fn span(&self) -> &Span {
        match self {
            Statement::Select(s) => &s.span,
            Statement::Insert(s) => &s.span,
            Statement::Update(s) => &s.span,
            Statement::Delete(s) => &s.span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub with: Option<WithClause>,
    pub body: SelectBody,
    pub order_by: Vec<OrderingTerm>,
    pub limit: Option<Expr>,
    pub offset: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct WithClause {
    pub recursive: bool,
    pub ctes: Vec<Cte>,
}

#[derive(Debug, Clone)]
pub struct Cte {
    pub name: Ident,
    /// Optional explicit column list `name (a, b) AS (...)`.
    pub columns: Vec<Ident>,
    pub query: SelectStatement,
    pub span: Span,
}

/// A select body is either a single core or a set operation tree. Set
/// operations associate left, matching SQL's parse order.
#[derive(Debug, Clone)]
pub enum SelectBody {
    Core(SelectCore),
    SetOp {
        op: SetOperator,
        left: Box<SelectBody>,
        right: Box<SelectBody>,
        span: Span,
    },
}

impl SelectBody {
    /// The leftmost core, which determines the output column names of a
    /// set-operation chain.
    pub fn leftmost_core(&self) -> &SelectCore {
        match self {
            SelectBody::Core(core) => core,
            SelectBody::SetOp { left, .. } => left.leftmost_core(),
        }
    }

    pub fn span(&self) -> &Span {
        match self {
            SelectBody::Core(core) => &core.span,
            SelectBody::SetOp { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOperator {
    Union,
    UnionAll,
    Intersect,
    Except,
}

#[derive(Debug, Clone)]
pub struct SelectCore {
    pub distinct: bool,
    pub projection: Vec<SelectItem>,
    pub from: Option<FromClause>,
    pub where_clause: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum SelectItem {
    /// `*`
    Wildcard { span: Span },
    /// `t.*`
    QualifiedWildcard { table: Ident, span: Span },
    /// `expr [AS alias]`
    Expr { expr: Expr, alias: Option<Ident> },
}

#[derive(Debug, Clone)]
pub struct FromClause {
    pub first: TableSource,
    pub joins: Vec<Join>,
}

#[derive(Debug, Clone)]
pub enum TableSource {
    Table(TableRef),
    Subquery {
        query: Box<SelectStatement>,
        alias: Option<Ident>,
        span: Span,
    },
}

impl TableSource {
    pub fn span(&self) -> &Span {
        match self {
            TableSource::Table(t) => &t.span,
            TableSource::Subquery { span, .. } => span,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableRef {
    pub name: Ident,
    pub alias: Option<Ident>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub source: TableSource,
    /// `ON` predicate; absent for CROSS and comma joins.
    pub predicate: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct OrderingTerm {
    pub expr: Expr,
    pub desc: bool,
    /// `NULLS FIRST` (true) / `NULLS LAST` (false), when written.
    pub nulls_first: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct InsertStatement {
    pub table: TableRef,
    /// Explicit column list, empty when omitted.
    pub columns: Vec<Ident>,
    pub source: InsertSource,
    pub on_conflict: Option<OnConflict>,
    pub returning: Option<Vec<SelectItem>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum InsertSource {
    Values(Vec<Vec<Expr>>),
    Select(Box<SelectStatement>),
    DefaultValues,
}

#[derive(Debug, Clone)]
pub struct OnConflict {
    pub target_columns: Vec<Ident>,
    pub action: ConflictAction,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ConflictAction {
    DoNothing,
    DoUpdate {
        assignments: Vec<Assignment>,
        where_clause: Option<Expr>,
    },
}

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub table: TableRef,
    pub assignments: Vec<Assignment>,
    pub where_clause: Option<Expr>,
    pub returning: Option<Vec<SelectItem>>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub column: Ident,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub table: TableRef,
    pub where_clause: Option<Expr>,
    pub returning: Option<Vec<SelectItem>>,
    pub span: Span,
}

// --- Expressions ---

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Real(f64),
    String(String),
    /// Hex digits of an `x'..'` literal.
    Blob(String),
    Null,
    True,
    False,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceholderKind {
    /// Bare `?`, index assigned by textual order.
    Anonymous,
    /// `?N`.
    Positional(u32),
    /// `:name`, `@name`, `$name`.
    Named(String),
    /// `/*SLICE:name*/` variadic marker.
    Slice(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Placeholder {
    pub kind: PlaceholderKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ColumnRef {
    pub table: Option<Ident>,
    pub column: Ident,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Concat,
    BitAnd,
    BitOr,
    ShiftLeft,
    ShiftRight,
    Is,
    IsNot,
}

impl BinaryOp {
    /// Comparison and logical operators produce booleans.
    pub fn is_boolean(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
                | BinaryOp::And
                | BinaryOp::Or
                | BinaryOp::Is
                | BinaryOp::IsNot
        )
    }

    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
                | BinaryOp::Is
                | BinaryOp::IsNot
        )
    }
}

#[derive(Debug, Clone)]
pub enum LikeOp {
    Like,
    Glob,
}

#[derive(Debug, Clone)]
pub enum FunctionArgs {
    /// `COUNT(*)`
    Star,
    List(Vec<Expr>),
}

#[derive(Debug, Clone)]
pub struct WindowSpec {
    pub partition_by: Vec<Expr>,
    pub order_by: Vec<OrderingTerm>,
}

#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: Ident,
    pub args: FunctionArgs,
    pub distinct: bool,
    pub over: Option<WindowSpec>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal, Span),
    Column(ColumnRef),
    Placeholder(Placeholder),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    IsNull {
        operand: Box<Expr>,
        negated: bool,
        span: Span,
    },
    Between {
        operand: Box<Expr>,
        low: Box<Expr>,
        high: Box<Expr>,
        negated: bool,
        span: Span,
    },
    Like {
        operand: Box<Expr>,
        pattern: Box<Expr>,
        op: LikeOp,
        negated: bool,
        span: Span,
    },
    InList {
        operand: Box<Expr>,
        items: Vec<Expr>,
        negated: bool,
        span: Span,
    },
    InSubquery {
        operand: Box<Expr>,
        query: Box<SelectStatement>,
        negated: bool,
        span: Span,
    },
    /// `operand IN (/*SLICE:name*/)` — one variadic placeholder.
    InSlice {
        operand: Box<Expr>,
        placeholder: Placeholder,
        negated: bool,
        span: Span,
    },
    Exists {
        query: Box<SelectStatement>,
        negated: bool,
        span: Span,
    },
    Case {
        operand: Option<Box<Expr>>,
        branches: Vec<(Expr, Expr)>,
        else_branch: Option<Box<Expr>>,
        span: Span,
    },
    Cast {
        expr: Box<Expr>,
        /// Raw SQL type token, classified by the analyzer.
        type_token: String,
        span: Span,
    },
    Function(FunctionCall),
    /// Scalar subquery in expression position.
    Subquery {
        query: Box<SelectStatement>,
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> &Span {
        match self {
            Expr::Literal(_, span) => span,
            Expr::Column(c) => &c.span,
            Expr::Placeholder(p) => &p.span,
            Expr::Unary { span, .. } => span,
            Expr::Binary { span, .. } => span,
            Expr::IsNull { span, .. } => span,
            Expr::Between { span, .. } => span,
            Expr::Like { span, .. } => span,
            Expr::InList { span, .. } => span,
            Expr::InSubquery { span, .. } => span,
            Expr::InSlice { span, .. } => span,
            Expr::Exists { span, .. } => span,
            Expr::Case { span, .. } => span,
            Expr::Cast { span, .. } => span,
            Expr::Function(f) => &f.span,
            Expr::Subquery { span, .. } => span,
        }
    }
}
