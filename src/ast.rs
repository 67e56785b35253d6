use std::fmt;
use std::sync::Arc;

/// Source location attached to every node. `name` is the template name
/// the node was parsed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub name: Arc<str>,
    pub line: usize,
    pub col: usize,
}

impl Position {
    pub fn new(name: Arc<str>, line: usize, col: usize) -> Self {
        Self { name, line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.col)
    }
}

/// Binary operators, all at the same precedence level. Expressions fold
/// strictly left to right; grouping comes from nested `Expr` nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    In,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::In => "in",
        };
        f.write_str(s)
    }
}

/// A parsed template is a flat list of nodes. Tag bodies are not nested:
/// a body-bearing `Tag` is matched with its `EndTag` at render time.
#[derive(Debug, Clone)]
pub enum Node {
    Text(Text),
    ExprTag(ExprTag),
    Tag(Tag),
    EndTag(EndTag),
    Expr(Expr),
    Value(ValueNode),
    Assignment(Assignment),
    FuncCall(FuncCall),
    MethodCall(MethodCall),
    FieldAccess(FieldAccess),
    Index(Index),
    Ident(Ident),
    StringLit(StringLit),
    IntLit(IntLit),
    FloatLit(FloatLit),
    BoolLit(BoolLit),
    NilLit(NilLit),
    ArrayLit(ArrayLit),
    MapLit(MapLit),
    Ternary(Ternary),
    VariableOr(VariableOr),
}

impl Node {
    pub fn pos(&self) -> &Position {
        match self {
            Node::Text(n) => &n.pos,
            Node::ExprTag(n) => &n.pos,
            Node::Tag(n) => &n.pos,
            Node::EndTag(n) => &n.pos,
            Node::Expr(n) => &n.pos,
            Node::Value(n) => &n.pos,
            Node::Assignment(n) => &n.pos,
            Node::FuncCall(n) => &n.pos,
            Node::MethodCall(n) => &n.pos,
            Node::FieldAccess(n) => &n.pos,
            Node::Index(n) => &n.pos,
            Node::Ident(n) => &n.pos,
            Node::StringLit(n) => &n.pos,
            Node::IntLit(n) => &n.pos,
            Node::FloatLit(n) => &n.pos,
            Node::BoolLit(n) => &n.pos,
            Node::NilLit(n) => &n.pos,
            Node::ArrayLit(n) => &n.pos,
            Node::MapLit(n) => &n.pos,
            Node::Ternary(n) => &n.pos,
            Node::VariableOr(n) => &n.pos,
        }
    }

    /// Strips a `Value` wrapper that carries no negation, returning the
    /// inner node. Used by tags that expect a bare identifier argument.
    pub fn unwrap_value(&self) -> &Node {
        match self {
            Node::Value(v) if !v.not => v.inner.as_ref(),
            other => other,
        }
    }
}

/// Literal output text.
#[derive(Debug, Clone)]
pub struct Text {
    pub data: String,
    pub pos: Position,
}

/// `#(expr)` or, with `ignore_error`, `#?(expr)`.
#[derive(Debug, Clone)]
pub struct ExprTag {
    pub expr: Box<Node>,
    pub ignore_error: bool,
    pub pos: Position,
}

/// A directive invocation. `has_body` means a matching `#!name`
/// end-marker is expected further down the node list.
#[derive(Debug, Clone)]
pub struct Tag {
    pub name: Ident,
    pub params: Vec<Node>,
    pub has_body: bool,
    pub pos: Position,
}

/// `#!name`.
#[derive(Debug, Clone)]
pub struct EndTag {
    pub name: Ident,
    pub pos: Position,
}

/// `first op₁ operand₁ op₂ operand₂ …`, folded left to right.
#[derive(Debug, Clone)]
pub struct Expr {
    pub first: Box<Node>,
    pub rest: Vec<ExprOp>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct ExprOp {
    pub op: Op,
    pub op_pos: Position,
    pub operand: Node,
}

/// Operand wrapper admitting a leading `!`.
#[derive(Debug, Clone)]
pub struct ValueNode {
    pub inner: Box<Node>,
    pub not: bool,
    pub pos: Position,
}

/// `name = expr`. Binds into the innermost local scope; as an expression
/// it renders as empty output.
#[derive(Debug, Clone)]
pub struct Assignment {
    pub name: Ident,
    pub value: Box<Node>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct FuncCall {
    pub name: Ident,
    pub params: Vec<Node>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct MethodCall {
    pub recv: Box<Node>,
    pub name: Ident,
    pub params: Vec<Node>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct FieldAccess {
    pub recv: Box<Node>,
    pub name: Ident,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Index {
    pub recv: Box<Node>,
    pub index: Box<Node>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct Ident {
    pub name: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct StringLit {
    pub value: String,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct IntLit {
    pub value: i64,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct FloatLit {
    pub value: f64,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct BoolLit {
    pub value: bool,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct NilLit {
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct ArrayLit {
    pub items: Vec<Node>,
    pub pos: Position,
}

#[derive(Debug, Clone)]
pub struct MapLit {
    pub pairs: Vec<(Node, Node)>,
    pub pos: Position,
}

/// `cond ? if_true : if_false`. Only the selected branch is evaluated.
#[derive(Debug, Clone)]
pub struct Ternary {
    pub cond: Box<Node>,
    pub if_true: Box<Node>,
    pub if_false: Box<Node>,
    pub pos: Position,
}

/// `name | fallback`: the fallback is evaluated only when the identifier
/// lookup fails.
#[derive(Debug, Clone)]
pub struct VariableOr {
    pub name: Ident,
    pub fallback: Box<Node>,
    pub pos: Position,
}
