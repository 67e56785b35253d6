use std::sync::Arc;

use log::debug;

use crate::Result;
use crate::ast::*;
use crate::error::Error;

/// Parses a template source into its flat node list.
pub(crate) fn parse(name: &str, src: &str) -> Result<Vec<Node>> {
    debug!("parsing template {} ({} bytes)", name, src.len());
    Parser::new(name, src).parse()
}

/// A hand-written scanner/recursive-descent parser for the template
/// surface.
///
/// It recognizes:
/// - Plain text (everything up to a `#` sequence; `\#` escapes a literal
///   `#`)
/// - Expression tags: `#(expr)` and `#?(expr)`
/// - Directive tags: `#name(args)` with an optional trailing `:` marking a
///   body, and the argument-less forms `#name` / `#name:`
/// - End-markers: `#!name`
///
/// The output is deliberately flat: tag bodies are not nested here, they
/// are carved out at render time by matching end-markers. Expressions use
/// a single precedence level folded left-to-right; grouping comes from
/// parentheses only.
struct Parser<'a> {
    src: &'a str,
    name: Arc<str>,
    pos: usize,
    line: usize,
    col: usize,
}

impl<'a> Parser<'a> {
    fn new(name: &str, src: &'a str) -> Self {
        Self {
            src,
            name: Arc::from(name),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn parse(mut self) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        let mut text = String::new();
        let mut text_pos = self.position();

        while let Some(c) = self.peek() {
            if c == '\\' && self.peek_at(1) == Some('#') {
                if text.is_empty() {
                    text_pos = self.position();
                }
                self.bump();
                self.bump();
                text.push('#');
                continue;
            }

            if c == '#' {
                let handled = match self.peek_at(1) {
                    Some('(') => true,
                    Some('?') if self.peek_at(2) == Some('(') => true,
                    // An end-marker needs a name; a bare "#!" is text.
                    Some('!') => self.peek_at(2).is_some_and(is_ident_start),
                    Some(c2) => is_ident_start(c2),
                    None => false,
                };
                if handled {
                    if !text.is_empty() {
                        nodes.push(Node::Text(Text {
                            data: std::mem::take(&mut text),
                            pos: text_pos.clone(),
                        }));
                    }
                    nodes.push(self.parse_hash()?);
                    continue;
                }
            }

            if text.is_empty() {
                text_pos = self.position();
            }
            text.push(c);
            self.bump();
        }

        if !text.is_empty() {
            nodes.push(Node::Text(Text {
                data: text,
                pos: text_pos,
            }));
        }
        Ok(nodes)
    }

    /// Parses the construct starting at a `#` known to be special.
    fn parse_hash(&mut self) -> Result<Node> {
        let start = self.position();
        self.bump(); // '#'

        match self.peek() {
            Some('(') => {
                let expr = self.parse_paren_expr()?;
                Ok(Node::ExprTag(ExprTag {
                    expr: Box::new(expr),
                    ignore_error: false,
                    pos: start,
                }))
            }
            Some('?') => {
                self.bump();
                let expr = self.parse_paren_expr()?;
                Ok(Node::ExprTag(ExprTag {
                    expr: Box::new(expr),
                    ignore_error: true,
                    pos: start,
                }))
            }
            Some('!') => {
                self.bump();
                let name = self.parse_ident()?;
                Ok(Node::EndTag(EndTag { name, pos: start }))
            }
            _ => {
                let name = self.parse_ident()?;
                let params = if self.peek() == Some('(') {
                    self.parse_call_args()?
                } else {
                    Vec::new()
                };
                let has_body = if self.peek() == Some(':') {
                    self.bump();
                    true
                } else {
                    false
                };
                Ok(Node::Tag(Tag {
                    name,
                    params,
                    has_body,
                    pos: start,
                }))
            }
        }
    }

    /// `( expr-or-assignment )` as used by expression tags.
    fn parse_paren_expr(&mut self) -> Result<Node> {
        self.expect('(')?;
        self.skip_ws();
        let node = self.parse_assignment_or_expr()?;
        self.skip_ws();
        self.expect(')')?;
        Ok(node)
    }

    /// An assignment (`name = expr`) if one is present, otherwise an
    /// expression. `==` is never mistaken for an assignment.
    fn parse_assignment_or_expr(&mut self) -> Result<Node> {
        self.skip_ws();
        let saved = (self.pos, self.line, self.col);
        let start = self.position();

        if self.peek().is_some_and(is_ident_start) {
            let name = self.parse_ident()?;
            self.skip_ws();
            if self.peek() == Some('=') && self.peek_at(1) != Some('=') {
                self.bump();
                self.skip_ws();
                let value = self.parse_expr()?;
                return Ok(Node::Assignment(Assignment {
                    name,
                    value: Box::new(value),
                    pos: start,
                }));
            }
            (self.pos, self.line, self.col) = saved;
        }

        self.parse_expr()
    }

    /// One expression: operands folded left-to-right with no precedence,
    /// then an optional ternary.
    fn parse_expr(&mut self) -> Result<Node> {
        self.skip_ws();
        let start = self.position();
        let first = self.parse_operand()?;

        let mut rest = Vec::new();
        loop {
            self.skip_ws();
            let Some((op, op_pos)) = self.try_parse_op() else {
                break;
            };
            self.skip_ws();
            let operand = self.parse_operand()?;
            rest.push(ExprOp {
                op,
                op_pos,
                operand,
            });
        }

        let node = if rest.is_empty() {
            first
        } else {
            Node::Expr(Expr {
                first: Box::new(first),
                rest,
                pos: start.clone(),
            })
        };

        self.skip_ws();
        if self.peek() == Some('?') {
            self.bump();
            self.skip_ws();
            let if_true = self.parse_expr()?;
            self.skip_ws();
            self.expect(':')?;
            self.skip_ws();
            let if_false = self.parse_expr()?;
            return Ok(Node::Ternary(Ternary {
                cond: Box::new(node),
                if_true: Box::new(if_true),
                if_false: Box::new(if_false),
                pos: start,
            }));
        }

        Ok(node)
    }

    /// One operand: an optional `!`, a primary, postfix accessors, and an
    /// optional `| fallback` on a bare identifier.
    fn parse_operand(&mut self) -> Result<Node> {
        self.skip_ws();
        let start = self.position();

        let mut not = false;
        if self.peek() == Some('!') && self.peek_at(1) != Some('=') {
            self.bump();
            self.skip_ws();
            not = true;
        }

        let mut node = self.parse_primary()?;

        loop {
            match self.peek() {
                Some('.') => {
                    let pos = self.position();
                    self.bump();
                    let name = self.parse_ident()?;
                    if self.peek() == Some('(') {
                        let params = self.parse_call_args()?;
                        node = Node::MethodCall(MethodCall {
                            recv: Box::new(node),
                            name,
                            params,
                            pos,
                        });
                    } else {
                        node = Node::FieldAccess(FieldAccess {
                            recv: Box::new(node),
                            name,
                            pos,
                        });
                    }
                }
                Some('[') => {
                    let pos = self.position();
                    self.bump();
                    self.skip_ws();
                    let index = self.parse_expr()?;
                    self.skip_ws();
                    self.expect(']')?;
                    node = Node::Index(Index {
                        recv: Box::new(node),
                        index: Box::new(index),
                        pos,
                    });
                }
                _ => break,
            }
        }

        if let Node::Ident(ident) = &node {
            let saved = (self.pos, self.line, self.col);
            self.skip_ws();
            if self.peek() == Some('|') && self.peek_at(1) != Some('|') {
                let ident = ident.clone();
                self.bump();
                self.skip_ws();
                let fallback = self.parse_operand()?;
                node = Node::VariableOr(VariableOr {
                    name: ident,
                    fallback: Box::new(fallback),
                    pos: start.clone(),
                });
            } else {
                (self.pos, self.line, self.col) = saved;
            }
        }

        if not {
            node = Node::Value(ValueNode {
                inner: Box::new(node),
                not: true,
                pos: start,
            });
        }
        Ok(node)
    }

    fn parse_primary(&mut self) -> Result<Node> {
        let start = self.position();
        match self.peek() {
            Some('(') => {
                self.bump();
                let expr = self.parse_expr()?;
                self.skip_ws();
                self.expect(')')?;
                Ok(expr)
            }
            Some('[') => {
                self.bump();
                let mut items = Vec::new();
                self.skip_ws();
                if self.peek() == Some(']') {
                    self.bump();
                } else {
                    loop {
                        items.push(self.parse_expr()?);
                        self.skip_ws();
                        match self.peek() {
                            Some(',') => {
                                self.bump();
                            }
                            Some(']') => {
                                self.bump();
                                break;
                            }
                            _ => return Err(self.error("expected ',' or ']' in array literal")),
                        }
                    }
                }
                Ok(Node::ArrayLit(ArrayLit { items, pos: start }))
            }
            Some('{') => {
                self.bump();
                let mut pairs = Vec::new();
                self.skip_ws();
                if self.peek() == Some('}') {
                    self.bump();
                } else {
                    loop {
                        let key = self.parse_expr()?;
                        self.skip_ws();
                        self.expect(':')?;
                        let value = self.parse_expr()?;
                        pairs.push((key, value));
                        self.skip_ws();
                        match self.peek() {
                            Some(',') => {
                                self.bump();
                            }
                            Some('}') => {
                                self.bump();
                                break;
                            }
                            _ => return Err(self.error("expected ',' or '}' in map literal")),
                        }
                    }
                }
                Ok(Node::MapLit(MapLit { pairs, pos: start }))
            }
            Some('"') => self.parse_string(),
            Some(c) if c.is_ascii_digit() => self.parse_number(),
            Some('-') if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.parse_number(),
            Some(c) if is_ident_start(c) => {
                let ident = self.parse_ident()?;
                match ident.name.as_str() {
                    "true" => Ok(Node::BoolLit(BoolLit {
                        value: true,
                        pos: start,
                    })),
                    "false" => Ok(Node::BoolLit(BoolLit {
                        value: false,
                        pos: start,
                    })),
                    "nil" => Ok(Node::NilLit(NilLit { pos: start })),
                    _ => {
                        if self.peek() == Some('(') {
                            let params = self.parse_call_args()?;
                            Ok(Node::FuncCall(FuncCall {
                                name: ident,
                                params,
                                pos: start,
                            }))
                        } else {
                            Ok(Node::Ident(ident))
                        }
                    }
                }
            }
            Some(c) => Err(self.error(format!("unexpected character {c:?} in expression"))),
            None => Err(self.error("unexpected end of template in expression")),
        }
    }

    /// `( arg, arg, … )` where each arg is an expression or assignment.
    fn parse_call_args(&mut self) -> Result<Vec<Node>> {
        self.expect('(')?;
        self.skip_ws();
        let mut args = Vec::new();
        if self.peek() == Some(')') {
            self.bump();
            return Ok(args);
        }
        loop {
            args.push(self.parse_assignment_or_expr()?);
            self.skip_ws();
            match self.peek() {
                Some(',') => {
                    self.bump();
                    self.skip_ws();
                }
                Some(')') => {
                    self.bump();
                    return Ok(args);
                }
                _ => return Err(self.error("expected ',' or ')' in argument list")),
            }
        }
    }

    fn parse_string(&mut self) -> Result<Node> {
        let start = self.position();
        self.bump(); // opening quote
        let mut value = String::new();
        loop {
            match self.peek() {
                Some('"') => {
                    self.bump();
                    break;
                }
                Some('\\') => {
                    self.bump();
                    let escaped = match self.peek() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some('\\') => '\\',
                        Some('"') => '"',
                        Some('#') => '#',
                        Some(c) => {
                            return Err(self.error(format!("invalid escape sequence \\{c}")));
                        }
                        None => return Err(Self::error_at(start, "unterminated string literal")),
                    };
                    self.bump();
                    value.push(escaped);
                }
                Some(c) => {
                    self.bump();
                    value.push(c);
                }
                None => return Err(Self::error_at(start, "unterminated string literal")),
            }
        }
        Ok(Node::StringLit(StringLit { value, pos: start }))
    }

    fn parse_number(&mut self) -> Result<Node> {
        let start = self.position();
        let begin = self.pos;
        if self.peek() == Some('-') {
            self.bump();
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        let mut is_float = false;
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        let text = &self.src[begin..self.pos];
        if is_float {
            let value: f64 = text
                .parse()
                .map_err(|_| Self::error_at(start.clone(), format!("invalid float literal {text}")))?;
            Ok(Node::FloatLit(FloatLit { value, pos: start }))
        } else {
            let value: i64 = text
                .parse()
                .map_err(|_| Self::error_at(start.clone(), format!("invalid integer literal {text}")))?;
            Ok(Node::IntLit(IntLit { value, pos: start }))
        }
    }

    fn parse_ident(&mut self) -> Result<Ident> {
        let start = self.position();
        let begin = self.pos;
        if !self.peek().is_some_and(is_ident_start) {
            return Err(self.error("expected an identifier"));
        }
        while self.peek().is_some_and(is_ident_char) {
            self.bump();
        }
        Ok(Ident {
            name: self.src[begin..self.pos].to_string(),
            pos: start,
        })
    }

    fn try_parse_op(&mut self) -> Option<(Op, Position)> {
        let pos = self.position();
        let two = [
            ("==", Op::Eq),
            ("!=", Op::Ne),
            ("<=", Op::Le),
            (">=", Op::Ge),
            ("&&", Op::And),
            ("||", Op::Or),
        ];
        for (sym, op) in two {
            if self.src[self.pos..].starts_with(sym) {
                self.bump();
                self.bump();
                return Some((op, pos));
            }
        }
        let one = [
            ('+', Op::Add),
            ('-', Op::Sub),
            ('*', Op::Mul),
            ('/', Op::Div),
            ('%', Op::Mod),
            ('<', Op::Lt),
            ('>', Op::Gt),
        ];
        for (sym, op) in one {
            if self.peek() == Some(sym) {
                self.bump();
                return Some((op, pos));
            }
        }
        // The `in` keyword, with a word boundary after it.
        if self.src[self.pos..].starts_with("in")
            && !self
                .src[self.pos + 2..]
                .chars()
                .next()
                .is_some_and(is_ident_char)
        {
            self.bump();
            self.bump();
            return Some((Op::In, pos));
        }
        None
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.bump();
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.peek() == Some(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.error(format!("expected {c:?}")))
        }
    }

    fn position(&self) -> Position {
        Position::new(self.name.clone(), self.line, self.col)
    }

    fn error(&self, msg: impl Into<String>) -> Error {
        Self::error_at(self.position(), msg)
    }

    fn error_at(pos: Position, msg: impl Into<String>) -> Error {
        Error::Parse {
            pos,
            msg: msg.into(),
        }
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(src: &str) -> Node {
        let nodes = parse("test", src).unwrap();
        assert_eq!(nodes.len(), 1, "expected one node, got {nodes:?}");
        nodes.into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_plain_text() {
        let nodes = parse("test", "hello # world").unwrap();
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            Node::Text(t) => assert_eq!(t.data, "hello # world"),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_escaped_hash() {
        let nodes = parse("test", r"\#if literal").unwrap();
        match &nodes[0] {
            Node::Text(t) => assert_eq!(t.data, "#if literal"),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_expr_tag() {
        match parse_one("#(x)") {
            Node::ExprTag(et) => {
                assert!(!et.ignore_error);
                assert!(matches!(*et.expr, Node::Ident(_)));
            }
            other => panic!("expected ExprTag, got {other:?}"),
        }

        match parse_one("#?(x)") {
            Node::ExprTag(et) => assert!(et.ignore_error),
            other => panic!("expected ExprTag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_tag_and_end_tag() {
        let nodes = parse("test", "#if(x):body#!if").unwrap();
        assert_eq!(nodes.len(), 3);
        match &nodes[0] {
            Node::Tag(tag) => {
                assert_eq!(tag.name.name, "if");
                assert_eq!(tag.params.len(), 1);
                assert!(tag.has_body);
            }
            other => panic!("expected Tag, got {other:?}"),
        }
        match &nodes[2] {
            Node::EndTag(end) => assert_eq!(end.name.name, "if"),
            other => panic!("expected EndTag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_argless_tag() {
        let nodes = parse("test", "#else:").unwrap();
        match &nodes[0] {
            Node::Tag(tag) => {
                assert_eq!(tag.name.name, "else");
                assert!(tag.params.is_empty());
                assert!(tag.has_body);
            }
            other => panic!("expected Tag, got {other:?}"),
        }
    }

    #[test]
    fn test_expr_folds_left_to_right() {
        match parse_one("#(1 + 2 * 3)") {
            Node::ExprTag(et) => match *et.expr {
                Node::Expr(e) => {
                    assert!(matches!(*e.first, Node::IntLit(_)));
                    assert_eq!(e.rest.len(), 2);
                    assert_eq!(e.rest[0].op, Op::Add);
                    assert_eq!(e.rest[1].op, Op::Mul);
                }
                other => panic!("expected Expr, got {other:?}"),
            },
            other => panic!("expected ExprTag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_in_expr() {
        match parse_one("#for(item in items):") {
            Node::Tag(tag) => {
                assert_eq!(tag.params.len(), 1);
                match &tag.params[0] {
                    Node::Expr(e) => {
                        assert_eq!(e.rest.len(), 1);
                        assert_eq!(e.rest[0].op, Op::In);
                    }
                    other => panic!("expected Expr, got {other:?}"),
                }
            }
            other => panic!("expected Tag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_assignment() {
        match parse_one("#(x = 4)") {
            Node::ExprTag(et) => match *et.expr {
                Node::Assignment(a) => {
                    assert_eq!(a.name.name, "x");
                    assert!(matches!(*a.value, Node::IntLit(_)));
                }
                other => panic!("expected Assignment, got {other:?}"),
            },
            other => panic!("expected ExprTag, got {other:?}"),
        }

        // `==` must stay a comparison.
        match parse_one("#(x == 4)") {
            Node::ExprTag(et) => assert!(matches!(*et.expr, Node::Expr(_))),
            other => panic!("expected ExprTag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_ternary_and_coalescing() {
        match parse_one(r#"#(n == 0 ? "zero" : "nonzero")"#) {
            Node::ExprTag(et) => assert!(matches!(*et.expr, Node::Ternary(_))),
            other => panic!("expected ExprTag, got {other:?}"),
        }

        match parse_one(r#"#(missing | "fallback")"#) {
            Node::ExprTag(et) => match *et.expr {
                Node::VariableOr(vo) => assert_eq!(vo.name.name, "missing"),
                other => panic!("expected VariableOr, got {other:?}"),
            },
            other => panic!("expected ExprTag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_postfix_chain() {
        match parse_one("#(user.Name)") {
            Node::ExprTag(et) => assert!(matches!(*et.expr, Node::FieldAccess(_))),
            other => panic!("expected ExprTag, got {other:?}"),
        }
        match parse_one("#(t.String())") {
            Node::ExprTag(et) => assert!(matches!(*et.expr, Node::MethodCall(_))),
            other => panic!("expected ExprTag, got {other:?}"),
        }
        match parse_one(r#"#(y["hello"][0])"#) {
            Node::ExprTag(et) => assert!(matches!(*et.expr, Node::Index(_))),
            other => panic!("expected ExprTag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_literals() {
        match parse_one(r#"#({"a": 1, "b": [2.5, true, nil]})"#) {
            Node::ExprTag(et) => match *et.expr {
                Node::MapLit(m) => assert_eq!(m.pairs.len(), 2),
                other => panic!("expected MapLit, got {other:?}"),
            },
            other => panic!("expected ExprTag, got {other:?}"),
        }
    }

    #[test]
    fn test_positions_track_lines() {
        let nodes = parse("test", "line one\n#(x)").unwrap();
        match &nodes[1] {
            Node::ExprTag(et) => {
                assert_eq!(et.pos.line, 2);
                assert_eq!(et.pos.col, 1);
            }
            other => panic!("expected ExprTag, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_error_carries_position() {
        let err = parse("test", "#(1 +").unwrap_err();
        match err {
            Error::Parse { pos, .. } => assert_eq!(pos.line, 1),
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_unclosed_string() {
        assert!(parse("test", r#"#("abc)"#).is_err());
    }
}
