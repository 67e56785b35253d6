use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Write;

use crate::Result;
use crate::ast::{self, Node, Op, Position};
use crate::error::Error;
use crate::ops;
use crate::scope::Vars;
use crate::tags::TagContext;
use crate::template::Template;
use crate::value::{Func, Kind, Value};

/// Bounds template recursion (`include`/`macro` cycles) and pathological
/// nesting.
const MAX_DEPTH: usize = 64;

/// One render in flight: the template being executed, the per-render macro
/// table, and the re-entry depth.
pub(crate) struct Exec<'t> {
    pub(crate) tmpl: &'t Template,
    macros: RefCell<HashMap<String, Vec<Node>>>,
    depth: Cell<usize>,
}

impl<'t> Exec<'t> {
    pub(crate) fn new(tmpl: &'t Template) -> Self {
        Self {
            tmpl,
            macros: RefCell::new(HashMap::new()),
            depth: Cell::new(0),
        }
    }

    /// Walks a node list, writing output in source order. Directives may
    /// re-enter this with merged locals.
    pub(crate) fn run(&self, w: &mut dyn Write, nodes: &[Node], local: &mut Vars) -> Result<()> {
        let Some(first) = nodes.first() else {
            return Ok(());
        };
        let depth = self.depth.get();
        if depth >= MAX_DEPTH {
            return Err(Error::RecursionTooDeep {
                pos: first.pos().clone(),
            });
        }
        self.depth.set(depth + 1);
        let result = self.run_inner(w, nodes, local);
        self.depth.set(depth);
        result
    }

    fn run_inner(&self, w: &mut dyn Write, nodes: &[Node], local: &mut Vars) -> Result<()> {
        let mut i = 0;
        while i < nodes.len() {
            match &nodes[i] {
                Node::Text(t) => {
                    w.write_all(t.data.as_bytes()).map_err(|e| Error::Write {
                        pos: t.pos.clone(),
                        source: e,
                    })?;
                }
                Node::Tag(tag) => {
                    i = self.exec_tag(w, tag, nodes, i, local)?;
                    continue;
                }
                Node::EndTag(end) => {
                    // A matched end-marker is consumed by exec_tag, so
                    // reaching one here means it never had a start tag.
                    return Err(Error::EndTagWithoutStart {
                        pos: end.pos.clone(),
                        name: end.name.name.clone(),
                    });
                }
                Node::ExprTag(et) => match self.get_value(&et.expr, local) {
                    Ok(v) => {
                        if !matches!(&*et.expr, Node::Assignment(_)) {
                            self.write_value(w, &v, &et.pos)?;
                        }
                    }
                    Err(Error::Write { pos, source }) => {
                        return Err(Error::Write { pos, source });
                    }
                    Err(_) if et.ignore_error => {}
                    Err(e) => return Err(e),
                },
                // Bare expression nodes never appear at the top level of a
                // parsed template.
                _ => {}
            }
            i += 1;
        }
        Ok(())
    }

    fn write_value(&self, w: &mut dyn Write, v: &Value, pos: &Position) -> Result<()> {
        let s = match v {
            Value::Raw(r) => r.clone(),
            _ => {
                let s = v.to_string();
                if self.tmpl.escape_html_effective() {
                    escape_html(&s)
                } else {
                    s
                }
            }
        };
        w.write_all(s.as_bytes()).map_err(|e| Error::Write {
            pos: pos.clone(),
            source: e,
        })
    }

    fn exec_tag(
        &self,
        w: &mut dyn Write,
        tag: &ast::Tag,
        nodes: &[Node],
        i: usize,
        local: &Vars,
    ) -> Result<usize> {
        let handler = self
            .tmpl
            .get_tag(&tag.name.name)
            .ok_or_else(|| Error::NoSuchTag {
                pos: tag.pos.clone(),
                name: tag.name.name.clone(),
            })?;

        let (block, next) = if tag.has_body {
            get_block(nodes, i + 1, &tag.name.name)
        } else {
            (&nodes[i..i], i + 1)
        };

        let mut tc = TagContext {
            exec: self,
            w,
            tag,
            local,
        };
        handler
            .run(&mut tc, block, &tag.params)
            .map_err(|e| Error::Tag {
                pos: tag.pos.clone(),
                name: tag.name.name.clone(),
                source: Box::new(e),
            })?;
        Ok(next)
    }

    /// Evaluates an expression node to a value. Assignments bind into
    /// `local` and yield nil (the caller decides whether that is legal).
    pub(crate) fn get_value(&self, node: &Node, local: &mut Vars) -> Result<Value> {
        match node {
            Node::Ident(id) => self.get_var(id, local),
            Node::StringLit(s) => Ok(Value::Str(s.value.clone())),
            Node::IntLit(i) => Ok(Value::Int(i.value)),
            Node::FloatLit(f) => Ok(Value::Float(f.value)),
            Node::BoolLit(b) => Ok(Value::Bool(b.value)),
            Node::NilLit(_) => Ok(Value::Nil),
            Node::Expr(e) => self.eval_expr(e, local),
            Node::Value(v) => self.unwrap_value_node(v, local),
            Node::Assignment(a) => {
                let value = self.get_value(&a.value, local)?;
                local.insert(a.name.name.clone(), value);
                Ok(Value::Nil)
            }
            Node::FuncCall(fc) => self.exec_func_call(fc, local),
            Node::MethodCall(mc) => self.exec_method_call(mc, local),
            Node::FieldAccess(fa) => self.get_field(fa, local),
            Node::Index(ix) => self.get_index(ix, local),
            Node::Ternary(t) => self.eval_ternary(t, local),
            Node::VariableOr(vo) => match self.get_var(&vo.name, local) {
                Ok(v) => Ok(v),
                Err(_) => self.get_value(&vo.fallback, local),
            },
            Node::ArrayLit(a) => {
                let mut items = Vec::with_capacity(a.items.len());
                for item in &a.items {
                    items.push(self.get_value(item, local)?);
                }
                Ok(Value::Array(items))
            }
            Node::MapLit(m) => {
                let mut pairs = Vec::with_capacity(m.pairs.len());
                for (k, v) in &m.pairs {
                    pairs.push((self.get_value(k, local)?, self.get_value(v, local)?));
                }
                Ok(Value::Map(pairs))
            }
            Node::Text(_) | Node::ExprTag(_) | Node::Tag(_) | Node::EndTag(_) => Ok(Value::Nil),
        }
    }

    fn get_var(&self, id: &ast::Ident, local: &Vars) -> Result<Value> {
        self.tmpl
            .lookup_var(local, &id.name)
            .ok_or_else(|| Error::NoSuchVariable {
                pos: id.pos.clone(),
                name: id.name.clone(),
            })
    }

    fn unwrap_value_node(&self, vn: &ast::ValueNode, local: &mut Vars) -> Result<Value> {
        let v = self.get_value(&vn.inner, local)?;
        if vn.not {
            match v {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                _ => Err(Error::NotNonBool {
                    pos: vn.pos.clone(),
                }),
            }
        } else {
            Ok(v)
        }
    }

    /// Left-to-right fold over the operator chain. `&&`/`||` short-circuit:
    /// a decided left side skips evaluation of the right operand.
    fn eval_expr(&self, e: &ast::Expr, local: &mut Vars) -> Result<Value> {
        let mut acc = self.get_value(&e.first, local)?;
        for step in &e.rest {
            if matches!(step.op, Op::And | Op::Or) {
                let Value::Bool(left) = acc else {
                    return Err(Error::LogicalNonBool {
                        pos: step.op_pos.clone(),
                    });
                };
                if (step.op == Op::And && !left) || (step.op == Op::Or && left) {
                    acc = Value::Bool(left);
                    continue;
                }
                let rhs = self.get_value(&step.operand, local)?;
                let Value::Bool(right) = rhs else {
                    return Err(Error::LogicalNonBool {
                        pos: step.op_pos.clone(),
                    });
                };
                acc = Value::Bool(right);
                continue;
            }

            let rhs = self.get_value(&step.operand, local)?;
            acc = ops::binary(
                step.op,
                &step.op_pos,
                acc,
                rhs,
                self.tmpl.nil_to_zero_effective(),
            )?;
        }
        Ok(acc)
    }

    fn eval_ternary(&self, t: &ast::Ternary, local: &mut Vars) -> Result<Value> {
        let cond = self.get_value(&t.cond, local)?;
        match cond {
            Value::Bool(true) => self.get_value(&t.if_true, local),
            Value::Bool(false) => self.get_value(&t.if_false, local),
            other => Err(Error::TernaryCondNotBool {
                pos: t.cond.pos().clone(),
                kind: other.kind(),
            }),
        }
    }

    fn exec_func_call(&self, fc: &ast::FuncCall, local: &mut Vars) -> Result<Value> {
        let target = self
            .get_var(&fc.name, local)
            .map_err(|_| Error::NoSuchFunction {
                pos: fc.pos.clone(),
                name: fc.name.name.clone(),
            })?;
        let Value::Func(f) = target else {
            return Err(Error::InvalidCallable {
                pos: fc.pos.clone(),
                kind: target.kind(),
            });
        };
        self.call_func(&f, &fc.pos, &fc.params, local)
    }

    fn exec_method_call(&self, mc: &ast::MethodCall, local: &mut Vars) -> Result<Value> {
        let recv = self.get_value(&mc.recv, local)?;
        let name = &mc.name.name;
        let not_found = || Error::NoSuchMethod {
            pos: mc.pos.clone(),
            name: name.clone(),
        };

        match &recv {
            Value::Foreign(obj) => {
                if let Some(m) = obj.method(name) {
                    return self.call_func(&m, &mc.pos, &mc.params, local);
                }
                // Fall back to a field holding a callable.
                match obj.field(name) {
                    Some(Value::Func(m)) => self.call_func(&m, &mc.pos, &mc.params, local),
                    _ => Err(not_found()),
                }
            }
            // Structs have no intrinsic methods; a field holding a callable
            // is invoked in their place.
            Value::Struct(s) => match s.field(name) {
                Some(Value::Func(m)) => {
                    let m = m.clone();
                    self.call_func(&m, &mc.pos, &mc.params, local)
                }
                _ => Err(not_found()),
            },
            _ => Err(not_found()),
        }
    }

    /// Validates the argument list against the callable's declared
    /// signature, coerces, and invokes.
    pub(crate) fn call_func(
        &self,
        f: &Func,
        pos: &Position,
        args: &[Node],
        local: &mut Vars,
    ) -> Result<Value> {
        let params = f.params();
        let arity_ok = match f.variadic_kind() {
            None => args.len() == params.len(),
            Some(_) => args.len() >= params.len(),
        };
        if !arity_ok {
            return Err(Error::ParamCount {
                pos: pos.clone(),
                got: args.len(),
                expected: params.len(),
            });
        }

        let mut vals = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            if matches!(arg.unwrap_value(), Node::Assignment(_)) {
                return Err(Error::AssignmentAsArgument {
                    pos: arg.pos().clone(),
                });
            }
            let v = self.get_value(arg, local)?;
            let expected = if i < params.len() {
                params[i]
            } else {
                f.variadic_kind().unwrap_or(Kind::Any)
            };
            let v = ops::coerce(&v, expected, self.tmpl.nil_to_zero_effective()).ok_or_else(
                || Error::ParamType {
                    pos: arg.pos().clone(),
                    got: v.kind(),
                    expected,
                },
            )?;
            vals.push(v);
        }

        f.call(&vals).map_err(|msg| Error::Call {
            pos: pos.clone(),
            msg,
        })
    }

    fn get_field(&self, fa: &ast::FieldAccess, local: &mut Vars) -> Result<Value> {
        let recv = self.get_value(&fa.recv, local)?;
        let name = &fa.name.name;
        match &recv {
            Value::Nil => Err(Error::FieldOnNil {
                pos: fa.pos.clone(),
                name: name.clone(),
            }),
            Value::Struct(s) => s.field(name).cloned().ok_or_else(|| Error::NoSuchField {
                pos: fa.pos.clone(),
                name: name.clone(),
            }),
            Value::Foreign(obj) => obj.field(name).ok_or_else(|| Error::NoSuchField {
                pos: fa.pos.clone(),
                name: name.clone(),
            }),
            other => Err(Error::NoFields {
                pos: fa.pos.clone(),
                kind: other.kind(),
            }),
        }
    }

    fn get_index(&self, ix: &ast::Index, local: &mut Vars) -> Result<Value> {
        let recv = self.get_value(&ix.recv, local)?;
        let idx = self.get_value(&ix.index, local)?;
        match &recv {
            Value::Array(items) => {
                let i = resolve_index(&idx, items.len(), &ix.pos)?;
                Ok(items[i].clone())
            }
            Value::Str(s) => {
                let len = s.chars().count();
                let i = resolve_index(&idx, len, &ix.pos)?;
                let c = s.chars().nth(i).unwrap();
                Ok(Value::Str(c.to_string()))
            }
            Value::Bytes(b) => {
                let i = resolve_index(&idx, b.len(), &ix.pos)?;
                Ok(Value::Uint(b[i] as u64))
            }
            Value::Map(pairs) => pairs
                .iter()
                .find(|(k, _)| ops::coerced_eq(&idx, k))
                .map(|(_, v)| v.clone())
                .ok_or_else(|| Error::MapKeyNotFound {
                    pos: ix.pos.clone(),
                    key: idx.to_string(),
                }),
            other => Err(Error::CannotIndex {
                pos: ix.pos.clone(),
                kind: other.kind(),
            }),
        }
    }

    pub(crate) fn macro_block(&self, name: &str) -> Option<Vec<Node>> {
        self.macros.borrow().get(name).cloned()
    }

    pub(crate) fn set_macro(&self, name: String, block: Vec<Node>) {
        self.macros.borrow_mut().insert(name, block);
    }
}

/// Captures the block belonging to a body-bearing tag named `name`
/// starting at `offset`. Depth counts body-bearing tags of the same name
/// against their end-markers. Returns the block (excluding the matching
/// end-marker) and the index just past it; a missing end-marker consumes
/// the rest of the input.
pub(crate) fn get_block<'n>(nodes: &'n [Node], offset: usize, name: &str) -> (&'n [Node], usize) {
    let mut depth = 1usize;
    for i in offset..nodes.len() {
        match &nodes[i] {
            Node::Tag(t) if t.has_body && t.name.name == name => depth += 1,
            Node::EndTag(e) if e.name.name == name => {
                depth -= 1;
                if depth == 0 {
                    return (&nodes[offset..i], i + 1);
                }
            }
            _ => {}
        }
    }
    (&nodes[offset..], nodes.len())
}

/// HTML text-context escaping for `& < > " '`.
pub(crate) fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn resolve_index(idx: &Value, len: usize, pos: &Position) -> Result<usize> {
    let i = match idx {
        Value::Int(i) => *i,
        Value::Uint(u) => i64::try_from(*u).unwrap_or(i64::MAX),
        Value::Float(f) if f.fract() == 0.0 => *f as i64,
        other => {
            return Err(Error::InvalidIndexType {
                pos: pos.clone(),
                got: other.kind(),
                expected: Kind::Int,
            });
        }
    };
    // Negative indices address from the end.
    let effective = if i < 0 { len as i64 + i } else { i };
    if effective < 0 || effective >= len as i64 {
        return Err(Error::IndexOutOfRange {
            pos: pos.clone(),
            index: i,
            len,
        });
    }
    Ok(effective as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_escape_html() {
        assert_eq!(escape_html("<b>&'\"</b>"), "&lt;b&gt;&amp;&#39;&#34;&lt;/b&gt;");
        assert_eq!(escape_html("plain"), "plain");
    }

    #[test]
    fn test_resolve_index_negative() {
        let pos = Position::new(Arc::from("test"), 1, 1);
        assert_eq!(resolve_index(&Value::Int(-1), 3, &pos).unwrap(), 2);
        assert_eq!(resolve_index(&Value::Int(0), 3, &pos).unwrap(), 0);
        assert!(matches!(
            resolve_index(&Value::Int(-4), 3, &pos),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            resolve_index(&Value::Int(-1), 0, &pos),
            Err(Error::IndexOutOfRange { .. })
        ));
        assert!(matches!(
            resolve_index(&Value::Str("x".into()), 3, &pos),
            Err(Error::InvalidIndexType { .. })
        ));
    }
}
