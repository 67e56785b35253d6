use crate::Result;
use crate::ast::Node;
use crate::error::Error;
use crate::scope::Vars;
use crate::tags::{Tag, TagContext};
use crate::value::Value;

/// The `#if(cond): … #elif(cond): … #else: … #!if` directive.
pub(crate) struct IfTag;

impl Tag for IfTag {
    fn run(&self, tc: &mut TagContext<'_>, block: &[Node], args: &[Node]) -> Result<()> {
        if args.len() != 1 {
            return Err(tc.error(
                &tc.tag().pos,
                format!("expected one argument, got {}", args.len()),
            ));
        }

        let inner = find_inner(tc, block)?;

        if eval_cond(tc, &args[0])? {
            return tc.execute(&block[..inner.end_root], &Vars::new());
        }

        for (i, elif) in inner.elifs.iter().enumerate() {
            if eval_cond(tc, elif.cond)? {
                let next = inner
                    .elifs
                    .get(i + 1)
                    .map(|e| e.index)
                    .or(inner.else_index)
                    .unwrap_or(block.len());
                return tc.execute(&block[elif.index + 1..next], &Vars::new());
            }
        }

        if let Some(else_index) = inner.else_index {
            return tc.execute(&block[else_index + 1..], &Vars::new());
        }
        Ok(())
    }
}

struct Inner<'n> {
    /// Index of the first sibling `elif`/`else`, or the block length.
    end_root: usize,
    elifs: Vec<Elif<'n>>,
    else_index: Option<usize>,
}

struct Elif<'n> {
    index: usize,
    cond: &'n Node,
}

/// Finds the sibling `elif` and `else` markers of an if block. Nested
/// `if`/`#!if` pairs are skipped with an independent depth counter, so
/// markers belonging to an inner if never leak into the outer one.
fn find_inner<'n>(tc: &TagContext<'_>, block: &'n [Node]) -> Result<Inner<'n>> {
    let mut out = Inner {
        end_root: block.len(),
        elifs: Vec::new(),
        else_index: None,
    };
    let mut found_marker = false;
    let mut depth = 0usize;

    for (i, node) in block.iter().enumerate() {
        match node {
            Node::Tag(t) if t.has_body && t.name.name == "if" => depth += 1,
            Node::EndTag(e) if e.name.name == "if" => depth = depth.saturating_sub(1),
            Node::Tag(t) if depth == 0 && t.name.name == "elif" => {
                if out.else_index.is_some() {
                    return Err(tc.error(&t.pos, "elif tag cannot come after an else tag"));
                }
                if t.params.len() != 1 {
                    return Err(tc.error(
                        &t.pos,
                        format!("expected one argument, got {}", t.params.len()),
                    ));
                }
                if !found_marker {
                    out.end_root = i;
                    found_marker = true;
                }
                out.elifs.push(Elif {
                    index: i,
                    cond: &t.params[0],
                });
            }
            Node::Tag(t) if depth == 0 && t.name.name == "else" => {
                if out.else_index.is_some() {
                    return Err(Error::MultipleElse { pos: t.pos.clone() });
                }
                if !found_marker {
                    out.end_root = i;
                    found_marker = true;
                }
                out.else_index = Some(i);
            }
            _ => {}
        }
    }
    Ok(out)
}

fn eval_cond(tc: &TagContext<'_>, node: &Node) -> Result<bool> {
    match tc.get_value(node, &Vars::new())? {
        Value::Bool(b) => Ok(b),
        other => Err(tc.error(
            node.pos(),
            format!("expected a boolean argument, got {}", other.kind()),
        )),
    }
}
