use crate::Result;
use crate::ast::{Node, Op};
use crate::scope::Vars;
use crate::tags::{Tag, TagContext};
use crate::value::Value;

/// The `#for(… in iterable): … #!for` directive.
///
/// One to three loop variables: `x in it` binds the element (array/string)
/// or value (map); `i, x in it` binds index+element or key+value;
/// `i, k, v in it` binds index+key+value and is valid for maps only.
pub(crate) struct ForTag;

impl Tag for ForTag {
    fn run(&self, tc: &mut TagContext<'_>, block: &[Node], args: &[Node]) -> Result<()> {
        if args.is_empty() || args.len() > 3 {
            return Err(tc.error(
                &tc.tag().pos,
                format!("expected between one and three arguments, got {}", args.len()),
            ));
        }

        let mut vars = Vec::with_capacity(args.len());
        for arg in &args[..args.len() - 1] {
            let Node::Ident(id) = arg.unwrap_value() else {
                return Err(tc.error(arg.pos(), "expected a loop variable identifier"));
            };
            vars.push(id.name.clone());
        }

        let last = args[args.len() - 1].unwrap_value();
        let Node::Expr(expr) = last else {
            return Err(tc.error(last.pos(), "expected an \"in\" expression"));
        };
        let Node::Ident(id) = expr.first.unwrap_value() else {
            return Err(tc.error(expr.first.pos(), "expected a loop variable identifier"));
        };
        vars.push(id.name.clone());
        if expr.rest.len() != 1 || expr.rest[0].op != Op::In {
            return Err(tc.error(&expr.pos, "expected an \"in\" expression"));
        }

        let iter_node = &expr.rest[0].operand;
        let iterable = tc.get_value(iter_node, &Vars::new())?;

        // One scope map reused across iterations: loop variables are
        // overwritten each round, and the merge inside execute keeps any
        // assignments made by the body from leaking out of it.
        let mut local = Vars::new();
        match &iterable {
            Value::Array(items) => {
                check_var_count(tc, iter_node, vars.len(), 2)?;
                for (i, item) in items.iter().enumerate() {
                    bind_indexed(&mut local, &vars, i, item.clone());
                    tc.execute(block, &local)?;
                }
            }
            Value::Str(s) => {
                check_var_count(tc, iter_node, vars.len(), 2)?;
                for (i, c) in s.chars().enumerate() {
                    bind_indexed(&mut local, &vars, i, Value::Str(c.to_string()));
                    tc.execute(block, &local)?;
                }
            }
            Value::Map(pairs) => {
                for (i, (key, value)) in pairs.iter().enumerate() {
                    match vars.len() {
                        1 => {
                            local.insert(vars[0].clone(), value.clone());
                        }
                        2 => {
                            local.insert(vars[0].clone(), key.clone());
                            local.insert(vars[1].clone(), value.clone());
                        }
                        _ => {
                            local.insert(vars[0].clone(), Value::Int(i as i64));
                            local.insert(vars[1].clone(), key.clone());
                            local.insert(vars[2].clone(), value.clone());
                        }
                    }
                    tc.execute(block, &local)?;
                }
            }
            other => {
                return Err(tc.error(
                    iter_node.pos(),
                    format!("cannot iterate over a {} value", other.kind()),
                ));
            }
        }
        Ok(())
    }
}

fn check_var_count(tc: &TagContext<'_>, node: &Node, got: usize, max: usize) -> Result<()> {
    if got > max {
        Err(tc.error(
            node.pos(),
            "arrays and strings can only use up to two loop variables",
        ))
    } else {
        Ok(())
    }
}

fn bind_indexed(local: &mut Vars, vars: &[String], i: usize, item: Value) {
    if vars.len() == 1 {
        local.insert(vars[0].clone(), item);
    } else {
        local.insert(vars[0].clone(), Value::Int(i as i64));
        local.insert(vars[1].clone(), item);
    }
}
