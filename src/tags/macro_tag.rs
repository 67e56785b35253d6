use crate::Result;
use crate::ast::Node;
use crate::error::Error;
use crate::scope::Vars;
use crate::tags::{Tag, TagContext};
use crate::value::Value;

/// The `#macro("name"): … #!macro` directive.
///
/// With a body, captures the body under the name in the per-render macro
/// table. Without one, replays the captured body with the trailing
/// assignments as its local scope. A name starting with `?` makes a
/// missing macro a no-op.
pub(crate) struct MacroTag;

impl Tag for MacroTag {
    fn run(&self, tc: &mut TagContext<'_>, block: &[Node], args: &[Node]) -> Result<()> {
        if args.is_empty() {
            return Err(tc.error(&tc.tag().pos, "expected at least one argument"));
        }

        let name_val = tc.get_value(&args[0], &Vars::new())?;
        let Value::Str(name) = name_val else {
            return Err(tc.error(
                args[0].pos(),
                format!("expected a string macro name, got {}", name_val.kind()),
            ));
        };
        let (name, ignore_missing) = if let Some(stripped) = name.strip_prefix('?') {
            (stripped.to_string(), true)
        } else {
            (name, false)
        };

        if !block.is_empty() {
            tc.exec.set_macro(name, block.to_vec());
            return Ok(());
        }

        let mut local = Vars::new();
        for arg in &args[1..] {
            let Node::Assignment(a) = arg.unwrap_value() else {
                return Err(tc.error(arg.pos(), "expected an assignment argument"));
            };
            let value = tc.get_value(&a.value, &local)?;
            local.insert(a.name.name.clone(), value);
        }

        let Some(nodes) = tc.exec.macro_block(&name) else {
            if ignore_missing {
                return Ok(());
            }
            return Err(Error::NoSuchMacro {
                pos: tc.tag().pos.clone(),
                name,
            });
        };

        tc.execute(&nodes, &local)
    }
}
