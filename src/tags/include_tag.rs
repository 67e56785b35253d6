use crate::Result;
use crate::ast::Node;
use crate::error::Error;
use crate::scope::Vars;
use crate::tags::{Tag, TagContext};
use crate::value::Value;

/// The `#include("name", var=value, …)` directive.
///
/// Executes a registered template in place, with the trailing assignments
/// as its local scope. A name starting with `?` makes a missing template a
/// no-op instead of an error.
pub(crate) struct IncludeTag;

impl Tag for IncludeTag {
    fn run(&self, tc: &mut TagContext<'_>, _block: &[Node], args: &[Node]) -> Result<()> {
        if args.is_empty() {
            return Err(tc.error(&tc.tag().pos, "expected at least one argument"));
        }

        let name_val = tc.get_value(&args[0], &Vars::new())?;
        let Value::Str(name) = name_val else {
            return Err(tc.error(
                args[0].pos(),
                format!("expected a string template name, got {}", name_val.kind()),
            ));
        };
        let (name, ignore_missing) = if let Some(stripped) = name.strip_prefix('?') {
            (stripped.to_string(), true)
        } else {
            (name, false)
        };

        // Assignments after the name become the locals of the included
        // template. Later ones can refer to earlier ones.
        let mut local = Vars::new();
        for arg in &args[1..] {
            let Node::Assignment(a) = arg.unwrap_value() else {
                return Err(tc.error(arg.pos(), "expected an assignment argument"));
            };
            let value = tc.get_value(&a.value, &local)?;
            local.insert(a.name.name.clone(), value);
        }

        let Some(data) = tc.namespace().template_data(&name) else {
            if ignore_missing {
                return Ok(());
            }
            return Err(Error::NoSuchTemplate {
                pos: tc.tag().pos.clone(),
                name,
            });
        };

        tc.execute(data.ast(), &local)
    }
}
