use std::collections::HashMap;

use crate::funcs;
use crate::namespace::Namespace;
use crate::value::Value;

/// A single scope layer: identifier → value.
pub type Vars = HashMap<String, Value>;

/// Builds the local scope for a child block: `b` layered over `a`.
/// The result is a fresh map, so assignments inside the child never leak
/// back into the parent scope.
pub(crate) fn merge(a: &Vars, b: &Vars) -> Vars {
    let mut out = Vars::with_capacity(a.len() + b.len());
    for (k, v) in a {
        out.insert(k.clone(), v.clone());
    }
    for (k, v) in b {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// Resolves an identifier through the scope layers:
/// block-local → template-local → namespace → built-in globals.
pub(crate) fn lookup(local: &Vars, tmpl_vars: &Vars, ns: &Namespace, name: &str) -> Option<Value> {
    if let Some(v) = local.get(name) {
        return Some(v.clone());
    }
    if let Some(v) = tmpl_vars.get(name) {
        return Some(v.clone());
    }
    if let Some(v) = ns.get_var(name) {
        return Some(v);
    }
    funcs::global(name)
}
