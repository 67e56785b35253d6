#![allow(dead_code)]

use std::collections::HashMap;

use utpl::{Namespace, Value};

/// Parses `tmpl` into a fresh namespace and renders it with `vars`,
/// panicking on any error.
pub fn exec_str(tmpl: &str, vars: HashMap<String, Value>) -> String {
    match try_exec_str(tmpl, vars) {
        Ok(out) => out,
        Err(e) => panic!("render failed: {e}"),
    }
}

/// Like [`exec_str`], but returns the error instead of panicking.
pub fn try_exec_str(tmpl: &str, vars: HashMap<String, Value>) -> utpl::Result<String> {
    let ns = Namespace::new();
    let t = ns.parse_string("test", tmpl)?;
    t.with_var_map(vars).render_to_string()
}

/// Builds a variable map from `(name, value)` pairs.
pub fn vars<const N: usize>(entries: [(&str, Value); N]) -> HashMap<String, Value> {
    entries
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

pub fn no_vars() -> HashMap<String, Value> {
    HashMap::new()
}
