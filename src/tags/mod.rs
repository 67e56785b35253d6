use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::{Arc, LazyLock};

use crate::Result;
use crate::ast::{self, Node, Position};
use crate::error::Error;
use crate::namespace::Namespace;
use crate::render::Exec;
use crate::scope::{self, Vars};
use crate::value::Value;

mod for_tag;
mod if_tag;
mod include_tag;
mod macro_tag;

/// A directive invoked at render time with its captured body block and
/// its arguments. Implement this to extend the engine with custom tags.
pub trait Tag: Send + Sync {
    fn run(&self, tc: &mut TagContext<'_>, block: &[Node], args: &[Node]) -> Result<()>;
}

static BUILTIN_TAGS: LazyLock<HashMap<&'static str, Arc<dyn Tag>>> = LazyLock::new(|| {
    let mut m: HashMap<&'static str, Arc<dyn Tag>> = HashMap::new();
    m.insert("if", Arc::new(if_tag::IfTag));
    m.insert("for", Arc::new(for_tag::ForTag));
    m.insert("include", Arc::new(include_tag::IncludeTag));
    m.insert("macro", Arc::new(macro_tag::MacroTag));
    m
});

pub(crate) fn builtin(name: &str) -> Option<Arc<dyn Tag>> {
    BUILTIN_TAGS.get(name).cloned()
}

/// Handed to [`Tag`] implementations to let them drive the interpreter:
/// re-enter it on a node list, buffer a sub-render, evaluate a single
/// node, or write directly to the output.
pub struct TagContext<'a> {
    pub(crate) exec: &'a Exec<'a>,
    pub(crate) w: &'a mut dyn Write,
    pub(crate) tag: &'a ast::Tag,
    pub(crate) local: &'a Vars,
}

impl TagContext<'_> {
    /// Runs the interpreter on `nodes` with `local` layered over the
    /// current block scope.
    pub fn execute(&mut self, nodes: &[Node], local: &Vars) -> Result<()> {
        let mut merged = scope::merge(self.local, local);
        self.exec.run(self.w, nodes, &mut merged)
    }

    /// Like [`TagContext::execute`], but buffers the output and returns it
    /// instead of writing through.
    pub fn execute_to_memory(&self, nodes: &[Node], local: &Vars) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut merged = scope::merge(self.local, local);
        self.exec.run(&mut buf, nodes, &mut merged)?;
        Ok(buf)
    }

    /// Evaluates a single node with `local` layered over the current block
    /// scope.
    pub fn get_value(&self, node: &Node, local: &Vars) -> Result<Value> {
        let mut merged = scope::merge(self.local, local);
        self.exec.get_value(node, &mut merged)
    }

    /// The tag node this invocation originated from, for error positions.
    pub fn tag(&self) -> &ast::Tag {
        self.tag
    }

    pub fn namespace(&self) -> &Namespace {
        self.exec.tmpl.namespace()
    }

    /// Builds a positioned tag-argument error.
    pub fn error(&self, pos: &Position, msg: impl Into<String>) -> Error {
        Error::InvalidTagArguments {
            pos: pos.clone(),
            msg: msg.into(),
        }
    }
}

impl Write for TagContext<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.w.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.w.flush()
    }
}
