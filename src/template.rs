use std::collections::HashMap;
use std::io::{self, LineWriter, Write};
use std::sync::Arc;

use log::debug;

use crate::Result;
use crate::namespace::{Namespace, TemplateData};
use crate::render::Exec;
use crate::scope::{self, Vars};
use crate::tags::{self, Tag};
use crate::value::Value;

/// A renderable handle to a parsed template.
///
/// The AST is shared by reference with the namespace registry; the `with_*`
/// builders return a copy carrying the override, leaving the original (and
/// any concurrent render) untouched.
#[derive(Clone)]
pub struct Template {
    ns: Namespace,
    data: Arc<TemplateData>,
    vars: Vars,
    tags: HashMap<String, Arc<dyn Tag>>,
    escape_html: Option<bool>,
    write_on_success: Option<bool>,
    nil_to_zero: Option<bool>,
}

impl Template {
    pub(crate) fn new(ns: Namespace, data: Arc<TemplateData>) -> Self {
        Self {
            ns,
            data,
            vars: Vars::new(),
            tags: HashMap::new(),
            escape_html: None,
            write_on_success: None,
            nil_to_zero: None,
        }
    }

    pub fn name(&self) -> &str {
        self.data.name()
    }

    /// Returns a copy of the template with its variable map set to `vars`.
    pub fn with_var_map(&self, vars: HashMap<String, Value>) -> Template {
        let mut t = self.clone();
        t.vars = vars;
        t
    }

    /// Returns a copy of the template with one extra variable.
    pub fn with_var(&self, name: impl Into<String>, value: impl Into<Value>) -> Template {
        let mut t = self.clone();
        t.vars.insert(name.into(), value.into());
        t
    }

    /// Returns a copy of the template with its tag map set to `tags`.
    pub fn with_tag_map(&self, tags: HashMap<String, Arc<dyn Tag>>) -> Template {
        let mut t = self.clone();
        t.tags = tags;
        t
    }

    /// Returns a copy of the template with one extra tag.
    pub fn with_tag(&self, name: impl Into<String>, tag: impl Tag + 'static) -> Template {
        let mut t = self.clone();
        t.tags.insert(name.into(), Arc::new(tag));
        t
    }

    /// Returns a copy with HTML escaping turned on or off, overriding the
    /// namespace setting. Escaping is not context-aware; `Value::Raw`
    /// bypasses it.
    pub fn with_escape_html(&self, escape: bool) -> Template {
        let mut t = self.clone();
        t.escape_html = Some(escape);
        t
    }

    /// Returns a copy that buffers output and writes it only on success.
    pub fn with_write_on_success(&self, enabled: bool) -> Template {
        let mut t = self.clone();
        t.write_on_success = Some(enabled);
        t
    }

    /// Returns a copy with the nil-to-zero coercion policy overridden.
    pub fn with_nil_to_zero(&self, enabled: bool) -> Template {
        let mut t = self.clone();
        t.nil_to_zero = Some(enabled);
        t
    }

    /// Executes the template and writes the result to `w`.
    ///
    /// Rendering is synchronous; side effects on the writer happen in
    /// source order. With write-on-success, nothing reaches `w` unless the
    /// whole render succeeds; otherwise writes go through a line buffer.
    pub fn render(&self, w: &mut dyn io::Write) -> Result<()> {
        debug!("rendering template {}", self.name());
        let exec = Exec::new(self);
        let mut local = Vars::new();

        if self.write_on_success_effective() {
            let mut buf = Vec::new();
            exec.run(&mut buf, self.data.ast(), &mut local)?;
            w.write_all(&buf)?;
            Ok(())
        } else {
            let mut lw = LineWriter::new(WriterRef(w));
            exec.run(&mut lw, self.data.ast(), &mut local)?;
            lw.flush()?;
            Ok(())
        }
    }

    /// Executes the template into a string.
    pub fn render_to_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let exec = Exec::new(self);
        let mut local = Vars::new();
        exec.run(&mut buf, self.data.ast(), &mut local)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub(crate) fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Layered identifier lookup rooted at this template.
    pub(crate) fn lookup_var(&self, local: &Vars, name: &str) -> Option<Value> {
        scope::lookup(local, &self.vars, &self.ns, name)
    }

    /// Tag lookup: template overrides → namespace → built-ins.
    pub(crate) fn get_tag(&self, name: &str) -> Option<Arc<dyn Tag>> {
        if let Some(t) = self.tags.get(name) {
            return Some(t.clone());
        }
        if let Some(t) = self.ns.get_tag(name) {
            return Some(t);
        }
        tags::builtin(name)
    }

    pub(crate) fn escape_html_effective(&self) -> bool {
        self.escape_html
            .or(self.ns.config().escape_html)
            .unwrap_or(false)
    }

    pub(crate) fn write_on_success_effective(&self) -> bool {
        self.write_on_success
            .unwrap_or_else(|| self.ns.config().write_on_success)
    }

    pub(crate) fn nil_to_zero_effective(&self) -> bool {
        self.nil_to_zero
            .unwrap_or_else(|| self.ns.config().nil_to_zero)
    }
}

/// Lets a `LineWriter` own a borrowed trait-object writer.
struct WriterRef<'a>(&'a mut dyn Write);

impl Write for WriterRef<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
