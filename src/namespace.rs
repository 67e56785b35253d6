use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use log::debug;

use crate::Result;
use crate::ast::Node;
use crate::parser;
use crate::tags::Tag;
use crate::template::Template;
use crate::value::Value;

/// Engine-wide configuration. Templates derived from the namespace can
/// override the per-render parts of it.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub escape_html: Option<bool>,
    pub write_on_success: bool,
    pub whitespace_mutations: bool,
    pub nil_to_zero: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            escape_html: None,
            write_on_success: false,
            whitespace_mutations: true,
            nil_to_zero: false,
        }
    }
}

/// The parsed body of a registered template. Shared by handle so that
/// per-render template copies and `include` lookups never clone the AST.
#[derive(Debug)]
pub(crate) struct TemplateData {
    name: Arc<str>,
    ast: Vec<Node>,
}

impl TemplateData {
    pub(crate) fn name(&self) -> &Arc<str> {
        &self.name
    }

    pub(crate) fn ast(&self) -> &[Node] {
        &self.ast
    }
}

/// A registry of templates, variables, and tags shared across related
/// renders. Cloning a namespace clones the handle, not the registry.
///
/// Templates hold a namespace handle while the registry stores only
/// parsed template data, so registration never creates ownership cycles.
#[derive(Clone)]
pub struct Namespace {
    inner: Arc<Inner>,
}

struct Inner {
    templates: DashMap<String, Arc<TemplateData>>,
    vars: DashMap<String, Value>,
    tags: DashMap<String, Arc<dyn Tag>>,
    config: RwLock<Config>,
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                templates: DashMap::new(),
                vars: DashMap::new(),
                tags: DashMap::new(),
                config: RwLock::new(Config::default()),
            }),
        }
    }

    /// Sets one shared variable, chainable.
    pub fn with_var(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.inner.vars.insert(name.into(), value.into());
        self
    }

    /// Replaces the shared variable map.
    pub fn with_var_map(self, vars: HashMap<String, Value>) -> Self {
        self.inner.vars.clear();
        for (k, v) in vars {
            self.inner.vars.insert(k, v);
        }
        self
    }

    /// Registers one tag, chainable.
    pub fn with_tag(self, name: impl Into<String>, tag: impl Tag + 'static) -> Self {
        self.inner.tags.insert(name.into(), Arc::new(tag));
        self
    }

    /// Replaces the tag map.
    pub fn with_tag_map(self, tags: HashMap<String, Arc<dyn Tag>>) -> Self {
        self.inner.tags.clear();
        for (k, v) in tags {
            self.inner.tags.insert(k, v);
        }
        self
    }

    /// Turns HTML escaping on or off for the whole namespace. Templates
    /// can override this per render.
    pub fn with_escape_html(self, escape: bool) -> Self {
        self.inner.config.write().unwrap().escape_html = Some(escape);
        self
    }

    /// When on, a render buffers its whole output and writes it to the
    /// caller's writer only on success.
    pub fn with_write_on_success(self, enabled: bool) -> Self {
        self.inner.config.write().unwrap().write_on_success = enabled;
        self
    }

    /// Controls the post-parse whitespace mutation pass (on by default).
    /// Only affects templates parsed afterwards.
    pub fn with_whitespace_mutations(self, enabled: bool) -> Self {
        self.inner.config.write().unwrap().whitespace_mutations = enabled;
        self
    }

    /// When on, nil operands and arguments coerce to the zero value of the
    /// expected kind instead of failing.
    pub fn with_nil_to_zero(self, enabled: bool) -> Self {
        self.inner.config.write().unwrap().nil_to_zero = enabled;
        self
    }

    /// Parses a template from a string and registers it under `name`.
    pub fn parse_string(&self, name: &str, src: &str) -> Result<Template> {
        let mut ast = parser::parse(name, src)?;
        if self.config().whitespace_mutations {
            apply_whitespace_mutations(&mut ast);
        }
        let data = Arc::new(TemplateData {
            name: Arc::from(name),
            ast,
        });
        self.inner.templates.insert(name.to_string(), data.clone());
        debug!("registered template {name}");
        Ok(Template::new(self.clone(), data))
    }

    /// Parses a template from bytes and registers it under `name`.
    pub fn parse_bytes(&self, name: &str, src: &[u8]) -> Result<Template> {
        self.parse_string(name, &String::from_utf8_lossy(src))
    }

    /// Parses a template from a reader and registers it under `name`.
    pub fn parse_reader(&self, name: &str, mut r: impl Read) -> Result<Template> {
        let mut src = String::new();
        r.read_to_string(&mut src)?;
        self.parse_string(name, &src)
    }

    /// Parses the file at `path`, registering it under the path itself.
    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<Template> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path)?;
        self.parse_string(&path.to_string_lossy(), &src)
    }

    /// Parses every file matched by a glob pattern into the namespace.
    pub fn parse_glob(&self, pattern: &str) -> Result<()> {
        for entry in glob::glob(pattern)? {
            let path = entry?;
            if path.is_file() {
                self.parse_file(&path)?;
            }
        }
        Ok(())
    }

    /// Returns a handle to a registered template.
    pub fn get_template(&self, name: &str) -> Option<Template> {
        let data = self.inner.templates.get(name)?.clone();
        Some(Template::new(self.clone(), data))
    }

    pub(crate) fn template_data(&self, name: &str) -> Option<Arc<TemplateData>> {
        self.inner.templates.get(name).map(|d| d.clone())
    }

    pub(crate) fn get_var(&self, name: &str) -> Option<Value> {
        self.inner.vars.get(name).map(|v| v.clone())
    }

    pub(crate) fn get_tag(&self, name: &str) -> Option<Arc<dyn Tag>> {
        self.inner.tags.get(name).map(|t| t.clone())
    }

    pub(crate) fn config(&self) -> Config {
        self.inner.config.read().unwrap().clone()
    }
}

/// Removes template-only whitespace around body-bearing tags and
/// end-markers, so block tags laid out on their own lines don't leave
/// blank lines in the output. End-markers sitting on the same line as the
/// most recent body-bearing tag are inline and left alone.
fn apply_whitespace_mutations(nodes: &mut [Node]) {
    let mut last_tag_line = 0usize;
    for i in 0..nodes.len() {
        match &nodes[i] {
            Node::Tag(tag) if tag.has_body => {
                let line = tag.pos.line;
                handle_whitespace(nodes, i);
                last_tag_line = line;
            }
            Node::EndTag(end) if end.pos.line != last_tag_line => {
                handle_whitespace(nodes, i);
            }
            _ => {}
        }
    }
}

fn handle_whitespace(nodes: &mut [Node], i: usize) {
    let next_has_newline = matches!(
        nodes.get(i + 1),
        Some(Node::Text(t)) if t.data.contains('\n')
    );

    if i > 0 && next_has_newline {
        if let Some(Node::Text(prev)) = nodes.get_mut(i - 1) {
            trim_whitespace_suffix(&mut prev.data);
        }
    }

    if let Some(Node::Text(next)) = nodes.get_mut(i + 1) {
        if let Some(stripped) = next.data.strip_prefix('\n') {
            next.data = stripped.to_string();
        }
    }
}

/// Removes trailing spaces and tabs back to the last newline (keeping the
/// newline itself). Text ending in non-whitespace is left unchanged.
fn trim_whitespace_suffix(data: &mut String) {
    let bytes = data.as_bytes();
    for i in (0..bytes.len()).rev() {
        match bytes[i] {
            b'\n' => {
                data.truncate(i + 1);
                return;
            }
            b' ' | b'\t' | b'\r' => {}
            _ => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_whitespace_suffix() {
        let mut s = "text\n   ".to_string();
        trim_whitespace_suffix(&mut s);
        assert_eq!(s, "text\n");

        let mut s = "text   ".to_string();
        trim_whitespace_suffix(&mut s);
        assert_eq!(s, "text   ");
    }

    #[test]
    fn test_block_tags_on_own_lines_leave_no_blank_lines() {
        let ns = Namespace::new();
        let tmpl = ns
            .parse_string("test", "#if(true):\nyes\n#!if\n")
            .unwrap();
        let out = tmpl.render_to_string().unwrap();
        assert_eq!(out, "yes\n");
    }

    #[test]
    fn test_whitespace_mutations_can_be_disabled() {
        let ns = Namespace::new().with_whitespace_mutations(false);
        let tmpl = ns
            .parse_string("test", "#if(true):\nyes\n#!if\n")
            .unwrap();
        let out = tmpl.render_to_string().unwrap();
        assert_eq!(out, "\nyes\n\n");
    }

    #[test]
    fn test_get_template() {
        let ns = Namespace::new();
        ns.parse_string("greet", "Hello").unwrap();
        assert!(ns.get_template("greet").is_some());
        assert!(ns.get_template("missing").is_none());
    }
}
