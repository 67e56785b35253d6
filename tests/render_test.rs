use serde::Serialize;

use utpl::{Error, Func, Kind, Namespace, Value, to_value};

mod common;
use common::{exec_str, no_vars, vars};

#[test]
fn test_static_template_is_byte_identical() {
    let src = "héllo\nworld\n  spaces\tand # stray hash";
    assert_eq!(exec_str(src, no_vars()), src);
}

#[test]
fn test_escape_html_policy() {
    let ns = Namespace::new().with_escape_html(true);
    let t = ns.parse_string("page", "#(s)").unwrap();

    let out = t
        .with_var("s", "<b>hi</b>")
        .render_to_string()
        .unwrap();
    assert_eq!(out, "&lt;b&gt;hi&lt;/b&gt;");

    // Raw values bypass escaping.
    let out = t
        .with_var("s", Value::Raw("<b>hi</b>".to_string()))
        .render_to_string()
        .unwrap();
    assert_eq!(out, "<b>hi</b>");
}

#[test]
fn test_escape_covers_quotes() {
    let ns = Namespace::new().with_escape_html(true);
    let t = ns.parse_string("page", "#(s)").unwrap();
    let out = t
        .with_var("s", r#"a"b'c&d"#)
        .render_to_string()
        .unwrap();
    assert_eq!(out, "a&#34;b&#39;c&amp;d");
}

#[test]
fn test_template_escape_overrides_namespace() {
    let ns = Namespace::new().with_escape_html(true);
    let t = ns.parse_string("page", "#(s)").unwrap();
    let out = t
        .with_escape_html(false)
        .with_var("s", "<i>")
        .render_to_string()
        .unwrap();
    assert_eq!(out, "<i>");
}

#[test]
fn test_escaping_is_off_by_default() {
    assert_eq!(
        exec_str("#(s)", vars([("s", "<i>".into())])),
        "<i>"
    );
}

#[test]
fn test_with_builders_do_not_mutate_original() {
    let ns = Namespace::new();
    let t = ns.parse_string("t", "#(x)").unwrap();
    let t2 = t.with_var("x", 1i64);

    assert!(t.render_to_string().is_err());
    assert_eq!(t2.render_to_string().unwrap(), "1");

    let t3 = t2.with_escape_html(true);
    let t2b = t2.with_var("x", "<i>");
    assert_eq!(t2b.render_to_string().unwrap(), "<i>");
    drop(t3);
}

#[test]
fn test_write_on_success_suppresses_partial_output() {
    let ns = Namespace::new().with_write_on_success(true);
    let t = ns.parse_string("t", "before#(boom)").unwrap();

    let mut buf = Vec::new();
    assert!(t.render(&mut buf).is_err());
    assert!(buf.is_empty());

    let ok = ns.parse_string("ok", "all#(1 + 1)good").unwrap();
    let mut buf = Vec::new();
    ok.render(&mut buf).unwrap();
    assert_eq!(buf, b"all2good");
}

#[test]
fn test_line_buffered_render_writes_partial_output() {
    let ns = Namespace::new();
    let t = ns.parse_string("t", "before#(boom)").unwrap();

    let mut buf = Vec::new();
    assert!(t.render(&mut buf).is_err());
    assert_eq!(buf, b"before");
}

#[test]
fn test_include_recursion_is_bounded() {
    let ns = Namespace::new();
    let t = ns.parse_string("rec", r#"x#include("rec")"#).unwrap();
    let mut err = t.render_to_string().unwrap_err();
    // Walk the directive chain down to the root cause.
    loop {
        match err {
            Error::Tag { source, .. } => err = *source,
            Error::RecursionTooDeep { .. } => break,
            other => panic!("expected RecursionTooDeep at the root, got {other}"),
        }
    }
}

#[test]
fn test_nil_to_zero_namespace_policy() {
    let ns = Namespace::new().with_nil_to_zero(true);
    let t = ns.parse_string("t", "#(5 + x)").unwrap();
    let out = t.with_var("x", Value::Nil).render_to_string().unwrap();
    assert_eq!(out, "5");

    let double = Func::new(vec![Kind::Int], |args| match &args[0] {
        Value::Int(n) => Ok(Value::Int(n * 2)),
        _ => Err("expected an int".to_string()),
    });
    let t = ns.parse_string("f", "#(double(x))").unwrap();
    let out = t
        .with_var("x", Value::Nil)
        .with_var("double", double)
        .render_to_string()
        .unwrap();
    assert_eq!(out, "0");
}

#[test]
fn test_nil_to_zero_template_override() {
    let ns = Namespace::new();
    let t = ns.parse_string("t", "#(5 + x)").unwrap();

    assert!(t.with_var("x", Value::Nil).render_to_string().is_err());
    let out = t
        .with_nil_to_zero(true)
        .with_var("x", Value::Nil)
        .render_to_string()
        .unwrap();
    assert_eq!(out, "5");
}

#[derive(Serialize)]
struct User {
    name: String,
    admin: bool,
    scores: Vec<i64>,
}

#[test]
fn test_serialized_host_data() {
    let user = User {
        name: "Elara".to_string(),
        admin: true,
        scores: vec![7, 9],
    };
    let v = to_value(&user).unwrap();
    let out = exec_str(
        "#(user.name) admin=#(user.admin) first=#(user.scores[0])",
        vars([("user", v)]),
    );
    assert_eq!(out, "Elara admin=true first=7");
}

#[test]
fn test_bytes_render_as_text() {
    let out = exec_str("#(b)", vars([("b", Value::Bytes(b"hi".to_vec()))]));
    assert_eq!(out, "hi");
}

#[test]
fn test_namespace_variables_are_shared() {
    let ns = Namespace::new().with_var("site", "utpl");
    let t = ns.parse_string("t", "#(site)").unwrap();
    assert_eq!(t.render_to_string().unwrap(), "utpl");

    // Template variables shadow namespace ones.
    let out = t.with_var("site", "other").render_to_string().unwrap();
    assert_eq!(out, "other");
}

#[test]
fn test_concurrent_renders_are_independent() {
    let ns = Namespace::new();
    let t = ns.parse_string("t", "#(x)").unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let t = t.with_var("x", i as i64);
            std::thread::spawn(move || t.render_to_string().unwrap())
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.join().unwrap(), i.to_string());
    }
}

#[test]
fn test_parse_reader() {
    let ns = Namespace::new();
    let t = ns.parse_reader("t", "#(1 + 1)".as_bytes()).unwrap();
    assert_eq!(t.render_to_string().unwrap(), "2");
}

#[test]
fn test_parse_glob_loads_directory() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.tmpl"), "A#(1 + 1)").unwrap();
    std::fs::write(dir.path().join("b.tmpl"), "B").unwrap();

    let ns = Namespace::new();
    ns.parse_glob(&format!("{}/*.tmpl", dir.path().display()))
        .unwrap();

    let name = dir.path().join("a.tmpl");
    let t = ns.get_template(&name.to_string_lossy()).unwrap();
    assert_eq!(t.render_to_string().unwrap(), "A2");
    assert!(
        ns.get_template(&dir.path().join("b.tmpl").to_string_lossy())
            .is_some()
    );
}

#[test]
fn test_render_through_writer_matches_string() {
    let ns = Namespace::new();
    let t = ns
        .parse_string("t", "#for(i, x in [\"a\", \"b\"]):#(i)#(x)\n#!for")
        .unwrap();
    let mut buf = Vec::new();
    t.render(&mut buf).unwrap();
    assert_eq!(String::from_utf8(buf).unwrap(), t.render_to_string().unwrap());
    assert_eq!(t.render_to_string().unwrap(), "0a\n1b\n");
}
