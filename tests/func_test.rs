use std::sync::Arc;

use utpl::{Error, Func, Kind, Namespace, Object, StructValue, Value};

mod common;
use common::{exec_str, no_vars, try_exec_str, vars};

#[test]
fn test_len() {
    assert_eq!(exec_str(r#"#(len("hi"))"#, no_vars()), "2");
    assert_eq!(
        exec_str("#(len(items))", vars([("items", vec![1i64, 2, 3].into())])),
        "3"
    );
    assert_eq!(
        exec_str(
            "#(len(m))",
            vars([("m", Value::Map(vec![("a".into(), Value::Int(1))]))])
        ),
        "1"
    );
}

#[test]
fn test_len_of_scalar_fails() {
    assert!(matches!(
        try_exec_str("#(len(3))", no_vars()),
        Err(Error::Call { .. })
    ));
}

#[test]
fn test_string_helpers() {
    assert_eq!(exec_str(r#"#(toUpper("hi"))"#, no_vars()), "HI");
    assert_eq!(exec_str(r#"#(toLower("HI"))"#, no_vars()), "hi");
    assert_eq!(
        exec_str(r#"#(hasPrefix("hello", "he")) #(trimPrefix("hello", "he"))"#, no_vars()),
        "true llo"
    );
    assert_eq!(
        exec_str(r#"#(hasSuffix("hello", "lo")) #(trimSuffix("hello", "lo"))"#, no_vars()),
        "true hel"
    );
    assert_eq!(exec_str(r#"#(trimSpace("  x  "))"#, no_vars()), "x");
    assert_eq!(
        exec_str(r#"#(equalFold("Hello", "hELLO"))"#, no_vars()),
        "true"
    );
    assert_eq!(exec_str(r#"#(count("cheese", "e"))"#, no_vars()), "3");
}

#[test]
fn test_split_and_join() {
    assert_eq!(
        exec_str(r#"#(join(split("a,b,c", ","), "-"))"#, no_vars()),
        "a-b-c"
    );
    assert_eq!(exec_str(r#"#(split("abc", "")[1])"#, no_vars()), "b");
}

#[test]
fn test_sprintf() {
    assert_eq!(
        exec_str(r#"#(sprintf("%s=%d", "x", 42))"#, no_vars()),
        "x=42"
    );
    assert_eq!(
        exec_str(r#"#(sprintf("%.2f", 1.5))"#, no_vars()),
        "1.50"
    );
    assert_eq!(exec_str(r#"#(sprintf("%q", "hi"))"#, no_vars()), "\"hi\"");
    assert_eq!(exec_str(r#"#(sprintf("%x", 255))"#, no_vars()), "ff");
    assert_eq!(exec_str(r#"#(sprintf("100%%"))"#, no_vars()), "100%");
}

#[test]
fn test_sprintf_bad_verb_fails() {
    assert!(matches!(
        try_exec_str(r#"#(sprintf("%z", 1))"#, no_vars()),
        Err(Error::Call { .. })
    ));
}

#[test]
fn test_json_is_raw() {
    let map = Value::Map(vec![("tag".into(), "<b>".into())]);
    // json output bypasses HTML escaping even when escaping is on.
    let ns = Namespace::new().with_escape_html(true);
    let t = ns.parse_string("test", "#(json(v))").unwrap();
    let out = t.with_var("v", map).render_to_string().unwrap();
    assert_eq!(out, r#"{"tag":"<b>"}"#);
}

#[test]
fn test_json_round_trip() {
    let v = Value::Map(vec![
        ("n".into(), Value::Int(3)),
        ("items".into(), vec![1i64, 2].into()),
    ]);
    let out = exec_str("#(json(v))", vars([("v", v.clone())]));
    let back: Value = serde_json::from_str(&out).unwrap();
    assert_eq!(back, v);
}

#[test]
fn test_custom_function() {
    let double = Func::new(vec![Kind::Int], |args| match &args[0] {
        Value::Int(n) => Ok(Value::Int(n * 2)),
        _ => Err("expected an int".to_string()),
    });
    assert_eq!(
        exec_str("#(double(21))", vars([("double", double.into())])),
        "42"
    );
}

#[test]
fn test_custom_function_argument_coercion() {
    let double = Func::new(vec![Kind::Int], |args| match &args[0] {
        Value::Int(n) => Ok(Value::Int(n * 2)),
        _ => Err("expected an int".to_string()),
    });
    // 21.0 is integral, so it coerces to the declared int parameter.
    assert_eq!(
        exec_str("#(double(21.0))", vars([("double", double.into())])),
        "42"
    );
}

#[test]
fn test_parameter_count_mismatch() {
    let f = Func::new(vec![Kind::Int], |_| Ok(Value::Nil));
    assert!(matches!(
        try_exec_str("#(f(1, 2))", vars([("f", f.clone().into())])),
        Err(Error::ParamCount { .. })
    ));
    assert!(matches!(
        try_exec_str("#(f())", vars([("f", f.into())])),
        Err(Error::ParamCount { .. })
    ));
}

#[test]
fn test_parameter_type_mismatch() {
    let f = Func::new(vec![Kind::Int], |_| Ok(Value::Nil));
    assert!(matches!(
        try_exec_str(r#"#(f("x"))"#, vars([("f", f.into())])),
        Err(Error::ParamType { .. })
    ));
}

#[test]
fn test_variadic_function() {
    let concat = Func::variadic(Vec::new(), Kind::Str, |args| {
        let mut out = String::new();
        for arg in args {
            if let Value::Str(s) = arg {
                out.push_str(s);
            }
        }
        Ok(Value::Str(out))
    });
    assert_eq!(
        exec_str(
            r#"#(concat("a", "b", "c"))#(concat())"#,
            vars([("concat", concat.into())])
        ),
        "abc"
    );
}

#[test]
fn test_function_error_propagates_with_position() {
    let boom = Func::new(Vec::new(), |_| Err("boom".to_string()));
    let err = try_exec_str("\n#(boom())", vars([("boom", boom.into())])).unwrap_err();
    match err {
        Error::Call { pos, msg } => {
            assert_eq!(msg, "boom");
            assert_eq!(pos.line, 2);
        }
        other => panic!("expected Call error, got {other}"),
    }
}

#[test]
fn test_assignment_as_argument_fails() {
    let f = Func::new(vec![Kind::Int], |_| Ok(Value::Nil));
    assert!(matches!(
        try_exec_str("#(f(x = 1))", vars([("f", f.into())])),
        Err(Error::AssignmentAsArgument { .. })
    ));
}

#[test]
fn test_calling_a_non_function_fails() {
    assert!(matches!(
        try_exec_str("#(n())", vars([("n", 5i64.into())])),
        Err(Error::InvalidCallable { .. })
    ));
}

#[test]
fn test_unknown_function_fails() {
    assert!(matches!(
        try_exec_str("#(nope())", no_vars()),
        Err(Error::NoSuchFunction { .. })
    ));
}

#[test]
fn test_struct_field_access() {
    let user = StructValue::new("User")
        .with("Name", "Elara")
        .with("Age", 30i64);
    let out = exec_str(
        "#(user.Name) is #(user.Age)",
        vars([("user", user.into())]),
    );
    assert_eq!(out, "Elara is 30");
}

#[test]
fn test_struct_missing_field_fails() {
    let user = StructValue::new("User").with("Name", "Elara");
    assert!(matches!(
        try_exec_str("#(user.Email)", vars([("user", user.into())])),
        Err(Error::NoSuchField { .. })
    ));
}

#[test]
fn test_field_access_on_nil_fails() {
    assert!(matches!(
        try_exec_str("#(x.field)", vars([("x", Value::Nil)])),
        Err(Error::FieldOnNil { .. })
    ));
}

#[test]
fn test_field_access_on_scalar_fails() {
    assert!(matches!(
        try_exec_str("#(n.field)", vars([("n", 5i64.into())])),
        Err(Error::NoFields { .. })
    ));
}

#[test]
fn test_struct_field_callable_acts_as_method() {
    let greet = Func::new(vec![Kind::Str], |args| {
        Ok(Value::Str(format!("Hello, {}", args[0])))
    });
    let user = StructValue::new("User").with("Greet", greet);
    assert_eq!(
        exec_str(r#"#(user.Greet("world"))"#, vars([("user", user.into())])),
        "Hello, world"
    );
}

#[test]
fn test_method_call_on_value_without_methods_fails() {
    assert!(matches!(
        try_exec_str("#(n.String())", vars([("n", 5i64.into())])),
        Err(Error::NoSuchMethod { .. })
    ));
}

#[derive(Debug)]
struct Host {
    name: String,
}

impl Object for Host {
    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(self.name.as_str().into()),
            _ => None,
        }
    }

    fn method(&self, name: &str) -> Option<Func> {
        match name {
            "shout" => {
                let n = self.name.clone();
                Some(Func::new(Vec::new(), move |_| {
                    Ok(Value::Str(n.to_uppercase()))
                }))
            }
            _ => None,
        }
    }
}

#[test]
fn test_foreign_object_fields_and_methods() {
    let host = Value::Foreign(Arc::new(Host {
        name: "elara".to_string(),
    }));
    let out = exec_str(
        "#(obj.name) #(obj.shout())",
        vars([("obj", host.clone())]),
    );
    assert_eq!(out, "elara ELARA");

    assert!(matches!(
        try_exec_str("#(obj.missing)", vars([("obj", host.clone())])),
        Err(Error::NoSuchField { .. })
    ));
    assert!(matches!(
        try_exec_str("#(obj.missing())", vars([("obj", host)])),
        Err(Error::NoSuchMethod { .. })
    ));
}
