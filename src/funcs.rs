use std::collections::HashMap;
use std::sync::LazyLock;

use crate::value::{Func, Kind, Value};

/// Built-in globals available to every template. They sit at the bottom of
/// the scope chain, so namespaces and templates can shadow them.
static GLOBALS: LazyLock<HashMap<&'static str, Value>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    m.insert(
        "len",
        func(Func::new(vec![Kind::Any], |args| match &args[0] {
            Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
            Value::Bytes(b) => Ok(Value::Int(b.len() as i64)),
            Value::Array(items) => Ok(Value::Int(items.len() as i64)),
            Value::Map(pairs) => Ok(Value::Int(pairs.len() as i64)),
            other => Err(format!("cannot get length of a {} value", other.kind())),
        })),
    );

    m.insert(
        "toUpper",
        func(Func::new(vec![Kind::Str], |args| {
            Ok(Value::Str(str_arg(args, 0).to_uppercase()))
        })),
    );
    m.insert(
        "toLower",
        func(Func::new(vec![Kind::Str], |args| {
            Ok(Value::Str(str_arg(args, 0).to_lowercase()))
        })),
    );

    m.insert(
        "hasPrefix",
        func(Func::new(vec![Kind::Str, Kind::Str], |args| {
            Ok(Value::Bool(str_arg(args, 0).starts_with(str_arg(args, 1))))
        })),
    );
    m.insert(
        "trimPrefix",
        func(Func::new(vec![Kind::Str, Kind::Str], |args| {
            let s = str_arg(args, 0);
            let p = str_arg(args, 1);
            Ok(Value::Str(s.strip_prefix(p).unwrap_or(s).to_string()))
        })),
    );
    m.insert(
        "hasSuffix",
        func(Func::new(vec![Kind::Str, Kind::Str], |args| {
            Ok(Value::Bool(str_arg(args, 0).ends_with(str_arg(args, 1))))
        })),
    );
    m.insert(
        "trimSuffix",
        func(Func::new(vec![Kind::Str, Kind::Str], |args| {
            let s = str_arg(args, 0);
            let p = str_arg(args, 1);
            Ok(Value::Str(s.strip_suffix(p).unwrap_or(s).to_string()))
        })),
    );
    m.insert(
        "trimSpace",
        func(Func::new(vec![Kind::Str], |args| {
            Ok(Value::Str(str_arg(args, 0).trim().to_string()))
        })),
    );
    m.insert(
        "equalFold",
        func(Func::new(vec![Kind::Str, Kind::Str], |args| {
            Ok(Value::Bool(
                str_arg(args, 0).to_lowercase() == str_arg(args, 1).to_lowercase(),
            ))
        })),
    );

    m.insert(
        "count",
        func(Func::new(vec![Kind::Str, Kind::Str], |args| {
            let s = str_arg(args, 0);
            let sub = str_arg(args, 1);
            let n = if sub.is_empty() {
                s.chars().count() + 1
            } else {
                s.matches(sub).count()
            };
            Ok(Value::Int(n as i64))
        })),
    );
    m.insert(
        "split",
        func(Func::new(vec![Kind::Str, Kind::Str], |args| {
            let s = str_arg(args, 0);
            let sep = str_arg(args, 1);
            let parts: Vec<Value> = if sep.is_empty() {
                s.chars().map(|c| Value::Str(c.to_string())).collect()
            } else {
                s.split(sep).map(|p| Value::Str(p.to_string())).collect()
            };
            Ok(Value::Array(parts))
        })),
    );
    m.insert(
        "join",
        func(Func::new(vec![Kind::Array, Kind::Str], |args| {
            let Value::Array(items) = &args[0] else {
                return Err("join expects an array".to_string());
            };
            let sep = str_arg(args, 1);
            let mut parts = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::Str(s) | Value::Raw(s) => parts.push(s.as_str()),
                    other => {
                        return Err(format!(
                            "join expects an array of strings, found a {} element",
                            other.kind()
                        ));
                    }
                }
            }
            Ok(Value::Str(parts.join(sep)))
        })),
    );

    m.insert(
        "sprintf",
        func(Func::variadic(vec![Kind::Str], Kind::Any, |args| {
            sprintf(str_arg(args, 0), &args[1..]).map(Value::Str)
        })),
    );

    m.insert(
        "json",
        func(Func::new(vec![Kind::Any], |args| {
            serde_json::to_string(&args[0])
                .map(Value::Raw)
                .map_err(|e| e.to_string())
        })),
    );

    m
});

pub(crate) fn global(name: &str) -> Option<Value> {
    GLOBALS.get(name).cloned()
}

fn func(f: Func) -> Value {
    Value::Func(f)
}

/// The evaluator has already coerced declared `Str` parameters, so this
/// cannot miss for them.
fn str_arg(args: &[Value], i: usize) -> &str {
    match &args[i] {
        Value::Str(s) | Value::Raw(s) => s,
        _ => "",
    }
}

/// A small printf-style formatter over template values. Verbs:
/// `%v` `%s` `%d` `%f` (with optional precision) `%t` `%q` `%x` `%%`.
fn sprintf(fmt: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::new();
    let mut chars = fmt.chars().peekable();
    let mut next = 0usize;

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut precision = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut digits = String::new();
            while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                digits.push(chars.next().unwrap());
            }
            precision = Some(
                digits
                    .parse::<usize>()
                    .map_err(|_| "sprintf: invalid precision".to_string())?,
            );
        }

        let verb = chars.next().ok_or_else(|| "sprintf: trailing %".to_string())?;
        if verb == '%' {
            out.push('%');
            continue;
        }
        if precision.is_some() && verb != 'f' {
            return Err(format!("sprintf: precision is not supported for %{verb}"));
        }

        let arg = args
            .get(next)
            .ok_or_else(|| format!("sprintf: missing argument for %{verb}"))?;
        next += 1;

        match verb {
            'v' | 's' => out.push_str(&arg.to_string()),
            'd' => match arg {
                Value::Int(v) => out.push_str(&v.to_string()),
                Value::Uint(v) => out.push_str(&v.to_string()),
                other => return Err(format!("sprintf: %d expects an integer, got {}", other.kind())),
            },
            'f' => {
                let v = match arg {
                    Value::Float(v) => *v,
                    Value::Int(v) => *v as f64,
                    Value::Uint(v) => *v as f64,
                    other => {
                        return Err(format!("sprintf: %f expects a number, got {}", other.kind()));
                    }
                };
                out.push_str(&format!("{:.*}", precision.unwrap_or(6), v));
            }
            't' => match arg {
                Value::Bool(v) => out.push_str(&v.to_string()),
                other => return Err(format!("sprintf: %t expects a bool, got {}", other.kind())),
            },
            'q' => out.push_str(&format!("{:?}", arg.to_string())),
            'x' => match arg {
                Value::Int(v) => out.push_str(&format!("{v:x}")),
                Value::Uint(v) => out.push_str(&format!("{v:x}")),
                Value::Str(s) | Value::Raw(s) => {
                    for b in s.as_bytes() {
                        out.push_str(&format!("{b:02x}"));
                    }
                }
                Value::Bytes(bytes) => {
                    for b in bytes {
                        out.push_str(&format!("{b:02x}"));
                    }
                }
                other => {
                    return Err(format!(
                        "sprintf: %x expects an integer, string, or bytes, got {}",
                        other.kind()
                    ));
                }
            },
            other => return Err(format!("sprintf: unknown verb %{other}")),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprintf_verbs() {
        let out = sprintf(
            "%s is %d years old (%.1f%%)",
            &[Value::Str("Elara".into()), Value::Int(30), Value::Float(99.25)],
        )
        .unwrap();
        assert_eq!(out, "Elara is 30 years old (99.2%)");
    }

    #[test]
    fn test_sprintf_missing_argument() {
        assert!(sprintf("%d", &[]).is_err());
        assert!(sprintf("%z", &[Value::Int(1)]).is_err());
    }

    #[test]
    fn test_globals_present() {
        for name in [
            "len", "toUpper", "toLower", "hasPrefix", "trimPrefix", "hasSuffix", "trimSuffix",
            "trimSpace", "equalFold", "count", "split", "join", "sprintf", "json",
        ] {
            assert!(global(name).is_some(), "missing global {name}");
        }
    }
}
