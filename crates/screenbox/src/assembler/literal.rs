//! Escaping for values interpolated into generated Python source.
//!
//! Every value that reaches the program text goes through one of these
//! functions. The output only ever contains printable ASCII, so no
//! configuration value can terminate a literal or smuggle a newline into the
//! surrounding code.

use std::fmt::Write as FmtWrite;

/// Render `value` as a double-quoted Python string literal.
pub fn python_str(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' '..='~' => out.push(ch),
            _ => {
                let code = u32::from(ch);
                // write! to String is infallible
                if code <= 0xFFFF {
                    let _ = write!(out, "\\u{code:04x}");
                } else {
                    let _ = write!(out, "\\U{code:08x}");
                }
            }
        }
    }
    out.push('"');
    out
}

/// Render a list of strings as a Python list literal.
pub fn python_str_list<S: AsRef<str>>(values: &[S]) -> String {
    let items: Vec<String> = values.iter().map(|v| python_str(v.as_ref())).collect();
    format!("[{}]", items.join(", "))
}

/// True if `name` is a valid Python identifier made of ASCII characters.
pub fn is_python_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|ch| ch == '_' || ch.is_ascii_alphanumeric())
}

/// True if `path` is a dotted Python module path.
pub fn is_python_module_path(path: &str) -> bool {
    !path.is_empty() && path.split('.').all(is_python_identifier)
}
