//! The interpolated-template source form.
//!
//! A template is a sequence of literal source parts with values
//! spliced between them. Values come in three shapes: numbers and text
//! concatenate into the source verbatim (text acts as textual
//! inclusion), while callables are replaced by a placeholder
//! identifier `__INTERP_i__` and routed into the host-import mapping
//! as `host.__INTERP_i__`.

use crate::imports::{HostFunc, Imports};

/// One interpolated value.
pub enum TemplateValue {
    /// Spliced into the source as a numeric literal.
    Number(f64),
    /// Spliced into the source verbatim.
    Text(String),
    /// Replaced by `__INTERP_i__` and bound at instantiation; carries
    /// its arity.
    Callable(HostFunc),
}

impl TemplateValue {
    /// Convenience constructor for the callable shape.
    pub fn callable(
        arity: usize,
        func: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Self {
        TemplateValue::Callable(HostFunc::new(arity, func))
    }
}

/// Renders template parts and values into source text plus the
/// interpolation imports. `parts` has one more element than `values`;
/// missing parts are tolerated and read as empty.
pub fn render(parts: &[&str], values: Vec<TemplateValue>) -> (String, Imports) {
    let mut source = String::new();
    let mut imports = Imports::new();
    let value_count = values.len();

    for (index, value) in values.into_iter().enumerate() {
        source.push_str(parts.get(index).copied().unwrap_or(""));
        match value {
            TemplateValue::Number(n) => {
                // The minus of a negative value lexes as a unary
                // operator in expression position.
                source.push_str(&format_number(n));
            }
            TemplateValue::Text(text) => source.push_str(&text),
            TemplateValue::Callable(func) => {
                let marker = format!("__INTERP_{index}__");
                source.push_str(&marker);
                imports = imports.host_func(marker, func);
            }
        }
    }
    for part in parts.iter().skip(value_count) {
        source.push_str(part);
    }

    (source, imports)
}

/// Numbers splice as literals; integral values keep a decimal point so
/// they read as the f64 they were.
fn format_number(n: f64) -> String {
    if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{:.1}", n)
    } else {
        format!("{}", n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numbers_and_text_splice_verbatim() {
        let (source, imports) = render(
            &["function f(x: f64): f64 begin f := x * ", " end"],
            vec![TemplateValue::Number(2.0)],
        );
        assert_eq!(source, "function f(x: f64): f64 begin f := x * 2.0 end");
        assert!(imports.is_empty());

        let (source, _) = render(
            &["", "\nfunction g(): f64 begin g := h(1) end"],
            vec![TemplateValue::Text(
                "function h(x: f64): f64 begin h := x end".to_string(),
            )],
        );
        assert!(source.starts_with("function h"));
        assert!(source.contains("function g"));
    }

    #[test]
    fn test_callables_become_interp_markers() {
        let (source, imports) = render(
            &["function f(x: f64): f64 begin f := ", "(x) end"],
            vec![TemplateValue::callable(1, |args| args[0] + 1.0)],
        );
        assert_eq!(
            source,
            "function f(x: f64): f64 begin f := __INTERP_0__(x) end"
        );
        let flat = imports.flatten();
        assert_eq!(flat.len(), 1);
        assert_eq!(flat["__INTERP_0__"].arity(), 1);
        assert_eq!(flat["__INTERP_0__"].call(&[2.0]), 3.0);
    }

    #[test]
    fn test_marker_index_follows_value_position() {
        let (source, imports) = render(
            &["a := ", " b := ", " c := ", ""],
            vec![
                TemplateValue::Number(1.5),
                TemplateValue::callable(0, |_| 0.0),
                TemplateValue::callable(0, |_| 1.0),
            ],
        );
        assert_eq!(source, "a := 1.5 b := __INTERP_1__ c := __INTERP_2__");
        let flat = imports.flatten();
        assert!(flat.contains_key("__INTERP_1__"));
        assert!(flat.contains_key("__INTERP_2__"));
        assert!(!flat.contains_key("__INTERP_0__"));
    }

    #[test]
    fn test_negative_number_splices_as_unary_minus() {
        let (source, _) = render(&["x := ", ""], vec![TemplateValue::Number(-2.5)]);
        assert_eq!(source, "x := -2.5");
    }
}
