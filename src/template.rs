//! Template-rendering collaborator boundary.
//!
//! The engine is external to the runtime core: a pure function from
//! template source plus bindings to a rendered string, with no I/O and
//! no process control. `BasicEngine` is the shipped default, a minimal
//! `<%= key %>` substitution renderer.

use serde_json::{Map, Value};

use crate::error::TemplateError;

pub trait TemplateEngine {
    fn render(
        &self,
        source: &str,
        bindings: &Map<String, Value>,
    ) -> Result<String, TemplateError>;
}

/// `<%= key %>` substitution with dotted-path lookup into the bindings
/// (`session.user`, `query.page`, ...). Unknown keys render empty.
pub struct BasicEngine;

impl TemplateEngine for BasicEngine {
    fn render(
        &self,
        source: &str,
        bindings: &Map<String, Value>,
    ) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(source.len());
        let mut rest = source;
        let mut offset = 0;

        while let Some(start) = rest.find("<%=") {
            out.push_str(&rest[..start]);
            let tag = &rest[start + 3..];
            let Some(end) = tag.find("%>") else {
                return Err(TemplateError::UnclosedTag(offset + start));
            };

            out.push_str(&lookup(bindings, tag[..end].trim()));

            offset += start + 3 + end + 2;
            rest = &tag[end + 2..];
        }

        out.push_str(rest);
        Ok(out)
    }
}

fn lookup(bindings: &Map<String, Value>, dotted: &str) -> String {
    let mut current: Option<&Value> = None;
    for segment in dotted.split('.') {
        current = match current {
            None => bindings.get(segment),
            Some(Value::Object(map)) => map.get(segment),
            Some(_) => None,
        };
        if current.is_none() {
            break;
        }
    }

    match current {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bindings() -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("name".to_string(), json!("ferris"));
        map.insert("session".to_string(), json!({"counter": 3}));
        map
    }

    #[test]
    fn substitutes_bindings() {
        let rendered = BasicEngine
            .render("hello <%= name %>!", &bindings())
            .unwrap();
        assert_eq!(rendered, "hello ferris!");
    }

    #[test]
    fn dotted_path_reaches_nested_values() {
        let rendered = BasicEngine
            .render("count: <%= session.counter %>", &bindings())
            .unwrap();
        assert_eq!(rendered, "count: 3");
    }

    #[test]
    fn unknown_keys_render_empty() {
        let rendered = BasicEngine.render("[<%= missing %>]", &bindings()).unwrap();
        assert_eq!(rendered, "[]");
    }

    #[test]
    fn unclosed_tag_is_an_error() {
        let result = BasicEngine.render("before <%= name", &bindings());
        assert!(matches!(result, Err(TemplateError::UnclosedTag(7))));
    }

    #[test]
    fn plain_text_passes_through() {
        let rendered = BasicEngine.render("no tags here", &bindings()).unwrap();
        assert_eq!(rendered, "no tags here");
    }
}
