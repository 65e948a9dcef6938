//! Statically compiled script handlers.
//!
//! Dynamic script evaluation has no Rust-native counterpart, so script
//! files resolve to handlers registered ahead of time under the file's
//! stem. A handler receives only the request-scoped [`Scope`]
//! capability surface; plain function pointers keep handlers stateless,
//! so nothing can leak between requests even in a long-lived worker.

use std::collections::HashMap;

use crate::context::Scope;
use crate::error::CgiError;

pub type ScriptFn = fn(&mut Scope) -> Result<(), CgiError>;

#[derive(Default)]
pub struct ScriptRegistry {
    handlers: HashMap<String, ScriptFn>,
}

impl ScriptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under a script file stem ("app" serves
    /// `app.run`, wherever it lives).
    pub fn register(&mut self, stem: &str, handler: ScriptFn) {
        self.handlers.insert(stem.to_string(), handler);
    }

    pub fn get(&self, stem: &str) -> Option<ScriptFn> {
        self.handlers.get(stem).copied()
    }

    /// Registry with the handlers every deployment gets.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("info", info_handler);
        registry
    }
}

/// Diagnostic dump of the assembled request state.
fn info_handler(scope: &mut Scope) -> Result<(), CgiError> {
    scope.info()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_scope: &mut Scope) -> Result<(), CgiError> {
        Ok(())
    }

    #[test]
    fn lookup_is_by_stem() {
        let mut registry = ScriptRegistry::new();
        registry.register("app", noop);

        assert!(registry.get("app").is_some());
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn builtin_registry_serves_info() {
        assert!(ScriptRegistry::builtin().get("info").is_some());
    }
}
