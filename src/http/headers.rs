//! Header table for request metadata and response headers.
//!
//! This module provides a low-level abstraction for handling header-like
//! key/value metadata. Headers are stored in an ordered map to preserve
//! insertion order; every key is lower-cased before storage, so lookups
//! are case-insensitive.
//!
//! This abstraction does not enforce any HTTP semantics or constraints.
//! The [`Response`](crate::http::response::Response) writer constrains
//! mutation around its own header-emission state, and the
//! [`Context`](crate::context::Context) decides which environment keys
//! count as request headers versus server facts.

use indexmap::IndexMap;

/// Prefix the web server puts on environment keys that carry request
/// headers (`HTTP_COOKIE`, `HTTP_USER_AGENT`, ...).
const HEADER_PREFIX: &str = "http_";

#[derive(Debug, Clone, Default)]
pub struct HeaderTable {
    headers: IndexMap<String, String>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self {
            headers: IndexMap::new(),
        }
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.headers.insert(name.to_lowercase(), value.to_string());
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.headers.get(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.headers.iter()
    }
}

/// Splits an environment snapshot into (request headers, server facts).
///
/// Keys carrying the `HTTP_` prefix land in the header table with the
/// prefix stripped; everything else is server metadata (`remote_addr`,
/// `request_method`, ...). Both tables keep the snapshot's order.
pub fn split_env(env: &[(String, String)]) -> (HeaderTable, HeaderTable) {
    let mut headers = HeaderTable::new();
    let mut server = HeaderTable::new();

    for (name, value) in env {
        let lower = name.to_lowercase();
        match lower.strip_prefix(HEADER_PREFIX) {
            Some(stripped) => headers.set(stripped, value),
            None => server.set(&lower, value),
        }
    }

    (headers, server)
}
