//! Execution context: the per-request orchestrator.
//!
//! One context is assembled per process from an explicit environment
//! snapshot: header/server tables, cookie jar, session, parsed request
//! target, request and response. Handlers and templates never touch the
//! context directly; they see a [`Scope`], the curated capability
//! surface injected into every script invocation.
//!
//! ## Request handling flow
//!
//! 1. Classify the environment into request headers and server facts
//! 2. Open (or mint) the session bound to the client address
//! 3. Parse the request target and build the request/response pair
//! 4. Await the body from stdin when the method carries one — the
//!    single suspension point; nothing executes until it completes
//! 5. `include` the script named by `path_translated`
//! 6. At exit: flush the response, persist the session, sweep expired
//!    records

use indexmap::IndexMap;
use serde_json::{Map, Value, json};
use std::io::Write;
use std::path::{Path, PathBuf};
use url::Url;

use crate::config::{Config, VERSION};
use crate::error::CgiError;
use crate::http::cookies::{CookieJar, SameSite};
use crate::http::headers::{HeaderTable, split_env};
use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::{HttpMethod, http_method_from_str};
use crate::script::ScriptRegistry;
use crate::session::Session;
use crate::template::TemplateEngine;

pub struct Context {
    pub config: Config,
    pub headers: HeaderTable,
    pub server: HeaderTable,
    pub cookies: CookieJar,
    pub url: Url,
    pub query: IndexMap<String, Vec<String>>,
    pub http_version: String,
    pub request: Request,
    pub response: Response,
    registry: ScriptRegistry,
    engine: Box<dyn TemplateEngine>,
    /// Directories of the scripts currently executing, innermost last;
    /// `include` resolves relative paths against the top entry.
    script_stack: Vec<PathBuf>,
}

impl Context {
    pub fn new(
        env: &[(String, String)],
        config: Config,
        registry: ScriptRegistry,
        engine: Box<dyn TemplateEngine>,
        sink: Box<dyn Write>,
    ) -> Result<Self, CgiError> {
        let (mut headers, server) = split_env(env);

        let blank = String::new();
        let content_type = server.get("content_type").unwrap_or(&blank).clone();
        let content_length = server.get("content_length").unwrap_or(&blank).clone();
        headers.set("content_type", &content_type);
        headers.set("content_length", &content_length);

        let http_version = server
            .get("server_protocol")
            .ok_or(CgiError::MissingVar("SERVER_PROTOCOL"))?
            .clone();

        let cookies = CookieJar::parse(headers.get("cookie").unwrap_or(&blank));
        let session = Session::open(&cookies, &server, &config)?;

        let scheme = server
            .get("request_scheme")
            .ok_or(CgiError::MissingVar("REQUEST_SCHEME"))?;
        let host = server
            .get("server_name")
            .ok_or(CgiError::MissingVar("SERVER_NAME"))?;
        let target = server
            .get("request_uri")
            .ok_or(CgiError::MissingVar("REQUEST_URI"))?;

        let url = Url::parse(&format!("{scheme}://{host}"))
            .and_then(|base| base.join(target))
            .map_err(|_| CgiError::BadTarget(target.clone()))?;

        let mut query: IndexMap<String, Vec<String>> = IndexMap::new();
        for (name, value) in url.query_pairs() {
            query
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }

        let method = server
            .get("request_method")
            .map(|m| http_method_from_str(m))
            .unwrap_or(HttpMethod::Get);

        let request = Request::new(url.clone(), method, headers.clone());
        let response = Response::new(session, sink);

        Ok(Self {
            config,
            headers,
            server,
            cookies,
            url,
            query,
            http_version,
            request,
            response,
            registry,
            engine,
            script_stack: Vec::new(),
        })
    }

    /// Drives the request: body first, then the script named by
    /// `path_translated`. `include` is never reached before the body
    /// read completes.
    pub async fn run(&mut self) -> Result<(), CgiError> {
        let script = self
            .server
            .get("path_translated")
            .ok_or(CgiError::MissingVar("PATH_TRANSLATED"))?
            .clone();

        if self.request.method.has_body() {
            let mut stdin = async_std::io::stdin();
            self.request
                .read_body(&mut stdin, self.config.read_timeout, true)
                .await?;
        }

        self.include(&script)
    }

    /// Resolves `path` against the directory of the currently executing
    /// script and dispatches it: script extensions go to the registered
    /// handler for the file stem, template extensions are read from
    /// disk, rendered with the current bindings and written out.
    pub fn include(&mut self, path: &str) -> Result<(), CgiError> {
        let resolved = match self.script_stack.last() {
            Some(dir) => dir.join(path),
            None => PathBuf::from(path),
        };

        let extension = resolved
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        if self.config.script_extensions.contains(&extension) {
            let stem = resolved
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_string();
            let handler = self
                .registry
                .get(&stem)
                .ok_or_else(|| CgiError::HandlerNotFound(resolved.clone()))?;

            let parent = resolved.parent().unwrap_or(Path::new(".")).to_path_buf();
            self.script_stack.push(parent);
            let result = handler(&mut Scope { ctx: self });
            self.script_stack.pop();
            result
        } else if self.config.template_extensions.contains(&extension) {
            let source = std::fs::read_to_string(&resolved)?;
            let rendered = self.engine.render(&source, &self.bindings())?;
            self.response.write(rendered)?;
            Ok(())
        } else {
            Err(CgiError::UnknownExtension(resolved))
        }
    }

    /// Binding set exposed to templates: session data, query, form,
    /// cookies, request headers and server facts, each under its own
    /// name.
    pub fn bindings(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("version".to_string(), json!(VERSION));
        map.insert(
            "session".to_string(),
            Value::Object(self.response.session.data().clone()),
        );
        map.insert("query".to_string(), pairs_value(&self.query));
        map.insert("form".to_string(), pairs_value(&self.request.body.form));
        map.insert("cookies".to_string(), jar_value(&self.cookies));
        map.insert("headers".to_string(), table_value(&self.headers));
        map.insert("server".to_string(), table_value(&self.server));
        map
    }

    /// Diagnostic report over the assembled state, written through the
    /// response like any other body content.
    pub fn info(&mut self) -> std::io::Result<()> {
        let report = self.info_report();
        self.response.write(report)
    }

    fn info_report(&self) -> String {
        let mut out = String::new();
        out.push_str(
            "<style>.Logo{text-align:left;font-size:36px !important}\
             .GateTable{font-family:arial;font-size:12px;margin:auto;\
             border-collapse:collapse;width:600px}\
             .GateTable th{background-color:#303030;color:white;font-size:14px;padding:10px}\
             .GateTable td{padding:5px}\
             .GateTable tr td:nth-child(1){background:#d9ebb3}</style>",
        );
        out.push_str("<table class=\"GateTable\" border=\"1\">");
        out.push_str(&format!(
            "<tr><th colspan=\"2\" class=\"Logo\">rustygate v{VERSION}</th></tr>"
        ));

        let session = &self.response.session;
        draw_section(
            &mut out,
            "Request",
            [
                ("method".to_string(), format!("{:?}", self.request.method)),
                ("target".to_string(), self.url.to_string()),
                ("protocol".to_string(), self.http_version.clone()),
            ]
            .into_iter(),
        );
        draw_section(
            &mut out,
            "Server Variables",
            self.server.iter().map(|(k, v)| (k.clone(), v.clone())),
        );
        draw_section(
            &mut out,
            "HTTP Request Headers",
            self.headers.iter().map(|(k, v)| (k.clone(), v.clone())),
        );
        draw_section(
            &mut out,
            "HTTP Request Cookies",
            self.cookies.iter().map(|(k, v)| (k.clone(), v.clone())),
        );
        draw_section(
            &mut out,
            "Session",
            [
                ("id".to_string(), session.id.clone()),
                ("path".to_string(), session.path.display().to_string()),
                ("ipAddress".to_string(), session.ip_address.clone()),
            ]
            .into_iter(),
        );
        draw_section(
            &mut out,
            "Session Cookie",
            [
                ("name".to_string(), session.cookie.name.clone()),
                ("value".to_string(), session.cookie.value.clone()),
                (
                    "sameSite".to_string(),
                    session
                        .cookie
                        .same_site
                        .map(SameSite::as_str)
                        .unwrap_or("")
                        .to_string(),
                ),
                ("httpOnly".to_string(), session.cookie.http_only.to_string()),
            ]
            .into_iter(),
        );
        draw_section(
            &mut out,
            "Session Data",
            session.data().iter().map(|(k, v)| (k.clone(), v.to_string())),
        );
        draw_section(
            &mut out,
            "URL Query String",
            self.query.iter().map(|(k, v)| (k.clone(), v.join(", "))),
        );
        draw_section(
            &mut out,
            "Post Form",
            self.request
                .body
                .form
                .iter()
                .map(|(k, v)| (k.clone(), v.join(", "))),
        );
        draw_section(
            &mut out,
            "Post Files",
            self.request
                .body
                .files
                .iter()
                .map(|f| (f.name.clone(), format!("{} ({} bytes)", f.filename, f.data.len()))),
        );
        draw_section(
            &mut out,
            "Post Parts",
            self.request
                .body
                .parts
                .iter()
                .enumerate()
                .map(|(i, part)| (i.to_string(), part.clone())),
        );

        out.push_str("</table>");
        out
    }

    /// Renders a failure as a visible diagnostic block: appended to the
    /// body if one is underway, otherwise it becomes the body.
    pub fn render_error(&mut self, err: &CgiError) -> std::io::Result<()> {
        self.response.write(format!(
            "<br/><div style=\"color:red\"><b>ERROR</b>: {err}</div><br/>"
        ))
    }

    /// Exit-time teardown: flush the response, persist the session,
    /// sweep expired records. Each step is best-effort and never masks
    /// the request's outcome; a failed save is surfaced distinctly so
    /// operators can detect data loss.
    pub fn finish(&mut self) {
        if let Err(err) = self.response.end() {
            tracing::warn!("failed to flush response: {err}");
        }
        if let Err(err) = self.response.session.save() {
            tracing::error!("session save failed, state for this request is lost: {err}");
        }
        if let Err(err) = Session::cleanup(&self.config) {
            tracing::warn!("session cleanup failed: {err}");
        }
    }
}

fn draw_section(out: &mut String, title: &str, rows: impl Iterator<Item = (String, String)>) {
    out.push_str(&format!("<tr><th colspan=\"2\">{title}</th></tr>"));
    for (name, value) in rows {
        out.push_str(&format!("<tr><td>{name}</td><td>{value}</td></tr>"));
    }
}

fn pairs_value(pairs: &IndexMap<String, Vec<String>>) -> Value {
    let mut map = Map::new();
    for (name, values) in pairs {
        let value = match values.as_slice() {
            [single] => json!(single),
            many => json!(many),
        };
        map.insert(name.clone(), value);
    }
    Value::Object(map)
}

fn table_value(table: &HeaderTable) -> Value {
    let mut map = Map::new();
    for (name, value) in table.iter() {
        map.insert(name.clone(), json!(value));
    }
    Value::Object(map)
}

fn jar_value(jar: &CookieJar) -> Value {
    let mut map = Map::new();
    for (name, value) in jar.iter() {
        map.insert(name.clone(), json!(value));
    }
    Value::Object(map)
}

/// Capability surface injected into script handlers.
///
/// A fresh scope is constructed for every script invocation; handlers
/// reach the runtime only through these bindings.
pub struct Scope<'a> {
    pub(crate) ctx: &'a mut Context,
}

#[allow(dead_code)]
impl Scope<'_> {
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> std::io::Result<()> {
        self.ctx.response.write(data)
    }

    pub fn write_value(&mut self, value: Option<&Value>) -> std::io::Result<()> {
        self.ctx.response.write_value(value)
    }

    pub fn set_header(&mut self, name: &str, value: &str) {
        self.ctx.response.set_header(name, value);
    }

    pub fn include(&mut self, path: &str) -> Result<(), CgiError> {
        self.ctx.include(path)
    }

    pub fn session_get(&self, key: &str) -> Option<&Value> {
        self.ctx.response.session.get(key)
    }

    pub fn session_set(&mut self, key: &str, value: Value) {
        self.ctx.response.session.set(key, value);
    }

    pub fn session_unset(&mut self, key: &str) {
        self.ctx.response.session.unset(key);
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.ctx.cookies.get(name)
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.ctx.headers.get(name)
    }

    pub fn server(&self, name: &str) -> Option<&String> {
        self.ctx.server.get(name)
    }

    pub fn method(&self) -> HttpMethod {
        self.ctx.request.method
    }

    pub fn url(&self) -> &Url {
        &self.ctx.url
    }

    pub fn http_version(&self) -> &str {
        &self.ctx.http_version
    }

    pub fn query(&self) -> &IndexMap<String, Vec<String>> {
        &self.ctx.query
    }

    pub fn form(&self) -> &IndexMap<String, Vec<String>> {
        &self.ctx.request.body.form
    }

    pub fn files(&self) -> &[crate::http::request::UploadedFile] {
        &self.ctx.request.body.files
    }

    pub fn parts(&self) -> &[String] {
        &self.ctx.request.body.parts
    }

    pub fn bindings(&self) -> Map<String, Value> {
        self.ctx.bindings()
    }

    pub fn info(&mut self) -> std::io::Result<()> {
        self.ctx.info()
    }
}
