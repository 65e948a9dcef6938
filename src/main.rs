mod config;
mod context;
mod crypto;
mod error;
mod http;
mod script;
mod session;
mod template;

use std::io::Write;

use config::Config;
use context::Context;
use error::CgiError;
use script::ScriptRegistry;
use template::BasicEngine;

fn main() {
    // stdout carries the HTTP response; logs go to the server error log
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let env: Vec<(String, String)> = std::env::vars().collect();
    let config = Config::from_env(&env);

    std::process::exit(run(&env, config));
}

fn run(env: &[(String, String)], config: Config) -> i32 {
    let mut context = match Context::new(
        env,
        config,
        ScriptRegistry::builtin(),
        Box::new(BasicEngine),
        Box::new(std::io::stdout()),
    ) {
        Ok(context) => context,
        Err(err) => {
            tracing::error!("request aborted before a context existed: {err}");
            bare_error_page(&err);
            return 1;
        }
    };

    let code = match async_std::task::block_on(context.run()) {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("request failed: {err}");
            if let Err(write_err) = context.render_error(&err) {
                tracing::warn!("could not render error block: {write_err}");
            }
            // script and template failures still produce a complete
            // response; protocol-level ones exit non-zero
            if err.is_recoverable() { 0 } else { 1 }
        }
    };

    context.finish();
    code
}

/// Last-resort error page when no response writer exists yet.
fn bare_error_page(err: &CgiError) {
    let mut stdout = std::io::stdout();
    let page = format!("Content-Type:text/html;charset=utf-8\n\n<b>ERROR</b>: {err}");
    if stdout
        .write_all(page.as_bytes())
        .and_then(|_| stdout.flush())
        .is_err()
    {
        tracing::error!("stdout is gone; error page lost");
    }
}
