use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Environment variable naming an optional TOML config file.
const CONFIG_FILE_VAR: &str = "RUSTYGATE_CONFIG";

/// Runtime configuration, built once at process start from defaults, an
/// optional config file and individual environment overrides, then
/// passed by reference through the component graph.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding one file per session, named by session id.
    pub session_path: PathBuf,

    /// Idle time after which a session file is evicted.
    pub session_timeout: Duration,

    /// Name of the cookie carrying the session id.
    pub session_cookie: String,

    /// Bound on reading the request body from stdin.
    pub read_timeout: Duration,

    /// Extensions dispatched to registered handlers.
    pub script_extensions: Vec<String>,

    /// Extensions dispatched to the template engine.
    pub template_extensions: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_path: std::env::temp_dir().join("rustygate-sessions"),
            session_timeout: Duration::from_secs(15 * 60),
            session_cookie: "__RUSTYGATE_SESSION__".to_string(),
            read_timeout: Duration::from_secs(30),
            script_extensions: vec!["rs".to_string(), "run".to_string()],
            template_extensions: vec!["tpl".to_string(), "ejs".to_string()],
        }
    }
}

/// Optional file layer; every field may be omitted.
#[derive(Debug, Deserialize)]
struct FileConfig {
    session_path: Option<PathBuf>,
    session_timeout_seconds: Option<u64>,
    session_cookie: Option<String>,
    read_timeout_seconds: Option<f64>,
    script_extensions: Option<Vec<String>>,
    template_extensions: Option<Vec<String>>,
}

impl Config {
    /// Resolves configuration from an environment snapshot.
    ///
    /// Precedence: defaults, then the file named by `RUSTYGATE_CONFIG`,
    /// then the individual `SESSION_*` variables.
    pub fn from_env(env: &[(String, String)]) -> Self {
        let lookup = |name: &str| {
            env.iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.as_str())
        };

        let mut config = match lookup(CONFIG_FILE_VAR) {
            Some(path) => Self::from_file(path),
            None => Self::default(),
        };

        if let Some(path) = lookup("SESSION_PATH") {
            config.session_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("SESSION_TIMEOUT_SECONDS") {
            match secs.parse::<u64>() {
                Ok(secs) => config.session_timeout = Duration::from_secs(secs),
                Err(err) => tracing::warn!("invalid SESSION_TIMEOUT_SECONDS {secs:?}: {err}"),
            }
        }
        if let Some(name) = lookup("SESSION_COOKIE_NAME") {
            config.session_cookie = name.to_string();
        }

        config
    }

    pub fn from_file(path: &str) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                tracing::warn!("fail to read {path}: {err}; falling back to default config");
                return Config::default();
            }
        };

        match toml::from_str::<FileConfig>(content.as_str()) {
            Ok(file) => Config::default().merge(file),
            Err(err) => {
                tracing::warn!(
                    "fail to deserialize config file {path}: {err}; falling back to default config"
                );
                Config::default()
            }
        }
    }

    fn merge(mut self, file: FileConfig) -> Self {
        if let Some(path) = file.session_path {
            self.session_path = path;
        }
        if let Some(secs) = file.session_timeout_seconds {
            self.session_timeout = Duration::from_secs(secs);
        }
        if let Some(name) = file.session_cookie {
            self.session_cookie = name;
        }
        if let Some(secs) = file.read_timeout_seconds {
            self.read_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(exts) = file.script_extensions {
            self.script_extensions = exts;
        }
        if let Some(exts) = file.template_extensions {
            self.template_extensions = exts;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults() {
        let config = Config::from_env(&[]);
        assert_eq!(config.session_timeout, Duration::from_secs(900));
        assert_eq!(config.session_cookie, "__RUSTYGATE_SESSION__");
        assert!(config.script_extensions.contains(&"run".to_string()));
    }

    #[test]
    fn env_overrides_win() {
        let config = Config::from_env(&env(&[
            ("SESSION_PATH", "/tmp/other"),
            ("SESSION_TIMEOUT_SECONDS", "60"),
            ("SESSION_COOKIE_NAME", "sid"),
        ]));
        assert_eq!(config.session_path, PathBuf::from("/tmp/other"));
        assert_eq!(config.session_timeout, Duration::from_secs(60));
        assert_eq!(config.session_cookie, "sid");
    }

    #[test]
    fn malformed_timeout_is_ignored() {
        let config = Config::from_env(&env(&[("SESSION_TIMEOUT_SECONDS", "soon")]));
        assert_eq!(config.session_timeout, Duration::from_secs(900));
    }

    #[test]
    fn unreadable_file_falls_back_to_default() {
        let config = Config::from_file("/nonexistent/rustygate.toml");
        assert_eq!(config.session_timeout, Duration::from_secs(900));
    }
}
