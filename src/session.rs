//! File-backed session store.
//!
//! One JSON file per session under the configured root, named by the
//! session id. A session is bound to the client address that created
//! it; presenting its cookie from another address is an authentication
//! failure, not a silent reset. Expiry is driven purely by file
//! modification time.
//!
//! The store is shared between concurrent processes without locking:
//! two requests racing on the same id lose the earlier `save` (last
//! write wins). This is accepted behavior for the process model, where
//! eviction intervals are long relative to request latency.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Config;
use crate::crypto;
use crate::error::SessionError;
use crate::http::cookies::{Cookie, CookieJar, SameSite};
use crate::http::headers::HeaderTable;

/// On-disk record, camelCase keys.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    id: String,
    path: PathBuf,
    ip_address: String,
    cookie: Cookie,
    data: Map<String, Value>,
}

pub struct Session {
    pub id: String,
    pub path: PathBuf,
    pub ip_address: String,
    pub cookie: Cookie,
    store: Map<String, Value>,
}

impl Session {
    /// Opens the session referenced by the request cookies, creating a
    /// fresh one when no usable cookie is presented or the backing file
    /// is gone.
    ///
    /// A loaded record whose stored address differs from the caller's
    /// `remote_addr` fails with [`SessionError::AddressMismatch`];
    /// construction aborts and no half-open session is returned.
    pub fn open(
        cookies: &CookieJar,
        server: &HeaderTable,
        config: &Config,
    ) -> Result<Self, SessionError> {
        let candidate = cookies
            .get(&config.session_cookie)
            .filter(|id| is_plausible_id(id));

        let record = match candidate {
            Some(id) if config.session_path.join(id).is_file() => {
                let path = config.session_path.join(id);
                let record: SessionRecord = serde_json::from_str(&fs::read_to_string(&path)?)?;

                let remote = server
                    .get("remote_addr")
                    .ok_or(SessionError::MissingRemoteAddr)?;
                if record.ip_address != *remote {
                    tracing::warn!(
                        session = %record.id,
                        stored = %record.ip_address,
                        caller = %remote,
                        "session address mismatch"
                    );
                    return Err(SessionError::AddressMismatch);
                }
                record
            }
            _ => Self::create(server, config)?,
        };

        Ok(Self {
            id: record.id,
            path: record.path,
            ip_address: record.ip_address,
            cookie: record.cookie,
            store: record.data,
        })
    }

    /// Mints a new session: derives the id, makes sure the storage
    /// directory exists and writes the initial record.
    fn create(server: &HeaderTable, config: &Config) -> Result<SessionRecord, SessionError> {
        let remote = server
            .get("remote_addr")
            .ok_or(SessionError::MissingRemoteAddr)?
            .clone();

        let blank = String::new();
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let seed = format!(
            "{}{}{}{}{}",
            remote,
            server.get("remote_port").unwrap_or(&blank),
            server.get("unique_id").unwrap_or(&blank),
            millis,
            crypto::entropy_token(),
        );
        let id = crypto::sha1_hex(seed.as_bytes());

        let record = SessionRecord {
            id: id.clone(),
            path: config.session_path.join(&id),
            ip_address: remote,
            cookie: Cookie {
                name: config.session_cookie.clone(),
                value: id,
                http_only: true,
                same_site: Some(SameSite::Lax),
                not_sent: true,
                ..Cookie::default()
            },
            data: Map::new(),
        };

        fs::create_dir_all(&config.session_path)?;
        fs::write(&record.path, serde_json::to_string(&record)?)?;

        Ok(record)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.store.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.store.insert(key.to_string(), value);
    }

    pub fn unset(&mut self, key: &str) {
        self.store.remove(key);
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.store
    }

    /// Serializes the full record and overwrites the backing file.
    /// Called exactly once per request lifecycle, after all mutations.
    pub fn save(&self) -> Result<(), SessionError> {
        let record = SessionRecord {
            id: self.id.clone(),
            path: self.path.clone(),
            ip_address: self.ip_address.clone(),
            cookie: self.cookie.clone(),
            data: self.store.clone(),
        };
        fs::write(&self.path, serde_json::to_string(&record)?)?;
        Ok(())
    }

    /// Evicts every record whose modification time is older than the
    /// configured idle timeout. Runs after `save`, so the record just
    /// written in this request's cycle is never swept.
    ///
    /// Individual stat/delete failures are logged and skipped; only an
    /// unreadable storage directory is an error.
    pub fn cleanup(config: &Config) -> Result<(), SessionError> {
        let now = SystemTime::now();

        for entry in fs::read_dir(&config.session_path)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!("skipping unreadable session entry: {err}");
                    continue;
                }
            };

            match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(mtime) if mtime + config.session_timeout < now => {
                    if let Err(err) = fs::remove_file(entry.path()) {
                        tracing::warn!(
                            "failed to evict stale session {:?}: {err}",
                            entry.file_name()
                        );
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!("cannot stat session {:?}: {err}", entry.file_name());
                }
            }
        }

        Ok(())
    }
}

/// Cookie-supplied ids are only honored when they look like a digest;
/// anything else is treated as no cookie at all.
fn is_plausible_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_hexdigit())
}
