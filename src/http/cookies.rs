//! Cookie codec: request-side `Cookie` header parsing and
//! response-side `Set-Cookie` serialization.

use indexmap::IndexMap;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, UNIX_EPOCH};

/// Everything outside `A-Za-z0-9 - _ . ! ~ * ' ( )` gets escaped in
/// cookie values.
const COOKIE_VALUE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }
}

/// Outgoing cookie descriptor. Persisted inside the session record, so
/// the field names follow the record's camelCase convention.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Unix timestamp, rendered as an HTTP-date on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<u64>,

    #[serde(default)]
    pub http_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<SameSite>,

    #[serde(default)]
    pub secure: bool,

    /// True until the `Set-Cookie` line has been emitted once.
    /// Transient: never persisted, deserializes to false.
    #[serde(skip)]
    pub not_sent: bool,
}

/// Lookup table over a raw `Cookie` request header.
#[derive(Debug, Clone, Default)]
pub struct CookieJar {
    store: IndexMap<String, String>,
}

impl CookieJar {
    /// Parses a raw `Cookie` header.
    ///
    /// Segments split on `;`, name/value on the first `=`; segments
    /// without `=` are skipped silently and duplicate names keep the
    /// last occurrence. One matching pair of surrounding double quotes
    /// is stripped from the value. Percent-decoding is attempted and
    /// falls back to the raw value, so a decode failure is never an
    /// error for the caller.
    pub fn parse(raw: &str) -> Self {
        let mut store = IndexMap::new();

        for pair in raw.split(';') {
            let Some(eq) = pair.find('=') else {
                continue;
            };

            let name = pair[..eq].trim();
            let mut value = pair[eq + 1..].trim();

            if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
                value = &value[1..value.len() - 1];
            }

            let decoded = match percent_decode_str(value).decode_utf8() {
                Ok(decoded) => decoded.into_owned(),
                Err(_) => value.to_string(),
            };
            store.insert(name.to_string(), decoded);
        }

        Self { store }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.store.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.store.iter()
    }

    /// Renders a `Set-Cookie` line body. Attribute order is fixed:
    /// Domain, Path, Expires, HttpOnly, SameSite, Secure.
    pub fn serialize_cookie(cookie: &Cookie) -> String {
        let mut pairs = vec![format!(
            "{}={}",
            cookie.name,
            utf8_percent_encode(&cookie.value, COOKIE_VALUE_SET)
        )];

        if let Some(domain) = &cookie.domain {
            pairs.push(format!("Domain={domain}"));
        }
        if let Some(path) = &cookie.path {
            pairs.push(format!("Path={path}"));
        }
        if let Some(secs) = cookie.expires {
            let when = UNIX_EPOCH + Duration::from_secs(secs);
            pairs.push(format!("Expires={}", httpdate::fmt_http_date(when)));
        }
        if cookie.http_only {
            pairs.push("HttpOnly".to_string());
        }
        if let Some(same_site) = cookie.same_site {
            pairs.push(format!("SameSite={}", same_site.as_str()));
        }
        if cookie.secure {
            pairs.push("Secure".to_string());
        }

        pairs.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_semicolon_and_first_equal() {
        let jar = CookieJar::parse("a=1; b=x=y; plain");
        assert_eq!(jar.get("a").unwrap(), "1");
        assert_eq!(jar.get("b").unwrap(), "x=y");
        assert!(jar.get("plain").is_none());
    }

    #[test]
    fn parse_strips_matching_quotes_and_decodes() {
        let jar = CookieJar::parse(r#"quoted="hello%20world"; raw=100%"#);
        assert_eq!(jar.get("quoted").unwrap(), "hello world");
        // broken escape falls back to the raw value
        assert_eq!(jar.get("raw").unwrap(), "100%");
    }

    #[test]
    fn duplicate_names_keep_last_occurrence() {
        let jar = CookieJar::parse("a=1; a=2");
        assert_eq!(jar.get("a").unwrap(), "2");
    }

    #[test]
    fn serialize_attribute_order() {
        let cookie = Cookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            domain: Some("example.org".to_string()),
            path: Some("/".to_string()),
            expires: Some(784111777),
            http_only: true,
            same_site: Some(SameSite::Lax),
            secure: true,
            not_sent: true,
        };
        assert_eq!(
            CookieJar::serialize_cookie(&cookie),
            "sid=abc; Domain=example.org; Path=/; Expires=Sun, 06 Nov 1994 08:49:37 GMT; \
             HttpOnly; SameSite=Lax; Secure"
        );
    }

    #[test]
    fn round_trip_reserved_characters() {
        let cookie = Cookie {
            name: "data".to_string(),
            value: "a b;c=d&e\"f".to_string(),
            ..Cookie::default()
        };
        let header = CookieJar::serialize_cookie(&cookie);
        // the bare name=value form is also a valid request Cookie header
        let jar = CookieJar::parse(&header);
        assert_eq!(jar.get("data").unwrap(), "a b;c=d&e\"f");
    }

    #[test]
    fn not_sent_is_never_persisted() {
        let cookie = Cookie {
            name: "sid".to_string(),
            value: "abc".to_string(),
            http_only: true,
            not_sent: true,
            ..Cookie::default()
        };
        let json = serde_json::to_string(&cookie).unwrap();
        assert!(!json.contains("notSent"));

        let back: Cookie = serde_json::from_str(&json).unwrap();
        assert!(!back.not_sent);
        assert!(back.http_only);
    }
}
