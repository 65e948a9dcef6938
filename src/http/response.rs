//! Response writer with deferred, one-shot header emission.
//!
//! Headers stay buffered until the first body byte (or an explicit
//! flush); the `Pending -> Sent` transition is irreversible and exactly
//! one header block is emitted per process lifetime. The writer owns
//! the session so it can emit the session cookie alongside the headers.

use serde_json::Value;
use std::io::Write;

use crate::http::cookies::CookieJar;
use crate::http::headers::HeaderTable;
use crate::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderState {
    Pending,
    Sent,
}

pub struct Response {
    state: HeaderState,
    headers: HeaderTable,
    pub session: Session,
    sink: Box<dyn Write>,
}

impl Response {
    pub fn new(session: Session, sink: Box<dyn Write>) -> Self {
        Self {
            state: HeaderState::Pending,
            headers: HeaderTable::new(),
            session,
            sink,
        }
    }

    #[allow(dead_code)]
    pub fn headers_sent(&self) -> bool {
        self.state == HeaderState::Sent
    }

    /// Buffers a response header. Rejected once the header block has
    /// been emitted; the attempt is logged, not silently applied.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if self.state == HeaderState::Sent {
            tracing::warn!("header {name:?} ignored: headers already sent");
            return;
        }
        self.headers.set(name, value);
    }

    pub fn header(&self, name: &str) -> Option<&String> {
        self.headers.get(name)
    }

    /// Emits the header block once: the fixed content type, the
    /// buffered headers, the session cookie if it has not been sent
    /// yet, and the terminating blank line.
    pub fn send_headers(&mut self) -> std::io::Result<()> {
        if self.state == HeaderState::Sent {
            return Ok(());
        }
        self.state = HeaderState::Sent;

        self.sink
            .write_all(b"Content-Type:text/html;charset=utf-8\n")?;
        for (name, value) in self.headers.iter() {
            self.sink.write_all(format!("{name}:{value}\n").as_bytes())?;
        }

        if self.session.cookie.not_sent {
            self.session.cookie.not_sent = false;
            let line = CookieJar::serialize_cookie(&self.session.cookie);
            self.sink
                .write_all(format!("Set-Cookie:{line}\n").as_bytes())?;
        }

        self.sink.write_all(b"\n")
    }

    /// Writes body bytes, emitting the header block first if needed.
    pub fn write(&mut self, data: impl AsRef<[u8]>) -> std::io::Result<()> {
        self.send_headers()?;
        self.sink.write_all(data.as_ref())
    }

    /// Structured write: `None` renders as `undefined`, JSON null as
    /// `NULL`, primitives as their direct text form, everything else as
    /// compact JSON.
    pub fn write_value(&mut self, value: Option<&Value>) -> std::io::Result<()> {
        let text = match value {
            None => "undefined".to_string(),
            Some(Value::Null) => "NULL".to_string(),
            Some(Value::String(text)) => text.clone(),
            Some(Value::Number(number)) => number.to_string(),
            Some(Value::Bool(flag)) => flag.to_string(),
            Some(other) => other.to_string(),
        };
        self.write(text)
    }

    /// Ensures the header block is out and the sink is flushed. The
    /// bootstrap terminates the process afterwards, once the session
    /// has been persisted.
    pub fn end(&mut self) -> std::io::Result<()> {
        self.send_headers()?;
        self.sink.flush()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// Write sink whose contents stay reachable after the writer is
    /// moved into a `Response`.
    #[derive(Clone, Default)]
    pub(crate) struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        pub(crate) fn contents(&self) -> Vec<u8> {
            self.0.lock().unwrap().clone()
        }

        pub(crate) fn text(&self) -> String {
            String::from_utf8_lossy(&self.contents()).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
