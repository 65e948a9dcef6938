//! Structured request built from CGI metadata plus the stdin byte
//! stream.
//!
//! Body parsing is deferred until all input bytes are received; the
//! async [`Request::read_body`] is the single suspension point in the
//! runtime, and everything downstream of body availability waits on it.

use async_std::prelude::*;
use indexmap::IndexMap;
use std::time::Duration;
use url::Url;

use crate::http::HttpMethod;
use crate::http::headers::HeaderTable;

#[derive(Debug, Clone, PartialEq)]
pub struct UploadedFile {
    /// Field name from the part's disposition.
    pub name: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Default)]
pub struct RequestBody {
    pub raw: Vec<u8>,
    /// Decoded form fields, in arrival order.
    pub form: IndexMap<String, Vec<String>>,
    pub files: Vec<UploadedFile>,
    /// Raw text of each multipart segment.
    pub parts: Vec<String>,
    pub is_multipart: bool,
}

pub struct Request {
    pub url: Url,
    pub method: HttpMethod,
    pub headers: HeaderTable,
    pub body: RequestBody,
}

impl Request {
    pub fn new(url: Url, method: HttpMethod, headers: HeaderTable) -> Self {
        let is_multipart = headers
            .get("content_type")
            .map(|value| value.to_lowercase().contains("multipart/form-data"))
            .unwrap_or(false);

        Self {
            url,
            method,
            headers,
            body: RequestBody {
                is_multipart,
                ..RequestBody::default()
            },
        }
    }

    /// Accumulates the request body until end-of-stream, bounded by
    /// `timeout`, then parses it unless `parse` is false.
    pub async fn read_body<R>(
        &mut self,
        reader: &mut R,
        timeout: Duration,
        parse: bool,
    ) -> std::io::Result<()>
    where
        R: async_std::io::Read + Unpin,
    {
        let raw = async_std::io::timeout(timeout, async {
            let mut buf = Vec::new();
            reader.read_to_end(&mut buf).await?;
            Ok(buf)
        })
        .await?;

        self.body.raw = raw;
        if parse {
            self.parse_post();
        }
        Ok(())
    }

    /// Decodes the accumulated bytes: URL-encoded form data, or
    /// multipart segments when the content type said so.
    pub fn parse_post(&mut self) {
        if self.body.is_multipart {
            self.parse_multipart();
            return;
        }

        let raw = std::mem::take(&mut self.body.raw);
        for (name, value) in url::form_urlencoded::parse(&raw) {
            self.body
                .form
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        self.body.raw = raw;
    }

    /// Best-effort multipart decoding: the boundary is the body's first
    /// line minus its terminator, and malformed segments are skipped
    /// rather than failing the request.
    fn parse_multipart(&mut self) {
        let raw = std::mem::take(&mut self.body.raw);

        let Some(newline) = raw.iter().position(|&b| b == b'\n') else {
            self.body.raw = raw;
            return;
        };
        let mut boundary = &raw[..newline];
        if boundary.ends_with(b"\r") {
            boundary = &boundary[..boundary.len() - 1];
        }
        if boundary.is_empty() {
            self.body.raw = raw;
            return;
        }
        let boundary = boundary.to_vec();

        for segment in split_on(&raw[newline + 1..], &boundary) {
            let mut segment = segment;
            if segment.starts_with(b"\r\n") {
                segment = &segment[2..];
            } else if segment.starts_with(b"\n") {
                segment = &segment[1..];
            }
            // the piece after the closing boundary is just "--"
            if segment.is_empty() || segment.starts_with(b"--") {
                continue;
            }

            self.body
                .parts
                .push(String::from_utf8_lossy(segment).into_owned());

            let (head, payload) = match find_subslice(segment, b"\r\n\r\n") {
                Some(pos) => (&segment[..pos], &segment[pos + 4..]),
                None => match find_subslice(segment, b"\n\n") {
                    Some(pos) => (&segment[..pos], &segment[pos + 2..]),
                    None => continue,
                },
            };

            let mut payload = payload;
            if payload.ends_with(b"\r\n") {
                payload = &payload[..payload.len() - 2];
            } else if payload.ends_with(b"\n") {
                payload = &payload[..payload.len() - 1];
            }

            let mut name = None;
            let mut filename = None;
            let mut content_type = None;
            for line in String::from_utf8_lossy(head).lines() {
                let lower = line.to_ascii_lowercase();
                if lower.starts_with("content-disposition:") {
                    for piece in line.split(';') {
                        let piece = piece.trim();
                        if let Some(value) = piece.strip_prefix("filename=") {
                            filename = Some(unquote(value).to_string());
                        } else if let Some(value) = piece.strip_prefix("name=") {
                            name = Some(unquote(value).to_string());
                        }
                    }
                } else if lower.starts_with("content-type:") {
                    if let Some((_, value)) = line.split_once(':') {
                        content_type = Some(value.trim().to_string());
                    }
                }
            }

            let Some(name) = name else {
                continue;
            };

            match filename {
                Some(filename) => self.body.files.push(UploadedFile {
                    name,
                    filename,
                    content_type,
                    data: payload.to_vec(),
                }),
                None => self
                    .body
                    .form
                    .entry(name)
                    .or_default()
                    .push(String::from_utf8_lossy(payload).into_owned()),
            }
        }

        self.body.raw = raw;
    }
}

fn unquote(value: &str) -> &str {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut parts = Vec::new();
    let mut start = 0;
    while let Some(pos) = find_subslice(&haystack[start..], needle) {
        parts.push(&haystack[start..start + pos]);
        start += pos + needle.len();
    }
    parts.push(&haystack[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    fn request(content_type: &str) -> Request {
        let mut headers = HeaderTable::new();
        headers.set("content_type", content_type);
        Request::new(
            Url::parse("http://localhost/form").unwrap(),
            HttpMethod::Post,
            headers,
        )
    }

    #[test]
    fn multipart_classification_is_substring_and_case_insensitive() {
        let plain = request("application/x-www-form-urlencoded");
        assert!(!plain.body.is_multipart);

        let multi = request("Multipart/Form-Data; boundary=XbOuNd");
        assert!(multi.body.is_multipart);
    }

    #[test]
    fn urlencoded_form_decoding() {
        let mut req = request("application/x-www-form-urlencoded");
        req.body.raw = b"a=1&b=2&a=3".to_vec();
        req.parse_post();

        assert_eq!(req.body.form["a"], vec!["1", "3"]);
        assert_eq!(req.body.form["b"], vec!["2"]);
        assert!(req.body.files.is_empty());
    }

    #[test]
    fn read_body_accumulates_until_eof() {
        let mut req = request("application/x-www-form-urlencoded");
        let mut reader: &[u8] = b"name=ferris&lang=rust";
        task::block_on(req.read_body(&mut reader, Duration::from_secs(1), true))
            .expect("read body");

        assert_eq!(req.body.raw, b"name=ferris&lang=rust");
        assert_eq!(req.body.form["name"], vec!["ferris"]);
        assert_eq!(req.body.form["lang"], vec!["rust"]);
    }

    #[test]
    fn read_body_can_skip_parsing() {
        let mut req = request("application/x-www-form-urlencoded");
        let mut reader: &[u8] = b"a=1";
        task::block_on(req.read_body(&mut reader, Duration::from_secs(1), false))
            .expect("read body");

        assert_eq!(req.body.raw, b"a=1");
        assert!(req.body.form.is_empty());
    }

    fn multipart_body() -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(b"--XbOuNd\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"alpha\"\r\n\r\n");
        body.extend_from_slice(b"one\r\n");
        body.extend_from_slice(b"--XbOuNd\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"beta\"\r\n\r\n");
        body.extend_from_slice(b"two\r\n");
        body.extend_from_slice(b"--XbOuNd\r\n");
        body.extend_from_slice(
            b"Content-Disposition: form-data; name=\"upload\"; filename=\"notes.txt\"\r\n",
        );
        body.extend_from_slice(b"Content-Type: text/plain\r\n\r\n");
        body.extend_from_slice(b"hello file\r\n");
        body.extend_from_slice(b"--XbOuNd--\r\n");
        body
    }

    #[test]
    fn multipart_fields_and_files_in_segment_order() {
        let mut req = request("multipart/form-data; boundary=XbOuNd");
        req.body.raw = multipart_body();
        req.parse_post();

        let names: Vec<&String> = req.body.form.keys().collect();
        assert_eq!(names, ["alpha", "beta"]);
        assert_eq!(req.body.form["alpha"], vec!["one"]);
        assert_eq!(req.body.form["beta"], vec!["two"]);

        assert_eq!(req.body.files.len(), 1);
        let file = &req.body.files[0];
        assert_eq!(file.name, "upload");
        assert_eq!(file.filename, "notes.txt");
        assert_eq!(file.content_type.as_deref(), Some("text/plain"));
        assert_eq!(file.data, b"hello file");

        assert_eq!(req.body.parts.len(), 3);
    }

    #[test]
    fn malformed_segment_is_skipped_not_fatal() {
        let mut body = Vec::new();
        body.extend_from_slice(b"--XbOuNd\r\n");
        body.extend_from_slice(b"no disposition here\r\n\r\nlost\r\n");
        body.extend_from_slice(b"--XbOuNd\r\n");
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"ok\"\r\n\r\n");
        body.extend_from_slice(b"kept\r\n");
        body.extend_from_slice(b"--XbOuNd--\r\n");

        let mut req = request("multipart/form-data; boundary=XbOuNd");
        req.body.raw = body;
        req.parse_post();

        assert_eq!(req.body.form.len(), 1);
        assert_eq!(req.body.form["ok"], vec!["kept"]);
    }

    #[test]
    fn body_without_boundary_parses_to_nothing() {
        let mut req = request("multipart/form-data");
        req.body.raw = b"no newline at all".to_vec();
        req.parse_post();

        assert!(req.body.form.is_empty());
        assert!(req.body.files.is_empty());
        assert!(req.body.parts.is_empty());
    }
}
