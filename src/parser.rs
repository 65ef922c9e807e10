//! Request Parser / Builder.
//!
//! Parses a free-form CRLF/LF request blob into method, target, header map,
//! and body, and reconstructs the wire-level text for audit.

use crate::error::Error;
use indexmap::IndexMap;

/// One parsed request, still in "template" form (headers/body may contain
/// unsubstituted placeholders).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Preserves declaration order; a header may legitimately repeat, but
    /// this keeps last-wins semantics per name.
    pub headers: IndexMap<String, String>,
    pub body: Vec<u8>,
}

impl ParsedRequest {
    /// Parse a raw request blob into its method, target, version, headers,
    /// and body.
    ///
    /// # Errors
    /// Returns [`Error::invalid_input`] for an empty blob or a request line
    /// missing a method or target. Never panics.
    pub fn parse(blob: &str) -> Result<Self, Error> {
        let normalized = blob.replace("\r\n", "\n");
        let mut lines = normalized.split('\n');

        let request_line = loop {
            match lines.next() {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => break line.trim(),
                None => return Err(malformed("empty request blob")),
            }
        };

        let mut parts = request_line.split_whitespace();
        let method = parts
            .next()
            .ok_or_else(|| malformed("missing method"))?
            .to_uppercase();
        let target = parts
            .next()
            .ok_or_else(|| malformed("missing request target"))?
            .to_string();
        let version = parts.next().unwrap_or("HTTP/1.1").to_string();

        let rest: Vec<&str> = lines.collect();
        let mut headers = IndexMap::new();
        let mut body_start = rest.len();

        let mut i = 0;
        while i < rest.len() {
            let line = rest[i];
            if line.is_empty() {
                body_start = i + 1;
                break;
            }
            if let Some((name, value)) = line.split_once(':') {
                let name = name.trim().to_string();
                let mut value = value.trim().to_string();
                let mut j = i + 1;
                while j < rest.len() && rest[j].starts_with([' ', '\t']) {
                    value.push(' ');
                    value.push_str(rest[j].trim());
                    j += 1;
                }
                headers.insert(name, value);
                i = j;
            } else {
                i += 1;
            }
        }

        let body_text = if body_start < rest.len() {
            rest[body_start..].join("\n")
        } else {
            String::new()
        };

        let content_type = headers
            .get("Content-Type")
            .map(|v| v.to_lowercase())
            .unwrap_or_default();

        let body = if content_type.contains("multipart/form-data") {
            extract_multipart_body(blob, &normalized, body_start, &rest)
        } else {
            body_text.into_bytes()
        };

        Ok(Self {
            method,
            target,
            version,
            headers,
            body,
        })
    }

    /// Rebuild the wire-level request text for audit. This is a
    /// reconstruction, not a capture of the literal bytes placed on the
    /// socket.
    #[must_use]
    pub fn build(&self) -> String {
        let mut out = format!("{} {} {}\r\n", self.method, self.target, self.version);
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        out.push_str("\r\n");
        match std::str::from_utf8(&self.body) {
            Ok(text) => out.push_str(text),
            Err(_) => out.push_str(&format!("[Binary data: {} bytes]", self.body.len())),
        }
        out
    }
}

fn malformed(detail: &'static str) -> Error {
    Error::invalid_input(format!("malformed request: {detail}"))
}

/// multipart/form-data bodies must preserve their exact byte sequence; LF
/// separators get their internal line endings normalized to CRLF, CRLF
/// separators are used verbatim.
fn extract_multipart_body(
    original: &str,
    normalized: &str,
    body_start: usize,
    lf_lines: &[&str],
) -> Vec<u8> {
    if let Some(idx) = original.find("\r\n\r\n") {
        return original.as_bytes()[idx + 4..].to_vec();
    }
    if let Some(idx) = normalized.find("\n\n") {
        let body = &normalized[idx + 2..];
        return body.replace('\n', "\r\n").into_bytes();
    }
    if body_start < lf_lines.len() {
        lf_lines[body_start..].join("\r\n").into_bytes()
    } else {
        Vec::new()
    }
}

/// Rewrite a multipart body's trailing boundary to the closing
/// `--boundary--` form if it is merely `--boundary`.
#[must_use]
pub fn ensure_closing_boundary(body: &[u8], boundary: &str) -> Vec<u8> {
    let marker = format!("--{boundary}");
    let closing = format!("--{boundary}--");
    let text = match std::str::from_utf8(body) {
        Ok(t) => t,
        Err(_) => return body.to_vec(),
    };
    let trimmed = text.trim_end();
    if trimmed.ends_with(&closing) {
        body.to_vec()
    } else if trimmed.ends_with(&marker) {
        let trailing_ws = &text[trimmed.len()..];
        format!("{trimmed}--{trailing_ws}").into_bytes()
    } else {
        body.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_method_target_and_version() {
        let req = ParsedRequest::parse("GET /foo?x=1 HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.target, "/foo?x=1");
        assert_eq!(req.version, "HTTP/1.1");
        assert_eq!(req.headers.get("Host"), Some(&"example.com".to_string()));
    }

    #[test]
    fn defaults_version_when_absent() {
        let req = ParsedRequest::parse("GET /foo\r\n\r\n").unwrap();
        assert_eq!(req.version, "HTTP/1.1");
    }

    #[test]
    fn lowercases_are_preserved_method_uppercased() {
        let req = ParsedRequest::parse("post /x HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, "POST");
    }

    #[test]
    fn continuation_lines_fold_into_previous_header() {
        let blob = "GET / HTTP/1.1\r\nX-Foo: bar\r\n baz\r\n\r\n";
        let req = ParsedRequest::parse(blob).unwrap();
        assert_eq!(req.headers.get("X-Foo"), Some(&"bar baz".to_string()));
    }

    #[test]
    fn empty_blob_is_malformed() {
        assert!(ParsedRequest::parse("").is_err());
        assert!(ParsedRequest::parse("   \n  \n").is_err());
    }

    #[test]
    fn missing_target_is_malformed() {
        assert!(ParsedRequest::parse("GET\r\n\r\n").is_err());
    }

    #[test]
    fn body_is_everything_after_blank_line() {
        let req = ParsedRequest::parse("POST / HTTP/1.1\r\nContent-Length: 3\r\n\r\nabc").unwrap();
        assert_eq!(req.body, b"abc");
    }

    #[test]
    fn lf_only_body_is_preserved_verbatim_for_non_multipart() {
        let req = ParsedRequest::parse("POST / HTTP/1.1\nContent-Type: application/json\n\n{\"a\":1}").unwrap();
        assert_eq!(req.body, b"{\"a\":1}");
    }

    #[test]
    fn build_reconstructs_wire_text() {
        let req = ParsedRequest::parse("GET /x HTTP/1.1\r\nHost: a.com\r\n\r\n").unwrap();
        let rebuilt = req.build();
        assert!(rebuilt.starts_with("GET /x HTTP/1.1\r\n"));
        assert!(rebuilt.contains("Host: a.com\r\n"));
    }

    #[test]
    fn build_marks_binary_body() {
        let mut req = ParsedRequest::parse("GET / HTTP/1.1\r\n\r\n").unwrap();
        req.body = vec![0xff, 0xfe, 0x00];
        let rebuilt = req.build();
        assert!(rebuilt.ends_with("[Binary data: 3 bytes]"));
    }

    #[test]
    fn ensure_closing_boundary_rewrites_open_marker() {
        let body = b"--B\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--B";
        let fixed = ensure_closing_boundary(body, "B");
        assert!(std::str::from_utf8(&fixed).unwrap().ends_with("--B--"));
    }

    #[test]
    fn ensure_closing_boundary_leaves_already_closed_body() {
        let body = b"--B\r\n\r\n1\r\n--B--";
        let fixed = ensure_closing_boundary(body, "B");
        assert_eq!(fixed, body);
    }
}
