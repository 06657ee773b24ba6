use super::MultipartManager;
use crate::app::ServletError;
use crate::http::HttpRequest;
use serde::Deserialize;
use tracing::warn;

/// Per-servlet multipart limits, from the descriptor or registration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct MultipartConfig {
    /// Maximum size of any single part, in bytes. Unlimited when absent.
    pub max_file_size: Option<u64>,
    /// Maximum size of the whole request body, in bytes.
    pub max_request_size: Option<u64>,
}

/// One decoded part of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

/// Parses `multipart/form-data` bodies on demand. Nothing is touched until a
/// servlet asks for parts, so non-multipart traffic pays nothing.
#[derive(Debug, Default)]
pub struct FormMultipartManager;

impl FormMultipartManager {
    pub fn new() -> Self {
        Self
    }
}

impl MultipartManager for FormMultipartManager {
    fn parts(
        &self,
        req: &HttpRequest,
        config: Option<&MultipartConfig>,
    ) -> Result<Vec<Part>, ServletError> {
        let content_type = req.header("Content-Type").unwrap_or("");
        let boundary = boundary_of(content_type).ok_or_else(|| {
            ServletError::new(
                "caribe.multipart.NotMultipart",
                format!("content type {content_type:?} is not multipart/form-data"),
            )
            .with_status(400)
        })?;

        if let Some(max) = config.and_then(|c| c.max_request_size) {
            if req.body.len() as u64 > max {
                return Err(ServletError::new(
                    "caribe.multipart.RequestTooLarge",
                    format!("request body {} exceeds limit {max}", req.body.len()),
                )
                .with_status(413));
            }
        }

        let parts = split_parts(&req.body, &boundary)?;
        if let Some(max) = config.and_then(|c| c.max_file_size) {
            for part in &parts {
                if part.data.len() as u64 > max {
                    return Err(ServletError::new(
                        "caribe.multipart.PartTooLarge",
                        format!("part {:?} exceeds limit {max}", part.name),
                    )
                    .with_status(413));
                }
            }
        }
        Ok(parts)
    }
}

fn boundary_of(content_type: &str) -> Option<String> {
    let (media, params) = content_type.split_once(';')?;
    if !media.trim().eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params.split(';').find_map(|p| {
        let (k, v) = p.split_once('=')?;
        if k.trim().eq_ignore_ascii_case("boundary") {
            Some(v.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn split_parts(body: &[u8], boundary: &str) -> Result<Vec<Part>, ServletError> {
    let delim = format!("--{boundary}");
    let text_chunks = split_on(body, delim.as_bytes());
    let mut parts = Vec::new();

    // First chunk is the preamble, the last follows the closing "--" marker.
    for chunk in text_chunks.iter().skip(1) {
        let chunk = strip_crlf(chunk);
        if chunk.starts_with(b"--") || chunk.is_empty() {
            continue;
        }
        match parse_part(chunk) {
            Some(part) => parts.push(part),
            None => {
                warn!(boundary = %boundary, "Skipping malformed multipart part");
            }
        }
    }
    if parts.is_empty() && text_chunks.len() <= 1 {
        return Err(ServletError::new(
            "caribe.multipart.Malformed",
            "boundary never occurs in the request body",
        )
        .with_status(400));
    }
    Ok(parts)
}

fn parse_part(chunk: &[u8]) -> Option<Part> {
    let header_end = find(chunk, b"\r\n\r\n")?;
    let headers = std::str::from_utf8(&chunk[..header_end]).ok()?;
    let data = strip_crlf(&chunk[header_end + 4..]).to_vec();

    let mut name = None;
    let mut file_name = None;
    let mut content_type = None;
    for line in headers.lines() {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("content-disposition") {
            for param in value.split(';') {
                if let Some((k, v)) = param.split_once('=') {
                    let v = v.trim().trim_matches('"').to_string();
                    match k.trim() {
                        "name" => name = Some(v),
                        "filename" => file_name = Some(v),
                        _ => {}
                    }
                }
            }
        } else if key.trim().eq_ignore_ascii_case("content-type") {
            content_type = Some(value.trim().to_string());
        }
    }
    Some(Part {
        name: name?,
        file_name,
        content_type,
        data,
    })
}

fn split_on<'a>(haystack: &'a [u8], needle: &[u8]) -> Vec<&'a [u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(pos) = find(&haystack[start..], needle) {
        out.push(&haystack[start..start + pos]);
        start += pos + needle.len();
    }
    out.push(&haystack[start..]);
    out
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn strip_crlf(bytes: &[u8]) -> &[u8] {
    let bytes = bytes.strip_prefix(b"\r\n").unwrap_or(bytes);
    bytes.strip_suffix(b"\r\n").unwrap_or(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn multipart_request(boundary: &str, body: &str) -> HttpRequest {
        let mut req = HttpRequest::new(Method::POST, "/upload");
        req.add_header(
            "Content-Type",
            &format!("multipart/form-data; boundary={boundary}"),
        );
        req.body = body.as_bytes().to_vec();
        req
    }

    #[test]
    fn decodes_field_and_file_parts() {
        let body = "--XX\r\n\
            Content-Disposition: form-data; name=\"caption\"\r\n\r\n\
            hello\r\n\
            --XX\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            file-bytes\r\n\
            --XX--\r\n";
        let req = multipart_request("XX", body);

        let parts = FormMultipartManager::new().parts(&req, None).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "caption");
        assert_eq!(parts[0].data, b"hello");
        assert_eq!(parts[1].file_name.as_deref(), Some("a.txt"));
        assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(parts[1].data, b"file-bytes");
    }

    #[test]
    fn non_multipart_content_type_is_rejected() {
        let mut req = HttpRequest::new(Method::POST, "/upload");
        req.add_header("Content-Type", "application/json");
        let err = FormMultipartManager::new().parts(&req, None).unwrap_err();
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn part_size_limit_is_enforced() {
        let body = "--XX\r\n\
            Content-Disposition: form-data; name=\"file\"; filename=\"a.bin\"\r\n\r\n\
            0123456789\r\n\
            --XX--\r\n";
        let req = multipart_request("XX", body);
        let config = MultipartConfig {
            max_file_size: Some(4),
            max_request_size: None,
        };

        let err = FormMultipartManager::new()
            .parts(&req, Some(&config))
            .unwrap_err();
        assert_eq!(err.status(), Some(413));
        assert_eq!(err.kind(), "caribe.multipart.PartTooLarge");
    }
}
