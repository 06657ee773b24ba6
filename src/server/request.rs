use crate::http::{HeaderVec, HttpRequest};
use crate::ids::{RequestId, REQUEST_ID_HEADER};
use http::Method;
use may_minihttp::Request;
use std::io::Read;
use std::sync::Arc;
use tracing::debug;

/// Turn a raw `may_minihttp` request into an engine-level [`HttpRequest`].
///
/// Returns `Err` with the offending token when the method is not a valid
/// HTTP method; the caller answers 400.
pub fn parse_request(req: Request) -> Result<HttpRequest, String> {
    let method: Method = req
        .method()
        .parse()
        .map_err(|_| req.method().to_string())?;
    let raw_path = req.path().to_string();

    let mut out = HttpRequest::new(method, &raw_path);

    let mut cookie_values: Vec<String> = Vec::new();
    for header in req.headers() {
        let value = String::from_utf8_lossy(header.value).to_string();
        if header.name.eq_ignore_ascii_case("cookie") {
            cookie_values.push(value.clone());
        }
        out.add_header(header.name, &value);
    }
    out.cookies = parse_cookies(&cookie_values);

    // Correlate with the caller's id when it forwarded one.
    out.id = RequestId::from_header_or_new(out.header(REQUEST_ID_HEADER));

    let mut body = Vec::new();
    if req.body().read_to_end(&mut body).is_ok() && !body.is_empty() {
        debug!(
            request_id = %out.id,
            body_size_bytes = body.len(),
            "Request body read"
        );
        out.body = body;
    }

    debug!(
        request_id = %out.id,
        method = %out.method,
        path = %out.path(),
        header_count = out.headers.len(),
        cookie_count = out.cookies.len(),
        "HTTP request parsed"
    );
    Ok(out)
}

/// Split `Cookie` header values into name/value pairs, first occurrence of a
/// name winning on lookup.
fn parse_cookies(values: &[String]) -> HeaderVec {
    let mut cookies = HeaderVec::new();
    for value in values {
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let Some(name) = parts.next().filter(|n| !n.is_empty()) else {
                continue;
            };
            let val = parts.next().unwrap_or("").trim().to_string();
            cookies.push((Arc::from(name.trim()), val));
        }
    }
    cookies
}
