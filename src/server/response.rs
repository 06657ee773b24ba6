use crate::http::HttpResponse;
use may_minihttp::Response;

fn status_reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "OK",
    }
}

/// Copy an engine-level response onto the wire.
pub(crate) fn write_response(res: &mut Response, mut out: HttpResponse) {
    let status = out.status();
    res.status_code(status as usize, status_reason(status));
    for (name, value) in out.headers() {
        let header = format!("{name}: {value}").into_boxed_str();
        // may_minihttp wants 'static header strings.
        res.header(Box::leak(header));
    }
    res.body_vec(out.take_body());
}

/// Minimal plain-text reply for transport-level failures (no application
/// matched, unparsable method).
pub(crate) fn write_plain(res: &mut Response, status: u16, body: &str) {
    res.status_code(status as usize, status_reason(status));
    res.header("Content-Type: text/plain");
    res.body_vec(body.as_bytes().to_vec());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_cover_dispatch_statuses() {
        assert_eq!(status_reason(404), "Not Found");
        assert_eq!(status_reason(503), "Service Unavailable");
        assert_eq!(status_reason(299), "OK");
    }
}
