use wxbridge::http::response::{Response, ResponseBuilder, StatusCode};
use wxbridge::http::writer::serialize_response;

#[test]
fn test_status_code_from_u16_round_trips() {
    for code in [200, 201, 202, 204, 301, 302, 304, 400, 401, 403, 404, 405, 500, 501, 503] {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(status.as_u16(), code);
    }
    assert_eq!(StatusCode::from_u16(0), None);
    assert_eq!(StatusCode::from_u16(99), None);
    assert_eq!(StatusCode::from_u16(1000), None);
}

#[test]
fn test_unlisted_codes_get_class_reason() {
    let cases = [
        (102, "Informational"),
        (206, "Success"),
        (307, "Redirection"),
        (409, "Client Error"),
        (429, "Client Error"),
        (599, "Server Error"),
        (999, "Unknown"),
    ];
    for (code, reason) in cases {
        let status = StatusCode::from_u16(code).unwrap();
        assert_eq!(status, StatusCode::Other(code));
        assert_eq!(status.as_u16(), code);
        assert_eq!(status.reason_phrase(), reason);
    }
}

#[test]
fn test_unlisted_code_status_line() {
    let response = Response::streamed(StatusCode::Other(409), 0);
    let text = String::from_utf8(serialize_response(&response)).unwrap();
    assert!(text.starts_with("HTTP/1.1 409 Client Error\r\n"));
}

#[test]
fn test_status_code_reason_phrase() {
    assert_eq!(StatusCode::Ok.reason_phrase(), "OK");
    assert_eq!(StatusCode::NotFound.reason_phrase(), "Not Found");
    assert_eq!(StatusCode::MethodNotAllowed.reason_phrase(), "Method Not Allowed");
    assert_eq!(StatusCode::ServiceUnavailable.reason_phrase(), "Service Unavailable");
}

#[test]
fn test_response_builder_auto_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Type", "text/plain")
        .body(b"This is the body".to_vec())
        .build();

    assert_eq!(response.headers.get("Content-Length").unwrap(), "16");
    assert_eq!(response.headers.get("Content-Type").unwrap(), "text/plain");
}

#[test]
fn test_response_builder_preserves_custom_content_length() {
    let response = ResponseBuilder::new(StatusCode::Ok)
        .header("Content-Length", "999")
        .build();

    assert_eq!(response.headers.get("Content-Length").unwrap(), "999");
}

#[test]
fn test_streamed_response_announces_body() {
    let response = Response::streamed(StatusCode::Ok, 5);

    assert!(response.body.is_empty());
    assert_eq!(response.headers.get("Content-Type").unwrap(), "text/html");
    assert_eq!(response.headers.get("Content-Length").unwrap(), "5");
    assert_eq!(response.headers.get("Connection").unwrap(), "close");

    let wire = String::from_utf8(serialize_response(&response)).unwrap();
    assert!(wire.starts_with("HTTP/1.1 200 OK\r\n"));
    assert!(wire.ends_with("\r\n\r\n"));
}

#[test]
fn test_builtin_responses() {
    let cases = [
        (Response::not_found(), StatusCode::NotFound, &b"404 Not Found"[..]),
        (Response::method_not_allowed(), StatusCode::MethodNotAllowed, &b"405 Method Not Allowed"[..]),
        (Response::service_unavailable(), StatusCode::ServiceUnavailable, &b"503 Service Unavailable"[..]),
    ];

    for (response, status, body) in cases {
        assert_eq!(response.status, status);
        assert_eq!(response.body, body);
    }
}
