// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! 从原始报文出发，经过门面完成解析与认证的端到端场景。

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;

use api_request::{
    clone_request, default_parsers, Authenticator, Data, Exception, FormParser, HttpRequest,
    HttpRequestMethod, InMemoryUserStore, JsonParser, Parser, Request, Settings, Token,
    TokenAuthentication, User,
};
use serde_json::json;

fn raw(method: &str, content_type: &str, body: &str, extra_headers: &str) -> RefCell<HttpRequest> {
    let message = format!(
        "{} /api/items?page=1 HTTP/1.1\r\nHost: localhost:7878\r\nContent-Type: {}\r\nContent-Length: {}\r\n{}\r\n{}",
        method,
        content_type,
        body.len(),
        extra_headers,
        body
    );
    RefCell::new(HttpRequest::try_from(message.as_bytes(), 42).unwrap())
}

fn token_authenticators() -> Vec<Rc<dyn Authenticator>> {
    let mut store = InMemoryUserStore::default();
    store.insert("secret", User::new("alice"));
    vec![Rc::new(TokenAuthentication::new(store))]
}

#[test]
fn test_zero_length_body_gives_empty_mapping() {
    let request = raw("POST", "application/json", "", "");
    let mut facade = Request::new(&request, default_parsers(), vec![], &Settings::default());

    assert!(facade.stream().unwrap().is_none());
    assert_eq!(facade.data().unwrap().to_json(), json!({}));
    assert!(facade.files().unwrap().is_empty());
}

#[test]
fn test_urlencoded_body_is_mirrored_on_host_request() {
    let request = raw("POST", "application/x-www-form-urlencoded", "a=1&b=2", "");
    let parsers: Vec<Rc<dyn Parser>> = vec![Rc::new(FormParser)];
    let mut facade = Request::new(&request, parsers, vec![], &Settings::default());

    assert_eq!(facade.data().unwrap().to_json(), json!({"a": "1", "b": "2"}));
    assert_eq!(facade.post().unwrap().get("b"), Some("2"));

    let mut host = request.borrow_mut();
    assert_eq!(host.post().unwrap().to_json(), json!({"a": "1", "b": "2"}));
}

#[test]
fn test_drained_json_body_propagates_read_error() {
    let request = raw("POST", "application/json", r#"{"a": 1}"#, "");
    let mut drained = String::new();
    request.borrow_mut().read_to_string(&mut drained).unwrap();

    let parsers: Vec<Rc<dyn Parser>> = vec![Rc::new(JsonParser)];
    let mut facade = Request::new(&request, parsers, vec![], &Settings::default());
    assert_eq!(facade.data().unwrap_err(), Exception::RawPostData);
}

#[test]
fn test_json_body_with_token_authentication() {
    let request = raw(
        "PATCH",
        "application/json; charset=utf-8",
        r#"{"name": "widget", "tags": ["a", "b"]}"#,
        "Authorization: Token secret\r\n",
    );
    let mut facade = Request::new(
        &request,
        default_parsers(),
        token_authenticators(),
        &Settings::default(),
    );

    assert_eq!(facade.method(), HttpRequestMethod::Patch);
    assert_eq!(facade.path(), "/api/items");
    assert_eq!(facade.query_params().get("page"), Some("1"));
    assert_eq!(
        facade.data().unwrap().as_json(),
        Some(&json!({"name": "widget", "tags": ["a", "b"]}))
    );
    assert_eq!(facade.user().unwrap().unwrap().username(), "alice");
    assert_eq!(facade.auth().unwrap(), Some(&Token::new("secret")));
    assert_eq!(
        facade.successful_authenticator().unwrap().unwrap().name(),
        "TokenAuthentication"
    );
    assert_eq!(request.borrow().user().unwrap().username(), "alice");
}

#[test]
fn test_invalid_token_then_anonymous() {
    let request = raw("GET", "application/json", "", "Authorization: Token nope\r\n");
    let mut facade = Request::new(
        &request,
        default_parsers(),
        token_authenticators(),
        &Settings::default(),
    );

    assert_eq!(
        facade.user().unwrap_err(),
        Exception::AuthenticationFailed("Invalid token.".to_string())
    );
    assert!(facade.user().unwrap().unwrap().is_anonymous());
    assert_eq!(facade.authenticate_header().as_deref(), Some("Token"));
}

#[test]
fn test_clone_for_method_override_keeps_identity_and_data() {
    let request = raw(
        "POST",
        "application/x-www-form-urlencoded",
        "_method=DELETE&id=7",
        "Authorization: Token secret\r\n",
    );
    let mut facade = Request::new(
        &request,
        default_parsers(),
        token_authenticators(),
        &Settings::default(),
    );
    facade.user().unwrap();
    let override_method: HttpRequestMethod = facade
        .post()
        .unwrap()
        .get("_method")
        .unwrap()
        .parse()
        .unwrap();

    let mut cloned = clone_request(&facade, override_method);
    assert_eq!(cloned.method(), HttpRequestMethod::Delete);
    assert_eq!(cloned.user().unwrap().unwrap().username(), "alice");
    assert_eq!(cloned.data().unwrap().to_json()["id"], json!("7"));
    assert_eq!(facade.method(), HttpRequestMethod::Post);
}

#[test]
fn test_multipart_upload_end_to_end() {
    let body = [
        "--XyZ\r\n",
        "Content-Disposition: form-data; name=\"description\"\r\n\r\n",
        "quarterly numbers\r\n",
        "--XyZ\r\n",
        "Content-Disposition: form-data; name=\"report\"; filename=\"q3.txt\"\r\n",
        "Content-Type: text/plain\r\n\r\n",
        "revenue: 10\r\n",
        "--XyZ--\r\n",
    ]
    .concat();
    let request = raw("POST", "multipart/form-data; boundary=XyZ", &body, "");
    let mut facade = Request::new(&request, default_parsers(), vec![], &Settings::default());

    let data = facade.data().unwrap();
    assert!(matches!(data, Data::Merged(_)));
    assert_eq!(data.to_json()["description"], json!("quarterly numbers"));
    let report = data.file("report").unwrap();
    assert_eq!(report.file_name(), "q3.txt");
    assert_eq!(report.content().as_ref(), b"revenue: 10");

    assert_eq!(facade.files().unwrap().len(), 1);
    assert_eq!(request.borrow_mut().files().unwrap().len(), 1);
}

#[test]
fn test_forced_authentication_from_test_client() {
    let request = raw("GET", "application/json", "", "Authorization: Token secret\r\n");
    request
        .borrow_mut()
        .force_authenticate(Some(User::new("tester")), None);
    let mut facade = Request::new(
        &request,
        default_parsers(),
        token_authenticators(),
        &Settings::default(),
    );

    assert_eq!(facade.user().unwrap().unwrap().username(), "tester");
    assert_eq!(facade.auth().unwrap(), None);
    assert_eq!(facade.authenticators().len(), 1);
}

#[test]
fn test_without_anonymous_user_factory() {
    let request = raw("GET", "application/json", "", "");
    let settings = Settings::default().with_unauthenticated_user(None);
    let mut facade = Request::new(&request, default_parsers(), vec![], &settings);

    assert_eq!(facade.user().unwrap(), None);
    assert!(facade.successful_authenticator().unwrap().is_none());
}

#[test]
fn test_unknown_attribute() {
    let request = raw("GET", "application/json", "", "X-Trace-Id: t-1\r\n");
    let facade = Request::new(&request, default_parsers(), vec![], &Settings::default());

    assert_eq!(facade.attr("HTTP_X_TRACE_ID").unwrap(), "t-1");
    assert_eq!(
        facade.attr("nope").unwrap_err().to_string(),
        "'Request' object has no attribute 'nope'"
    );
}
