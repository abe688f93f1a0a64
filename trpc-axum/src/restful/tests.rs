//! End-to-end router scenarios.

use std::time::Duration;

use axum::body::Body as HttpBody;
use bytes::Bytes;
use http::{HeaderMap, Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use prost::Message as _;
use prost_reflect::{DescriptorPool, DynamicMessage, MessageDescriptor, Value};
use serde_json::json;
use tower::ServiceExt;
use trpc_axum_core::{CompressorRegistry, Error, RetCode, compress_type};

use super::*;
use crate::filter::{filter_fn, handler_fn};
use crate::limits::MessageLimits;
use crate::test_util;

struct Library {
    pool: DescriptorPool,
}

impl Library {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
        Self {
            pool: test_util::pool(),
        }
    }

    fn desc(&self, name: &str) -> MessageDescriptor {
        self.pool
            .get_message_by_name(&format!("library.{name}"))
            .unwrap()
    }

    /// GET /v1/{name=shelves/*/books/*}: echoes name, view, version and caller.
    fn get_book(&self) -> Binding {
        let reply = self.desc("BookReply");
        let book = self.desc("Book");
        Binding::new(
            "/library.Library/GetBook",
            Method::GET,
            "/v1/{name=shelves/*/books/*}",
            self.desc("GetBookRequest"),
            reply.clone(),
            handler_fn(move |ctx, req| {
                let reply = reply.clone();
                let book = book.clone();
                Box::pin(async move {
                    let caller = ctx.msg().caller_service_name().to_owned();
                    let mut b = DynamicMessage::new(book);
                    b.set_field_by_name("name", Value::String(text(&req, "name")));
                    let mut rsp = DynamicMessage::new(reply);
                    rsp.set_field_by_name("book", Value::Message(b));
                    rsp.set_field_by_name(
                        "etag",
                        Value::String(format!(
                            "{}-{}-{caller}",
                            text(&req, "view"),
                            req.get_field_by_name("version").unwrap().as_i32().unwrap()
                        )),
                    );
                    Ok(rsp)
                })
            }),
        )
        .unwrap()
    }

    /// POST /v1/{parent=shelves/*}/books with `body: "book"`, `response_body: "book"`.
    fn create_book(&self) -> Binding {
        let reply = self.desc("BookReply");
        Binding::new(
            "/library.Library/CreateBook",
            Method::POST,
            "/v1/{parent=shelves/*}/books",
            self.desc("CreateBookRequest"),
            reply.clone(),
            handler_fn(move |ctx, req| {
                let reply = reply.clone();
                Box::pin(async move {
                    set_status_code(ctx, StatusCode::CREATED);
                    let mut book = req
                        .get_field_by_name("book")
                        .unwrap()
                        .as_message()
                        .unwrap()
                        .clone();
                    let name = format!("{}/books/{}", text(&req, "parent"), text(&book, "name"));
                    book.set_field_by_name("name", Value::String(name));
                    let request_id = text(&req, "request_id");
                    if !request_id.is_empty() {
                        book.get_field_by_name_mut("tags")
                            .unwrap()
                            .as_list_mut()
                            .unwrap()
                            .push(Value::String(request_id));
                    }
                    let mut rsp = DynamicMessage::new(reply);
                    rsp.set_field_by_name("book", Value::Message(book));
                    rsp.set_field_by_name("etag", Value::String("created".into()));
                    Ok(rsp)
                })
            }),
        )
        .unwrap()
        .with_body("book")
        .unwrap()
        .with_response_body("book")
        .unwrap()
    }

    /// POST /v1/books:import with `body: "*"`: echoes the parent.
    fn import_book(&self) -> Binding {
        let reply = self.desc("BookReply");
        Binding::new(
            "/library.Library/ImportBook",
            Method::POST,
            "/v1/books:import",
            self.desc("CreateBookRequest"),
            reply.clone(),
            handler_fn(move |_ctx, req| {
                let reply = reply.clone();
                Box::pin(async move {
                    let mut rsp = DynamicMessage::new(reply);
                    rsp.set_field_by_name("etag", Value::String(text(&req, "parent")));
                    Ok(rsp)
                })
            }),
        )
        .unwrap()
        .with_body("*")
        .unwrap()
    }

    /// DELETE /v1/{name=shelves/*/books/*}: fails according to the name.
    fn delete_book(&self) -> Binding {
        Binding::new(
            "/library.Library/DeleteBook",
            Method::DELETE,
            "/v1/{name=shelves/*/books/*}",
            self.desc("GetBookRequest"),
            self.desc("BookReply"),
            handler_fn(|_ctx, req| {
                Box::pin(async move {
                    match text(&req, "name").as_str() {
                        "shelves/1/books/locked" => {
                            Err(Error::business(10001, "book is locked").with_http_status(StatusCode::CONFLICT))
                        }
                        "shelves/1/books/slow" => {
                            tokio::time::sleep(Duration::from_secs(5)).await;
                            Ok(req)
                        }
                        _ => Err(Error::business(10002, "cannot delete")),
                    }
                })
            }),
        )
        .unwrap()
    }

    fn builder(&self) -> RouterBuilder {
        RouterBuilder::new("trpc.library.server.Library")
            .binding(self.get_book())
            .binding(self.create_book())
            .binding(self.import_book())
            .binding(self.delete_book())
    }

    fn router(&self) -> Router {
        self.builder().build()
    }
}

fn text(msg: &DynamicMessage, name: &str) -> String {
    msg.get_field_by_name(name)
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

async fn send(router: &Router, req: Request<HttpBody>) -> (StatusCode, HeaderMap, Bytes) {
    let rsp = router.clone().oneshot(req).await.unwrap();
    let status = rsp.status();
    let headers = rsp.headers().clone();
    let body = rsp.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

fn get(uri: &str) -> Request<HttpBody> {
    Request::get(uri).body(HttpBody::empty()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<HttpBody> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(HttpBody::from(body.to_string()))
        .unwrap()
}

fn json_body(body: &[u8]) -> serde_json::Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_get_populates_path_and_query() {
    let lib = Library::new();
    let req = Request::get("/v1/shelves/1/books/2?view=full&version=3")
        .header(TRPC_CALLER_HEADER, "trpc.app.client.Caller")
        .body(HttpBody::empty())
        .unwrap();
    let (status, headers, body) = send(&lib.router(), req).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(
        json_body(&body),
        json!({
            "book": {"name": "shelves/1/books/2"},
            "etag": "full-3-trpc.app.client.Caller"
        })
    );
}

#[tokio::test]
async fn test_query_cannot_override_path_capture() {
    let lib = Library::new();
    let (status, _, body) = send(&lib.router(), get("/v1/shelves/1/books/2?name=evil&version=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["book"]["name"], "shelves/1/books/2");
}

#[tokio::test]
async fn test_percent_encoded_path_is_decoded() {
    let lib = Library::new();
    let (status, _, body) = send(&lib.router(), get("/v1/shelves/a%20b/books/2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["book"]["name"], "shelves/a b/books/2");
}

#[tokio::test]
async fn test_unknown_query_parameter() {
    let lib = Library::new();
    let (status, _, body) = send(&lib.router(), get("/v1/shelves/1/books/2?bogus=1")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], 1);

    let router = lib.builder().discard_unknown_params(true).build();
    let (status, _, _) = send(&router, get("/v1/shelves/1/books/2?bogus=1")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_query_value_is_decode_failure() {
    let lib = Library::new();
    let (status, _, body) = send(&lib.router(), get("/v1/shelves/1/books/2?version=many")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], 1);
}

#[tokio::test]
async fn test_no_matching_binding() {
    let lib = Library::new();
    let router = lib.router();

    let (status, headers, body) = send(&router, get("/v2/shelves")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(json_body(&body)["code"], 12);

    let req = Request::put("/v1/shelves/1/books/2").body(HttpBody::empty()).unwrap();
    let (status, _, _) = send(&router, req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&router, get("/v1/shelves/1/books")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_body_field_and_response_body() {
    let lib = Library::new();
    let req = post_json(
        "/v1/shelves/7/books?book.name=evil&requestId=r1",
        json!({"name": "dune", "pageCount": "412"}),
    );
    let (status, _, body) = send(&lib.router(), req).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        json_body(&body),
        json!({"name": "shelves/7/books/dune", "pageCount": "412", "tags": ["r1"]})
    );
}

#[tokio::test]
async fn test_whole_body_ignores_query() {
    let lib = Library::new();
    let req = post_json(
        "/v1/books:import?parent=evil",
        json!({"parent": "shelves/9", "book": {"name": "x"}}),
    );
    let (status, _, body) = send(&lib.router(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body), json!({"etag": "shelves/9"}));
}

#[tokio::test]
async fn test_verb_must_match() {
    let lib = Library::new();
    let req = post_json("/v1/books:export", json!({}));
    let (status, _, _) = send(&lib.router(), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_body_is_decode_failure() {
    let lib = Library::new();
    let req = Request::post("/v1/books:import")
        .header(header::CONTENT_TYPE, "application/json")
        .body(HttpBody::from("{not json"))
        .unwrap();
    let (status, _, body) = send(&lib.router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], 1);
}

#[tokio::test]
async fn test_form_body() {
    let lib = Library::new();
    let req = Request::post("/v1/shelves/3/books")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(header::ACCEPT, "application/json")
        .body(HttpBody::from("name=dune&tags=a&tags=b"))
        .unwrap();
    let (status, headers, body) = send(&lib.router(), req).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers[header::CONTENT_TYPE], "application/json");
    assert_eq!(
        json_body(&body),
        json!({"name": "shelves/3/books/dune", "tags": ["a", "b"]})
    );
}

#[tokio::test]
async fn test_protobuf_with_gzip() {
    let lib = Library::new();
    let compressors = CompressorRegistry::with_builtins();

    let mut book = DynamicMessage::new(lib.desc("Book"));
    book.set_field_by_name("name", Value::String("dune".into()));
    let payload = compressors
        .compress(compress_type::GZIP, Bytes::from(book.encode_to_vec()))
        .unwrap();

    let req = Request::post("/v1/shelves/1/books")
        .header(header::CONTENT_TYPE, "application/x-protobuf")
        .header(header::CONTENT_ENCODING, "gzip")
        .header(header::ACCEPT_ENCODING, "br;q=1, gzip;q=0.8")
        .body(HttpBody::from(payload))
        .unwrap();
    let (status, headers, body) = send(&lib.router(), req).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers[header::CONTENT_TYPE], "application/protobuf");
    assert_eq!(headers[header::CONTENT_ENCODING], "gzip");
    let raw = compressors.decompress(compress_type::GZIP, body).unwrap();
    let decoded = DynamicMessage::decode(lib.desc("Book"), raw).unwrap();
    assert_eq!(text(&decoded, "name"), "shelves/1/books/dune");
}

#[tokio::test]
async fn test_accept_selects_response_serializer() {
    let lib = Library::new();
    let req = Request::get("/v1/shelves/1/books/2")
        .header(header::ACCEPT, "text/html, application/protobuf;q=0.9")
        .body(HttpBody::empty())
        .unwrap();
    let (status, headers, body) = send(&lib.router(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], "application/protobuf");
    assert!(headers.get(header::CONTENT_ENCODING).is_none());
    let reply = DynamicMessage::decode(lib.desc("BookReply"), body).unwrap();
    assert_eq!(text(&reply, "etag"), "-0-");
}

#[tokio::test]
async fn test_unsupported_content_encoding() {
    let lib = Library::new();
    let req = Request::post("/v1/books:import")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::CONTENT_ENCODING, "br")
        .body(HttpBody::from("{}"))
        .unwrap();
    let (status, _, body) = send(&lib.router(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], 1);
}

#[tokio::test]
async fn test_receive_limit() {
    let lib = Library::new();
    let router = lib
        .builder()
        .message_limits(MessageLimits::default().receive_max_bytes(8))
        .build();
    let req = post_json("/v1/books:import", json!({"parent": "a very long parent name"}));
    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], RetCode::ServerDecodeFail.as_i32());
}

#[tokio::test]
async fn test_send_limit() {
    let lib = Library::new();
    let router = lib
        .builder()
        .message_limits(MessageLimits::default().send_max_bytes(4))
        .build();
    let (status, _, body) = send(&router, get("/v1/shelves/1/books/2")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(&body)["code"], RetCode::ServerEncodeFail.as_i32());
}

#[tokio::test]
async fn test_business_errors() {
    let lib = Library::new();
    let router = lib.router();

    let req = Request::delete("/v1/shelves/1/books/locked").body(HttpBody::empty()).unwrap();
    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(
        json_body(&body),
        json!({"code": 10001, "message": "book is locked"})
    );

    let req = Request::delete("/v1/shelves/1/books/2").body(HttpBody::empty()).unwrap();
    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json_body(&body)["code"], 10002);
}

#[tokio::test]
async fn test_router_timeout() {
    let lib = Library::new();
    let router = lib.builder().timeout(Duration::from_millis(20)).build();
    let req = Request::delete("/v1/shelves/1/books/slow").body(HttpBody::empty()).unwrap();
    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(json_body(&body)["code"], RetCode::ServerTimeout.as_i32());
}

#[tokio::test]
async fn test_client_timeout_header() {
    let lib = Library::new();
    let router = lib.builder().timeout(Duration::from_secs(30)).build();
    let req = Request::delete("/v1/shelves/1/books/slow")
        .header("trpc-timeout", "20")
        .body(HttpBody::empty())
        .unwrap();
    let (status, _, _) = send(&router, req).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test]
async fn test_filters_wrap_handler() {
    let lib = Library::new();
    let router = lib
        .builder()
        .filter(filter_fn(|ctx, req, next| {
            Box::pin(async move {
                let mut rsp = next.run(ctx, req).await?;
                rsp.set_field_by_name("etag", Value::String("filtered".into()));
                Ok(rsp)
            })
        }))
        .build();
    let (status, _, body) = send(&router, get("/v1/shelves/1/books/2")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_body(&body)["etag"], "filtered");
}

#[tokio::test]
async fn test_header_matcher_rejects() {
    let lib = Library::new();
    let router = lib
        .builder()
        .header_matcher(|parts, msg, service, rpc| {
            if parts.headers.contains_key("x-deny") {
                return Err(Error::framework(RetCode::ServerAuthFail, "denied"));
            }
            default_header_matcher(parts, msg, service, rpc)
        })
        .build();

    let req = Request::get("/v1/shelves/1/books/2")
        .header("x-deny", "1")
        .body(HttpBody::empty())
        .unwrap();
    let (status, _, body) = send(&router, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json_body(&body)["code"], RetCode::ServerDecodeFail.as_i32());

    let (status, _, _) = send(&router, get("/v1/shelves/1/books/2")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_custom_error_handler() {
    let lib = Library::new();
    let router = lib
        .builder()
        .error_handler(|_parts, err| {
            let mut rsp = http::Response::new(HttpBody::from(format!("E{}", err.code())));
            *rsp.status_mut() = http_status(err);
            rsp
        })
        .build();
    let (status, _, body) = send(&router, get("/nowhere")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(&body[..], b"E12");
}

#[tokio::test]
async fn test_default_header_matcher_fills_msg() {
    let parts = Request::get("/")
        .header(TRPC_CALLER_HEADER, "trpc.app.client.Caller")
        .header("trpc-timeout", "1500")
        .body(())
        .unwrap()
        .into_parts()
        .0;
    let mut ctx = trpc_axum_core::Context::with_new_message();
    default_header_matcher(
        &parts,
        ctx.msg_mut(),
        "trpc.library.server.Library",
        "/library.Library/GetBook",
    )
    .unwrap();

    let msg = ctx.msg();
    assert_eq!(msg.caller_service_name(), "trpc.app.client.Caller");
    assert_eq!(msg.caller_app(), "app");
    assert_eq!(msg.callee_server(), "server");
    assert_eq!(msg.callee_service(), "Library");
    assert_eq!(msg.callee_method(), "GetBook");
    assert_eq!(msg.server_rpc_name(), "/library.Library/GetBook");
    assert_eq!(msg.request_timeout(), Some(Duration::from_millis(1500)));
}

#[tokio::test]
async fn test_mounted_in_axum() {
    let lib = Library::new();
    let app = axum::Router::new()
        .route("/healthz", axum::routing::get(|| async { "ok" }))
        .fallback_service(lib.router());

    let rsp = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);

    let rsp = app.oneshot(get("/v1/shelves/1/books/2")).await.unwrap();
    assert_eq!(rsp.status(), StatusCode::OK);
    let body = rsp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(json_body(&body)["book"]["name"], "shelves/1/books/2");

    let rsp = lib.router().into_axum().oneshot(get("/missing")).await.unwrap();
    assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
}
