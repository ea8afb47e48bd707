//! Mutation actions and route handlers through `Engine::handle`.

use edge_core::EngineConfig;
use edge_engine::{
    forbidden, ActionRegistry, ActionResult, Engine, HandlerRequest, Node, Row, ViewError, ViewRegistry,
    ACTION_HEADER, ACTION_REDIRECT_HEADER, PAYLOAD_CONTENT_TYPE,
};
use edge_router::{RouteDescriptor, RouteTable};
use edge_streaming::{Body, BodyError};
use http::header::{CONTENT_TYPE, HOST, ORIGIN};
use http::{Method, Request, Response, StatusCode};
use serde_json::{json, Value};

fn engine(config: EngineConfig) -> Engine {
    let table = RouteTable::new()
        .with_route(RouteDescriptor::page("/counter", "counter").unwrap())
        .with_route(RouteDescriptor::handler("/api/items/:id", "items").unwrap());
    let views = ViewRegistry::new().with_static("counter", Node::text("count"));
    let actions = ActionRegistry::new()
        .with_fn("increment", |args: Value| async move { Ok(json!(args.as_i64().unwrap_or(0) + 1)) })
        .with_fn("checkout", |_| async { Err(edge_engine::redirect("/thanks")) })
        .with_fn("explode", |_| async { Err(ViewError::failure("card number 4111 rejected")) });

    Engine::builder(config, table)
        .with_views(views)
        .with_actions(actions)
        .with_handler("items", edge_engine::FnHandler(|req: HandlerRequest| async move {
            match req.params.get("id").map(|id| id.joined()) {
                Some(id) if id == "secret" => Err(forbidden()),
                Some(id) => Ok(Response::new(Body::from(format!("item {}", id)))),
                None => Err(ViewError::failure("no id")),
            }
        }))
        .build()
        .unwrap()
}

fn action(id: &str, body: &str, origin: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/counter")
        .header(HOST, "shop.example.com")
        .header(ACTION_HEADER, id);
    if let Some(origin) = origin {
        builder = builder.header(ORIGIN, origin);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn rows(response: Response<Body>) -> Vec<Row> {
    let payload = response.into_body().collect_string().await.unwrap();
    payload.lines().map(|line| Row::parse(line).unwrap()).collect()
}

// === CSRF Tests ===

#[tokio::test]
async fn test_cross_origin_action_is_rejected() {
    let engine = engine(EngineConfig::default());
    let response = engine.handle(action("increment", "1", Some("https://evil.example.net"))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_same_origin_and_allowlisted_actions_proceed() {
    let engine = engine(EngineConfig::default().with_allowed_origin("*.example.org"));

    let same = engine.handle(action("increment", "1", Some("https://shop.example.com"))).await;
    assert_eq!(same.status(), StatusCode::OK);

    let allowed = engine.handle(action("increment", "1", Some("https://checkout.example.org"))).await;
    assert_eq!(allowed.status(), StatusCode::OK);

    let no_origin = engine.handle(action("increment", "1", None)).await;
    assert_eq!(no_origin.status(), StatusCode::OK);
}

// === Invocation Tests ===

#[tokio::test]
async fn test_action_result_rides_in_root_row() {
    let engine = engine(EngineConfig::default());
    let response = engine.handle(action("increment", "41", None)).await;
    assert_eq!(response.headers()[CONTENT_TYPE], PAYLOAD_CONTENT_TYPE);

    let rows = rows(response).await;
    match &rows[0] {
        Row::Root { tree, action } => {
            assert!(tree.is_some());
            assert_eq!(action, &Some(ActionResult::Ok { value: json!(42) }));
        }
        other => panic!("expected root row, got {:?}", other),
    }
}

#[tokio::test]
async fn test_streamed_action_body_stops_reading_at_limit() {
    let engine = engine(EngineConfig::default().with_body_size_limit(64));
    // Never ends, so the limit must end the read.
    let endless = futures::stream::repeat_with(|| Ok::<_, BodyError>(bytes::Bytes::from_static(b"0000000000")));
    let request = Request::builder()
        .method(Method::POST)
        .uri("/counter")
        .header(HOST, "shop.example.com")
        .header(ACTION_HEADER, "increment")
        .body(Body::from_stream(endless))
        .unwrap();

    let response = engine.handle(request).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_action_body_limit_and_unknown_action() {
    let engine = engine(EngineConfig::default().with_body_size_limit(8));
    let response = engine.handle(action("increment", "123456789012", None)).await;
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let response = engine.handle(action("missing", "1", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = engine.handle(action("increment", "{not json", None)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_action_redirect_is_a_200_directive() {
    let engine = engine(EngineConfig::default());
    let response = engine.handle(action("checkout", "", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[ACTION_REDIRECT_HEADER], "/thanks");
}

#[tokio::test]
async fn test_action_failure_is_sanitized() {
    let engine = engine(EngineConfig::default());
    let response = engine.handle(action("explode", "", None)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let rows = rows(response).await;
    let Row::Root { tree: None, action: Some(ActionResult::Error { error }) } = &rows[0] else {
        panic!("expected failed action row, got {:?}", rows);
    };
    assert!(!error.message.contains("4111"));
    assert!(!error.digest.is_empty());
}

// === Route Handler Tests ===

#[tokio::test]
async fn test_route_handler_responses() {
    let engine = engine(EngineConfig::default());

    let response = engine
        .handle(Request::builder().uri("/api/items/7").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.into_body().collect_string().await.unwrap(), "item 7");

    let response = engine
        .handle(Request::builder().uri("/api/items/secret").body(Body::empty()).unwrap())
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
