//! End-to-end routing over the sample declarations in `config/`, backed by the memory store.

use architect_relations::{
    common_routes, entity_routes, load_from_dir, schema_routes, AppState, GrantHooks, MemoryStore,
};
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> Router {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
    let registry = Arc::new(load_from_dir(&dir, GrantHooks::new()).await.unwrap());
    let store = Arc::new(MemoryStore::new(registry.clone()));
    let state = AppState::new(registry, store);
    Router::new()
        .merge(common_routes(state.clone()))
        .nest("/schemas", schema_routes(state.clone()))
        .nest("/api/v1", entity_routes(state))
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(b) => builder
            .header("content-type", "application/json")
            .body(Body::from(b.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// One author, one tag, and an Earthsea book linked to both.
async fn seeded() -> Router {
    let app = app().await;
    let (status, _) = send(&app, Method::POST, "/api/v1/authors", Some(json!({"name": "Le Guin"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(&app, Method::POST, "/api/v1/tags", Some(json!({"label": "classic"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = send(
        &app,
        Method::POST,
        "/api/v1/books",
        Some(json!({"title": "Earthsea", "genre": "fantasy", "author": 1, "tags": [1]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    app
}

#[tokio::test]
async fn health_and_ready() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(&app, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["entities"], 3);
}

#[tokio::test]
async fn create_projects_through_the_read_schema() {
    let app = app().await;
    let (status, body) = send(&app, Method::POST, "/api/v1/authors", Some(json!({"name": "Le Guin"}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"], json!({"id": 1, "name": "Le Guin", "books": []}));

    send(&app, Method::POST, "/api/v1/tags", Some(json!({"label": "classic"}))).await;
    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/books",
        Some(json!({"title": "Earthsea", "genre": "fantasy", "author": 1, "tags": [1]})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        body["data"],
        json!({
            "id": 1,
            "title": "Earthsea",
            "genre": "fantasy",
            "author": {"id": 1, "name": "Le Guin"},
            "tags": [1]
        })
    );
}

#[tokio::test]
async fn read_uses_the_detail_schema() {
    let app = seeded().await;
    let (status, body) = send(&app, Method::GET, "/api/v1/authors/1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({
            "id": 1,
            "name": "Le Guin",
            "created_at": null,
            "books": [{"id": 1, "title": "Earthsea", "tags": [1]}],
            "book_count": 0
        })
    );
}

#[tokio::test]
async fn list_counts_and_filters() {
    let app = seeded().await;
    send(&app, Method::POST, "/api/v1/books", Some(json!({"title": "Dune", "genre": "sf"}))).await;

    let (status, body) = send(&app, Method::GET, "/api/v1/books", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 2);

    let (_, body) = send(&app, Method::GET, "/api/v1/books?genre=sf", None).await;
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["data"][0]["title"], "Dune");
    assert_eq!(body["data"][0]["author"], Value::Null);
}

#[tokio::test]
async fn manage_reports_results_and_errors() {
    let app = seeded().await;
    send(&app, Method::POST, "/api/v1/books", Some(json!({"title": "Dune"}))).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/v1/authors/1/books",
        Some(json!({"add": [2, 99, 1]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "results": {"count": 1, "details": ["Book with key 2 successfully added."]},
            "errors": {"count": 2, "details": [
                "Book with key 99 not found.",
                "Book with key 1 is in Author 1."
            ]}
        })
    );

    let (status, body) = send(&app, Method::GET, "/api/v1/authors/1/books", None).await;
    assert_eq!(status, StatusCode::OK);
    let ids: Vec<i64> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["id"].as_i64().unwrap())
        .collect();
    assert_eq!(ids, vec![1, 2]);

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/v1/authors/1/books",
        Some(json!({"remove": [1]})),
    )
    .await;
    assert_eq!(body["results"]["details"], json!(["Book with key 1 successfully removed."]));
    let (_, body) = send(&app, Method::GET, "/api/v1/books/1", None).await;
    assert_eq!(body["data"]["author"], Value::Null);
}

#[tokio::test]
async fn grant_schema_shapes_listed_members() {
    let app = seeded().await;
    let (status, body) = send(&app, Method::GET, "/api/v1/books/1/tags", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([{"id": 1, "label": "classic"}]));
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let app = seeded().await;

    let (status, body) = send(&app, Method::POST, "/api/v1/authors/1/books", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = send(&app, Method::GET, "/api/v1/authors/abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::GET, "/api/v1/authors/9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/api/v1/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::POST, "/api/v1/authors/9/books", Some(json!({"add": [1]}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, Method::POST, "/api/v1/books", Some(json!({"genre": "poetry"}))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = send(&app, Method::POST, "/api/v1/books", Some(json!({"title": "X", "author": 42}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "relation_not_found");
    assert_eq!(body["error"]["details"], json!({"entity": "Author", "key": "42"}));
}

#[tokio::test]
async fn update_replaces_relation_membership() {
    let app = seeded().await;
    let (status, body) = send(
        &app,
        Method::PATCH,
        "/api/v1/books/1",
        Some(json!({"genre": null, "author": null, "tags": []})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["genre"], Value::Null);
    assert_eq!(body["data"]["author"], Value::Null);
    assert_eq!(body["data"]["tags"], json!([]));
    assert_eq!(body["data"]["title"], "Earthsea");

    let (_, body) = send(&app, Method::GET, "/api/v1/authors/1", None).await;
    assert_eq!(body["data"]["books"], json!([]));
}

#[tokio::test]
async fn delete_then_read_is_not_found() {
    let app = seeded().await;
    let (status, body) = send(&app, Method::DELETE, "/api/v1/tags/1", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&app, Method::GET, "/api/v1/tags/1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn schema_description() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/schemas/books/read", None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["data"]["fields"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["id", "title", "genre", "author", "tags"]);
    assert_eq!(body["data"]["entity"], "library.Book");

    let (status, _) = send(&app, Method::GET, "/schemas/tags/update", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, Method::GET, "/schemas/books/bogus", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
