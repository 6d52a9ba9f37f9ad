use super::*;
use axum::{
    body::{self, Body},
    http::Request,
    response::Response,
};
use serde::de::DeserializeOwned;
use tower::ServiceExt;

async fn test_app() -> (Router, Storage) {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let api = ApiContext {
        storage: storage.clone(),
        limits: PageLimits {
            page_size: 10,
            max_page_size: 50,
        },
    };
    (build_router(Arc::new(AppState { api })), storage)
}

async fn json_body<T: DeserializeOwned>(response: Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn json_request(method: &str, uri: &str, value: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(value.to_string()))
        .expect("request")
}

async fn create(app: &Router, name: &str) -> DynamicAccessKeySummary {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/dynamic-access-keys",
            serde_json::json!({ "name": name }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _storage) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn list_and_count_routes_page_through_filtered_keys() {
    let (app, _storage) = test_app().await;
    for i in 0..25 {
        create(&app, &format!("abc-{i:02}")).await;
    }
    create(&app, "zzz").await;

    let count_response = app
        .clone()
        .oneshot(
            Request::get("/dynamic-access-keys/count?term=ABC")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(count_response.status(), StatusCode::OK);
    let count: CountResponse = json_body(count_response).await;
    assert_eq!(count.count, 25);

    let page_response = app
        .clone()
        .oneshot(
            Request::get("/dynamic-access-keys?term=abc&skip=20")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(page_response.status(), StatusCode::OK);
    let page: Vec<DynamicAccessKeySummary> = json_body(page_response).await;
    assert_eq!(page.len(), 5);
    assert_eq!(page[0].name, "abc-20");

    let default_page: Vec<DynamicAccessKeySummary> = json_body(
        app.oneshot(
            Request::get("/dynamic-access-keys")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response"),
    )
    .await;
    assert_eq!(default_page.len(), 10);
}

#[tokio::test]
async fn update_get_and_remove_round_trip_through_routes() {
    let (app, _storage) = test_app().await;
    let created = create(&app, "office").await;

    let update = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/dynamic-access-keys/{}", created.id),
            serde_json::json!({
                "name": "office renamed",
                "load_balancer_algorithm": "random_key_on_each_connection"
            }),
        ))
        .await
        .expect("response");
    assert_eq!(update.status(), StatusCode::OK);
    let updated: DynamicAccessKeySummary = json_body(update).await;
    assert_eq!(updated.name, "office renamed");
    assert_eq!(updated.path, created.path);

    let get = app
        .clone()
        .oneshot(
            Request::get(format!("/dynamic-access-keys/{}", created.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(get.status(), StatusCode::OK);

    let remove = app
        .clone()
        .oneshot(
            Request::delete(format!("/dynamic-access-keys/{}", created.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(remove.status(), StatusCode::NO_CONTENT);

    let again = app
        .oneshot(
            Request::delete(format!("/dynamic-access-keys/{}", created.id))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(again.status(), StatusCode::NOT_FOUND);
    let err: ApiError = json_body(again).await;
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn validation_and_conflict_map_to_client_errors() {
    let (app, _storage) = test_app().await;

    let blank = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/dynamic-access-keys",
            serde_json::json!({ "name": " " }),
        ))
        .await
        .expect("response");
    assert_eq!(blank.status(), StatusCode::BAD_REQUEST);

    let first = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/dynamic-access-keys",
            serde_json::json!({ "name": "a", "path": "taken" }),
        ))
        .await
        .expect("response");
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app
        .oneshot(json_request(
            "POST",
            "/dynamic-access-keys",
            serde_json::json!({ "name": "b", "path": "taken" }),
        ))
        .await
        .expect("response");
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn count_route_is_not_captured_by_id_route() {
    let (app, storage) = test_app().await;
    storage
        .create_dynamic_access_key(&storage::DynamicAccessKeyFields {
            name: "direct".into(),
            path: "direct".into(),
            prefix: None,
            load_balancer_algorithm: Default::default(),
            expires_at: None,
        })
        .await
        .expect("create");

    let response = app
        .oneshot(
            Request::get("/dynamic-access-keys/count")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let count: CountResponse = json_body(response).await;
    assert_eq!(count.count, 1);
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn access_key_routes_attach_list_and_detach() {
    let (app, _storage) = test_app().await;
    let pool = create(&app, "pool").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/access-keys",
            serde_json::json!({ "name": "laptop" }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    let laptop: AccessKeySummary = json_body(response).await;
    assert_eq!(laptop.dynamic_access_key_id, None);

    let response = app
        .clone()
        .oneshot(empty_request("GET", "/access-keys/unattached"))
        .await
        .expect("response");
    let unattached: Vec<AccessKeySummary> = json_body(response).await;
    assert_eq!(unattached.len(), 1);

    let uri = format!("/dynamic-access-keys/{}/access-keys/{}", pool.id, laptop.id);
    let response = app
        .clone()
        .oneshot(empty_request("PUT", &uri))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let attached: AccessKeySummary = json_body(response).await;
    assert_eq!(attached.dynamic_access_key_id, Some(pool.id));

    let response = app
        .clone()
        .oneshot(empty_request(
            "GET",
            &format!("/dynamic-access-keys/{}/access-keys", pool.id),
        ))
        .await
        .expect("response");
    let listed: Vec<AccessKeySummary> = json_body(response).await;
    assert_eq!(listed, vec![attached]);

    let response = app
        .clone()
        .oneshot(empty_request("GET", &format!("/dynamic-access-keys/{}", pool.id)))
        .await
        .expect("response");
    let summary: DynamicAccessKeySummary = json_body(response).await;
    assert_eq!(summary.access_keys_count, 1);

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &uri))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let response = app
        .oneshot(empty_request("DELETE", &uri))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn access_keys_of_missing_dynamic_key_are_not_found() {
    let (app, _storage) = test_app().await;
    let response = app
        .oneshot(empty_request("GET", "/dynamic-access-keys/77/access-keys"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let error: ApiError = json_body(response).await;
    assert_eq!(error.code, ErrorCode::NotFound);
}
