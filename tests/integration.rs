use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use ride_dispatch::api::rest::router;
use ride_dispatch::state::AppState;
use ride_dispatch::store::MemoryStore;
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup() -> axum::Router {
    let state = AppState::new(Arc::new(MemoryStore::new()), 1024);
    router(Arc::new(state))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn driver_payload(name: &str) -> Value {
    json!({
        "name": name,
        "phone": "+2348033333333",
        "email": format!("{name}@example.com"),
        "vehicle": {
            "make": "Toyota",
            "model": "Sienna",
            "color": "Grey",
            "plateNumber": "EKY-404-LG"
        },
        "license": "DL-7788"
    })
}

/// Registers, approves and brings a driver online; returns the driver id.
async fn online_driver(app: &axum::Router, name: &str) -> String {
    let res = app
        .clone()
        .oneshot(json_request("POST", "/drivers", driver_payload(name)))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{id}"),
            json!({ "status": "approved" }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/drivers/{id}/availability"),
            json!({ "available": true }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    id
}

async fn request_trip(app: &axum::Router) -> String {
    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/trips",
            json!({
                "riderId": "rider-42",
                "pickup": { "latitude": 6.5244, "longitude": 3.3792 },
                "destination": { "latitude": 6.6018, "longitude": 3.3515 }
            }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let trip = body_json(res).await;
    assert_eq!(trip["status"], "requested");
    assert!(trip["driverId"].is_null());
    trip["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_returns_ok() {
    let app = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn create_driver_starts_pending_and_unavailable() {
    let app = setup();
    let res = app
        .clone()
        .oneshot(json_request("POST", "/drivers", driver_payload("ngozi")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let id = body_json(res).await["id"].as_str().unwrap().to_string();

    let res = app
        .oneshot(get_request(&format!("/drivers/{id}")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let driver = body_json(res).await;
    assert_eq!(driver["status"], "pending");
    assert_eq!(driver["availability"], false);
    assert!(driver["currentTrip"].is_null());
    assert!(driver["location"].is_null());
    assert_eq!(driver["totalTrips"], 0);
    assert_eq!(driver["vehicle"]["plateNumber"], "EKY-404-LG");
}

#[tokio::test]
async fn create_driver_missing_license_returns_400() {
    let app = setup();
    let mut payload = driver_payload("tunde");
    payload.as_object_mut().unwrap().remove("license");

    let res = app
        .oneshot(json_request("POST", "/drivers", payload))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["code"], "validation_error");
}

#[tokio::test]
async fn patching_availability_is_forbidden() {
    let app = setup();
    let id = online_driver(&app, "emeka").await;

    let res = app
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{id}"),
            json!({ "availability": false, "currentTrip": null }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(res).await["code"], "forbidden_field");
}

#[tokio::test]
async fn update_location_keeps_availability() {
    let app = setup();
    let id = online_driver(&app, "fola").await;

    let res = app
        .oneshot(json_request(
            "PUT",
            &format!("/drivers/{id}/location"),
            json!({ "latitude": 6.45, "longitude": 3.39 }),
        ))
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let driver = body_json(res).await;
    assert_eq!(driver["location"]["latitude"], 6.45);
    assert_eq!(driver["location"]["longitude"], 3.39);
    assert!(driver["location"]["updatedAt"].is_string());
    assert_eq!(driver["availability"], true);
}

#[tokio::test]
async fn list_available_drivers() {
    let app = setup();
    let online = online_driver(&app, "gbenga").await;
    app.clone()
        .oneshot(json_request("POST", "/drivers", driver_payload("hauwa")))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(get_request("/drivers?available=true"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let drivers = body_json(res).await;
    let list = drivers.as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["id"], online);

    let res = app
        .oneshot(get_request("/drivers?status=pending"))
        .await
        .unwrap();
    assert_eq!(body_json(res).await.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn get_nonexistent_trip_returns_404() {
    let app = setup();
    let fake_id = "00000000-0000-0000-0000-000000000000";
    let response = app
        .oneshot(get_request(&format!("/trips/{fake_id}")))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn second_assignment_of_busy_driver_returns_503() {
    let app = setup();
    let driver_id = online_driver(&app, "ifeoma").await;
    let first = request_trip(&app).await;
    let second = request_trip(&app).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/trips/{first}/assign"),
            json!({ "candidates": [driver_id] }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/trips/{second}/assign"),
            json!({ "candidates": [driver_id] }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(res).await["code"], "no_driver_available");

    let res = app
        .oneshot(get_request(&format!("/trips/{second}")))
        .await
        .unwrap();
    assert_eq!(body_json(res).await["status"], "requested");
}

#[tokio::test]
async fn full_trip_flow() {
    let app = setup();
    let driver_id = online_driver(&app, "jide").await;
    let trip_id = request_trip(&app).await;

    let res = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/trips/{trip_id}/assign"),
            json!({ "candidates": [driver_id] }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let trip = body_json(res).await;
    assert_eq!(trip["status"], "assigned");
    assert_eq!(trip["driverId"], driver_id);

    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{driver_id}")))
        .await
        .unwrap();
    let driver = body_json(res).await;
    assert_eq!(driver["availability"], false);
    assert_eq!(driver["currentTrip"]["tripId"], trip_id);
    assert_eq!(driver["currentTrip"]["status"], "assigned");

    let res = app
        .clone()
        .oneshot(post_empty(&format!("/trips/{trip_id}/start")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "active");

    let res = app
        .clone()
        .oneshot(post_empty(&format!("/trips/{trip_id}/cancel")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(res).await["code"], "invalid_transition");

    let res = app
        .clone()
        .oneshot(post_empty(&format!("/trips/{trip_id}/complete")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "completed");

    let res = app
        .clone()
        .oneshot(get_request(&format!("/drivers/{driver_id}")))
        .await
        .unwrap();
    let driver = body_json(res).await;
    assert_eq!(driver["availability"], true);
    assert!(driver["currentTrip"].is_null());
    assert_eq!(driver["totalTrips"], 1);

    let res = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = body_string(res).await;
    assert!(body.contains("assignments_total"));
    assert!(body.contains("trip_transitions_total"));
}

#[tokio::test]
async fn cancel_assigned_trip_releases_driver() {
    let app = setup();
    let driver_id = online_driver(&app, "kemi").await;
    let trip_id = request_trip(&app).await;

    app.clone()
        .oneshot(json_request(
            "POST",
            &format!("/trips/{trip_id}/assign"),
            json!({ "candidates": [driver_id] }),
        ))
        .await
        .unwrap();

    let res = app
        .clone()
        .oneshot(post_empty(&format!("/trips/{trip_id}/cancel")))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let trip = body_json(res).await;
    assert_eq!(trip["status"], "cancelled");
    assert_eq!(trip["driverId"], driver_id);

    let res = app
        .oneshot(get_request(&format!("/drivers/{driver_id}")))
        .await
        .unwrap();
    let driver = body_json(res).await;
    assert_eq!(driver["availability"], true);
    assert!(driver["currentTrip"].is_null());
    assert_eq!(driver["totalTrips"], 0);
}

#[tokio::test]
async fn rejecting_an_online_driver_removes_them_from_the_pool() {
    let app = setup();
    let id = online_driver(&app, "lola").await;

    let res = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/drivers/{id}"),
            json!({ "status": "rejected", "name": "  Lola  " }),
        ))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let driver = body_json(res).await;
    assert_eq!(driver["status"], "rejected");
    assert_eq!(driver["availability"], false);
    assert_eq!(driver["name"], "Lola");

    let res = app
        .oneshot(get_request("/drivers?available=true"))
        .await
        .unwrap();
    assert!(body_json(res).await.as_array().unwrap().is_empty());
}
