use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use canteen_server::{
    app,
    config::Config,
    memory::MemoryStore,
    model::{Caller, Role},
    routes::{PARTICIPANT_HEADER, ROLE_HEADER},
    state::State,
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

struct Client {
    app: Router,
    state: Arc<State>,
    root: Caller,
}

impl Client {
    async fn new() -> Self {
        let state = Arc::new(State::with_store(
            Config::default(),
            Arc::new(MemoryStore::new()),
        ));
        let root = state.roster.ensure_root("admin").await.unwrap();

        Self {
            app: app(state.clone()),
            state,
            root: Caller {
                participant: root.id,
                role: Role::Superadmin,
            },
        }
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        caller: Option<Caller>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);

        if let Some(caller) = caller {
            request = request
                .header(PARTICIPANT_HEADER, caller.participant.to_string())
                .header(ROLE_HEADER, caller.role.to_string());
        }

        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);

        (status, value)
    }

    async fn provision(&self, name: &str, role: Role) -> Caller {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/admin/participants",
                Some(self.root),
                Some(json!({ "name": name, "role": role })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        Caller {
            participant: serde_json::from_value(body["id"].clone()).unwrap(),
            role,
        }
    }

    async fn add_item(&self, name: &str, options: &[&str]) -> u64 {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/admin/items",
                Some(self.root),
                Some(json!({ "name": name, "options": options })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);

        body["id"].as_u64().unwrap()
    }
}

#[tokio::test]
async fn test_anonymous_is_unauthorized() {
    let client = Client::new().await;

    let (status, _) = client.send(Method::GET, "/api/menu", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_user_cannot_reach_admin_routes() {
    let client = Client::new().await;
    let user = client.provision("mika", Role::User).await;

    let (status, _) = client
        .send(Method::POST, "/api/admin/reset", Some(user), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = client
        .send(Method::GET, "/api/admin/orders", Some(user), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_vote_flow() {
    let client = Client::new().await;
    let user = client.provision("mika", Role::User).await;
    let burger = client.add_item("Burger", &["Fries"]).await;

    let (status, record) = client
        .send(
            Method::POST,
            "/api/vote",
            Some(user),
            Some(json!({ "item": burger, "selections": ["Fries"], "notes": "no onions" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["item"], json!(burger));
    assert_eq!(record["notes"], "no onions");

    let (status, menu) = client.send(Method::GET, "/api/menu", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(menu["items"][0]["tally"], 1);
    assert_eq!(menu["vote"]["item"], json!(burger));
    assert_eq!(menu["closed"], false);

    let (status, _) = client.send(Method::DELETE, "/api/vote", Some(user), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, tally) = client.send(Method::GET, "/api/tally", Some(user), None).await;
    assert_eq!(tally[0]["tally"], 0);

    let (status, _) = client.send(Method::DELETE, "/api/vote", Some(user), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_closed_admission_is_forbidden() {
    let client = Client::new().await;
    let admin = client.provision("boss", Role::Admin).await;
    let user = client.provision("mika", Role::User).await;
    let burger = client.add_item("Burger", &[]).await;

    let (status, body) = client
        .send(
            Method::POST,
            "/api/admin/admission",
            Some(admin),
            Some(json!({ "closed": true })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closed"], true);

    let (status, _) = client
        .send(Method::POST, "/api/vote", Some(user), Some(json!({ "item": burger })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = client.send(Method::GET, "/api/status", Some(user), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["closed"], true);
}

#[tokio::test]
async fn test_bad_payloads() {
    let client = Client::new().await;
    let user = client.provision("mika", Role::User).await;
    let burger = client.add_item("Burger", &["Fries"]).await;

    let (status, _) = client
        .send(Method::POST, "/api/vote", Some(user), Some(json!({ "nope": 1 })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = client
        .send(
            Method::POST,
            "/api/vote",
            Some(user),
            Some(json!({ "item": burger, "selections": ["Caviar"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = client
        .send(Method::POST, "/api/vote", Some(user), Some(json!({ "item": 999 })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_archived_items_hidden_from_users() {
    let client = Client::new().await;
    let admin = client.provision("boss", Role::Admin).await;
    let user = client.provision("mika", Role::User).await;
    let burger = client.add_item("Burger", &[]).await;
    client.add_item("Soup", &[]).await;

    let (status, item) = client
        .send(
            Method::POST,
            &format!("/api/admin/items/{burger}/active"),
            Some(admin),
            Some(json!({ "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(item["is_active"], false);

    let (_, menu) = client.send(Method::GET, "/api/menu", Some(user), None).await;
    assert_eq!(menu["items"].as_array().unwrap().len(), 1);

    let (_, menu) = client.send(Method::GET, "/api/menu", Some(admin), None).await;
    assert_eq!(menu["items"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_favorites_roundtrip() {
    let client = Client::new().await;
    let user = client.provision("mika", Role::User).await;
    let burger = client.add_item("Burger", &[]).await;

    let (status, toggled) = client
        .send(
            Method::POST,
            "/api/favorites",
            Some(user),
            Some(json!({ "item": burger })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(toggled["added"], true);

    let (_, favorites) = client.send(Method::GET, "/api/favorites", Some(user), None).await;
    assert_eq!(favorites, json!([burger]));
}

#[tokio::test]
async fn test_participant_administration() {
    let client = Client::new().await;
    let admin = client.provision("boss", Role::Admin).await;
    let user = client.provision("mika", Role::User).await;

    let (status, _) = client
        .send(
            Method::POST,
            "/api/admin/participants",
            Some(client.root),
            Some(json!({ "name": "mika" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = client
        .send(
            Method::DELETE,
            &format!("/api/admin/participants/{}", user.participant),
            Some(admin),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = client
        .send(
            Method::DELETE,
            &format!("/api/admin/participants/{}", client.root.participant),
            Some(client.root),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = client
        .send(
            Method::POST,
            &format!("/api/admin/participants/{}/role", user.participant),
            Some(client.root),
            Some(json!({ "role": "admin" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "admin");

    let (status, _) = client
        .send(
            Method::DELETE,
            &format!("/api/admin/participants/{}", user.participant),
            Some(client.root),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, list) = client
        .send(Method::GET, "/api/participants", Some(admin), None)
        .await;
    assert_eq!(list.as_array().unwrap().len(), 1);
    assert_eq!(list[0]["display_name"], "boss");
}

#[tokio::test]
async fn test_orders_report() {
    let client = Client::new().await;
    let admin = client.provision("boss", Role::Admin).await;
    let user = client.provision("mika", Role::User).await;
    let burger = client.add_item("Burger", &[]).await;

    client
        .send(Method::POST, "/api/vote", Some(user), Some(json!({ "item": burger })))
        .await;

    let (status, orders) = client
        .send(Method::GET, "/api/admin/orders", Some(admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orders[0]["participant"], "mika");
    assert_eq!(orders[0]["item"], "Burger");

    assert_eq!(client.state.ledger.orders().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_rotate_credentials() {
    let client = Client::new().await;
    let user = client.provision("mika", Role::User).await;

    let (status, body) = client
        .send(Method::POST, "/api/credentials/rotate", Some(user), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["credential_version"], 1);

    let (_, me) = client.send(Method::GET, "/api/me", Some(user), None).await;
    assert_eq!(me["credential_version"], 1);
}
