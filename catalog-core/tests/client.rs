use catalog_core::{ApiErrorClass, CatalogClient, CatalogError, ItemSource};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn page(ids: &[&str]) -> serde_json::Value {
    ids.iter()
        .map(|id| {
            json!({
                "_id": id,
                "img": "aW1n",
                "text": format!("item {id}"),
                "confidence": 0.8
            })
        })
        .collect()
}

#[tokio::test]
async fn list_items_sends_authorization_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("authorization", "test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["0002", "0001"])))
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    let items = client.retrieve_items(None, None).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].id, "0002");
    assert_eq!(items[0].image, b"img");
    assert_eq!(items[1].text, "item 0001");
}

#[tokio::test]
async fn list_items_passes_since_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("since_id", "0010"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["0011"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    let items = client.retrieve_items(Some("0010"), None).await.unwrap();

    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, "0011");
}

#[tokio::test]
async fn list_items_passes_max_id() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .and(query_param("max_id", "0001"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page(&["0001"])))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    let items = client.retrieve_items(None, Some("0001")).await.unwrap();

    assert_eq!(items[0].id, "0001");
}

#[tokio::test]
async fn list_items_rejects_bad_image_payload() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "_id": "0003", "img": "%%%", "text": "x", "confidence": 0.1 }
        ])))
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = client.retrieve_items(None, None).await.unwrap_err();

    assert!(matches!(err, CatalogError::Decode { ref id, .. } if id == "0003"));
}

#[tokio::test]
async fn list_items_maps_error_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad token"))
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "wrong").unwrap();
    let err = client.retrieve_items(None, None).await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Auth));
    assert!(!err.is_retryable());
    assert!(err.to_string().contains("bad token"));
}

#[tokio::test]
async fn add_item_posts_json_and_returns_server_id() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/item"))
        .and(header("authorization", "test-token"))
        .and(body_json(json!({
            "image": "cG5n",
            "text": "hello",
            "confidence": 0.5
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "_id": "5e1f00aa",
            "img": "cG5n",
            "text": "hello",
            "confidence": 0.5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    let id = client.add_item(b"png", "hello", 0.5).await.unwrap();

    assert_eq!(id, "5e1f00aa");
}

#[tokio::test]
async fn delete_item_targets_item_path() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/item/0010"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    ItemSource::delete_item(&client, "0010").await.unwrap();
}

#[tokio::test]
async fn delete_item_surfaces_server_error() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/item/0010"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    let err = ItemSource::delete_item(&client, "0010").await.unwrap_err();

    assert_eq!(err.classification(), Some(ApiErrorClass::Transient));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn delete_all_items_deletes_collection() {
    let server = MockServer::start().await;

    Mock::given(method("DELETE"))
        .and(path("/item"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = CatalogClient::with_base_url(&server.uri(), "test-token").unwrap();
    ItemSource::delete_all_items(&client).await.unwrap();
}
