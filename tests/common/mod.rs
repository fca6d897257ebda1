//! Common test utilities for hn-dl end-to-end tests
//!
//! A `wiremock` server stands in for the item API. Every ID is served a
//! deterministic document; individual IDs can be overridden with higher-priority
//! mocks to simulate failures.

#![allow(dead_code)]

use hn_dl::Config;
use hn_dl::config::{ApiConfig, PersistenceConfig, RunConfig};
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Deterministic document for `id`: even IDs are stories, odd IDs comments
pub fn item_json(id: i64) -> serde_json::Value {
    if id % 2 == 0 {
        serde_json::json!({
            "id": id,
            "type": "story",
            "by": "pg",
            "time": 1_175_714_200 + id,
            "title": format!("Story {id}"),
            "url": format!("https://example.com/{id}"),
            "score": id % 50,
            "descendants": 3,
            "kids": [id * 10 + 3, id * 10 + 1, id * 10 + 2]
        })
    } else {
        serde_json::json!({
            "id": id,
            "type": "comment",
            "by": "dang",
            "time": 1_175_714_200 + id,
            "parent": id - 1,
            "text": format!("Comment {id}")
        })
    }
}

/// Serves `item_json` for any `/v0/item/<id>.json`
struct ItemResponder;

impl Respond for ItemResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let id = request
            .url
            .path()
            .trim_start_matches("/v0/item/")
            .trim_end_matches(".json")
            .parse::<i64>();

        match id {
            Ok(id) => ResponseTemplate::new(200).set_body_json(item_json(id)),
            Err(_) => ResponseTemplate::new(400),
        }
    }
}

/// Start a fake API reporting `max_item` as its highest ID
pub async fn start_fake_api(max_item: i64) -> MockServer {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v0/maxitem.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string(max_item.to_string()))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/v0/item/\d+\.json$"))
        .respond_with(ItemResponder)
        .mount(&server)
        .await;

    server
}

/// Make `id` answer with `status` instead of its document
pub async fn fail_item(server: &MockServer, id: i64, status: u16) {
    Mock::given(method("GET"))
        .and(path(format!("/v0/item/{id}.json")))
        .respond_with(ResponseTemplate::new(status))
        .with_priority(1)
        .mount(server)
        .await;
}

/// Make `id` answer `null`, as the API does for IDs that never existed
pub async fn null_item(server: &MockServer, id: i64) {
    Mock::given(method("GET"))
        .and(path(format!("/v0/item/{id}.json")))
        .respond_with(ResponseTemplate::new(200).set_body_string("null"))
        .with_priority(1)
        .mount(server)
        .await;
}

/// Config pointing at `server` and a database at `db_path`
pub fn test_config(
    server: &MockServer,
    db_path: &Path,
    start_id: Option<i64>,
    end_id: i64,
    batch_size: usize,
) -> Config {
    Config {
        api: ApiConfig {
            base_url: format!("{}/v0", server.uri()),
            request_timeout: Duration::from_secs(5),
            ..Default::default()
        },
        run: RunConfig {
            start_id,
            end_id,
            batch_size,
            num_workers: 4,
            ..Default::default()
        },
        persistence: PersistenceConfig {
            database_path: db_path.to_path_buf(),
            fast_writes: true,
        },
    }
}
