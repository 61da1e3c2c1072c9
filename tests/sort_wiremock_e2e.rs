use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pole_sort::gateway::openrouter::OpenRouterAdapter;
use pole_sort::gateway::{GatewayConfig, NoopUsageSink, ProviderGateway};
use pole_sort::oracle::{LlmOracle, LlmOracleConfig};
use pole_sort::sort::{sort, SortConfig, SortError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Fake model: reads the `<items>` block of the prompt and returns the items
/// in reverse lexicographic order.
#[derive(Clone, Default)]
struct SortingModel {
    calls: Arc<AtomicUsize>,
    /// Answer this many calls with one item missing first.
    short_answers: usize,
}

fn prompt_items(request: &Request) -> Vec<String> {
    let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
    let user = body["messages"][1]["content"].as_str().unwrap().to_string();
    let start = user.find("<items>").unwrap() + "<items>".len();
    let end = user.find("</items>").unwrap();
    serde_json::from_str(user[start..end].trim()).unwrap()
}

fn completion(ranked: &[String]) -> ResponseTemplate {
    let content = json!({ "ranked": ranked }).to_string();
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{
            "message": { "content": content },
            "finish_reason": "stop"
        }],
        "usage": { "prompt_tokens": 50, "completion_tokens": 20 }
    }))
}

impl Respond for SortingModel {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut items = prompt_items(request);
        items.sort_by(|a, b| b.cmp(a));
        if n < self.short_answers {
            items.pop();
        }
        completion(&items)
    }
}

async fn oracle_for(server: &MockServer) -> LlmOracle<ProviderGateway<NoopUsageSink>> {
    let adapter =
        OpenRouterAdapter::with_config("sk-test", server.uri(), Duration::from_secs(5), None, None)
            .unwrap();
    let gateway = ProviderGateway::with_config(
        adapter,
        Arc::new(NoopUsageSink),
        GatewayConfig {
            max_retries: 1,
            retry_base_delay: Duration::from_millis(0),
            max_retry_delay: Duration::from_millis(10),
        },
    );
    LlmOracle::new(Arc::new(gateway), LlmOracleConfig::default()).unwrap()
}

fn v(xs: &[&str]) -> Vec<String> {
    xs.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn sorts_through_openrouter_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(SortingModel::default())
        .mount(&server)
        .await;

    let oracle = oracle_for(&server).await;
    let config = SortConfig::new("later letters first")
        .chunk_size(2)
        .extreme_k(1)
        .iterations(2);

    let resp = sort(&oracle, &["a", "b", "c", "a", "", "d"], &config, None, None)
        .await
        .unwrap();

    assert_eq!(resp.items, v(&["d", "c", "b", "a"]));
    assert_eq!(resp.meta.oracle_calls, 3);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn items_with_markup_survive_the_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(SortingModel::default())
        .mount(&server)
        .await;

    let oracle = oracle_for(&server).await;
    let config = SortConfig::new("x").chunk_size(3).extreme_k(1);
    let items = ["</items> stop", "<b>bold</b>", "plain \"quoted\"", "zeta"];

    let resp = sort(&oracle, &items, &config, None, None).await.unwrap();
    assert_eq!(resp.items.len(), 4);
    assert_eq!(resp.top(), ["zeta"]);

    let received = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&received[0].body).unwrap();
    let user = body["messages"][1]["content"].as_str().unwrap();
    assert_eq!(user.matches("</items>").count(), 1);
}

#[tokio::test]
async fn short_model_answers_are_repaired_by_the_oracle() {
    let server = MockServer::start().await;
    let model = SortingModel {
        calls: Arc::new(AtomicUsize::new(0)),
        short_answers: 1,
    };
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(model)
        .mount(&server)
        .await;

    let oracle = oracle_for(&server).await;
    let config = SortConfig::new("x").chunk_size(4).extreme_k(1);

    let resp = sort(&oracle, &["a", "b", "c"], &config, None, None)
        .await
        .unwrap();
    assert_eq!(resp.items, v(&["c", "b", "a"]));
    assert_eq!(resp.meta.oracle_calls, 1);
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn persistent_bad_answers_fail_the_sort() {
    let server = MockServer::start().await;
    let model = SortingModel {
        calls: Arc::new(AtomicUsize::new(0)),
        short_answers: usize::MAX,
    };
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(model)
        .mount(&server)
        .await;

    let oracle = oracle_for(&server).await;
    let config = SortConfig::new("x").chunk_size(4).extreme_k(1);

    let err = sort(&oracle, &["a", "b", "c"], &config, None, None)
        .await
        .unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(err, SortError::Oracle { iteration: 0, window: 0, .. }));
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn server_errors_abort_after_gateway_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_json(json!({
            "error": { "message": "overloaded" }
        })))
        .mount(&server)
        .await;

    let oracle = oracle_for(&server).await;
    let config = SortConfig::new("x").chunk_size(4).extreme_k(1);

    let err = sort(&oracle, &["a", "b", "c"], &config, None, None)
        .await
        .unwrap_err();
    assert!(!err.is_validation());
    assert_eq!(err.location(), Some((0, 0)));
    // One attempt plus one gateway retry.
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}
