use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{error, info};
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::{Filter, Rejection, Reply};

use crate::classifier::{Classification, Classifier, ClassifyError};

// Matches what browser dashboards send along with their store credentials.
const ALLOW_HEADERS: &str = "authorization, x-client-info, apikey, content-type";

pub(crate) async fn serve(classifier: Arc<Classifier>, addr: SocketAddr) {
    warp::serve(routes(classifier)).run(addr).await;
}

/// One route, any path: OPTIONS answers the CORS preflight, POST classifies.
/// Every reply carries the permissive CORS headers.
fn routes(
    classifier: Arc<Classifier>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let preflight = warp::options().map(warp::reply);

    let classify = warp::post()
        .and(warp::body::bytes())
        .and(warp::any().map(move || classifier.clone()))
        .and_then(handle_classify);

    preflight
        .or(classify)
        .with(warp::reply::with::header(
            "access-control-allow-origin",
            "*",
        ))
        .with(warp::reply::with::header(
            "access-control-allow-headers",
            ALLOW_HEADERS,
        ))
}

async fn handle_classify(
    body: Bytes,
    classifier: Arc<Classifier>,
) -> Result<impl Reply, Infallible> {
    let reply = match classify_request(&body, &classifier).await {
        Ok(classification) => {
            info!(
                "query classified as {}/{}",
                classification.category, classification.priority
            );
            json_reply(&classification, StatusCode::OK)
        }
        Err(err) => {
            error!("classification request failed: {err}");
            json_reply(&json!({ "error": err.to_string() }), error_status(&err))
        }
    };
    Ok(reply)
}

async fn classify_request(
    body: &[u8],
    classifier: &Classifier,
) -> Result<Classification, ClassifyError> {
    let query_text = query_text(body)?;
    classifier.classify(&query_text).await
}

/// Pull the query text out of the request body.
///
/// Whitespace-only text counts as missing, but accepted text is forwarded
/// verbatim, untrimmed.
fn query_text(body: &[u8]) -> Result<String, ClassifyError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ClassifyError::InvalidInput)?;
    let text = value
        .get("queryText")
        .and_then(Value::as_str)
        .ok_or(ClassifyError::InvalidInput)?;
    if text.trim().is_empty() {
        return Err(ClassifyError::InvalidInput);
    }
    Ok(text.to_string())
}

fn error_status(err: &ClassifyError) -> StatusCode {
    match err {
        ClassifyError::InvalidInput => StatusCode::BAD_REQUEST,
        ClassifyError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ClassifyError::PaymentRequired => StatusCode::PAYMENT_REQUIRED,
        ClassifyError::ServiceMisconfigured
        | ClassifyError::UpstreamUnavailable(_)
        | ClassifyError::ClassificationFailed
        | ClassifyError::InvalidUpstreamResponse
        | ClassifyError::MalformedClassification => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_reply<T: serde::Serialize>(
    value: &T,
    status: StatusCode,
) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(warp::reply::json(value), status)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::settings::ClassifierSettings;

    fn test_routes(
        endpoint: &str,
        api_key: Option<&str>,
    ) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        let settings = ClassifierSettings {
            endpoint: endpoint.to_string(),
            model: "test-model".to_string(),
            temperature: 0.3,
        };
        let classifier = Classifier::new(&settings, api_key.map(str::to_string)).unwrap();
        routes(Arc::new(classifier))
    }

    // Endpoint for tests that must never reach the network.
    fn offline_routes() -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
        test_routes("http://127.0.0.1:1", Some("key"))
    }

    fn error_body(resp: &warp::http::Response<Bytes>) -> String {
        let value: Value = serde_json::from_slice(resp.body()).unwrap();
        value["error"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn missing_query_text_is_rejected() {
        let resp = warp::test::request()
            .method("POST")
            .body("{}")
            .reply(&offline_routes())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(&resp), "Query text is required");
    }

    #[tokio::test]
    async fn non_string_query_text_is_rejected() {
        let resp = warp::test::request()
            .method("POST")
            .body(r#"{"queryText": 7}"#)
            .reply(&offline_routes())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(&resp), "Query text is required");
    }

    #[tokio::test]
    async fn whitespace_query_text_is_rejected() {
        let resp = warp::test::request()
            .method("POST")
            .body(r#"{"queryText": "   "}"#)
            .reply(&offline_routes())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(&resp), "Query text is required");
    }

    #[tokio::test]
    async fn non_json_body_is_rejected() {
        let resp = warp::test::request()
            .method("POST")
            .body("definitely not json")
            .reply(&offline_routes())
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error_body(&resp), "Query text is required");
    }

    #[tokio::test]
    async fn missing_api_key_is_a_configuration_error() {
        let resp = warp::test::request()
            .method("POST")
            .body(r#"{"queryText": "help me"}"#)
            .reply(&test_routes("http://127.0.0.1:1", None))
            .await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error_body(&resp), "AI service not configured");
    }

    #[tokio::test]
    async fn preflight_gets_cors_headers_and_empty_body() {
        let resp = warp::test::request()
            .method("OPTIONS")
            .reply(&offline_routes())
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.body().is_empty());
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
        assert_eq!(
            resp.headers().get("access-control-allow-headers").unwrap(),
            ALLOW_HEADERS
        );
    }

    #[tokio::test]
    async fn error_replies_carry_cors_headers() {
        let resp = warp::test::request()
            .method("POST")
            .body("{}")
            .reply(&offline_routes())
            .await;
        assert_eq!(
            resp.headers().get("access-control-allow-origin").unwrap(),
            "*"
        );
    }

    #[tokio::test]
    async fn classification_passes_through_end_to_end() {
        let content = "```json\n{\"category\":\"Escalation\",\"priority\":\"Critical\",\"sentiment\":\"Mixed\",\"keyPhrases\":[\"outage\"]}\n```";
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{ "message": { "role": "assistant", "content": content } }]
            })))
            .mount(&server)
            .await;

        let resp = warp::test::request()
            .method("POST")
            .body(r#"{"queryText": "everything is down"}"#)
            .reply(&test_routes(&server.uri(), Some("key")))
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let value: Value = serde_json::from_slice(resp.body()).unwrap();
        // Out-of-enumeration model output is trusted as-is.
        assert_eq!(value["category"], "Escalation");
        assert_eq!(value["priority"], "Critical");
        assert_eq!(value["keyPhrases"], json!(["outage"]));
    }

    #[tokio::test]
    async fn upstream_rate_limit_passes_through_as_429() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("try later"))
            .mount(&server)
            .await;

        let resp = warp::test::request()
            .method("POST")
            .body(r#"{"queryText": "help"}"#)
            .reply(&test_routes(&server.uri(), Some("key")))
            .await;

        assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            error_body(&resp),
            "Rate limit exceeded. Please try again later."
        );
    }

    #[tokio::test]
    async fn invalid_input_makes_no_upstream_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let resp = warp::test::request()
            .method("POST")
            .body(r#"{"queryText": ""}"#)
            .reply(&test_routes(&server.uri(), Some("key")))
            .await;

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
