//! SDP negotiation against a mock HTTP endpoint.

use verba_realtime::core::transport::{TransportError, exchange_sdp};
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OFFER: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";
const ANSWER: &str = "v=0\r\no=- 1 1 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

#[tokio::test]
async fn test_offer_posted_as_sdp_with_bearer() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/realtime"))
        .and(header("Authorization", "Bearer ek_test_123"))
        .and(header("Content-Type", "application/sdp"))
        .and(body_string(OFFER))
        .respond_with(ResponseTemplate::new(200).set_body_string(ANSWER))
        .expect(1)
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let url = format!("{}/v1/realtime", server.uri());
    let answer = exchange_sdp(&client, &url, "ek_test_123", OFFER).await.unwrap();
    assert_eq!(answer, ANSWER);
}

#[tokio::test]
async fn test_rejection_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid ephemeral key"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let url = format!("{}/v1/realtime", server.uri());
    let err = exchange_sdp(&client, &url, "ek_expired", OFFER).await.unwrap_err();
    match err {
        TransportError::Rejected { status, body } => {
            assert_eq!(status, 401);
            assert_eq!(body, "invalid ephemeral key");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_server_error_is_not_silently_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let client = reqwest::Client::new();
    let err = exchange_sdp(&client, &server.uri(), "ek_test", OFFER).await.unwrap_err();
    assert!(matches!(err, TransportError::Rejected { status: 500, .. }));
}
