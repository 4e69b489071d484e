//! End-to-end tests of the reqwest backend against a local mock server

#![cfg(feature = "backend-reqwest")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use http::StatusCode;
use serde_json::json;
use tether::{
    Backoff, Credential, Destination, Error, Progress, RequestBuilder, Result, RetryPolicy, Session,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_get_json() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/items"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [1, 2, 3] })))
        .expect(1)
        .mount(&server)
        .await;

    let session = Session::new()?;
    let response = session
        .request(RequestBuilder::get(format!("{}/items", server.uri())).header("Accept", "application/json"))
        .validate()
        .response_json::<serde_json::Value>()
        .await;

    assert_eq!(response.value(), Some(&json!({ "items": [1, 2, 3] })));
    assert_eq!(response.status(), Some(StatusCode::OK));
    let metrics = response.metrics.expect("metrics");
    assert_eq!(metrics.bytes_received, 17);
    assert_eq!(metrics.redirect_count, 0);
    Ok(())
}

#[tokio::test]
async fn test_query_and_form_parameters() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/search"))
        .and(wiremock::matchers::query_param("page", "2"))
        .and(header("content-type", "application/x-www-form-urlencoded; charset=utf-8"))
        .and(wiremock::matchers::body_string("q=rust%20lang"))
        .respond_with(ResponseTemplate::new(200).set_body_string("found"))
        .mount(&server)
        .await;

    let session = Session::new()?;
    let response = session
        .request(
            RequestBuilder::post(format!("{}/search?page=2", server.uri())).form([("q", "rust lang")]),
        )
        .validate()
        .response_string()
        .await;

    assert_eq!(response.value().map(String::as_str), Some("found"));
    Ok(())
}

#[tokio::test]
async fn test_follows_redirects() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(path("/new"))
        .respond_with(ResponseTemplate::new(200).set_body_string("moved"))
        .mount(&server)
        .await;

    let session = Session::new()?;
    let response = session
        .request(format!("{}/old", server.uri()))
        .validate()
        .response_string()
        .await;

    assert_eq!(response.value().map(String::as_str), Some("moved"));
    assert_eq!(response.response.as_ref().map(|r| r.url.path()), Some("/new"));
    assert_eq!(response.metrics.map(|m| m.redirect_count), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_redirect_handler_can_stop_at_redirect() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/old"))
        .respond_with(ResponseTemplate::new(301).insert_header("Location", "/new"))
        .mount(&server)
        .await;
    Mock::given(path("/new"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let session = Session::builder().on_redirect(|_, _, _| None).build()?;
    let response = session.request(format!("{}/old", server.uri())).response().await;

    assert_eq!(response.status(), Some(StatusCode::MOVED_PERMANENTLY));
    assert!(response.result.is_ok());
    Ok(())
}

#[tokio::test]
async fn test_redirect_loop_fails() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/loop"))
        .respond_with(ResponseTemplate::new(307).insert_header("Location", "/loop"))
        .mount(&server)
        .await;

    let session = Session::new()?;
    let response = session.request(format!("{}/loop", server.uri())).response().await;

    assert!(matches!(response.error(), Some(Error::Network { code: -1007, .. })));
    Ok(())
}

#[tokio::test]
async fn test_basic_challenge_is_answered() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/secure"))
        .and(header("authorization", "Basic dXNlcjpwYXNz"))
        .respond_with(ResponseTemplate::new(200).set_body_string("welcome"))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(path("/secure"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="tests""#),
        )
        .mount(&server)
        .await;

    let session = Session::new()?;
    let request = session.request(format!("{}/secure", server.uri()));
    let response = request
        .authenticate_user("user", "pass")
        .validate()
        .response_string()
        .await;

    assert_eq!(response.value().map(String::as_str), Some("welcome"));
    Ok(())
}

#[tokio::test]
async fn test_rejected_credential_surfaces_401() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/secure"))
        .respond_with(
            ResponseTemplate::new(401).insert_header("WWW-Authenticate", r#"Basic realm="tests""#),
        )
        .expect(2)
        .mount(&server)
        .await;

    let session = Session::new()?;
    let response = session
        .request(format!("{}/secure", server.uri()))
        .authenticate(Credential::new("user", "wrong"))
        .validate()
        .response()
        .await;

    assert_eq!(response.error().and_then(Error::response_code), Some(401));
    Ok(())
}

#[tokio::test]
async fn test_download_to_destination() -> Result<()> {
    let server = MockServer::start().await;
    let body = vec![42u8; 150_000];
    Mock::given(path("/archive.bin"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Content-Type", "application/octet-stream")
                .set_body_bytes(body.clone()),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let target = dir.path().join("archive.bin");
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();

    let session = Session::new()?;
    let request = session.download_to(
        format!("{}/archive.bin", server.uri()),
        Destination::to_path(&target),
    );
    request.download_progress(move |progress: Progress| sink.lock().unwrap().push(progress));
    let response = request.validate().response().await;

    assert!(response.result.is_ok());
    assert_eq!(response.destination_path.as_ref(), Some(&target));
    assert_eq!(std::fs::read(&target)?, body);

    let seen = seen.lock().unwrap();
    let last = seen.last().expect("progress reported");
    assert_eq!(last.completed, 150_000);
    assert_eq!(last.total, Some(150_000));
    assert!(seen.windows(2).all(|w| w[0].completed <= w[1].completed));
    Ok(())
}

#[tokio::test]
async fn test_upload_reports_progress() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/blob"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let uploaded = Arc::new(Mutex::new(None));
    let sink = uploaded.clone();
    let session = Session::new()?;
    let request = session.upload(vec![7u8; 200_000], RequestBuilder::put(format!("{}/blob", server.uri())));
    request.upload_progress(move |progress: Progress| *sink.lock().unwrap() = Some(progress));
    let response = request.validate().response().await;

    assert!(response.result.is_ok());
    let progress = uploaded.lock().unwrap().expect("progress reported");
    assert_eq!(progress.completed, 200_000);
    assert_eq!(progress.total, Some(200_000));

    let received = server.received_requests().await.expect("recording enabled");
    assert_eq!(received[0].body.len(), 200_000);
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("recovered"))
        .mount(&server)
        .await;

    let session = Session::builder()
        .retrier(RetryPolicy::default().backoff(Backoff {
            first: Duration::from_millis(10),
            max: Duration::from_millis(10),
            factor: 1.0,
        }))
        .build()?;
    let response = session
        .request(format!("{}/flaky", server.uri()))
        .validate()
        .response_string()
        .await;

    assert_eq!(response.value().map(String::as_str), Some("recovered"));
    assert_eq!(response.retry_count, 1);
    assert_eq!(server.received_requests().await.map(|r| r.len()), Some(2));
    Ok(())
}

#[tokio::test]
async fn test_request_timeout() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let session = Session::builder().timeout(Duration::from_millis(100)).build()?;
    let response = session.request(format!("{}/slow", server.uri())).response().await;

    assert!(matches!(response.error(), Some(Error::Timeout)));
    Ok(())
}

#[tokio::test]
async fn test_cancel_in_flight() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let session = Session::new()?;
    let request = session.request(format!("{}/slow", server.uri()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    request.cancel();

    let response = tokio::time::timeout(Duration::from_secs(2), request.response())
        .await
        .expect("cancellation completes promptly");
    assert!(response.error().is_some_and(Error::is_cancelled));
    Ok(())
}

#[tokio::test]
async fn test_stream_echo() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await?;
        let mut buffer = [0u8; 4];
        socket.read_exact(&mut buffer).await?;
        socket.write_all(&buffer).await?;
        socket.shutdown().await
    });

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let session = Session::new()?;
    let stream = session.stream("127.0.0.1", port);
    stream.on_data(move |data| sink.lock().unwrap().extend_from_slice(&data));
    stream.write("ping")?;

    stream.finished().await;
    assert!(stream.error().is_none());
    assert_eq!(&received.lock().unwrap()[..], b"ping");
    Ok(())
}
