//! HTTP fetcher and token provider against a local responder

use super::support::{credential, day, fast_policy, offset};
use device_data_collector::downloader::FetchExecutor;
use device_data_collector::fetcher::{
    build_http_client, ApiCredentialProvider, ApiCredentials, CredentialError, CredentialProvider,
    DeviceFetcher, FetcherError, HttpDeviceFetcher,
};
use device_data_collector::shutdown::ShutdownSignal;
use device_data_collector::{DayWindow, WorkUnit};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

#[derive(Debug, Clone)]
struct Recorded {
    request_line: String,
    headers: String,
    body: String,
}

/// Serves scripted responses in order; the last one repeats.
struct Responder {
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Responder {
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let recorded = requests.clone();

        tokio::spawn(async move {
            let mut served = 0usize;
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let Some(request) = read_request(&mut socket).await else {
                    continue;
                };
                recorded.lock().unwrap().push(request);

                let (status, body) = responses[served.min(responses.len() - 1)];
                served += 1;
                let response = format!(
                    "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self {
            base_url: format!("http://{addr}"),
            requests,
        }
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default().to_string();
    Some(Recorded {
        request_line,
        headers: lines.collect::<Vec<_>>().join("\n").to_lowercase(),
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    })
}

fn client() -> reqwest::Client {
    build_http_client(Duration::from_secs(2), Duration::from_secs(5)).unwrap()
}

fn unit() -> WorkUnit {
    WorkUnit::new("2306181234", DayWindow::new(day(1), offset()))
}

const HISTORY_OK: &str = r#"{
    "code": null,
    "msg": null,
    "success": true,
    "deviceSn": "2306181234",
    "paramDataList": [
        {"collectTime": "1735682400", "dataList": [
            {"key": "P", "name": "Power", "value": "1.2", "unit": "kW"},
            {"key": "V", "name": "AC Voltage", "value": 230.5, "unit": "V"}
        ]},
        {"collectTime": 1735682700, "dataList": [
            {"key": "P", "name": "Power", "value": "", "unit": "kW"}
        ]}
    ]
}"#;

#[tokio::test]
async fn history_success_is_decoded() {
    let server = Responder::start(vec![(200, HISTORY_OK)]).await;
    let fetcher = HttpDeviceFetcher::new(client(), &server.base_url);

    let payload = fetcher.fetch_day(&credential(), &unit()).await.unwrap();
    assert_eq!(payload.len(), 2);
    assert_eq!(payload.records[0].collect_time, 1735682400);
    assert_eq!(payload.records[0].attributes[1].value.as_deref(), Some("230.5"));
    assert_eq!(payload.records[1].attributes[0].value, None);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request
        .request_line
        .starts_with("POST /device/v1.0/historical?language=en "));
    assert!(request.headers.contains("authorization: bearer test-token"));

    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["deviceSn"], "2306181234");
    assert_eq!(body["timeType"], 5);
    // 2025-01-01 00:00:00 +02:00 through 23:59:59
    assert_eq!(body["startTime"], 1735682400);
    assert_eq!(body["endTime"], 1735682400 + 86399);
}

#[tokio::test]
async fn server_error_maps_to_retryable() {
    let server = Responder::start(vec![(503, r#"{"msg":"busy"}"#)]).await;
    let fetcher = HttpDeviceFetcher::new(client(), &server.base_url);

    let err = fetcher.fetch_day(&credential(), &unit()).await.unwrap_err();
    assert_eq!(err, FetcherError::Server(503));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn client_error_maps_to_terminal() {
    let server = Responder::start(vec![(404, r#"{"msg":"device not found"}"#)]).await;
    let fetcher = HttpDeviceFetcher::new(client(), &server.base_url);

    let err = fetcher.fetch_day(&credential(), &unit()).await.unwrap_err();
    match &err {
        FetcherError::Client { status, message } => {
            assert_eq!(*status, 404);
            assert!(message.contains("device not found"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn api_rejection_is_terminal() {
    let server = Responder::start(vec![(
        200,
        r#"{"success": false, "code": "2101019", "msg": "device not authorised"}"#,
    )])
    .await;
    let fetcher = HttpDeviceFetcher::new(client(), &server.base_url);

    let err = fetcher.fetch_day(&credential(), &unit()).await.unwrap_err();
    assert!(matches!(err, FetcherError::Api { .. }));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn connection_refused_is_retryable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let fetcher = HttpDeviceFetcher::new(client(), format!("http://{addr}"));
    let err = fetcher.fetch_day(&credential(), &unit()).await.unwrap_err();
    assert!(err.is_retryable(), "expected retryable, got {err:?}");
}

#[tokio::test]
async fn executor_retries_server_errors_over_http() {
    let server = Responder::start(vec![(502, "{}"), (503, "{}"), (200, HISTORY_OK)]).await;
    let fetcher = Arc::new(HttpDeviceFetcher::new(client(), &server.base_url));
    let executor = FetchExecutor::new(fetcher, fast_policy(5), 1, ShutdownSignal::shared());

    let payload = executor.fetch(&credential(), &unit()).await.unwrap();
    assert_eq!(payload.len(), 2);
    assert_eq!(server.requests().len(), 3);
}

#[tokio::test]
async fn token_is_acquired_from_account_endpoint() {
    let server = Responder::start(vec![(
        200,
        r#"{"access_token": "issued-token", "token_type": "bearer", "expires_in": "5183999", "success": true}"#,
    )])
    .await;
    let provider = ApiCredentialProvider::new(
        client(),
        &server.base_url,
        ApiCredentials {
            app_id: "202407001".to_string(),
            app_secret: "s3cret".to_string(),
            email: "ops@example.com".to_string(),
            password: "hunter2".to_string(),
            org_id: Some("77".to_string()),
        },
    );

    let credential = provider.acquire().await.unwrap();
    assert_eq!(credential.token(), "issued-token");
    assert!(!credential.is_expired());

    let request = &server.requests()[0];
    assert!(request.request_line.starts_with("POST /account/v1.0/token?"));
    assert!(request.request_line.contains("appId=202407001"));
    let body: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(body["email"], "ops@example.com");
    assert_eq!(body["appSecret"], "s3cret");
    assert_eq!(body["orgId"], "77");
}

#[tokio::test]
async fn token_rejection_is_reported() {
    let server = Responder::start(vec![(401, r#"{"msg":"bad credentials"}"#)]).await;
    let provider = ApiCredentialProvider::new(
        client(),
        &server.base_url,
        ApiCredentials {
            app_id: "1".to_string(),
            app_secret: "x".to_string(),
            email: "a@b.c".to_string(),
            password: "p".to_string(),
            org_id: None,
        },
    );

    let err = provider.acquire().await.unwrap_err();
    assert!(matches!(err, CredentialError::Rejected { status: 401, .. }));
}
