use std::sync::Arc;

use bytes::Bytes;
use http::{
    header::{HeaderValue, CONTENT_TYPE},
    HeaderMap, Request, Uri,
};
use hyper::Body;
use snafu::{OptionExt, ResultExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{
    columnar::ColumnarBatch,
    config::{
        BuildError, HttpClientSnafu, HttpEndpoint, InvalidHeaderSnafu, InvalidIngestUriSnafu,
        Target, UrlNotBaseSnafu,
    },
    writer::{
        BuildRequestSnafu, CancelledSnafu, EncodeSnafu, LimiterClosedSnafu, RequestSnafu,
        WriteError,
    },
};
use crate::{
    http::{Auth, HttpClient},
    internal_events::TimeplusBatchSent,
};

const INGEST_API_VERSION: &str = "v1beta2";
const TIMEPLUSD_API_VERSION: &str = "v1";

/// Posts columnar batches to the REST ingest API.
///
/// At most `max_in_flight` requests are outstanding at any time; further
/// writers wait for a slot.
#[derive(Debug)]
pub struct HttpIngestWriter {
    client: HttpClient,
    uri: Uri,
    headers: HeaderMap,
    limiter: Arc<Semaphore>,
}

impl HttpIngestWriter {
    pub fn new(endpoint: HttpEndpoint) -> Result<Self, BuildError> {
        let client = HttpClient::new().context(HttpClientSnafu)?;
        let uri = ingest_uri(
            endpoint.target,
            &endpoint.base_url,
            &endpoint.workspace,
            &endpoint.stream,
        )?;

        let auth = credentials(
            endpoint.username.as_deref(),
            endpoint.password.as_deref(),
            endpoint.apikey.as_deref(),
        );
        let headers = ingest_headers(&auth)?;

        Ok(Self {
            client,
            uri,
            headers,
            limiter: Arc::new(Semaphore::new(endpoint.max_in_flight)),
        })
    }

    pub async fn write(
        &self,
        cancel: &CancellationToken,
        batch: &ColumnarBatch,
    ) -> Result<(), WriteError> {
        let body = Bytes::from(serde_json::to_vec(batch).context(EncodeSnafu)?);
        let byte_size = body.len();

        // Held until this call returns, whatever the outcome.
        let _permit = tokio::select! {
            biased;

            _ = cancel.cancelled() => return CancelledSnafu.fail(),
            permit = self.limiter.acquire() => permit.context(LimiterClosedSnafu)?,
        };

        let mut request = Request::post(self.uri.clone())
            .body(Body::from(body))
            .context(BuildRequestSnafu)?;
        request.headers_mut().extend(self.headers.clone());

        let response = self.client.send(request).await.context(RequestSnafu)?;
        let status = response.status();

        let body = hyper::body::to_bytes(response.into_body()).await;

        if !status.is_success() {
            let body = body
                .map(|body| String::from_utf8_lossy(&body).into_owned())
                .unwrap_or_default();
            return Err(WriteError::UnexpectedStatus { status, body });
        }

        // The status is final. A body that fails to arrive does not undo it.
        if let Err(error) = body {
            debug!(message = "Failed to read ingest response body.", %error, %status);
        }

        emit!(TimeplusBatchSent {
            rows: batch.len(),
            byte_size: Some(byte_size),
            transport: "http",
        });
        Ok(())
    }
}

/// Basic auth needs both a user and a password. The API key is independent
/// of it, so both may be sent.
fn credentials(username: Option<&str>, password: Option<&str>, apikey: Option<&str>) -> Vec<Auth> {
    let mut auth = Vec::new();

    match (username, password) {
        (Some(user), Some(password)) if !user.is_empty() && !password.is_empty() => {
            auth.push(Auth::Basic {
                user: user.to_owned(),
                password: password.to_owned(),
            });
        }
        _ => {}
    }

    if let Some(key) = apikey.filter(|key| !key.is_empty()) {
        auth.push(Auth::ApiKey {
            key: key.to_owned(),
        });
    }

    auth
}

fn ingest_headers(auth: &[Auth]) -> Result<HeaderMap, BuildError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    for auth in auth {
        auth.apply_headers_map(&mut headers)
            .context(InvalidHeaderSnafu)?;
    }
    Ok(headers)
}

/// Appends the ingest path to the base URL. A trailing slash on the base is
/// ignored and an empty workspace adds no segment. A `/` inside the workspace
/// or stream separates path segments rather than being escaped.
fn ingest_uri(target: Target, base: &Url, workspace: &str, stream: &str) -> Result<Uri, BuildError> {
    let mut url = base.clone();
    {
        let mut segments = url
            .path_segments_mut()
            .ok()
            .context(UrlNotBaseSnafu { url: base.as_str() })?;
        segments.pop_if_empty();

        match target {
            Target::Timeplus => {
                segments
                    .extend(path_segments(workspace))
                    .extend(["api", INGEST_API_VERSION, "streams"])
                    .extend(path_segments(stream))
                    .push("ingest");
            }
            Target::Timeplusd => {
                segments
                    .extend(["timeplusd", TIMEPLUSD_API_VERSION, "ingest", "streams"])
                    .extend(path_segments(stream));
            }
        }
    }

    url.as_str().parse::<Uri>().context(InvalidIngestUriSnafu)
}

fn path_segments(value: &str) -> impl Iterator<Item = &str> {
    value.split('/').filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::Engine as _;
    use http::StatusCode;
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::test_util::{trace_init, truncated_body_server, IngestServer};

    fn endpoint(target: Target, base: &str) -> HttpEndpoint {
        HttpEndpoint {
            target,
            base_url: base.parse().unwrap(),
            workspace: "ws1".into(),
            stream: "events".into(),
            apikey: None,
            username: None,
            password: None,
            max_in_flight: 64,
        }
    }

    fn batch() -> ColumnarBatch {
        ColumnarBatch {
            columns: vec!["col1".into(), "col2".into()],
            rows: vec![vec![json!("hello"), json!(5)], vec![json!("world"), json!(10)]],
        }
    }

    fn uri(target: Target, base: &str, workspace: &str) -> String {
        ingest_uri(target, &base.parse().unwrap(), workspace, "events")
            .unwrap()
            .to_string()
    }

    #[test]
    fn timeplus_ingest_uri() {
        assert_eq!(
            uri(Target::Timeplus, "https://us-west-2.timeplus.cloud", "ws1"),
            "https://us-west-2.timeplus.cloud/ws1/api/v1beta2/streams/events/ingest"
        );
        assert_eq!(
            uri(Target::Timeplus, "http://localhost:8000/", "ws1"),
            "http://localhost:8000/ws1/api/v1beta2/streams/events/ingest"
        );
        assert_eq!(
            uri(Target::Timeplus, "http://localhost:8000/prefix/", ""),
            "http://localhost:8000/prefix/api/v1beta2/streams/events/ingest"
        );
    }

    #[test]
    fn timeplusd_ingest_uri_ignores_workspace() {
        assert_eq!(
            uri(Target::Timeplusd, "http://localhost:3218", "ws1"),
            "http://localhost:3218/timeplusd/v1/ingest/streams/events"
        );
    }

    #[test]
    fn slashes_separate_path_segments() {
        assert_eq!(
            uri(Target::Timeplus, "http://localhost:8000", "team/ws1/"),
            "http://localhost:8000/team/ws1/api/v1beta2/streams/events/ingest"
        );
        assert_eq!(
            ingest_uri(
                Target::Timeplusd,
                &"http://localhost:3218".parse().unwrap(),
                "",
                "db/events",
            )
            .unwrap()
            .to_string(),
            "http://localhost:3218/timeplusd/v1/ingest/streams/db/events"
        );
    }

    #[test]
    fn basic_auth_requires_both_credentials() {
        assert!(credentials(Some("user"), None, None).is_empty());
        assert!(credentials(None, Some("pass"), None).is_empty());
        assert!(credentials(Some(""), Some("pass"), None).is_empty());
        assert_eq!(
            credentials(Some("user"), None, Some("key")),
            vec![Auth::ApiKey { key: "key".into() }]
        );
    }

    #[tokio::test]
    async fn posts_columnar_body_with_credentials() {
        trace_init();

        let server = MockServer::start().await;
        let expected_auth = format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode("user:pass")
        );
        Mock::given(method("POST"))
            .and(path("/ws1/api/v1beta2/streams/events/ingest"))
            .and(header("content-type", "application/json"))
            .and(header("authorization", expected_auth.as_str()))
            .and(header("x-api-key", "key-123"))
            .and(body_json(json!({
                "columns": ["col1", "col2"],
                "data": [["hello", 5], ["world", 10]],
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let mut endpoint = endpoint(Target::Timeplus, &server.uri());
        endpoint.username = Some("user".into());
        endpoint.password = Some("pass".into());
        endpoint.apikey = Some("key-123".into());
        let writer = HttpIngestWriter::new(endpoint).unwrap();

        writer
            .write(&CancellationToken::new(), &batch())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn no_authorization_without_password() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/timeplusd/v1/ingest/streams/events"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut endpoint = endpoint(Target::Timeplusd, &server.uri());
        endpoint.username = Some("user".into());
        endpoint.apikey = Some("key-123".into());
        let writer = HttpIngestWriter::new(endpoint).unwrap();

        writer
            .write(&CancellationToken::new(), &batch())
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
        assert_eq!(requests[0].headers["x-api-key"], "key-123");
    }

    #[tokio::test]
    async fn any_2xx_status_is_success() {
        for code in [200u16, 201, 202, 204, 299] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(code))
                .mount(&server)
                .await;

            let writer = HttpIngestWriter::new(endpoint(Target::Timeplus, &server.uri())).unwrap();
            let result = writer.write(&CancellationToken::new(), &batch()).await;
            assert!(result.is_ok(), "status {} should succeed", code);
        }
    }

    #[tokio::test]
    async fn other_statuses_carry_the_code() {
        for code in [300u16, 302, 400, 401, 404, 500, 503] {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(code).set_body_string("nope"))
                .mount(&server)
                .await;

            let writer = HttpIngestWriter::new(endpoint(Target::Timeplus, &server.uri())).unwrap();
            let error = writer
                .write(&CancellationToken::new(), &batch())
                .await
                .unwrap_err();

            assert_eq!(error.status(), Some(StatusCode::from_u16(code).unwrap()));
            assert_eq!(
                error.to_string(),
                format!("failed to ingest, got status code {}", code)
            );
        }
    }

    #[tokio::test]
    async fn status_is_checked_before_body() {
        let server = truncated_body_server(StatusCode::INTERNAL_SERVER_ERROR).await;
        let writer = HttpIngestWriter::new(endpoint(Target::Timeplus, &server)).unwrap();

        let error = writer
            .write(&CancellationToken::new(), &batch())
            .await
            .unwrap_err();

        assert_eq!(error.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
        assert_eq!(error.to_string(), "failed to ingest, got status code 500");
    }

    #[tokio::test]
    async fn truncated_body_after_2xx_is_success() {
        let server = truncated_body_server(StatusCode::OK).await;
        let writer = HttpIngestWriter::new(endpoint(Target::Timeplus, &server)).unwrap();

        writer
            .write(&CancellationToken::new(), &batch())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn network_failure_is_returned() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let writer = HttpIngestWriter::new(endpoint(Target::Timeplus, &base)).unwrap();
        let error = writer
            .write(&CancellationToken::new(), &batch())
            .await
            .unwrap_err();

        assert!(matches!(error, WriteError::Request { .. }));
        assert_eq!(error.status(), None);
    }

    #[tokio::test]
    async fn cancelled_before_acquire_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let writer = HttpIngestWriter::new(endpoint(Target::Timeplus, &server.uri())).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let error = writer.write(&cancel, &batch()).await.unwrap_err();
        assert!(error.is_cancelled());
    }

    #[tokio::test]
    async fn single_slot_serializes_requests() {
        let server = IngestServer::start(StatusCode::OK, Duration::from_millis(200)).await;
        let mut endpoint = endpoint(Target::Timeplus, &server.base_url());
        endpoint.max_in_flight = 1;
        let writer = HttpIngestWriter::new(endpoint).unwrap();
        let cancel = CancellationToken::new();
        let batch = batch();

        let (first, second) = tokio::join!(
            writer.write(&cancel, &batch),
            writer.write(&cancel, &batch)
        );

        first.unwrap();
        second.unwrap();
        assert_eq!(server.requests(), 2);
        assert_eq!(server.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn slots_allow_parallel_requests() {
        let server = IngestServer::start(StatusCode::OK, Duration::from_millis(200)).await;
        let mut endpoint = endpoint(Target::Timeplus, &server.base_url());
        endpoint.max_in_flight = 2;
        let writer = HttpIngestWriter::new(endpoint).unwrap();
        let cancel = CancellationToken::new();
        let batch = batch();

        let (first, second) = tokio::join!(
            writer.write(&cancel, &batch),
            writer.write(&cancel, &batch)
        );

        first.unwrap();
        second.unwrap();
        assert_eq!(server.max_concurrent(), 2);
    }

    #[tokio::test]
    async fn cancelled_while_waiting_for_slot() {
        let server = IngestServer::start(StatusCode::OK, Duration::from_millis(300)).await;
        let mut endpoint = endpoint(Target::Timeplus, &server.base_url());
        endpoint.max_in_flight = 1;
        let writer = HttpIngestWriter::new(endpoint).unwrap();
        let batch = batch();
        let never = CancellationToken::new();
        let cancel = CancellationToken::new();

        let (first, second, ()) = tokio::join!(
            writer.write(&never, &batch),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                writer.write(&cancel, &batch).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                cancel.cancel();
            },
        );

        first.unwrap();
        assert!(second.unwrap_err().is_cancelled());
        assert_eq!(server.requests(), 1);

        // The cancelled waiter must not hold on to a slot.
        writer.write(&never, &batch).await.unwrap();
        assert_eq!(server.requests(), 2);
    }
}
