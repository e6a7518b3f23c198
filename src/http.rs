use std::{fmt, time::Instant};

use futures::future::BoxFuture;
use headers::{Authorization, HeaderMapExt};
use http::{
    header::{HeaderValue, InvalidHeaderValue, ACCEPT_ENCODING, AUTHORIZATION, USER_AGENT},
    HeaderMap, Request, Response,
};
use hyper::{
    body::Body,
    client::{Client, HttpConnector},
};
use hyper_openssl::HttpsConnector;
use openssl::ssl::{SslConnector, SslMethod};
use snafu::{ResultExt, Snafu};
use tracing::Span;
use tracing_futures::Instrument;

use crate::internal_events::http_client;

pub const X_API_KEY: &str = "x-api-key";

const USER_AGENT_VALUE: &str = concat!("timeplus-sink/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Snafu)]
pub enum HttpError {
    #[snafu(display("Failed to build TLS connector: {}", source))]
    BuildTlsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to build HTTPS connector: {}", source))]
    MakeHttpsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to make HTTP(S) request: {}", source))]
    CallRequest { source: hyper::Error },
}

#[derive(Clone)]
pub struct HttpClient {
    client: Client<HttpsConnector<HttpConnector>, Body>,
    span: Span,
    user_agent: HeaderValue,
}

impl HttpClient {
    pub fn new() -> Result<Self, HttpError> {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        let tls = SslConnector::builder(SslMethod::tls()).context(BuildTlsConnectorSnafu)?;
        let https = HttpsConnector::with_connector(http, tls).context(MakeHttpsConnectorSnafu)?;

        let client = Client::builder().build(https);

        let user_agent = HeaderValue::from_static(USER_AGENT_VALUE);

        let span = tracing::info_span!("http");

        Ok(HttpClient {
            client,
            span,
            user_agent,
        })
    }

    pub fn send(
        &self,
        mut request: Request<Body>,
    ) -> BoxFuture<'static, Result<Response<Body>, HttpError>> {
        let _enter = self.span.enter();

        default_request_headers(&mut request, &self.user_agent);

        emit!(http_client::AboutToSendHttpRequest { request: &request });

        let response = self.client.request(request);

        let fut = async move {
            // Capture the time right before we issue the request.
            // Request doesn't start the processing until we start polling it.
            let before = Instant::now();

            // Send request and wait for the result.
            let response_result = response.await;

            // Compute the roundtrip time it took to send the request and get
            // the response or error.
            let roundtrip = before.elapsed();

            // Handle the errors and extract the response.
            let response = response_result
                .map_err(|error| {
                    // Emit the error into the internal events system.
                    emit!(http_client::GotHttpError {
                        error: &error,
                        roundtrip
                    });
                    error
                })
                .context(CallRequestSnafu)?;

            // Emit the response into the internal events system.
            emit!(http_client::GotHttpResponse {
                response: &response,
                roundtrip
            });
            Ok(response)
        }
        .instrument(self.span.clone());

        Box::pin(fut)
    }
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key(USER_AGENT) {
        request.headers_mut().insert(USER_AGENT, user_agent.clone());
    }

    if !request.headers().contains_key(ACCEPT_ENCODING) {
        // Responses are only inspected for their status, never decompressed.
        request
            .headers_mut()
            .insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("client", &self.client)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Credentials attached to every request of a writer.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    Basic { user: String, password: String },
    ApiKey { key: String },
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"**REDACTED**")
                .finish(),
            Auth::ApiKey { .. } => f.debug_struct("ApiKey").field("key", &"**REDACTED**").finish(),
        }
    }
}

impl Auth {
    pub fn apply_headers_map(&self, map: &mut HeaderMap) -> Result<(), InvalidHeaderValue> {
        match &self {
            Auth::Basic { user, password } => {
                let auth = Authorization::basic(user, password);
                map.typed_insert(auth);
                if let Some(value) = map.get_mut(AUTHORIZATION) {
                    value.set_sensitive(true);
                }
            }
            Auth::ApiKey { key } => {
                let mut value = HeaderValue::from_str(key)?;
                value.set_sensitive(true);
                map.insert(X_API_KEY, value);
            }
        }
        Ok(())
    }
}
