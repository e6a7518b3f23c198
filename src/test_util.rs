use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use http::StatusCode;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server,
};
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use crate::sinks::timeplus::{
    native::{Driver, InsertStatement, NativeError, Transaction},
    Record,
};

pub fn trace_init() {
    #[cfg(unix)]
    let color = std::io::IsTerminal::is_terminal(&std::io::stdout());
    #[cfg(not(unix))]
    let color = false;

    let levels = std::env::var("TEST_LOG").unwrap_or_else(|_| "error".to_string());

    crate::trace::init(color, false, &levels);
}

/// Builds a batch of structured records from JSON values.
pub fn structured_records(values: impl IntoIterator<Item = Value>) -> Vec<Record> {
    values.into_iter().map(Record::from_structured).collect()
}

#[derive(Default)]
struct IngestCounters {
    requests: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// A local ingest endpoint that answers every request with a fixed status
/// after a fixed delay, and records how many requests overlapped.
pub struct IngestServer {
    addr: SocketAddr,
    counters: Arc<IngestCounters>,
}

impl IngestServer {
    pub async fn start(status: StatusCode, delay: Duration) -> Self {
        let counters = Arc::new(IngestCounters::default());

        let service_counters = Arc::clone(&counters);
        let make_service = make_service_fn(move |_| {
            let counters = Arc::clone(&service_counters);
            async move {
                Ok::<_, Infallible>(service_fn(move |request: Request<Body>| {
                    let counters = Arc::clone(&counters);
                    async move {
                        counters.requests.fetch_add(1, Ordering::SeqCst);
                        let current = counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        counters.max_in_flight.fetch_max(current, Ordering::SeqCst);

                        let _ = hyper::body::to_bytes(request.into_body()).await;
                        tokio::time::sleep(delay).await;

                        counters.in_flight.fetch_sub(1, Ordering::SeqCst);
                        let mut response = Response::new(Body::empty());
                        *response.status_mut() = status;
                        Ok::<_, Infallible>(response)
                    }
                }))
            }
        });

        let server = Server::bind(&SocketAddr::from(([127, 0, 0, 1], 0))).serve(make_service);
        let addr = server.local_addr();
        tokio::spawn(server);

        Self { addr, counters }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }

    /// Highest number of requests that were being handled at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.counters.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Answers one request with `status` and a `Content-Length` longer than the
/// body it sends, then closes the connection. Returns the base URL.
pub async fn truncated_body_server(status: StatusCode) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;

        let head = format!(
            "HTTP/1.1 {} {}\r\nContent-Length: 100\r\n\r\ncut short",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        socket.flush().await.unwrap();
    });

    format!("http://{}", addr)
}

/// Reads the request head and as much body as its `Content-Length` announces.
async fn read_request(socket: &mut tokio::net::TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);

        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let length = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + length {
            return;
        }
    }
}

/// In-memory [`Driver`] that records every call it receives.
#[derive(Clone, Default)]
pub struct MockDriver {
    calls: Arc<Mutex<Vec<String>>>,
    fail_on_row: Option<usize>,
}

impl MockDriver {
    /// Fails the `row`-th exec of every transaction, counting from 1.
    pub fn failing_on_row(row: usize) -> Self {
        Self {
            fail_on_row: Some(row),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn begin(&self) -> Result<Box<dyn Transaction>, NativeError> {
        self.record("begin");
        Ok(Box::new(MockTransaction {
            driver: self.clone(),
            columns: 0,
            rows: 0,
        }))
    }

    async fn ping(&self) -> Result<(), NativeError> {
        self.record("ping");
        Ok(())
    }
}

struct MockTransaction {
    driver: MockDriver,
    columns: usize,
    rows: usize,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn prepare(&mut self, statement: &InsertStatement) -> Result<(), NativeError> {
        self.columns = statement.columns.len();
        self.driver.record(format!("prepare {}", statement));
        Ok(())
    }

    async fn exec(&mut self, row: &[Value]) -> Result<(), NativeError> {
        self.rows += 1;
        if self.driver.fail_on_row == Some(self.rows) {
            return Err(NativeError::ColumnCount {
                values: row.len(),
                columns: self.columns + 1,
            });
        }
        self.driver
            .record(format!("exec {}", Value::Array(row.to_vec())));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), NativeError> {
        self.driver.record("commit");
        Ok(())
    }
}
