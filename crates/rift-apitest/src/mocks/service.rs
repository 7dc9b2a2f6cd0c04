//! A single service mock: one HTTP listener serving one active definition.

use super::definition::Definition;
use super::error::{MockError, ServerError, ServiceError};
use super::request::{MockRequest, MockResponse};
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use hyper_util::server::graceful::GracefulShutdown;
use parking_lot::Mutex;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

// Pause after a failed accept (e.g. EMFILE) before trying again.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Errors ending a connection without a response.
#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("failed to read request body: {0}")]
    Body(#[from] hyper::Error),
    #[error("connection dropped by mock")]
    Dropped,
}

struct ServiceState {
    active: Arc<Definition>,
    errors: Vec<MockError>,
}

struct RunningServer {
    addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

/// An HTTP endpoint standing in for one external service.
///
/// Requests are served one at a time against the active definition: the state lock
/// is held for the whole `execute`, so call counters and the error list never race.
pub struct ServiceMock {
    name: String,
    listen_addr: SocketAddr,
    default_definition: Arc<Definition>,
    state: Mutex<ServiceState>,
    server: Mutex<Option<RunningServer>>,
}

impl ServiceMock {
    /// `definition` becomes both the active and the default definition.
    pub fn new(name: impl Into<String>, definition: Definition) -> Self {
        let definition = Arc::new(definition);
        Self {
            name: name.into(),
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            default_definition: Arc::clone(&definition),
            state: Mutex::new(ServiceState {
                active: definition,
                errors: Vec::new(),
            }),
            server: Mutex::new(None),
        }
    }

    /// Listen on a fixed address instead of an ephemeral localhost port.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the listener is bound to.
    pub fn server_addr(&self) -> Result<SocketAddr, ServerError> {
        self.server
            .lock()
            .as_ref()
            .map(|s| s.addr)
            .ok_or_else(|| ServerError::NotStarted(self.name.clone()))
    }

    pub fn is_running(&self) -> bool {
        self.server.lock().is_some()
    }

    /// The definition currently answering requests.
    pub fn active_definition(&self) -> Arc<Definition> {
        Arc::clone(&self.state.lock().active)
    }

    pub fn set_definition(&self, definition: Definition) {
        self.state.lock().active = Arc::new(definition);
    }

    /// Restore the definition the mock was created with.
    pub fn reset_definition(&self) {
        self.state.lock().active = Arc::clone(&self.default_definition);
    }

    /// Clear collected errors and reset the active definition's counters.
    pub fn reset_running_context(&self) {
        let mut state = self.state.lock();
        state.errors.clear();
        state.active.reset_running_context();
    }

    /// Errors collected while serving, then the active definition's end-of-context
    /// errors, each attributed to this service.
    pub fn end_running_context(&self) -> Vec<ServiceError> {
        let state = self.state.lock();
        state
            .errors
            .iter()
            .cloned()
            .chain(state.active.end_running_context())
            .map(|error| ServiceError {
                service: self.name.clone(),
                error,
            })
            .collect()
    }

    /// Answer one buffered request with the active definition.
    pub fn serve(&self, request: &MockRequest) -> MockResponse {
        let mut response = MockResponse::default();
        let mut state = self.state.lock();
        let errors = state.active.execute(&mut response, request);
        if !errors.is_empty() {
            warn!(
                "Mock {}: {} error(s) for {} {}",
                self.name,
                errors.len(),
                request.method,
                request.path()
            );
        }
        state.errors.extend(errors);
        response
    }

    /// Bind the listener and start accepting connections.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr, ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyStarted(self.name.clone()));
        }

        let listener = TcpListener::bind(self.listen_addr)
            .await
            .map_err(|source| self.bind_error(source))?;
        let addr = listener
            .local_addr()
            .map_err(|source| self.bind_error(source))?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(accept_loop(Arc::clone(self), listener, shutdown_rx));
        info!("Mock {} listening on {}", self.name, addr);

        *self.server.lock() = Some(RunningServer {
            addr,
            shutdown_tx,
            task,
        });
        Ok(addr)
    }

    /// Stop accepting and wait for open connections to finish, up to `deadline`.
    /// Connections still open at the deadline are aborted.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), ServerError> {
        let running = self
            .server
            .lock()
            .take()
            .ok_or_else(|| ServerError::NotStarted(self.name.clone()))?;

        let _ = running.shutdown_tx.send(());
        let mut task = running.task;
        match tokio::time::timeout(deadline, &mut task).await {
            Ok(_) => {
                info!("Mock {} on {} stopped", self.name, running.addr);
                Ok(())
            }
            Err(_) => {
                task.abort();
                warn!(
                    "Mock {} did not stop within {:?}, connections aborted",
                    self.name, deadline
                );
                Err(ServerError::ShutdownTimeout(self.name.clone()))
            }
        }
    }

    fn bind_error(&self, source: std::io::Error) -> ServerError {
        ServerError::Bind {
            service: self.name.clone(),
            addr: self.listen_addr,
            source,
        }
    }
}

impl std::fmt::Debug for ServiceMock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceMock")
            .field("name", &self.name)
            .field("listen_addr", &self.listen_addr)
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    mock: Arc<ServiceMock>,
    listener: TcpListener,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let graceful = GracefulShutdown::new();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let service_mock = Arc::clone(&mock);
                        let service = service_fn(move |req| {
                            handle_request(Arc::clone(&service_mock), req)
                        });
                        let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
                        let conn = graceful.watch(conn);
                        let name = mock.name.clone();
                        connections.spawn(async move {
                            if let Err(e) = conn.await {
                                debug!("Connection from {} to mock {} closed: {}", peer, name, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error on mock {}: {}", mock.name, e);
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            _ = shutdown_rx.recv() => {
                info!("Mock {} shutting down", mock.name);
                break;
            }
        }
    }

    drop(listener);
    graceful.shutdown().await;
}

async fn handle_request(
    mock: Arc<ServiceMock>,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, ConnectionError> {
    let request = MockRequest::from_hyper(req).await?;
    debug!("Mock {} received {} {}", mock.name, request.method, request.uri);

    let response = mock.serve(&request);
    if response.drop_connection {
        debug!("Mock {} dropping connection", mock.name);
        return Err(ConnectionError::Dropped);
    }
    Ok(response.into_hyper())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::constraint::RequestConstraint;
    use crate::mocks::reply::{ConstantReply, ReplyStrategy};
    use hyper::{HeaderMap, Method, StatusCode, Uri};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn request(method: Method) -> MockRequest {
        MockRequest::new(method, Uri::from_static("/"), HeaderMap::new(), "")
    }

    fn constant(body: &'static str, calls: Option<usize>) -> Definition {
        Definition::new(
            "$",
            vec![RequestConstraint::method_is("GET")],
            Some(ReplyStrategy::Constant(ConstantReply::new(
                body,
                StatusCode::OK,
                Vec::new(),
            ))),
            calls,
        )
    }

    #[test]
    fn test_errors_accumulate_and_are_wrapped_once() {
        let mock = ServiceMock::new("billing", constant("ok", Some(1)));
        mock.serve(&request(Method::POST));
        mock.serve(&request(Method::GET));

        let errors = mock.end_running_context();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.service == "billing"));
        assert!(matches!(errors[0].error, MockError::Constraint { .. }));
        assert!(matches!(
            errors[1].error,
            MockError::CallCount {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert!(!errors[0].to_string().starts_with("mock billing: mock billing"));
    }

    #[test]
    fn test_reset_running_context_clears_errors() {
        let mock = ServiceMock::new("billing", constant("ok", None));
        mock.serve(&request(Method::POST));
        mock.reset_running_context();
        assert!(mock.end_running_context().is_empty());
        assert_eq!(mock.active_definition().calls(), 0);
    }

    #[test]
    fn test_set_and_reset_definition() {
        let mock = ServiceMock::new("billing", constant("default", None));
        mock.set_definition(constant("custom", None));
        assert_eq!(mock.serve(&request(Method::GET)).body, "custom");
        mock.reset_definition();
        assert_eq!(mock.serve(&request(Method::GET)).body, "default");
    }

    #[test]
    fn test_concurrent_calls_are_all_counted() {
        let mock = ServiceMock::new("billing", constant("ok", None));
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        mock.serve(&request(Method::GET));
                    }
                });
            }
        });
        assert_eq!(mock.active_definition().calls(), 400);
    }

    #[test]
    fn test_server_addr_before_start() {
        let mock = ServiceMock::new("billing", Definition::nop());
        assert!(matches!(
            mock.server_addr(),
            Err(ServerError::NotStarted(name)) if name == "billing"
        ));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let mock = Arc::new(ServiceMock::new("billing", Definition::nop()));
        let addr = mock.start().await.unwrap();
        assert_eq!(mock.server_addr().unwrap(), addr);
        assert!(addr.ip().is_loopback());
        assert!(matches!(
            mock.start().await,
            Err(ServerError::AlreadyStarted(_))
        ));

        mock.shutdown(Duration::from_secs(5)).await.unwrap();
        assert!(!mock.is_running());
        assert!(matches!(
            mock.shutdown(Duration::from_secs(1)).await,
            Err(ServerError::NotStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_deadline_cuts_off_unfinished_requests() {
        let mock = Arc::new(ServiceMock::new("billing", Definition::nop()));
        let addr = mock.start().await.unwrap();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"POST /charge HTTP/1.1\r\nHost: billing\r\nContent-Length: 100\r\n\r\npartial")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(matches!(
            mock.shutdown(Duration::from_millis(50)).await,
            Err(ServerError::ShutdownTimeout(name)) if name == "billing"
        ));
        assert!(!mock.is_running());

        let mut buf = [0u8; 64];
        let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert_eq!(mock.active_definition().calls(), 0);
    }
}
