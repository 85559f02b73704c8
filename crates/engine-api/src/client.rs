use std::{ffi::CString, os::unix::prelude::FileTypeExt};

use futures::{Stream, StreamExt};
use http_body_util::{BodyExt, Either, Empty, Full};
use hyper::body::{Buf, Bytes, Incoming};
use hyper::{Method, Request, Response, Uri};
use hyper_util::client::legacy::Client;
use hyperlocal::{UnixClientExt, UnixConnector};
use iotap_core::{Event, ProbeStatus};
use serde::{Serialize, de::DeserializeOwned};
use tokio_tungstenite::{client_async, tungstenite::Message};

use crate::{
    dto::{BroadcastState, PidList},
    error::{EngineClientError, SocketProblem, WebsocketError},
};

type RequestBody = Either<Full<Bytes>, Empty<Bytes>>;

#[derive(Debug, Clone)]
pub struct EngineApiClient {
    socket: String,
    client: Client<UnixConnector, RequestBody>,
}

impl EngineApiClient {
    pub fn new() -> Result<Self, EngineClientError> {
        Self::unix(super::DEFAULT_UDS.to_owned())
    }

    pub fn unix(socket: String) -> Result<Self, EngineClientError> {
        // Check if input exists and if it is a unix socket
        let problem = match std::fs::metadata(&socket) {
            Err(err) => Some(match err.kind() {
                std::io::ErrorKind::NotFound => SocketProblem::NotFound,
                std::io::ErrorKind::PermissionDenied => SocketProblem::PermissionDenied,
                _ => SocketProblem::Metadata,
            }),
            Ok(metadata) if !metadata.file_type().is_socket() => Some(SocketProblem::NotASocket),
            Ok(_) => None,
        };
        if let Some(problem) = problem {
            return Err(EngineClientError::socket(socket, problem));
        }

        // Metadata doesn't tell the effective permissions when running
        // through sudo, ask the kernel instead.
        let cstring = CString::new(socket.as_str())?;
        let write_permission = unsafe { libc::access(cstring.as_ptr(), libc::W_OK) } == 0;
        if !write_permission {
            return Err(EngineClientError::socket(
                socket,
                SocketProblem::PermissionDenied,
            ));
        }

        Ok(Self {
            socket,
            client: Client::unix(),
        })
    }

    fn uri<T: AsRef<str>>(&self, path: T) -> Uri {
        hyperlocal::Uri::new(self.socket.clone(), path.as_ref()).into()
    }

    async fn send(
        &self,
        method: Method,
        uri: Uri,
        body: RequestBody,
    ) -> Result<Response<Incoming>, EngineClientError> {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)?;

        let res = self.client.request(req).await?;

        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }

        let error = res.collect().await?.to_bytes();
        let message = std::str::from_utf8(&error)?.to_string();
        Err(EngineClientError::UnexpectedResponse {
            status: status.as_u16(),
            message,
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, EngineClientError> {
        let res = self
            .send(Method::GET, self.uri(path), Either::Right(Empty::new()))
            .await?;
        let buf = res.collect().await?.aggregate();
        Ok(serde_json::from_reader(buf.reader())?)
    }

    async fn send_json<B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: &B,
    ) -> Result<(), EngineClientError> {
        let body = serde_json::to_string(body)?;
        self.send(method, self.uri(path), Either::Left(Full::from(body)))
            .await?;
        Ok(())
    }

    async fn send_empty(&self, method: Method, path: &str) -> Result<(), EngineClientError> {
        self.send(method, self.uri(path), Either::Right(Empty::new()))
            .await?;
        Ok(())
    }

    pub async fn status(&self) -> Result<ProbeStatus, EngineClientError> {
        self.get("/status").await
    }

    pub async fn targets(&self) -> Result<Vec<u32>, EngineClientError> {
        self.get("/targets").await
    }

    pub async fn add_targets(&self, pids: Vec<u32>) -> Result<(), EngineClientError> {
        self.send_json(Method::POST, "/targets", &PidList { pids })
            .await
    }

    pub async fn remove_target(&self, pid: u32) -> Result<(), EngineClientError> {
        self.send_empty(Method::DELETE, &format!("/targets/{pid}"))
            .await
    }

    pub async fn clear_targets(&self) -> Result<(), EngineClientError> {
        self.send_empty(Method::POST, "/targets/clear").await
    }

    pub async fn broadcast(&self) -> Result<bool, EngineClientError> {
        let state: BroadcastState = self.get("/broadcast").await?;
        Ok(state.enabled)
    }

    pub async fn set_broadcast(&self, enabled: bool) -> Result<(), EngineClientError> {
        self.send_json(Method::PUT, "/broadcast", &BroadcastState { enabled })
            .await
    }

    pub async fn exclusions(&self) -> Result<Vec<u32>, EngineClientError> {
        self.get("/exclusions").await
    }

    pub async fn add_exclusions(&self, pids: Vec<u32>) -> Result<(), EngineClientError> {
        self.send_json(Method::POST, "/exclusions", &PidList { pids })
            .await
    }

    pub async fn remove_exclusion(&self, pid: u32) -> Result<(), EngineClientError> {
        self.send_empty(Method::DELETE, &format!("/exclusions/{pid}"))
            .await
    }

    pub async fn event_monitor(
        &self,
    ) -> Result<impl Stream<Item = Result<Event, WebsocketError>>, EngineClientError> {
        let stream = tokio::net::UnixStream::connect(&self.socket).await?;

        // host is ignored, the connection is the unix stream
        let (ws_stream, _) = client_async("ws://localhost/monitor", stream)
            .await
            .map_err(Box::new)?;

        let (_, read_stream) = ws_stream.split();

        let events_stream = read_stream.map(|item| {
            item.map_err(WebsocketError::from).and_then(|msg| {
                if let Message::Text(json) = msg {
                    let event: Event = serde_json::from_str(&json)?;
                    Ok(event)
                } else {
                    Err(WebsocketError::UnsupportedMessageType)
                }
            })
        });

        Ok(events_stream)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::SystemTime};

    use bpf_filtering::{MemoryTables, controller::start_controller};
    use iotap_common::{ControlTables, Decision, OperationKind, RawEvent, decide};
    use iotap_core::Bus;
    use tempfile::TempDir;

    use super::*;
    use crate::server::{EngineAPIContext, ServerHandle, run_api_server};

    struct TestServer {
        _dir: TempDir,
        tables: MemoryTables,
        bus: Bus,
        server: ServerHandle,
        client: EngineApiClient,
    }

    fn start() -> TestServer {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("iotap.sock").to_string_lossy().into_owned();
        let tables = MemoryTables::default();
        let bus = Bus::new();
        let ctx = EngineAPIContext {
            bus: bus.clone(),
            probe: start_controller(tables.clone(), Arc::default()),
        };
        let server = run_api_server(ctx, Some(&socket)).unwrap();
        let client = EngineApiClient::unix(socket).unwrap();
        TestServer {
            _dir: dir,
            tables,
            bus,
            server,
            client,
        }
    }

    #[tokio::test]
    async fn targets_roundtrip() {
        let t = start();
        t.client.set_broadcast(true).await.unwrap();
        t.client.add_targets(vec![7, 3]).await.unwrap();

        assert_eq!(t.client.targets().await.unwrap(), vec![3, 7]);
        assert!(!t.client.broadcast().await.unwrap());
        assert_eq!(decide(&t.tables, 7), Decision::Emit);

        t.client.remove_target(7).await.unwrap();
        assert_eq!(t.client.targets().await.unwrap(), vec![3]);
        t.client.clear_targets().await.unwrap();
        assert!(t.client.targets().await.unwrap().is_empty());
        t.server.stop().await;
    }

    #[tokio::test]
    async fn exclusions_and_broadcast() {
        let t = start();
        t.client.set_broadcast(true).await.unwrap();
        t.client.add_exclusions(vec![100]).await.unwrap();

        assert_eq!(t.client.exclusions().await.unwrap(), vec![100]);
        assert_eq!(decide(&t.tables, 100), Decision::Suppress);
        assert_eq!(decide(&t.tables, 200), Decision::Emit);

        t.client.remove_exclusion(100).await.unwrap();
        assert_eq!(decide(&t.tables, 100), Decision::Emit);
        assert_eq!(t.tables.broadcast_flag(), Some(1));
        t.server.stop().await;
    }

    #[tokio::test]
    async fn status() {
        let t = start();
        t.client.add_targets(vec![11]).await.unwrap();
        let status = t.client.status().await.unwrap();
        assert_eq!(status.targets, vec![11]);
        assert!(!status.broadcast);
        assert_eq!(status.received, 0);
        t.server.stop().await;
    }

    #[tokio::test]
    async fn pid_zero_is_a_bad_request() {
        let t = start();
        let err = t.client.add_targets(vec![0]).await.unwrap_err();
        assert!(matches!(
            err,
            EngineClientError::UnexpectedResponse { status: 400, ref message } if message == "invalid pid 0"
        ));
        t.server.stop().await;
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let t = start();
        let err = t
            .client
            .send(
                Method::POST,
                t.client.uri("/targets"),
                Either::Left(Full::from("{\"pids\": \"nope\"}")),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineClientError::UnexpectedResponse { status, .. } if status == 422 || status == 400
        ));
        t.server.stop().await;
    }

    #[tokio::test]
    async fn monitor_streams_bus_events() {
        let t = start();
        let mut events = Box::pin(t.client.event_monitor().await.unwrap());

        // the subscription happens during the upgrade, retry until it's there
        let event = loop {
            t.bus.send(iotap_core::Event::from_raw(
                RawEvent::new(42, OperationKind::Read),
                SystemTime::UNIX_EPOCH,
            ));
            if let Ok(Some(event)) =
                tokio::time::timeout(std::time::Duration::from_millis(50), events.next()).await
            {
                break event.unwrap();
            }
        };
        assert_eq!(event.pid, 42);
    }

    #[test]
    fn missing_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("missing.sock").to_string_lossy().into_owned();
        assert!(matches!(
            EngineApiClient::unix(socket),
            Err(EngineClientError::Socket {
                problem: SocketProblem::NotFound,
                ..
            })
        ));
    }

    #[test]
    fn regular_file_is_not_a_socket() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let path = file.path().to_string_lossy().into_owned();
        assert!(matches!(
            EngineApiClient::unix(path),
            Err(EngineClientError::Socket {
                problem: SocketProblem::NotASocket,
                ..
            })
        ));
    }
}
