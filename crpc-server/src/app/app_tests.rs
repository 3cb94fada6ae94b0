use super::{ServerArgs, WorkerDispatcher, spawn_workers};
use clap::Parser;
use crpc_common::config::{ListenAddress, ServerConfig};
use crpc_common::error::CrpcError;
use crpc_facade::jsonrpc::JsonRpcDecoder;
use crpc_server::RpcServer;
use googletest::prelude::*;
use rstest::rstest;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(5);

struct Harness {
    server: RpcServer<JsonRpcDecoder, WorkerDispatcher>,
    workers: Vec<JoinHandle<()>>,
    client: TcpStream,
}

impl Harness {
    fn start(workers: usize) -> Self {
        let (dispatcher, workers) = spawn_workers(workers).expect("workers should start");
        let server = RpcServer::listen(
            &ListenAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], 0))),
            ServerConfig::default(),
            JsonRpcDecoder,
            dispatcher,
        )
        .expect("server should listen on loopback");
        let client = TcpStream::connect(server.local_addr().expect("local addr"))
            .expect("connect should succeed");
        client
            .set_nonblocking(true)
            .expect("nonblocking client should be configurable");
        Self {
            server,
            workers,
            client,
        }
    }

    fn exchange(&mut self, request: &[u8], expected_len: usize) -> String {
        self.client
            .write_all(request)
            .expect("write request should succeed");
        let deadline = Instant::now() + DEADLINE;
        let mut received = Vec::new();
        let mut chunk = [0_u8; 4096];
        while received.len() < expected_len && Instant::now() < deadline {
            self.server.poll();
            match self.client.read(&mut chunk) {
                Ok(0) => break,
                Ok(read_len) => received.extend_from_slice(&chunk[..read_len]),
                Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(error) => panic!("read from client failed: {error}"),
            }
        }
        String::from_utf8(received).expect("responses are utf8")
    }

    fn stop(self) {
        self.server.shutdown();
        for worker in self.workers {
            worker.join().expect("worker should exit once the dispatcher is dropped");
        }
    }
}

#[rstest]
#[case(
    r#"{"jsonrpc":"2.0","method":"ping","id":1}"#,
    r#"{"jsonrpc":"2.0","result":"pong","id":1}"#
)]
#[case(
    r#"{"jsonrpc":"2.0","method":"echo","params":{"a":[1,2]},"id":"e"}"#,
    r#"{"jsonrpc":"2.0","result":{"a":[1,2]},"id":"e"}"#
)]
#[case(
    r#"{"jsonrpc":"2.0","method":"echo","id":"n"}"#,
    r#"{"jsonrpc":"2.0","result":null,"id":"n"}"#
)]
#[case(
    r#"{"jsonrpc":"2.0","method":"rpc_get_methods","id":2}"#,
    r#"{"jsonrpc":"2.0","result":["echo","ping","rpc_get_methods"],"id":2}"#
)]
#[case(
    r#"{"jsonrpc":"2.0","method":"nope","id":3}"#,
    r#"{"jsonrpc":"2.0","error":{"code":-32601,"message":"Method not found"},"id":3}"#
)]
#[case(
    r#"{"jsonrpc":"1.0","method":"ping","id":4}"#,
    r#"{"jsonrpc":"2.0","error":{"code":-32600,"message":"Invalid request"},"id":4}"#
)]
fn bundled_methods_answer_over_loopback(#[case] request: &str, #[case] expected: &str) {
    let mut harness = Harness::start(2);
    let response = harness.exchange(request.as_bytes(), expected.len());
    assert_that!(response.as_str(), eq(expected));
    harness.stop();
}

#[rstest]
fn notifications_get_no_bytes_before_later_replies() {
    let mut harness = Harness::start(1);
    let expected = r#"{"jsonrpc":"2.0","result":"pong","id":9}"#;
    let response = harness.exchange(
        br#"{"jsonrpc":"2.0","method":"ping"}{"jsonrpc":"2.0","method":"ping","id":9}"#,
        expected.len(),
    );
    assert_that!(response.as_str(), eq(expected));
    harness.stop();
}

#[rstest]
fn args_convert_into_server_config() {
    let args = ServerArgs::try_parse_from([
        "crpc-server",
        "--listen",
        "127.0.0.1:7000",
        "--max-connections",
        "8",
        "--recv-buffer-bytes",
        "1024",
    ])
    .expect("arguments should parse");
    let config = args.server_config().expect("config should be valid");

    assert_that!(config.max_connections.get(), eq(8_u16));
    assert_that!(config.recv_buffer_bytes, eq(1024_usize));
    assert_eq!(
        args.listen,
        ListenAddress::Tcp(SocketAddr::from(([127, 0, 0, 1], 7000)))
    );
}

#[rstest]
#[case("--max-connections", "0")]
#[case("--recv-buffer-bytes", "0")]
fn args_reject_empty_pools_and_buffers(#[case] flag: &str, #[case] value: &str) {
    let args =
        ServerArgs::try_parse_from(["crpc-server", flag, value]).expect("arguments should parse");
    assert_that!(
        matches!(args.server_config(), Err(CrpcError::InvalidConfig(_))),
        eq(true)
    );
}

#[rstest]
fn args_reject_unparseable_listen_address() {
    let parsed = ServerArgs::try_parse_from(["crpc-server", "--listen", "nowhere"]);
    assert_that!(parsed.is_err(), eq(true));
}
