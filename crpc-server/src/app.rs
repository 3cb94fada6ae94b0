//! Process composition root for `crpc-server`.

use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use clap::Parser;
use crpc_common::config::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_RECV_BUFFER_BYTES, ListenAddress, ServerConfig,
};
use crpc_common::error::{CrpcError, CrpcResult};
use crpc_common::ids::SlotCount;
use crpc_facade::jsonrpc::{JsonRpcDecoder, JsonRpcMessage, MethodCall};
use crpc_facade::protocol::RpcErrorCode;
use crpc_server::{PollReport, RequestHandler, RpcRequest, RpcServer};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{logging, signal};

/// Methods served by the bundled handlers.
const METHODS: [&str; 3] = ["echo", "ping", "rpc_get_methods"];

#[derive(Debug, Parser)]
#[command(name = "crpc-server")]
#[command(about = "Control-plane JSON-RPC server")]
pub(crate) struct ServerArgs {
    /// Listen address: `host:port` or `unix:/path`
    #[arg(long, default_value = "127.0.0.1:5260")]
    listen: ListenAddress,

    /// Connection slots; extra clients wait in the kernel backlog
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    max_connections: u16,

    /// Per-connection receive buffer size in bytes
    #[arg(long, default_value_t = DEFAULT_RECV_BUFFER_BYTES)]
    recv_buffer_bytes: usize,

    /// Threads executing decoded calls
    #[arg(long, default_value_t = 2)]
    workers: usize,

    /// Log filter used when `RUST_LOG` is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Sleep between poll cycles, in microseconds
    #[arg(long, default_value_t = 100)]
    idle_sleep_us: u64,
}

impl ServerArgs {
    fn server_config(&self) -> CrpcResult<ServerConfig> {
        let max_connections = SlotCount::new(self.max_connections).ok_or(
            CrpcError::InvalidConfig("max connections must be greater than zero"),
        )?;
        let config = ServerConfig {
            max_connections,
            recv_buffer_bytes: self.recv_buffer_bytes,
        };
        config.validate()?;
        Ok(config)
    }
}

type Job = (RpcRequest, MethodCall);

/// Poller-side handler that answers invalid requests inline and fans calls out to workers.
#[derive(Debug)]
pub(crate) struct WorkerDispatcher {
    senders: Vec<mpsc::Sender<Job>>,
    next_worker: usize,
}

impl RequestHandler<JsonRpcMessage> for WorkerDispatcher {
    fn handle(&mut self, request: RpcRequest, message: JsonRpcMessage) {
        let call = match message {
            JsonRpcMessage::Call(call) => call,
            JsonRpcMessage::Invalid { id, code } => {
                debug!(connection = %request.connection(), code = code.code(), "rejecting request");
                request.respond_error(id.as_ref(), code);
                return;
            }
        };

        let worker = self.next_worker % self.senders.len();
        self.next_worker = self.next_worker.wrapping_add(1);
        if let Err(mpsc::SendError((request, call))) = self.senders[worker].send((request, call)) {
            warn!(worker, "worker is gone, executing call on the poller thread");
            execute_call(request, call);
        }
    }
}

/// Starts `count` worker threads (at least one).
pub(crate) fn spawn_workers(count: usize) -> CrpcResult<(WorkerDispatcher, Vec<JoinHandle<()>>)> {
    let count = count.max(1);
    let mut senders = Vec::with_capacity(count);
    let mut handles = Vec::with_capacity(count);
    for index in 0..count {
        let (sender, receiver) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(format!("crpc-worker-{index}"))
            .spawn(move || {
                for (request, call) in receiver {
                    execute_call(request, call);
                }
            })
            .map_err(|error| CrpcError::Io(format!("spawn worker {index} failed: {error}")))?;
        senders.push(sender);
        handles.push(handle);
    }
    Ok((
        WorkerDispatcher {
            senders,
            next_worker: 0,
        },
        handles,
    ))
}

pub(crate) fn execute_call(request: RpcRequest, call: MethodCall) {
    let MethodCall { method, params, id } = call;
    let result = match method.as_str() {
        "ping" => Ok(Value::from("pong")),
        "echo" => Ok(params.unwrap_or(Value::Null)),
        "rpc_get_methods" => Ok(Value::from(METHODS.to_vec())),
        _ => Err(RpcErrorCode::MethodNotFound),
    };

    let Some(id) = id else {
        debug!(%method, "notification handled");
        request.finish();
        return;
    };
    match result {
        Ok(value) => request.respond_result(Some(&id), &value),
        Err(code) => request.respond_error(Some(&id), code),
    }
}

/// Parses arguments, runs the poll loop until a shutdown signal, then joins the workers.
pub fn run() -> CrpcResult<()> {
    let args = ServerArgs::parse();
    logging::init(&args.log_level);
    let shutdown = signal::install_signal_handler()?;
    let config = args.server_config()?;

    let (dispatcher, workers) = spawn_workers(args.workers)?;
    let mut server = RpcServer::listen(&args.listen, config, JsonRpcDecoder, dispatcher)?;
    info!(
        listen = %args.listen,
        workers = workers.len(),
        "crpc-server ready"
    );

    let idle_sleep = Duration::from_micros(args.idle_sleep_us);
    while !shutdown.load(Ordering::Relaxed) {
        let report = server.poll();
        if report != PollReport::default() {
            debug!(?report, "poll cycle changed connection set");
        }
        if !idle_sleep.is_zero() {
            thread::sleep(idle_sleep);
        }
    }

    // Dropping the server drops the dispatcher, which closes every worker channel.
    server.shutdown();
    for worker in workers {
        if worker.join().is_err() {
            warn!("worker thread panicked");
        }
    }
    Ok(())
}

#[cfg(test)]
mod app_tests;
