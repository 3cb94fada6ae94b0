//! SIGINT/SIGTERM handling for graceful shutdown.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crpc_common::error::{CrpcError, CrpcResult};

/// Installs the process signal handler.
///
/// The returned flag flips to `true` on the first signal. A second signal exits immediately.
pub(crate) fn install_signal_handler() -> CrpcResult<Arc<AtomicBool>> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    ctrlc::set_handler(move || {
        if shutdown_flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("received second signal, forcing immediate exit");
            std::process::exit(1);
        }
        tracing::info!("received shutdown signal, draining poll loop");
    })
    .map_err(|error| CrpcError::Io(format!("install signal handler failed: {error}")))?;

    Ok(shutdown)
}
