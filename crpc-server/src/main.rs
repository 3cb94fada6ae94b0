//! Binary entrypoint for `crpc-server`.

mod app;
mod logging;
mod signal;

fn main() {
    if let Err(err) = app::run() {
        eprintln!("failed to start crpc-server: {err}");
        std::process::exit(1);
    }
}
