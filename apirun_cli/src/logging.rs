//! Logging setup: `loggerv` initialized once at the top of `main`.

/// Initializes the global logger once. `-v`/`-vv` raise verbosity; `RUST_LOG`
/// or `APIRUN_LOG` (read by `env_logger`-compatible tooling elsewhere) is left
/// to override module-level filtering if the operator sets it.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => log::Level::Info,
        1 => log::Level::Debug,
        _ => log::Level::Trace,
    };
    if let Err(e) = loggerv::Logger::new().verbosity(verbosity as u64).level(true).module_path(false).init() {
        eprintln!("warning: logger already initialized: {}", e);
    }
    log::debug!("logging initialized at {:?}", level);
}
