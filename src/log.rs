//! Thin colored logging helpers on top of the `log` facade.
//!
//! Callers build their message with `color_print::cformat!` and hand the
//! finished string to one of the level functions below.

use std::io::Write;

const TARGET: &str = "ping_pong_ring";

/// Installs `env_logger` as the global logger.
///
/// `RUST_LOG` takes precedence; otherwise `verbose` selects `debug` over `info`.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    let env = env_logger::Env::default().default_filter_or(default_level);

    let _ = env_logger::Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                buf.timestamp_millis(),
                record.level(),
                record.args()
            )
        })
        .try_init();
}

pub fn debug(msg: &str) {
    ::log::debug!(target: TARGET, "{msg}");
}

pub fn info(msg: &str) {
    ::log::info!(target: TARGET, "{msg}");
}

pub fn warn(msg: &str) {
    ::log::warn!(target: TARGET, "{msg}");
}

pub fn error(msg: &str) {
    ::log::error!(target: TARGET, "{msg}");
}
