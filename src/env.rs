use std::{cell::RefCell, ffi::OsStr};

use crate::device::{FixedLatency, Instantaneous, IoPolicy};

/// Log filter used when `MIX_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Clone, Debug)]
struct Env {
    log_filter: String,
    io_latency: u64,
}

thread_local! {
    /// Must only be mutated within `set_env`
    static ENV: RefCell<Option<Env>> = const { RefCell::new(None) };
}

pub fn init() {
    let value = Env {
        log_filter: var_or("MIX_LOG", DEFAULT_LOG_FILTER),
        io_latency: parse_latency(std::env::var("MIX_IO_LATENCY").ok().as_deref()),
    };
    set_env(value);
}

/// `tracing_subscriber::EnvFilter` directives.
pub fn log_filter() -> String {
    with_env(|env| env.log_filter.clone())
}

/// Time units every device stays busy after an operation, on top of its transfer time.
pub fn io_latency() -> u64 {
    with_env(|env| env.io_latency)
}

/// Device timing to run with: instantaneous unless a latency is configured.
pub fn io_policy() -> Box<dyn IoPolicy> {
    match io_latency() {
        0 => Box::new(Instantaneous),
        latency => Box::new(FixedLatency(latency)),
    }
}

fn set_env(value: Env) {
    ENV.with(|env| {
        let mut env = env.borrow_mut();
        assert!(
            env.is_none(),
            "tried to initialize environment state multiple times"
        );
        *env = Some(value);
    });
}

fn with_env<F, R>(callback: F) -> R
where
    F: Fn(&Env) -> R,
{
    ENV.with(|env| {
        let env = env.borrow();
        let env = env.as_ref().unwrap_or_else(|| {
            panic!("tried to access environment state before initialization");
        });
        callback(env)
    })
}

fn var_or(name: impl AsRef<OsStr>, default: &str) -> String {
    std::env::var(name.as_ref())
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Unset or unparsable values mean no latency.
fn parse_latency(value: Option<&str>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latency_values() {
        assert_eq!(parse_latency(None), 0);
        assert_eq!(parse_latency(Some("25")), 25);
        assert_eq!(parse_latency(Some(" 7 ")), 7);
        assert_eq!(parse_latency(Some("soon")), 0);
        assert_eq!(parse_latency(Some("-3")), 0);
    }
}
