// ========================================================================================
//
//                 Run-time configuration: Threads & kernel override
//
// ========================================================================================
//
// Precedence for the thread count is explicit value, then `OFFTARGET_THREADS`,
// then the host's logical CPU count. Every source is clamped to `1..=MAX_THREADS`.

use crate::decide::{KernelPath, detect_kernel_path};
use log::warn;

/// Environment variable holding a worker thread count.
pub const THREADS_ENV: &str = "OFFTARGET_THREADS";

/// Upper clamp for the worker pool.
pub const MAX_THREADS: usize = 256;

/// Resolved settings for one search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    pub threads: usize,
    pub kernel_path: KernelPath,
}

impl SearchConfig {
    /// Resolves settings from an optional explicit thread count, the environment,
    /// and the hardware probe. `force_scalar` pins the scalar kernel.
    pub fn resolve(explicit_threads: Option<usize>, force_scalar: bool) -> Self {
        let env_value = std::env::var(THREADS_ENV).ok();
        let threads = resolve_thread_count(explicit_threads, env_value.as_deref());
        let kernel_path = if force_scalar {
            KernelPath::Scalar
        } else {
            detect_kernel_path()
        };
        Self {
            threads,
            kernel_path,
        }
    }

    /// Fixed settings, bypassing the environment. Used by tests and benchmarks.
    pub fn with_threads(threads: usize, kernel_path: KernelPath) -> Self {
        Self {
            threads: threads.clamp(1, MAX_THREADS),
            kernel_path,
        }
    }
}

/// The default worker count: every logical CPU, clamped.
pub fn default_thread_count() -> usize {
    num_cpus::get().clamp(1, MAX_THREADS)
}

/// Applies the precedence rules. Invalid or zero values fall through to the
/// next source with a warning.
pub fn resolve_thread_count(explicit: Option<usize>, env_value: Option<&str>) -> usize {
    match explicit {
        Some(0) => warn!("A thread count of 0 is invalid; ignoring it"),
        Some(n) => return clamp_threads(n),
        None => {}
    }

    if let Some(raw) = env_value {
        match raw.trim().parse::<usize>() {
            Ok(n) if n > 0 => return clamp_threads(n),
            Ok(_) | Err(_) => warn!("{THREADS_ENV}='{raw}' is not a positive integer; using the default"),
        }
    }

    default_thread_count()
}

fn clamp_threads(n: usize) -> usize {
    if n > MAX_THREADS {
        warn!("Requested {n} threads; clamping to {MAX_THREADS}");
    }
    n.clamp(1, MAX_THREADS)
}
