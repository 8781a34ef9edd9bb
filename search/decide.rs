// ========================================================================================
//
//                    The decision: Picking a kernel once per run
//
// ========================================================================================
//
// The choice is made by probing the host CPU before any scanning starts. The
// result is a `Kernel` handle wrapping a single function pointer; the scan loop
// calls through it and never re-evaluates the choice.

use crate::kernel::{self, BATCH_WIDTH, BatchKernelFn, GuideBatch};
use crate::types::LANE_WIDTH;
use log::{info, warn};
use std::fmt;

/// Environment variable that forces the scalar kernel when set to `1`.
pub const FORCE_SCALAR_ENV: &str = "OFFTARGET_FORCE_SCALAR";

/// Which kernel implementation a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelPath {
    /// Fixed-width lane comparison with bitmask reduction.
    Vector,
    /// Per-byte comparison with early exit.
    Scalar,
}

impl KernelPath {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Vector => vector_description(),
            Self::Scalar => "scalar (per-byte, early exit)",
        }
    }
}

impl fmt::Display for KernelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(target_arch = "x86_64")]
fn vector_description() -> &'static str {
    "AVX2 (256-bit, 32-lane byte compare)"
}

#[cfg(target_arch = "aarch64")]
fn vector_description() -> &'static str {
    "NEON (32-lane byte compare)"
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn vector_description() -> &'static str {
    "vector (unavailable on this target)"
}

/// Whether the host can run the vector kernel.
#[cfg(target_arch = "x86_64")]
pub fn host_supports_vector() -> bool {
    is_x86_feature_detected!("avx2")
}

/// Whether the host can run the vector kernel.
#[cfg(target_arch = "aarch64")]
pub fn host_supports_vector() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

/// Whether the host can run the vector kernel.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn host_supports_vector() -> bool {
    false
}

/// Picks the best kernel for this host, honouring `OFFTARGET_FORCE_SCALAR=1`.
pub fn detect_kernel_path() -> KernelPath {
    let forced = std::env::var(FORCE_SCALAR_ENV)
        .map(|v| v.trim() == "1")
        .unwrap_or(false);
    if forced {
        info!("{FORCE_SCALAR_ENV}=1: using the scalar kernel");
        return KernelPath::Scalar;
    }
    if host_supports_vector() {
        KernelPath::Vector
    } else {
        KernelPath::Scalar
    }
}

/// A resolved kernel: the only holder of a `BatchKernelFn`.
///
/// A `Kernel` for the vector path can only be constructed on a host that passed
/// the capability probe, which is what makes calling through it sound.
#[derive(Clone, Copy)]
pub struct Kernel {
    path: KernelPath,
    func: BatchKernelFn,
}

impl Kernel {
    /// The scalar kernel. Always available.
    pub fn scalar() -> Self {
        Self {
            path: KernelPath::Scalar,
            func: kernel::count_batch_scalar,
        }
    }

    /// The vector kernel, or `None` when the host lacks the instructions.
    #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
    pub fn vector() -> Option<Self> {
        host_supports_vector().then_some(Self {
            path: KernelPath::Vector,
            func: kernel::count_batch_vector,
        })
    }

    /// The vector kernel, or `None` when the host lacks the instructions.
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    pub fn vector() -> Option<Self> {
        None
    }

    /// Resolves a requested path, falling back to scalar if the vector path is
    /// not supported here.
    pub fn for_path(path: KernelPath) -> Self {
        match path {
            KernelPath::Scalar => Self::scalar(),
            KernelPath::Vector => Self::vector().unwrap_or_else(|| {
                warn!("Vector kernel requested but unsupported on this host; using scalar");
                Self::scalar()
            }),
        }
    }

    /// Probes the host and returns the best available kernel.
    pub fn detect() -> Self {
        Self::for_path(detect_kernel_path())
    }

    #[inline(always)]
    pub fn path(&self) -> KernelPath {
        self.path
    }

    /// Counts mismatches of every active slot in `batch` against `window`.
    #[inline(always)]
    pub fn count(
        &self,
        window: &[u8; LANE_WIDTH],
        batch: &GuideBatch,
        active: u8,
        out: &mut [u8; BATCH_WIDTH],
    ) {
        // SAFETY: `func` is either the always-safe scalar kernel or the vector
        // kernel, and the latter is only stored after `host_supports_vector`.
        unsafe { (self.func)(window, batch, active, out) }
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel").field("path", &self.path).finish()
    }
}
