//! One-time imaging runtime initialization
//!
//! The pixel kernels used by pipelines come in an accelerated flavor (when
//! the CPU advertises the right vector extensions) and a portable scalar
//! flavor. Selecting and self-testing a flavor happens once per OS process:
//! the chosen backend and the "already initialized" flag survive a simulator
//! restart and are never reset.
//!
//! Initialization is best-effort layered: the accelerated probe is tried
//! first, and on failure the scalar path is verified instead. Only a scalar
//! self-test failure is fatal to `Simulator::init`.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::error::{Result, SimError};
use crate::types::Frame;

/// Set at most once per OS process; read at startup, never reset by restart
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// The backend selected by `init_imaging_runtime`, as a `PixelBackend` discriminant
static BACKEND: AtomicU8 = AtomicU8::new(0);

/// Which pixel-kernel flavor the runtime selected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelBackend {
    /// Not initialized yet
    Unselected,
    /// Vector-extension path
    Accelerated,
    /// Portable scalar path
    Scalar,
}

impl PixelBackend {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PixelBackend::Accelerated,
            2 => PixelBackend::Scalar,
            _ => PixelBackend::Unselected,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PixelBackend::Unselected => 0,
            PixelBackend::Accelerated => 1,
            PixelBackend::Scalar => 2,
        }
    }
}

/// Whether the one-time setup already ran in this OS process
pub fn imaging_runtime_initialized() -> bool {
    INITIALIZED.load(Ordering::SeqCst)
}

/// The backend selected at initialization
pub fn pixel_backend() -> PixelBackend {
    PixelBackend::from_u8(BACKEND.load(Ordering::SeqCst))
}

/// Run the one-time imaging runtime setup.
///
/// Subsequent calls (including from a restarted simulator instance) are
/// no-ops. Returns an error only when the scalar fallback also fails, which
/// is fatal to startup.
pub fn init_imaging_runtime() -> Result<()> {
    if INITIALIZED.load(Ordering::SeqCst) {
        tracing::debug!("Imaging runtime already initialized, skipping");
        return Ok(());
    }

    tracing::info!("Initializing imaging runtime...");

    let backend = match init_accelerated() {
        Ok(()) => {
            tracing::info!("Using accelerated pixel kernels");
            PixelBackend::Accelerated
        }
        Err(e) => {
            tracing::warn!("Accelerated kernels unavailable ({}), falling back to scalar", e);
            init_scalar()?;
            tracing::info!("Using scalar pixel kernels");
            PixelBackend::Scalar
        }
    };

    BACKEND.store(backend.as_u8(), Ordering::SeqCst);
    INITIALIZED.store(true, Ordering::SeqCst);
    Ok(())
}

/// Probe for vector extensions and self-test the accelerated path
fn init_accelerated() -> Result<()> {
    if !vector_extensions_available() {
        return Err(SimError::ImagingRuntime(
            "required CPU vector extensions not detected".to_string(),
        ));
    }
    self_test().map_err(|e| e.with_context("accelerated kernel self-test failed"))
}

/// Verify the portable scalar path
fn init_scalar() -> Result<()> {
    self_test().map_err(|e| e.with_context("scalar kernel self-test failed"))
}

#[cfg(target_arch = "x86_64")]
fn vector_extensions_available() -> bool {
    std::arch::is_x86_feature_detected!("avx2")
}

#[cfg(target_arch = "aarch64")]
fn vector_extensions_available() -> bool {
    std::arch::is_aarch64_feature_detected!("neon")
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn vector_extensions_available() -> bool {
    false
}

/// Run a luminance kernel over a known frame and check the result.
///
/// Catches miscompiled or misdetected kernels before the loop starts
/// feeding real frames through them.
fn self_test() -> Result<()> {
    let mut frame = Frame::new(4, 4);
    frame.fill([200, 100, 50, 255]);

    let expected = ((200u32 * 299 + 100 * 587 + 50 * 114) / 1000) as u8;
    for y in 0..4 {
        for x in 0..4 {
            let got = frame.luminance(x, y).ok_or_else(|| {
                SimError::ImagingRuntime("self-test frame reported no pixels".to_string())
            })?;
            if got != expected {
                return Err(SimError::ImagingRuntime(format!(
                    "luminance kernel produced {} (expected {})",
                    got, expected
                )));
            }
        }
    }
    Ok(())
}
