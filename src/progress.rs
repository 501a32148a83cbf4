//! Progress-callback trait for per-window events.
//!
//! Inject an [`Arc<dyn WindowProgressCallback>`] via
//! [`crate::config::WindowConfigBuilder::progress_callback`] to observe a run
//! as it walks the window sequence. Windows are produced lazily, so the total
//! number of windows is only known once the run completes; `on_run_start`
//! reports the number of input units instead.
//!
//! # Example
//!
//! ```rust
//! use edgequake_incise::{PageRange, WindowConfig, WindowProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl WindowProgressCallback for CountingCallback {
//!     fn on_window_complete(&self, ordinal: usize, range: PageRange, reply_len: usize) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Window {} ({}) done, {} bytes", ordinal, range, reply_len);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = WindowConfig::builder()
//!     .progress_callback(counter as Arc<dyn WindowProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::pipeline::group::PageRange;
use std::sync::Arc;

/// Called by the driver as it processes each window.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. `ordinal` is 1-based.
pub trait WindowProgressCallback: Send + Sync {
    /// Called once before the first window, with the number of input units.
    fn on_run_start(&self, total_units: usize) {
        let _ = total_units;
    }

    /// Called just before a window is sent to the processor.
    fn on_window_start(&self, ordinal: usize, range: PageRange) {
        let _ = (ordinal, range);
    }

    /// Called when a window reply was received and parsed.
    ///
    /// `reply_len` is the byte length of the raw reply.
    fn on_window_complete(&self, ordinal: usize, range: PageRange, reply_len: usize) {
        let _ = (ordinal, range, reply_len);
    }

    /// Called instead of start/complete when a checkpoint already covers the window.
    fn on_window_skipped(&self, ordinal: usize, range: PageRange) {
        let _ = (ordinal, range);
    }

    /// Called when a window failed after all retries.
    fn on_window_error(&self, ordinal: usize, range: PageRange, error: &str) {
        let _ = (ordinal, range, error);
    }

    /// Called once after every window has been attempted.
    fn on_run_complete(&self, total_windows: usize, success_count: usize) {
        let _ = (total_windows, success_count);
    }
}

/// A no-op implementation, the default when no callback is configured.
pub struct NoopProgressCallback;

impl WindowProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::WindowConfig`].
pub type ProgressCallback = Arc<dyn WindowProgressCallback>;
