//! Result types returned by the conversion driver.

use crate::error::WindowError;
use crate::pipeline::group::PageRange;
use crate::pipeline::merge::{Document, MergeIssue};
use serde::Serialize;

/// Outcome of one window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowResult {
    pub range: PageRange,
    /// Payload tokens of the clipped request.
    pub request_tokens: usize,
    /// Served from a checkpoint without calling the processor.
    pub skipped: bool,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub retries: u32,
    pub duration_ms: u64,
    pub error: Option<WindowError>,
}

impl WindowResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregate statistics of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    pub total_units: usize,
    pub total_windows: usize,
    pub processed_windows: usize,
    pub skipped_windows: usize,
    pub failed_windows: usize,
    pub fragments: usize,
    pub citations: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
    pub processing_duration_ms: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    #[serde(skip)]
    pub document: Document,
    pub windows: Vec<WindowResult>,
    pub issues: Vec<MergeIssue>,
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Serialised merged document.
    pub fn xml(&self) -> String {
        self.document.to_xml()
    }
}
