//! End-to-end driver: units in, merged document out.
//!
//! ```text
//! units ─▶ guard ─▶ segment ─▶ group ─▶ clip ─▶ processor ─▶ parse ─▶ merge
//! ```
//!
//! Windows are processed strictly in ordinal order, one at a time. The merge
//! runs once every window has been attempted, because deduplication looks
//! ahead across window boundaries.

use crate::config::WindowConfig;
use crate::error::InciseError;
use crate::output::{ConversionOutput, ConversionStats, WindowResult};
use crate::pipeline::checkpoint::CheckpointStore;
use crate::pipeline::group::{PageRange, WindowGrouper};
use crate::pipeline::llm::WindowProcessor;
use crate::pipeline::merge::{merge, WindowOutput};
use crate::pipeline::request::WindowRequest;
use crate::pipeline::response::{parse_response, Fragment};
use crate::pipeline::segment::{build_segments, Item};
use crate::tokens::Tokenizer;
use crate::unit::{guard_boundaries, TextUnit};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Lazily planned windows for `units`, without processing anything.
///
/// # Errors
/// Returns `Err(InciseError::InvalidConfig)` when the budget leaves no room
/// for a body.
pub fn plan<I>(
    units: I,
    config: &WindowConfig,
) -> Result<WindowGrouper<std::vec::IntoIter<Item>>, InciseError>
where
    I: IntoIterator<Item = TextUnit>,
{
    let budget = config.budget()?;
    let ceiling = config.segment_ceiling()?;
    let items = build_segments(guard_boundaries(units), ceiling);
    debug!("Segmented into {} atomic items (ceiling {})", items.len(), ceiling);
    Ok(WindowGrouper::new(items, budget))
}

/// Process every window of `units` and merge the replies.
///
/// # Returns
/// `Ok(ConversionOutput)` on success, even if some windows failed
/// (check `output.stats.failed_windows`).
///
/// # Errors
/// Returns `Err(InciseError)` only for fatal errors:
/// - invalid budget (before any window is built)
/// - checkpoint directory not readable or writable
/// - abort flag raised between windows
/// - every window failed
/// - an ambiguous duplicate during the merge
pub async fn convert<I, P>(
    units: I,
    tokenizer: &dyn Tokenizer,
    processor: &P,
    config: &WindowConfig,
) -> Result<ConversionOutput, InciseError>
where
    I: IntoIterator<Item = TextUnit>,
    P: WindowProcessor,
{
    let total_start = Instant::now();
    let units: Vec<TextUnit> = units.into_iter().collect();
    let total_units = units.len();
    let windows = plan(units, config)?;
    let budget = windows.budget();
    info!(
        "Starting run: {} units, window budget {} (head {} / body {} / tail {})",
        total_units, budget.total, budget.head, budget.body, budget.tail
    );

    let store = match config.checkpoint_dir {
        Some(ref dir) => Some(CheckpointStore::open(dir).await?),
        None => None,
    };

    if let Some(ref cb) = config.progress_callback {
        cb.on_run_start(total_units);
    }

    let processing_start = Instant::now();
    let mut results: Vec<WindowResult> = Vec::new();
    let mut outputs: Vec<WindowOutput> = Vec::new();
    let mut previous: Option<PageRange> = None;

    for (i, window) in windows.enumerate() {
        if config.is_aborted() {
            warn!("Abort requested after {} windows", i);
            return Err(InciseError::Aborted { completed: i });
        }
        let range = window.range();
        if let Some(previous) = previous {
            if range.begin <= previous.end {
                return Err(InciseError::WindowSequence {
                    previous,
                    next: range,
                });
            }
        }
        previous = Some(range);

        let request = WindowRequest::prepare(&window, tokenizer);
        let (result, fragments) =
            run_window(i + 1, &request, tokenizer, processor, store.as_ref(), config).await?;
        if let Some(fragments) = fragments {
            outputs.push(WindowOutput { range, fragments });
        }
        results.push(result);
    }
    let processing_duration_ms = processing_start.elapsed().as_millis() as u64;

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    if let Some(ref cb) = config.progress_callback {
        cb.on_run_complete(results.len(), succeeded);
    }
    if !results.is_empty() && succeeded == 0 {
        let first_error = results
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(InciseError::AllWindowsFailed {
            total: results.len(),
            first_error,
        });
    }

    let document = merge(outputs)?;

    let stats = ConversionStats {
        total_units,
        total_windows: results.len(),
        processed_windows: results.iter().filter(|r| r.is_ok() && !r.skipped).count(),
        skipped_windows: results.iter().filter(|r| r.skipped).count(),
        failed_windows: results.len() - succeeded,
        fragments: document.fragments.len(),
        citations: document.citations.len(),
        total_input_tokens: results.iter().map(|r| r.input_tokens).sum(),
        total_output_tokens: results.iter().map(|r| r.output_tokens).sum(),
        total_duration_ms: total_start.elapsed().as_millis() as u64,
        processing_duration_ms,
    };

    info!(
        "Run complete: {}/{} windows ({} from checkpoints), {} fragments, {}ms total",
        succeeded,
        stats.total_windows,
        stats.skipped_windows,
        stats.fragments,
        stats.total_duration_ms
    );

    Ok(ConversionOutput {
        issues: document.issues.clone(),
        document,
        windows: results,
        stats,
    })
}

/// Run [`convert`] and write the merged document to a file.
///
/// Uses atomic write (temp file + rename) to prevent partial files.
pub async fn convert_to_file<I, P>(
    units: I,
    tokenizer: &dyn Tokenizer,
    processor: &P,
    config: &WindowConfig,
    output_path: impl AsRef<Path>,
) -> Result<ConversionOutput, InciseError>
where
    I: IntoIterator<Item = TextUnit>,
    P: WindowProcessor,
{
    let output = convert(units, tokenizer, processor, config).await?;
    let path = output_path.as_ref();
    let write_err = |e| InciseError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("xml.tmp");
    tokio::fs::write(&tmp_path, output.xml())
        .await
        .map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(write_err)?;

    Ok(output)
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Resolve one window from its checkpoint or the processor.
///
/// Window-level failures come back inside the `WindowResult`; only
/// checkpoint I/O errors are fatal.
async fn run_window<P: WindowProcessor>(
    ordinal: usize,
    request: &WindowRequest,
    tokenizer: &dyn Tokenizer,
    processor: &P,
    store: Option<&CheckpointStore>,
    config: &WindowConfig,
) -> Result<(WindowResult, Option<Vec<Fragment>>), InciseError> {
    let range = request.range;
    let start = Instant::now();
    let mut result = WindowResult {
        range,
        request_tokens: request.tokens(tokenizer),
        skipped: false,
        input_tokens: 0,
        output_tokens: 0,
        retries: 0,
        duration_ms: 0,
        error: None,
    };

    if let Some(store) = store {
        if let Some(content) = store.lookup(range).await? {
            match parse_response(&content, range) {
                Ok(fragments) => {
                    debug!("Window {}: served from checkpoint", range);
                    if let Some(ref cb) = config.progress_callback {
                        cb.on_window_skipped(ordinal, range);
                    }
                    result.skipped = true;
                    return Ok((result, Some(fragments)));
                }
                Err(e) => warn!("Window {}: discarding unreadable checkpoint: {}", range, e),
            }
        }
        store.invalidate_overlapping(range).await?;
    }

    if let Some(ref cb) = config.progress_callback {
        cb.on_window_start(ordinal, range);
    }

    let parsed = match processor.process(request).await {
        Ok(reply) => {
            result.input_tokens = reply.input_tokens;
            result.output_tokens = reply.output_tokens;
            result.retries = reply.retries;
            parse_response(&reply.content, range).map(|fragments| (reply.content, fragments))
        }
        Err(e) => Err(e),
    };
    result.duration_ms = start.elapsed().as_millis() as u64;

    match parsed {
        Ok((content, fragments)) => {
            if let Some(store) = store {
                store.save(range, &content).await?;
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_window_complete(ordinal, range, content.len());
            }
            Ok((result, Some(fragments)))
        }
        Err(e) => {
            warn!("{}", e);
            if let Some(ref cb) = config.progress_callback {
                cb.on_window_error(ordinal, range, &e.to_string());
            }
            result.error = Some(e);
            Ok((result, None))
        }
    }
}
