//! # edgequake-incise
//!
//! Feed long structured documents to an LLM in token-budgeted windows, then
//! stitch the replies back into one document.
//!
//! ## Why this crate?
//!
//! A book-length document does not fit in one request, and cutting it every
//! N tokens splits paragraphs, tables and citations in half. Instead each
//! source unit (a page, a section) carries an *incision* grade at both of its
//! edges saying how safe it is to cut there. Units that cohere strongly are
//! nested into segments, segments are packed into windows with look-back and
//! look-ahead context, oversized units are clipped without breaking their
//! XML, and the per-window replies are deduplicated where windows overlapped.
//!
//! ## Pipeline Overview
//!
//! ```text
//! units (XML, indexed)
//!  │
//!  ├─ 1. Guard    force hard edges at corpus ends and index gaps
//!  ├─ 2. Segment  nest units by join level, split oversized segments
//!  ├─ 3. Group    pack items into head / body / tail windows
//!  ├─ 4. Clip     truncate oversized context to the exact token budget
//!  ├─ 5. Process  one LLM call per window (checkpointed, retried)
//!  └─ 6. Merge    containment-vote duplicates, reference-count citations
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_incise::{convert, load_units, LlmProcessor, TokenizerChoice, WindowConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tokenizer = TokenizerChoice::Cl100k.build()?;
//!     let corpus = std::fs::read_to_string("book.xml")?;
//!     let units = load_units(&corpus, tokenizer.as_ref())?;
//!
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / ...
//!     let config = WindowConfig::builder().max_tokens(6000).build()?;
//!     let processor = LlmProcessor::from_config(&config).await?;
//!     let output = convert(units, tokenizer.as_ref(), &processor, &config).await?;
//!     println!("{}", output.xml());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `incise` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod incision;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod tokens;
pub mod unit;
pub mod xml;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{WindowConfig, WindowConfigBuilder};
pub use convert::{convert, convert_to_file, plan};
pub use error::{InciseError, WindowError};
pub use incision::Incision;
pub use output::{ConversionOutput, ConversionStats, WindowResult};
pub use pipeline::clip::clip;
pub use pipeline::group::{group, Budget, PageRange, Window, WindowGrouper};
pub use pipeline::llm::{LlmProcessor, WindowProcessor, WindowReply};
pub use pipeline::merge::{merge, Document, MergeIssue, WindowOutput};
pub use pipeline::request::WindowRequest;
pub use pipeline::segment::{build_segments, build_tree, Item, Segment};
pub use progress::{NoopProgressCallback, ProgressCallback, WindowProgressCallback};
pub use tokens::{CharTokenizer, TiktokenTokenizer, Tokenizer, TokenizerChoice};
pub use unit::{guard_boundaries, load_units, TextUnit};
pub use xml::{Element, Node};
