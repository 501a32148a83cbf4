//! Engine stages, one module per transformation step.
//!
//! ## Data Flow
//!
//! ```text
//! units ──▶ segment ──▶ group ──▶ request ──▶ llm ──▶ response ──▶ merge
//!             │           │         (clip)           (checkpoint)
//!             └─ recover ─┘
//! ```
//!
//! 1. [`segment`] : nest units into a segment tree by incision join level and
//!    emit token-bounded atomic items
//! 2. [`group`]   : pack items into head / body / tail windows; lazy
//! 3. [`request`] : clip a window's payloads to its budget via [`clip`]
//! 4. [`llm`]     : send the request, retry with backoff; the only stage with
//!    network I/O
//! 5. [`response`]: parse reply XML into fragments
//! 6. [`merge`]   : deduplicate across overlapping windows
//!
//! [`recover`] is the push-back stream shared by the segment builder and the
//! grouper; [`checkpoint`] persists replies so a rerun skips finished windows.

pub mod checkpoint;
pub mod clip;
pub mod group;
pub mod llm;
pub mod merge;
pub mod recover;
pub mod request;
pub mod response;
pub mod segment;
