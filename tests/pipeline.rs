//! Integration tests for the windowing pipeline.
//!
//! Every test runs offline: the model is replaced by scripted
//! [`WindowProcessor`] implementations and budgets are measured with
//! [`CharTokenizer`], so token counts are exact character counts.

use edgequake_incise::pipeline::checkpoint::CheckpointStore;
use edgequake_incise::pipeline::response::parse_response;
use edgequake_incise::{
    convert, convert_to_file, guard_boundaries, load_units, merge, plan, CharTokenizer, Element,
    Incision, InciseError, Item, PageRange, TextUnit, Window, WindowConfig, WindowError,
    WindowOutput, WindowProcessor, WindowProgressCallback, WindowReply, WindowRequest,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Replies with one `<p>` per body unit, echoing its text.
#[derive(Default)]
struct EchoProcessor {
    calls: AtomicUsize,
    failing: HashSet<usize>,
    seen: Mutex<Vec<PageRange>>,
}

impl EchoProcessor {
    fn failing_at(begins: &[usize]) -> Self {
        Self {
            failing: begins.iter().copied().collect(),
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WindowProcessor for EchoProcessor {
    async fn process(&self, request: &WindowRequest) -> Result<WindowReply, WindowError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.range);
        }
        if self.failing.contains(&request.range.begin) {
            return Err(WindowError::LlmFailed {
                range: request.range,
                retries: 0,
                detail: "scripted failure".into(),
            });
        }
        let mut reply = Element::new("response");
        for unit in &request.body {
            let index = unit.attr("index").unwrap_or("0");
            reply = reply.with_child(Element::text("p", unit.plain_text()).with_attr("index", index));
        }
        Ok(WindowReply::new(reply.to_xml()))
    }
}

/// Replies with fixed XML: `first` for the window starting at 0, `rest` otherwise.
struct FixedReplies {
    first: &'static str,
    rest: &'static str,
}

impl WindowProcessor for FixedReplies {
    async fn process(&self, request: &WindowRequest) -> Result<WindowReply, WindowError> {
        let xml = if request.range.begin == 0 {
            self.first
        } else {
            self.rest
        };
        Ok(WindowReply::new(xml))
    }
}

#[derive(Default)]
struct Recorder {
    started: AtomicUsize,
    skipped: AtomicUsize,
    errors: AtomicUsize,
}

impl WindowProgressCallback for Recorder {
    fn on_window_start(&self, _ordinal: usize, _range: PageRange) {
        self.started.fetch_add(1, Ordering::SeqCst);
    }
    fn on_window_skipped(&self, _ordinal: usize, _range: PageRange) {
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }
    fn on_window_error(&self, _ordinal: usize, _range: PageRange, _error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }
}

/// `n` pages of roughly 60 characters each, all freely cuttable.
fn corpus(n: usize) -> Vec<TextUnit> {
    let mut xml = String::from("<corpus>");
    for i in 0..n {
        xml.push_str(&format!(
            r#"<page index="{i}" start-incision="impossible" end-incision="impossible">page {i:02} {}</page>"#,
            "lorem ipsum ".repeat(3)
        ));
    }
    xml.push_str("</corpus>");
    load_units(&xml, &CharTokenizer).unwrap()
}

fn fixed_unit(index: usize, tokens: usize) -> TextUnit {
    TextUnit {
        index,
        tokens,
        start_incision: Incision::Impossible,
        end_incision: Incision::Impossible,
        payload: Element::text("page", "x").with_attr("index", index),
    }
}

fn indices(items: &[Item]) -> Vec<usize> {
    items
        .iter()
        .flat_map(|i| i.leaves())
        .map(|u| u.index)
        .collect()
}

fn small_config() -> WindowConfig {
    WindowConfig::builder()
        .max_tokens(300)
        .gap_rate(0.2)
        .tail_rate(0.5)
        .build()
        .unwrap()
}

// ── Window planning ──────────────────────────────────────────────────────────

#[test]
fn five_uniform_units_make_three_windows() {
    let units: Vec<TextUnit> = (0..5).map(|i| fixed_unit(i, 100)).collect();
    let config = WindowConfig::builder()
        .max_tokens(400)
        .gap_rate(0.25)
        .tail_rate(0.5)
        .build()
        .unwrap();
    let windows: Vec<Window> = plan(units, &config).unwrap().collect();

    let shape: Vec<(Vec<usize>, Vec<usize>, Vec<usize>)> = windows
        .iter()
        .map(|w| (indices(&w.head), indices(&w.body), indices(&w.tail)))
        .collect();
    assert_eq!(
        shape,
        vec![
            (vec![], vec![0, 1], vec![2]),
            (vec![1], vec![2, 3], vec![4]),
            (vec![3], vec![4], vec![]),
        ]
    );
}

#[test]
fn every_unit_lands_in_exactly_one_body() {
    let units = corpus(17);
    let windows: Vec<Window> = plan(units, &small_config()).unwrap().collect();
    let owned: Vec<usize> = windows.iter().flat_map(|w| indices(&w.body)).collect();
    assert_eq!(owned, (0..17).collect::<Vec<_>>());
    assert!(windows.iter().all(|w| !w.body.is_empty()));
}

#[test]
fn buffers_respect_their_ceilings() {
    let config = small_config();
    let budget = config.budget().unwrap();
    for w in plan(corpus(17), &config).unwrap() {
        assert!(w.head_tokens() <= budget.head || w.head.len() == 1);
        assert!(w.body_tokens() <= budget.body || w.body.len() == 1);
        assert!(w.tail_tokens() <= budget.tail || w.tail.len() == 1);
    }
}

#[test]
fn head_continues_previous_window() {
    let windows: Vec<Window> = plan(corpus(17), &small_config()).unwrap().collect();
    for pair in windows.windows(2) {
        let mut before = indices(&pair[0].head);
        before.extend(indices(&pair[0].body));
        let head = indices(&pair[1].head);
        assert!(before.ends_with(&head), "{before:?} / {head:?}");
    }
}

#[test]
fn index_gap_forces_hard_edges() {
    let units = vec![
        TextUnit {
            start_incision: Incision::MustBe,
            end_incision: Incision::MustBe,
            ..fixed_unit(5, 10)
        },
        TextUnit {
            start_incision: Incision::MustBe,
            end_incision: Incision::MustBe,
            ..fixed_unit(8, 10)
        },
    ];
    let guarded: Vec<TextUnit> = guard_boundaries(units).collect();
    assert_eq!(guarded[0].end_incision, Incision::Impossible);
    assert_eq!(guarded[1].start_incision, Incision::Impossible);
}

#[test]
fn zero_body_budget_is_rejected_before_work() {
    let mut config = WindowConfig::default();
    config.gap_rate = 1.0;
    config.tail_rate = 0.0;
    assert!(matches!(
        plan(corpus(3), &config),
        Err(InciseError::InvalidConfig(_))
    ));
}

// ── Conversion runs ──────────────────────────────────────────────────────────

#[tokio::test]
async fn echo_run_covers_every_unit_once() {
    let processor = EchoProcessor::default();
    let output = convert(corpus(12), &CharTokenizer, &processor, &small_config())
        .await
        .unwrap();

    let order: Vec<usize> = output.document.fragments.iter().map(|f| f.index).collect();
    assert_eq!(order, (0..12).collect::<Vec<_>>());
    assert_eq!(output.stats.total_windows, processor.calls());
    assert_eq!(output.stats.failed_windows, 0);
    assert!(output.issues.is_empty());
}

#[tokio::test]
async fn oversized_unit_is_clipped_to_window() {
    let text = "x".repeat(5000);
    let xml = format!(r#"<corpus><page index="0">{text}</page></corpus>"#);
    let units = load_units(&xml, &CharTokenizer).unwrap();
    let config = WindowConfig::builder().max_tokens(400).build().unwrap();
    let processor = EchoProcessor::default();

    let output = convert(units, &CharTokenizer, &processor, &config)
        .await
        .unwrap();
    assert_eq!(output.windows.len(), 1);
    assert!(output.windows[0].request_tokens <= 400);
    let kept = output.document.fragments[0].normalized_text();
    assert!(!kept.is_empty() && kept.len() < 400);
}

#[tokio::test]
async fn failed_windows_are_reported_not_fatal() {
    let processor = EchoProcessor::failing_at(&[0]);
    let recorder = Arc::new(Recorder::default());
    let mut config = small_config();
    config.progress_callback = Some(recorder.clone());

    let output = convert(corpus(12), &CharTokenizer, &processor, &config)
        .await
        .unwrap();
    assert_eq!(output.stats.failed_windows, 1);
    assert_eq!(recorder.errors.load(Ordering::SeqCst), 1);
    let failed = output.windows.iter().find(|w| !w.is_ok()).unwrap();
    assert_eq!(failed.range.begin, 0);
    assert!(output
        .document
        .fragments
        .iter()
        .all(|f| !failed.range.contains(f.index)));
}

#[tokio::test]
async fn all_windows_failing_is_fatal() {
    let processor = EchoProcessor::failing_at(&[0]);
    let config = WindowConfig::builder().max_tokens(5000).build().unwrap();
    let err = convert(corpus(3), &CharTokenizer, &processor, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, InciseError::AllWindowsFailed { total: 1, .. }));
}

#[tokio::test]
async fn abort_flag_stops_between_windows() {
    let flag = Arc::new(AtomicBool::new(true));
    let mut config = small_config();
    config.abort = Some(flag);
    let processor = EchoProcessor::default();
    let err = convert(corpus(12), &CharTokenizer, &processor, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, InciseError::Aborted { completed: 0 }));
    assert_eq!(processor.calls(), 0);
}

#[tokio::test]
async fn empty_corpus_yields_empty_document() {
    let processor = EchoProcessor::default();
    let output = convert(Vec::new(), &CharTokenizer, &processor, &small_config())
        .await
        .unwrap();
    assert!(output.document.fragments.is_empty());
    assert_eq!(output.stats.total_windows, 0);
    assert_eq!(output.xml(), "<document/>");
}

#[tokio::test]
async fn short_heading_keeps_its_place_across_windows() {
    let processor = FixedReplies {
        first: r#"<response>
            <p index="0">opening</p>
            <p index="1">middle</p>
            <h index="2">Notes</h>
            <p index="2" to="3">Notes on the text follow here</p>
        </response>"#,
        rest: r#"<response>
            <h index="2">Notes</h>
            <p index="2" to="3">Notes on the text follow here and continue</p>
            <p index="3">closing</p>
        </response>"#,
    };
    let output = convert(corpus(4), &CharTokenizer, &processor, &small_config())
        .await
        .unwrap();
    assert_eq!(output.stats.total_windows, 2);

    let tagged: Vec<(&str, String)> = output
        .document
        .fragments
        .iter()
        .map(|f| (f.element.tag.as_str(), f.normalized_text()))
        .collect();
    assert_eq!(
        tagged,
        vec![
            ("p", "opening".to_string()),
            ("p", "middle".to_string()),
            ("h", "Notes".to_string()),
            ("p", "Notes on the text follow here and continue".to_string()),
            ("p", "closing".to_string()),
        ]
    );
    assert!(output.issues.is_empty());
}

// ── Resume ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn second_run_sends_no_windows() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = small_config();
    config.checkpoint_dir = Some(dir.path().to_path_buf());

    let first = EchoProcessor::default();
    let out1 = convert(corpus(12), &CharTokenizer, &first, &config)
        .await
        .unwrap();
    assert!(first.calls() > 1);

    let recorder = Arc::new(Recorder::default());
    config.progress_callback = Some(recorder.clone());
    let second = EchoProcessor::default();
    let out2 = convert(corpus(12), &CharTokenizer, &second, &config)
        .await
        .unwrap();

    assert_eq!(second.calls(), 0);
    assert_eq!(out2.stats.skipped_windows, first.calls());
    assert_eq!(recorder.skipped.load(Ordering::SeqCst), first.calls());
    assert_eq!(recorder.started.load(Ordering::SeqCst), 0);
    assert_eq!(out1.document, out2.document);
}

#[tokio::test]
async fn changed_budget_invalidates_overlapping_markers() {
    let dir = tempfile::tempdir().unwrap();
    let mut narrow = small_config();
    narrow.checkpoint_dir = Some(dir.path().to_path_buf());
    convert(corpus(12), &CharTokenizer, &EchoProcessor::default(), &narrow)
        .await
        .unwrap();

    let mut wide = WindowConfig::builder()
        .max_tokens(700)
        .gap_rate(0.2)
        .build()
        .unwrap();
    wide.checkpoint_dir = Some(dir.path().to_path_buf());
    let expected: Vec<PageRange> = plan(corpus(12), &wide).unwrap().map(|w| w.range()).collect();
    convert(corpus(12), &CharTokenizer, &EchoProcessor::default(), &wide)
        .await
        .unwrap();

    let store = CheckpointStore::open(dir.path()).await.unwrap();
    assert_eq!(store.scan().await.unwrap(), expected);
}

#[tokio::test]
async fn output_file_is_written_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out").join("doc.xml");
    let output = convert_to_file(
        corpus(4),
        &CharTokenizer,
        &EchoProcessor::default(),
        &small_config(),
        &path,
    )
    .await
    .unwrap();

    let written = std::fs::read_to_string(&path).unwrap();
    assert_eq!(written, output.xml());
    assert!(written.starts_with("<document>"));
    assert!(!path.with_extension("xml.tmp").exists());
}

// ── Merge ────────────────────────────────────────────────────────────────────

#[test]
fn shared_citation_survives_once_with_longer_text() {
    let window = |begin: usize, end: usize, xml: &str| {
        let range = PageRange::new(begin, end);
        WindowOutput {
            range,
            fragments: parse_response(xml, range).unwrap(),
        }
    };
    let first = window(
        0,
        1,
        r#"<response>
            <p index="1" to="2">As shown in<ref id="7"/></p>
            <citation id="7" index="1">Smith, J.</citation>
        </response>"#,
    );
    let second = window(
        2,
        3,
        r#"<response>
            <p index="1" to="2">As shown in<ref id="7"/> the prior survey</p>
            <citation id="7" index="2">Smith, J. (2001). A survey.</citation>
            <p index="3">Next section.</p>
        </response>"#,
    );

    let doc = merge(vec![first, second]).unwrap();
    assert_eq!(doc.fragments.len(), 2);
    assert_eq!(
        doc.fragments[0].normalized_text(),
        "As shown in the prior survey"
    );
    assert_eq!(doc.citations.len(), 1);
    assert_eq!(doc.citations[0].id, 7);
    assert_eq!(doc.citations[0].refs, 1);
    assert_eq!(
        doc.citations[0].element.normalized_text(),
        "Smith, J. (2001). A survey."
    );
    assert_eq!(doc.to_xml().matches("<citation ").count(), 1);
}
