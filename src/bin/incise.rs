//! CLI binary for edgequake-incise.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `WindowConfig`, loads the unit corpus and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_incise::{
    convert, convert_to_file, load_units, plan, LlmProcessor, PageRange, ProgressCallback,
    TextUnit, Tokenizer, TokenizerChoice, WindowConfig, WindowProgressCallback, WindowRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers ──────────────────────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner plus one log line per window. The number of windows is unknown
/// until the run ends, so the bar counts up instead of filling.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  {pos} windows  ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .map_or(0.0, |t| t.elapsed().as_secs_f64())
    }
}

impl WindowProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_units: usize) {
        self.bar.set_prefix("Processing");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Windowing {total_units} units…"))
        ));
    }

    fn on_window_start(&self, _ordinal: usize, range: PageRange) {
        if let Ok(mut slot) = self.started.lock() {
            *slot = Some(Instant::now());
        }
        self.bar.set_message(format!("units {range}"));
    }

    fn on_window_complete(&self, ordinal: usize, range: PageRange, reply_len: usize) {
        self.bar.println(format!(
            "  {} Window {:>3}  {:<11}  {:<8}  {}",
            green("✓"),
            ordinal,
            range.to_string(),
            dim(&format!("{reply_len:>6} bytes")),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_window_skipped(&self, ordinal: usize, range: PageRange) {
        self.bar.println(format!(
            "  {} Window {:>3}  {:<11}  {}",
            dim("↷"),
            ordinal,
            range.to_string(),
            dim("checkpoint"),
        ));
        self.bar.inc(1);
    }

    fn on_window_error(&self, ordinal: usize, range: PageRange, error: &str) {
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Window {:>3}  {:<11}  {}  {}",
            red("✗"),
            ordinal,
            range.to_string(),
            red(&msg),
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&self, total_windows: usize, success_count: usize) {
        let failed = total_windows.saturating_sub(success_count);
        self.bar.finish_and_clear();
        if failed == 0 {
            eprintln!(
                "{} {} windows processed successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} windows processed  ({} failed)",
                if failed == total_windows {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_windows,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"INPUT FORMAT:
  One XML document whose root children are units:

    <corpus>
      <page index="0" end-incision="must-be">…</page>
      <page index="1" start-incision="most-likely">…</page>
    </corpus>

  Incision grades: impossible, uncertain (default), most-likely, must-be.

EXAMPLES:
  # Show how a corpus would be windowed (no API key needed)
  incise plan book.xml --max-tokens 6000

  # Process and write the merged document
  incise run book.xml -o book.out.xml --checkpoint-dir .incise

  # Re-run after an interruption: finished windows are skipped
  incise run book.xml -o book.out.xml --checkpoint-dir .incise

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
"#;

/// Token-budgeted XML windowing for LLM processing.
#[derive(Parser, Debug)]
#[command(
    name = "incise",
    version,
    about = "Window long XML documents by incision grade and process them with an LLM",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "INCISE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "INCISE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the window plan without calling any model.
    Plan {
        #[command(flatten)]
        window: WindowArgs,

        /// Output the plan as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Process every window and write the merged document.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct WindowArgs {
    /// Unit corpus (XML).
    input: PathBuf,

    /// Tokenizer used for every budget: cl100k, o200k or chars.
    #[arg(long, env = "INCISE_TOKENIZER", default_value = "cl100k")]
    tokenizer: String,

    /// Token budget per window request.
    #[arg(long, env = "INCISE_MAX_TOKENS", default_value_t = 8000)]
    max_tokens: usize,

    /// Share of the budget reserved for look-back context.
    #[arg(long, env = "INCISE_GAP_RATE", default_value_t = 0.15)]
    gap_rate: f64,

    /// Look-ahead ceiling as a share of the look-back ceiling.
    #[arg(long, env = "INCISE_TAIL_RATE", default_value_t = 0.5)]
    tail_rate: f64,

    /// Ceiling for atomic segments (default: the body ceiling).
    #[arg(long, env = "INCISE_SEGMENT_MAX_TOKENS")]
    segment_max_tokens: Option<usize>,
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    window: WindowArgs,

    /// Write the merged document here instead of stdout.
    #[arg(short, long, env = "INCISE_OUTPUT")]
    output: Option<PathBuf>,

    /// LLM model ID (e.g. gpt-4.1-nano, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "INCISE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Persist window replies here and skip finished windows on rerun.
    #[arg(long, env = "INCISE_CHECKPOINT_DIR")]
    checkpoint_dir: Option<PathBuf>,

    /// Max LLM output tokens per window.
    #[arg(long, env = "INCISE_MAX_OUTPUT_TOKENS", default_value_t = 4096)]
    max_output_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "INCISE_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Retries per window on LLM failure.
    #[arg(long, env = "INCISE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Per-window LLM call timeout in seconds.
    #[arg(long, env = "INCISE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Output structured JSON (per-window results and stats) instead of XML.
    #[arg(long, env = "INCISE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "INCISE_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the progress bar is active.
    let show_progress = match cli.command {
        Command::Run(ref args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Plan { .. } => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Plan { ref window, json } => run_plan(window, json).await,
        Command::Run(ref args) => run_convert(args, cli.quiet, show_progress).await,
    }
}

async fn load(window: &WindowArgs) -> Result<(Arc<dyn Tokenizer>, Vec<TextUnit>)> {
    let choice: TokenizerChoice = window.tokenizer.parse().context("Invalid --tokenizer")?;
    let tokenizer = choice.build().context("Failed to load tokenizer")?;
    let corpus = tokio::fs::read_to_string(&window.input)
        .await
        .with_context(|| format!("Failed to read {:?}", window.input))?;
    let units = load_units(&corpus, tokenizer.as_ref())
        .with_context(|| format!("Failed to load units from {:?}", window.input))?;
    Ok((tokenizer, units))
}

fn window_builder(window: &WindowArgs) -> edgequake_incise::WindowConfigBuilder {
    let mut builder = WindowConfig::builder()
        .max_tokens(window.max_tokens)
        .gap_rate(window.gap_rate)
        .tail_rate(window.tail_rate);
    if let Some(n) = window.segment_max_tokens {
        builder = builder.segment_max_tokens(n);
    }
    builder
}

/// `incise plan`: print every window with its buffer sizes.
async fn run_plan(window: &WindowArgs, json: bool) -> Result<()> {
    let (tokenizer, units) = load(window).await?;
    let config = window_builder(window)
        .build()
        .context("Invalid configuration")?;
    let budget = config.budget()?;

    let mut rows = Vec::new();
    for (i, w) in plan(units, &config)?.enumerate() {
        let request = WindowRequest::prepare(&w, tokenizer.as_ref());
        rows.push(serde_json::json!({
            "ordinal": i + 1,
            "range": w.range().to_string(),
            "head_tokens": w.head_tokens(),
            "body_tokens": w.body_tokens(),
            "tail_tokens": w.tail_tokens(),
            "request_tokens": request.tokens(tokenizer.as_ref()),
        }));
    }

    if json {
        let doc = serde_json::json!({ "budget": budget, "windows": rows });
        println!(
            "{}",
            serde_json::to_string_pretty(&doc).context("Failed to serialise plan")?
        );
        return Ok(());
    }

    println!(
        "Budget: {} tokens  (head {} / body {} / tail {})",
        budget.total, budget.head, budget.body, budget.tail
    );
    for row in &rows {
        println!(
            "#{:<4} {:<11}  head {:>6}  body {:>6}  tail {:>6}  request {:>6}",
            row["ordinal"],
            row["range"].as_str().unwrap_or_default(),
            row["head_tokens"],
            row["body_tokens"],
            row["tail_tokens"],
            row["request_tokens"],
        );
    }
    println!("{} windows", rows.len());
    Ok(())
}

/// `incise run`: process, merge, write.
async fn run_convert(args: &RunArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let (tokenizer, units) = load(&args.window).await?;

    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn WindowProgressCallback>)
    } else {
        None
    };
    let config = build_config(args, progress_cb).await?;
    let processor = LlmProcessor::from_config(&config)
        .await
        .context("Failed to initialise LLM provider")?;

    let output = if let Some(ref path) = args.output {
        convert_to_file(units, tokenizer.as_ref(), &processor, &config, path)
            .await
            .context("Run failed")?
    } else {
        convert(units, tokenizer.as_ref(), &processor, &config)
            .await
            .context("Run failed")?
    };

    if args.json {
        let json = serde_json::to_string_pretty(&output).context("Failed to serialise output")?;
        println!("{json}");
    } else if args.output.is_none() {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle
            .write_all(output.xml().as_bytes())
            .context("Failed to write to stdout")?;
        handle.write_all(b"\n").ok();
    }

    if !quiet {
        let stats = &output.stats;
        eprintln!(
            "{}  {}/{} windows  ({} from checkpoints)  {} fragments  {}ms{}",
            if stats.failed_windows == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            stats.total_windows - stats.failed_windows,
            stats.total_windows,
            stats.skipped_windows,
            stats.fragments,
            stats.total_duration_ms,
            args.output
                .as_ref()
                .map(|p| format!("  →  {}", bold(&p.display().to_string())))
                .unwrap_or_default(),
        );
        eprintln!(
            "   {} tokens in  /  {} tokens out",
            dim(&stats.total_input_tokens.to_string()),
            dim(&stats.total_output_tokens.to_string()),
        );
        for issue in &output.issues {
            eprintln!("   {} {:?}", cyan("⚠"), issue);
        }
    }
    Ok(())
}

/// Map CLI args to `WindowConfig`.
async fn build_config(args: &RunArgs, progress: Option<ProgressCallback>) -> Result<WindowConfig> {
    let abort = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&abort);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Stopping after the current window…");
            flag.store(true, Ordering::Relaxed);
        }
    });

    let mut builder = window_builder(&args.window)
        .max_output_tokens(args.max_output_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .abort_flag(abort);

    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }
    if let Some(ref dir) = args.checkpoint_dir {
        builder = builder.checkpoint_dir(dir);
    }
    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
