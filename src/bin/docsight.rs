//! CLI binary for docsight.
//!
//! A thin shim over the library crate: maps CLI flags to the config structs,
//! reads API keys from the environment (the only place in the whole crate
//! that does), and writes results into a timestamped run directory.

use anyhow::{bail, Context, Result};
use clap::Parser;
use docsight::{
    describe_document, AgentLoop, DiskPageStore, DocumentData, ExtractionConfig, GeminiClient,
    OcrConfig, OcrTool, PageImage, QwenOcrClient, VlmConfig,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

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

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rasterise a PDF with any external renderer, then extract
  pdftoppm -png -r 150 document.pdf pages/page
  docsight pages/ -o runs/

  # Faster verification pass, more loop headroom
  docsight pages/ --workers 5 --max-iterations 15

  # Structured JSON on stdout
  docsight pages/ --json > result.json

INPUT:
  A directory of rendered page images (*.png). Files are sorted by name and
  numbered 1..N in that order — zero-pad the renderer's output
  (page-001.png, page-002.png, …) to keep pages in document order.

OUTPUT LAYOUT (per run):
  <output-dir>/run_<timestamp>/
    pages/            copies of the input pages, as the OCR tool saw them
    results/text.txt  extracted text with OCR-verified values
    results/document.json  full result: text, headers, tool calls, stats

ENVIRONMENT VARIABLES:
  GEMINI_API_KEY      key for the primary vision-language model (required)
  DASHSCOPE_API_KEY   key for the secondary OCR model (required)

SETUP:
  1. export GEMINI_API_KEY=...  DASHSCOPE_API_KEY=...
  2. docsight pages/ -o runs/
"#;

/// Extract verified text and structure from rendered document pages.
#[derive(Parser, Debug)]
#[command(
    name = "docsight",
    version,
    about = "Extract verified text and structure from rendered document pages",
    long_about = "Drives a Vision Language Model over rendered document pages and verifies \
precision-critical values (identifiers, URLs, names) through a secondary OCR model \
via tool calling. OCR results are authoritative over the VLM's own reading.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory of rendered page images (*.png), sorted by file name.
    input: PathBuf,

    /// Parent directory for run folders.
    #[arg(short, long, env = "DOCSIGHT_OUTPUT_DIR", default_value = "runs")]
    output_dir: PathBuf,

    /// Primary model ID.
    #[arg(long, env = "DOCSIGHT_VLM_MODEL", default_value = "gemini-2.5-flash")]
    vlm_model: String,

    /// OCR model ID.
    #[arg(long, env = "DOCSIGHT_OCR_MODEL", default_value = "qwen-vl-plus")]
    ocr_model: String,

    /// OCR tool calls executed concurrently within one loop iteration.
    #[arg(short, long, env = "DOCSIGHT_WORKERS", default_value_t = 5)]
    workers: usize,

    /// Tool-calling iteration budget per pass.
    #[arg(long, env = "DOCSIGHT_MAX_ITERATIONS", default_value_t = 10)]
    max_iterations: u32,

    /// HTTP attempts per model call (retries on 429/5xx).
    #[arg(long, env = "DOCSIGHT_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Minimum spacing between primary-model calls, in milliseconds.
    #[arg(long, env = "DOCSIGHT_MIN_INTERVAL_MS", default_value_t = 600)]
    min_interval_ms: u64,

    /// Per-call HTTP timeout in seconds.
    #[arg(long, env = "DOCSIGHT_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Print the full result as JSON on stdout instead of plain text.
    #[arg(long, env = "DOCSIGHT_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "DOCSIGHT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCSIGHT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors and the result itself.
    #[arg(short, long, env = "DOCSIGHT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
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

    // ── Credentials: the single place the environment is read ────────────
    let gemini_key = std::env::var("GEMINI_API_KEY").unwrap_or_default();
    if gemini_key.is_empty() {
        bail!("GEMINI_API_KEY is not set.\nexport GEMINI_API_KEY=... and retry.");
    }
    let qwen_key = std::env::var("DASHSCOPE_API_KEY").unwrap_or_default();
    if qwen_key.is_empty() {
        bail!("DASHSCOPE_API_KEY is not set.\nexport DASHSCOPE_API_KEY=... and retry.");
    }

    // ── Load pages ───────────────────────────────────────────────────────
    let pages = load_pages(&cli.input)
        .with_context(|| format!("Failed to load pages from {:?}", cli.input))?;
    if pages.is_empty() {
        bail!("No *.png pages found in {:?}", cli.input);
    }
    if !cli.quiet {
        eprintln!("{} {} pages loaded", dim("◆"), bold(&pages.len().to_string()));
    }

    // ── Run directory ────────────────────────────────────────────────────
    let run_dir = create_run_dir(&cli.output_dir)?;
    let store = Arc::new(DiskPageStore::create(&run_dir, &pages)?);

    // ── Clients and agent ────────────────────────────────────────────────
    let mut vlm_config = VlmConfig::new(gemini_key).with_model(&cli.vlm_model);
    vlm_config.timeout_secs = cli.api_timeout;
    vlm_config.retry.max_attempts = cli.max_retries;
    vlm_config.min_interval = Duration::from_millis(cli.min_interval_ms);

    let mut ocr_config = OcrConfig::new(qwen_key).with_model(&cli.ocr_model);
    ocr_config.timeout_secs = cli.api_timeout;
    ocr_config.retry.max_attempts = cli.max_retries;

    let vlm = Arc::new(GeminiClient::new(vlm_config)?);
    let ocr = Arc::new(QwenOcrClient::new(ocr_config)?);

    let config = ExtractionConfig::builder()
        .max_iterations(cli.max_iterations)
        .tool_workers(cli.workers)
        .build()
        .context("Invalid configuration")?;

    let mut agent = AgentLoop::new(vlm, &config);
    agent.register_tool(Arc::new(OcrTool::new(ocr, store)))?;

    // ── Extract ──────────────────────────────────────────────────────────
    let spinner = if !cli.quiet && !cli.no_progress && !cli.json {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_prefix("Extracting");
        bar.set_message(format!("{} pages, text + structure passes", pages.len()));
        bar.enable_steady_tick(Duration::from_millis(80));
        Some(bar)
    } else {
        None
    };

    let data = describe_document(&mut agent, &pages).await?;

    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    // ── Persist and report ───────────────────────────────────────────────
    write_results(&run_dir, &data)?;

    if cli.json {
        let json = serde_json::to_string_pretty(&data).context("Failed to serialise result")?;
        println!("{json}");
    } else if let Some(ref text) = data.text {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        handle.write_all(text.as_bytes()).context("Failed to write to stdout")?;
        if !text.ends_with('\n') {
            handle.write_all(b"\n").ok();
        }
    }

    if !cli.quiet {
        match (&data.text, &data.text_error) {
            (Some(_), _) => eprintln!(
                "{} {} headers, {} OCR calls, {}ms  →  {}",
                green("✔"),
                data.headers.len(),
                data.stats.ocr_calls,
                data.stats.total_duration_ms,
                bold(&run_dir.display().to_string()),
            ),
            (None, Some(error)) => eprintln!("{} text pass failed: {}", red("✘"), error),
            (None, None) => eprintln!("{} no text produced", red("✘")),
        }
    }

    Ok(())
}

/// Read `*.png` files from a directory, sorted by name, numbered 1..N.
fn load_pages(dir: &Path) -> Result<Vec<PageImage>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("png")))
        .collect();
    paths.sort();

    let mut pages = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let png = std::fs::read(path).with_context(|| format!("reading {path:?}"))?;
        pages.push(PageImage::new(index as u32 + 1, png));
    }
    Ok(pages)
}

/// Create a timestamped run subdirectory under `parent`.
fn create_run_dir(parent: &Path) -> Result<PathBuf> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let run_dir = parent.join(format!("run_{ts}"));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("creating run directory {run_dir:?}"))?;
    Ok(run_dir)
}

/// Write `results/text.txt` and `results/document.json` into the run dir.
fn write_results(run_dir: &Path, data: &DocumentData) -> Result<()> {
    let results_dir = run_dir.join("results");
    std::fs::create_dir_all(&results_dir)?;

    if let Some(ref text) = data.text {
        std::fs::write(results_dir.join("text.txt"), text)?;
    }
    let json = serde_json::to_string_pretty(data)?;
    std::fs::write(results_dir.join("document.json"), json)?;
    Ok(())
}
