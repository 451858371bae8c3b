//! CLI binary for edgequake-docextract.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ExtractorConfig` and prints the extracted JSON.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_docextract::{
    load_document, DocumentExtractor, ExtractionInput, ExtractionProgressCallback,
    ExtractionStage, ExtractorConfig, MediaType, PageSelection, ProgressCallback,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that follows the pipeline stages.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.set_message("reading input…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_stage(&self, stage: ExtractionStage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_pages_ready(&self, page_count: usize) {
        let line = if page_count == 0 {
            format!("  {} no pages rendered; asking the model anyway", red("!"))
        } else {
            format!("  {} {} page(s) ready", green("✓"), page_count)
        };
        self.bar.println(line);
    }

    fn on_model_call(&self, pass: usize, total_passes: usize) {
        let what = if pass < total_passes {
            "first pass"
        } else {
            "extraction"
        };
        self.bar
            .set_message(format!("model call {pass}/{total_passes} ({what})…"));
    }

    fn on_complete(&self, success: bool) {
        self.bar.finish_and_clear();
        if success {
            eprintln!("{} extraction complete", green("✔"));
        } else {
            eprintln!("{} extraction failed", red("✘"));
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract fields from an invoice (stdout)
  docextract invoice.pdf --prompt "invoice number, date and total"

  # Only the first page, written to a file
  docextract statement.pdf -p "account holder" --pages first -o holder.json

  # Anthropic model with two-pass extraction
  docextract receipt.jpg -p "merchant and items" \
      --model claude-3-haiku-20240307 --multiple-passes

  # From a URL, with stats
  docextract https://example.com/form.png -p "applicant name" --json

SUPPORTED MODELS:
  Family      Model                       Two-pass
  ─────────   ─────────────────────────   ────────
  openai      gpt-4-turbo (default)       no
  openai      gpt-4-vision-preview        no
  openai      any gpt-4* identifier       no
  anthropic   claude-3-opus-20240229      yes
  anthropic   claude-3-sonnet-20240229    yes
  anthropic   claude-3-haiku-20240307     yes

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  DOCEXTRACT_MODEL        Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
"#;

/// Extract structured JSON from documents using vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "docextract",
    version,
    about = "Extract structured JSON from images and PDFs using vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local file path or HTTP/HTTPS URL (png, jpeg, webp, gif, pdf).
    input: String,

    /// What to extract, e.g. "invoice number and total".
    #[arg(short, long, env = "DOCEXTRACT_PROMPT")]
    prompt: String,

    /// Media type of the input (png, jpeg, jpg, webp, gif, pdf or a MIME type).
    /// Detected from extension or content when omitted.
    #[arg(long)]
    media_type: Option<String>,

    /// Model ID (gpt-4* or one of the claude-3 models).
    #[arg(short, long, env = "DOCEXTRACT_MODEL")]
    model: Option<String>,

    /// API key; defaults to OPENAI_API_KEY / ANTHROPIC_API_KEY by model.
    #[arg(long, env = "DOCEXTRACT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// PDF pages to send: all, first, last, first-and-last.
    #[arg(long, env = "DOCEXTRACT_PAGES", default_value = "all")]
    pages: String,

    /// Run an open-ended first pass before the extraction (Anthropic only).
    #[arg(long, env = "DOCEXTRACT_MULTIPLE_PASSES")]
    multiple_passes: bool,

    /// Trace every stage's intermediate state (implies --verbose).
    #[arg(long, env = "DOCEXTRACT_DEBUG")]
    debug: bool,

    /// Write the JSON value to this file instead of stdout.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the detailed output (value, raw text, stats) instead of the value.
    #[arg(long)]
    json: bool,

    /// Max output tokens per model call.
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// Disable the progress spinner.
    #[arg(long, env = "DOCEXTRACT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCEXTRACT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "DOCEXTRACT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Model call timeout in seconds.
    #[arg(long, env = "DOCEXTRACT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.debug && !cli.verbose;
    let filter = if cli.verbose || cli.debug {
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

    // ── Build config ─────────────────────────────────────────────────────
    let progress_cb: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn ExtractionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress_cb)?;
    let extractor = DocumentExtractor::new(config).context("Failed to create extractor")?;

    // ── Load input ───────────────────────────────────────────────────────
    let media_type = cli
        .media_type
        .as_deref()
        .map(str::parse::<MediaType>)
        .transpose()
        .context("Invalid --media-type")?;
    let document = load_document(&cli.input, media_type, cli.download_timeout)
        .await
        .with_context(|| format!("Failed to load {}", cli.input))?;

    let pages: PageSelection = cli.pages.parse().context("Invalid --pages")?;
    let input = ExtractionInput::from_document(document, cli.prompt.clone())
        .pages(pages)
        .multiple_passes(cli.multiple_passes);

    // ── Run extraction ───────────────────────────────────────────────────
    if let Some(ref output_path) = cli.output {
        let stats = extractor
            .extract_to_file(input, output_path)
            .await
            .context("Extraction failed")?;

        if !cli.quiet {
            eprintln!(
                "{}  {} page(s)  {} call(s)  {}ms  →  {}",
                green("✔"),
                stats.page_count,
                stats.model_calls,
                stats.total_duration_ms,
                bold(&output_path.display().to_string()),
            );
        }
    } else {
        let output = extractor
            .extract_detailed(input)
            .await
            .context("Extraction failed")?;

        let json = if cli.json {
            serde_json::to_string_pretty(&output)
        } else {
            serde_json::to_string_pretty(&output.data)
        }
        .context("Failed to serialise output")?;
        println!("{json}");

        if !cli.quiet && !cli.json {
            eprintln!(
                "   {}",
                dim(&format!(
                    "{} · {} page(s) · {} call(s) · {}ms",
                    output.stats.model,
                    output.stats.page_count,
                    output.stats.model_calls,
                    output.stats.total_duration_ms
                ))
            );
        }
    }

    Ok(())
}

/// Map CLI args to `ExtractorConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ExtractorConfig> {
    let mut builder = ExtractorConfig::builder()
        .debug(cli.debug)
        .multiple_passes(cli.multiple_passes)
        .max_tokens(cli.max_tokens)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref model) = cli.model {
        builder = builder.model(model);
    }
    if let Some(ref key) = cli.api_key {
        builder = builder.api_key(key);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
