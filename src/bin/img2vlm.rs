//! CLI binary for edgequake-vision.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `VisionConfig` and prints the classified result.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_vision::{
    describe_image, ClassifiedResult, ImageDetail, ImageFormat, ProgressCallback, RasterSurface,
    Stage, VisionConfig, VisionProgressCallback, DEFAULT_ENDPOINT, DEFAULT_MODEL,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal spinner that shows which stage is running.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
        );
        bar.set_prefix("img2vlm");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl VisionProgressCallback for CliProgressCallback {
    fn on_stage_start(&self, stage: Stage) {
        let msg = match stage {
            Stage::Readback => "reading image…",
            Stage::Encode => "encoding…",
            Stage::Request => "building request…",
            Stage::Transport => "waiting for the model…",
        };
        self.bar.set_message(msg);
    }

    fn on_error(&self, stage: Stage, error: &str) {
        self.bar
            .println(format!("  {} {stage} failed: {}", red("✗"), red(error)));
        self.bar.finish_and_clear();
    }

    fn on_result(&self, result: &ClassifiedResult) {
        self.bar.finish_and_clear();
        let mark = if result.is_success() {
            green("✔")
        } else {
            red("✘")
        };
        eprintln!("{mark} {}", dim(result.label()));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Describe a PNG with the default prompt
  img2vlm photo.png

  # Custom question, smaller JPEG upload
  img2vlm --prompt "How many people are in this picture?" --quality 80 crowd.jpg

  # Any OpenAI-compatible server (vLLM, Ollama, LiteLLM, …)
  img2vlm --endpoint http://localhost:11434/v1/chat/completions --model llava shot.png

  # Machine-readable result
  img2vlm --json screenshot.png > result.json

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY       Bearer credential for the endpoint
  IMG2VLM_ENDPOINT     Override the chat completions URL
  IMG2VLM_MODEL        Override the model ID
"#;

/// Describe an image file using a Vision LLM.
#[derive(Parser, Debug)]
#[command(
    name = "img2vlm",
    version,
    about = "Describe an image using a Vision LLM",
    long_about = "Read an image, encode it as PNG or JPEG, send it with a prompt to an \
OpenAI-compatible chat completions endpoint, and print the classified answer.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file (PNG or JPEG).
    input: PathBuf,

    /// Instruction sent with the image.
    #[arg(short, long, env = "IMG2VLM_PROMPT")]
    prompt: Option<String>,

    /// Chat completions endpoint URL.
    #[arg(long, env = "IMG2VLM_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Bearer credential.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Vision model ID.
    #[arg(long, env = "IMG2VLM_MODEL", default_value = DEFAULT_MODEL)]
    model: String,

    /// Max output tokens.
    #[arg(long, env = "IMG2VLM_MAX_TOKENS", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_tokens: u32,

    /// Sampling temperature (0.0–2.0). Provider default when unset.
    #[arg(long, env = "IMG2VLM_TEMPERATURE")]
    temperature: Option<f32>,

    /// Send JPEG at this quality (1–100, clamped) instead of lossless PNG.
    #[arg(long, env = "IMG2VLM_QUALITY")]
    quality: Option<u8>,

    /// Image detail hint: auto, low, high.
    #[arg(long, value_enum)]
    detail: Option<DetailArg>,

    /// Timeout for the API call in seconds.
    #[arg(long, env = "IMG2VLM_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Output the full result and stats as JSON.
    #[arg(long)]
    json: bool,

    /// Disable the spinner.
    #[arg(long)]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except the answer and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DetailArg {
    Auto,
    Low,
    High,
}

impl From<DetailArg> for ImageDetail {
    fn from(v: DetailArg) -> Self {
        match v {
            DetailArg::Auto => ImageDetail::Auto,
            DetailArg::Low => ImageDetail::Low,
            DetailArg::High => ImageDetail::High,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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

    // ── Load source ──────────────────────────────────────────────────────
    let bytes = tokio::fs::read(&cli.input)
        .await
        .with_context(|| format!("Failed to read image {:?}", cli.input))?;
    let surface = RasterSurface::from_encoded(bytes)
        .with_context(|| format!("{:?} is not a supported image", cli.input))?;

    // ── Build config ─────────────────────────────────────────────────────
    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn VisionProgressCallback>)
    } else {
        None
    };
    let config = build_config(&cli, progress)?;

    // ── Run ──────────────────────────────────────────────────────────────
    let output = describe_image(surface, &config)
        .await
        .context("Describe failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&output).context("Failed to serialise output")?
        );
    } else {
        match &output.result {
            ClassifiedResult::Success { text, .. } => println!("{text}"),
            other => eprintln!("{}", red(&other.to_string())),
        }
        if !cli.quiet {
            let s = &output.stats;
            eprintln!(
                "   {}",
                dim(&format!(
                    "{}x{} px  {} bytes encoded  {}ms total",
                    s.width, s.height, s.encoded_bytes, s.total_duration_ms
                ))
            );
            if let (Some(i), Some(o)) = (s.input_tokens, s.output_tokens) {
                eprintln!("   {}", dim(&format!("{i} tokens in  /  {o} tokens out")));
            }
        }
    }

    Ok(if output.result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Map CLI args to `VisionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<VisionConfig> {
    let mut builder = VisionConfig::builder()
        .endpoint(&cli.endpoint)
        .api_key(&cli.api_key)
        .model(&cli.model)
        .max_tokens(cli.max_tokens)
        .api_timeout_secs(cli.api_timeout);

    if let Some(ref p) = cli.prompt {
        builder = builder.prompt(p);
    }
    if let Some(t) = cli.temperature {
        builder = builder.temperature(t);
    }
    if let Some(q) = cli.quality {
        builder = builder.image_format(ImageFormat::lossy(q));
    }
    if let Some(d) = cli.detail {
        builder = builder.detail(d.into());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
