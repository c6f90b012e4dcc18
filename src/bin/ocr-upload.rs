//! CLI binary for ocr-upload.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `SessionConfig`, drives one session over the given files and writes the
//! results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ocr_upload::{
    format_file_size, ExportFormat, OcrSession, PageRange, SessionConfig, SessionObserver,
    SourceFile, Upload, UploadError, UploadId, UploadStatus,
};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// One progress bar per submitted upload, stacked in a [`MultiProgress`].
/// Uploads finish in any order; each bar is finished by its own event.
struct CliObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<UploadId, ProgressBar>>,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        })
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:32.green/238}] {pos:>3}%  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }

    fn println(&self, line: String) {
        let _ = self.multi.println(line);
    }

    fn take_bar(&self, id: &UploadId) -> Option<ProgressBar> {
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }
}

impl SessionObserver for CliObserver {
    fn on_files_added(&self, accepted: &[Upload], skipped: usize) {
        self.println(format!(
            "{} {}{}",
            cyan("◆"),
            bold(&format!("{} file(s) queued", accepted.len())),
            if skipped > 0 {
                dim(&format!("  ({skipped} skipped)"))
            } else {
                String::new()
            }
        ));
    }

    fn on_preview_ready(&self, upload: &Upload) {
        self.println(format!(
            "  {} {}  {}",
            dim("·"),
            upload.name,
            dim(&format!("{} page(s)", upload.page_count.unwrap_or(0)))
        ));
    }

    fn on_preview_failed(&self, upload: &Upload, error: &UploadError) {
        self.println(format!("  {} {}  {}", red("✗"), upload.name, red(&error.to_string())));
    }

    fn on_submitted(&self, upload: &Upload, task_id: &str) {
        let bar = self.multi.add(ProgressBar::new(100));
        bar.set_style(Self::style());
        bar.set_prefix(truncate(&upload.name, 28));
        bar.set_message(dim(&format!("task {task_id}")));
        bar.set_position(u64::from(upload.progress));
        bar.enable_steady_tick(Duration::from_millis(80));
        self.bars
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(upload.id.clone(), bar);
    }

    fn on_progress(&self, upload: &Upload) {
        let bars = self.bars.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = bars.get(&upload.id) {
            bar.set_position(u64::from(upload.progress));
        }
    }

    fn on_completed(&self, upload: &Upload) {
        if let Some(bar) = self.take_bar(&upload.id) {
            bar.set_position(100);
            bar.finish_and_clear();
        }
        self.println(format!(
            "  {} {}  {}",
            green("✓"),
            upload.name,
            dim(&format!("{} chars", upload.ocr_result.chars().count()))
        ));
    }

    fn on_failed(&self, upload: &Upload, error: &UploadError) {
        if let Some(bar) = self.take_bar(&upload.id) {
            bar.finish_and_clear();
        }
        self.println(format!(
            "  {} {}  {}",
            red("✗"),
            upload.name,
            red(&truncate(&error.to_string(), 80))
        ));
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # OCR two scans, print the Markdown to stdout
  ocr-upload scan1.pdf photo.jpg

  # Pages 2-5 of every PDF, results saved as Markdown and text
  ocr-upload --pages 2-5 --output-dir results --format both report.pdf

  # Another server, faster polling, give up after 5 minutes
  ocr-upload --server http://ocr.internal:8000 --poll-interval-ms 1000 \
             --poll-timeout 300 *.png

  # Page counts only, no submission
  ocr-upload --inspect-only --json *.pdf

  # Copy the first result to the clipboard
  ocr-upload --copy receipt.png

SUPPORTED FILES:
  pdf, png, jpg, jpeg, tif, tiff, bmp, webp (at most --max-files per run)

ENVIRONMENT VARIABLES:
  OCR_UPLOAD_SERVER         Backend base URL
  PDFIUM_LIB_PATH           Path to an existing libpdfium (skips auto-download)
  OCR_UPLOAD_PDFIUM_CACHE   Override the PDFium cache directory
  RUST_LOG                  Override log filtering

  PDFium (~30 MB) is downloaded on first use of a PDF and cached in
  ~/.cache/ocr-upload/pdfium-7690/.
"#;

/// Upload PDFs and images to an OCR service and collect the results.
#[derive(Parser, Debug)]
#[command(
    name = "ocr-upload",
    version,
    about = "Upload PDFs and images to an OCR service and collect the results",
    long_about = "Upload PDF and image files to an OCR backend, follow each task until it \
finishes, and write the recognised text as Markdown or plain text.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Files to upload.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// OCR backend base URL.
    #[arg(long, env = "OCR_UPLOAD_SERVER", default_value = "http://localhost:8000")]
    server: String,

    /// Page range for every PDF: 5, 2-5 or 3- (default: all pages).
    #[arg(long, env = "OCR_UPLOAD_PAGES")]
    pages: Option<PageRange>,

    /// Write results into this directory instead of stdout.
    #[arg(short, long, env = "OCR_UPLOAD_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Result format written to --output-dir.
    #[arg(long, env = "OCR_UPLOAD_FORMAT", value_enum, default_value = "md")]
    format: FormatArg,

    /// Maximum number of files accepted in one run.
    #[arg(long, env = "OCR_UPLOAD_MAX_FILES", default_value_t = 20)]
    max_files: usize,

    /// Delay between status queries, in milliseconds.
    #[arg(long, env = "OCR_UPLOAD_POLL_INTERVAL_MS", default_value_t = 3000)]
    poll_interval_ms: u64,

    /// Give up on a task after this many seconds.
    #[arg(long, env = "OCR_UPLOAD_POLL_TIMEOUT", default_value_t = 600)]
    poll_timeout: u64,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, env = "OCR_UPLOAD_REQUEST_TIMEOUT", default_value_t = 30)]
    request_timeout: u64,

    /// Wrap each result in a "# OCR Result" header with file and page details.
    #[arg(long, env = "OCR_UPLOAD_ANNOTATE")]
    annotate: bool,

    /// Copy the first completed result to the clipboard.
    #[arg(long, env = "OCR_UPLOAD_COPY")]
    copy: bool,

    /// Print the server's estimated completion time after submitting.
    #[arg(long, env = "OCR_UPLOAD_ETA")]
    eta: bool,

    /// Preview files (type, size, page count) without submitting them.
    #[arg(long)]
    inspect_only: bool,

    /// Print the final upload records as JSON.
    #[arg(long, env = "OCR_UPLOAD_JSON")]
    json: bool,

    /// Disable progress bars.
    #[arg(long, env = "OCR_UPLOAD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "OCR_UPLOAD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "OCR_UPLOAD_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum FormatArg {
    Md,
    Txt,
    Both,
}

impl FormatArg {
    fn formats(self) -> &'static [ExportFormat] {
        match self {
            FormatArg::Md => &[ExportFormat::Markdown],
            FormatArg::Txt => &[ExportFormat::PlainText],
            FormatArg::Both => &[ExportFormat::Markdown, ExportFormat::PlainText],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars carry the per-file feedback; keep library INFO logs out
    // of their way unless asked for.
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

    // ── Build session ────────────────────────────────────────────────────
    let observer = show_progress.then(CliObserver::new);
    let config = build_config(&cli, observer.clone())?;
    let session = OcrSession::new(config).context("Failed to start session")?;

    // ── Read and add files ───────────────────────────────────────────────
    let mut files = Vec::with_capacity(cli.files.len());
    for path in &cli.files {
        let file = SourceFile::from_path(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        files.push(file);
    }

    let added = session.add_files(files);
    if let Some(notice) = &added.notice {
        if !cli.quiet {
            eprintln!("{} {}", cyan("⚠"), notice);
        }
    }
    if added.accepted.is_empty() {
        anyhow::bail!("No supported files to upload");
    }

    session.wait_for_previews().await;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        print_inspection(&session.snapshot(), cli.json)?;
        return Ok(());
    }

    // ── Page ranges ──────────────────────────────────────────────────────
    if let Some(range) = cli.pages {
        for upload in session.snapshot().iter().filter(|u| u.is_pdf()) {
            if let Some(count) = upload.page_count {
                let (start, end) = range.resolve(count);
                session
                    .set_range(&upload.id, Some(start), Some(end))
                    .with_context(|| format!("Failed to set page range for {}", upload.name))?;
            }
        }
    }

    // ── Submit and wait ──────────────────────────────────────────────────
    let batch = session.start_selected();
    if !cli.quiet && batch.skipped > 0 {
        for u in session.snapshot().iter().filter(|u| !batch.started.contains(&u.id)) {
            let reason = u
                .validate_range()
                .err()
                .or_else(|| u.error.clone())
                .map(|e| e.to_string())
                .unwrap_or_else(|| "not ready".into());
            eprintln!("{} {} skipped: {}", cyan("⚠"), u.name, reason);
        }
    }
    if batch.started.is_empty() {
        anyhow::bail!("None of the files could be submitted");
    }

    if cli.eta {
        match session.estimated_completion_time().await {
            Ok(eta) => eprintln!("{} Estimated completion: {}", cyan("◆"), bold(&eta)),
            Err(e) => eprintln!("{} Estimated completion unavailable: {}", dim("·"), e),
        }
    }

    tokio::select! {
        _ = session.wait_until_settled() => {}
        _ = tokio::signal::ctrl_c() => {
            let dropped = session.shutdown();
            anyhow::bail!("Interrupted; {dropped} upload(s) abandoned");
        }
    }

    // ── Write results ────────────────────────────────────────────────────
    let uploads = session.snapshot();
    let completed: Vec<&Upload> = uploads
        .iter()
        .filter(|u| u.status == UploadStatus::Completed)
        .collect();

    if let Some(dir) = &cli.output_dir {
        for upload in &completed {
            for &format in cli.format.formats() {
                let path = session
                    .download(&upload.id, format, dir)
                    .await
                    .with_context(|| format!("Failed to save result of {}", upload.name))?;
                if !cli.quiet && !cli.json {
                    eprintln!("  {} {}", dim("→"), bold(&path.display().to_string()));
                }
            }
        }
    } else if !cli.json {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        for (i, upload) in completed.iter().enumerate() {
            if completed.len() > 1 {
                if i > 0 {
                    handle.write_all(b"\n").ok();
                }
                writeln!(handle, "<!-- {} -->", upload.name).context("Failed to write to stdout")?;
            }
            handle
                .write_all(upload.ocr_result.as_bytes())
                .context("Failed to write to stdout")?;
            if !upload.ocr_result.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
        }
    }

    if cli.copy {
        if let Some(first) = completed.first() {
            let method = session
                .copy_result(&first.id)
                .await
                .context("Failed to copy the result")?;
            if !cli.quiet {
                eprintln!("{} Copied {} ({:?} clipboard)", green("✔"), first.name, method);
            }
        }
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&uploads).context("Failed to serialise uploads")?;
        println!("{json}");
    }

    // ── Summary ──────────────────────────────────────────────────────────
    let summary = session.summary();
    if !cli.quiet {
        eprintln!(
            "{}  {}/{} completed  ({}%)",
            if summary.failed == 0 { green("✔") } else { red("✘") },
            summary.completed,
            summary.total,
            summary.percent(),
        );
    }
    if summary.failed > 0 {
        anyhow::bail!("{} upload(s) failed", summary.failed);
    }

    Ok(())
}

/// Map CLI args to `SessionConfig`.
fn build_config(cli: &Cli, observer: Option<Arc<CliObserver>>) -> Result<SessionConfig> {
    let mut builder = SessionConfig::builder()
        .server_url(cli.server.clone())
        .max_uploads(cli.max_files)
        .poll_interval(Duration::from_millis(cli.poll_interval_ms))
        .poll_timeout(Duration::from_secs(cli.poll_timeout))
        .request_timeout(Duration::from_secs(cli.request_timeout))
        .annotate_results(cli.annotate);

    if let Some(obs) = observer {
        builder = builder.observer(obs as Arc<dyn SessionObserver>);
    }

    builder.build().context("Invalid configuration")
}

fn print_inspection(uploads: &[Upload], json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(uploads).context("Failed to serialise uploads")?
        );
        return Ok(());
    }
    for u in uploads {
        println!("File:    {}", u.name);
        println!("Type:    {}", u.kind.as_form_value());
        println!("Size:    {}", format_file_size(u.size));
        match (u.page_count, &u.error) {
            (_, Some(e)) => println!("Pages:   {}", red(&e.to_string())),
            (Some(n), None) => println!("Pages:   {n}"),
            (None, None) => println!("Pages:   unknown"),
        }
        println!();
    }
    Ok(())
}
