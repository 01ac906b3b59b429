//! CLI binary for yearbook-pages.
//!
//! A thin shim over the library crate: state lives in one JSON file (page
//! store snapshot plus users), blobs live under `--storage-root`.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use yearbook_pages::{
    Caller, Configure, CreatedPages, Direction, Edit, FsBlobStore, Identity,
    IngestProgressCallback, IngestRequest, MemoryEntitlements, MemoryPageStore, Orientation,
    PageType, PipelineConfig, ProgressCallback, ReorderRequest, Role, Snapshot, SwapRequest,
    TocUpdate, UploadFile, UploadType, UserRecord, YearbookPage, YearbookService,
};

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar for one ingestion. Starts as a spinner and becomes a bar
/// once the number of pages is known.
struct CliProgressCallback {
    bar: ProgressBar,
    stored: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Validating upload…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            stored: AtomicUsize::new(0),
        })
    }

    fn activate_bar(&self, total: usize, prefix: &'static str) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
        self.bar.set_style(style);
        self.bar.set_prefix(prefix);
    }
}

impl IngestProgressCallback for CliProgressCallback {
    fn on_ingest_start(&self, total_files: usize) {
        self.bar.set_message(format!("{total_files} file(s) accepted"));
    }

    fn on_extraction_start(&self, total_pages: usize) {
        self.activate_bar(total_pages, "Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting {total_pages} pages…"))
        ));
    }

    fn on_page_extracted(&self, _index: usize, _total_pages: usize) {
        self.bar.inc(1);
    }

    fn on_page_stored(&self, index: usize, total: usize) {
        if self.stored.fetch_add(1, Ordering::SeqCst) == 0 {
            self.activate_bar(total, "Storing");
        }
        self.bar.set_message(format!("page {index}"));
        self.bar.inc(1);
    }

    fn on_ingest_complete(&self, pages_created: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} page(s) created",
            green("✔"),
            bold(&pages_created.to_string())
        );
    }

    fn on_ingest_error(&self, error: &str) {
        self.bar.finish_and_clear();
        let msg = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        eprintln!("{} {}", red("✘"), red(&msg));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Create a yearbook and switch it to PDF mode
  yearbook create --school 7f0c… --year 2024 --title "Class of 2024"
  yearbook configure <YEARBOOK> --upload-type pdf --initialized

  # Ingest a whole PDF (first page → front cover, last → back cover)
  yearbook ingest <YEARBOOK> content yearbook.pdf

  # Image mode: covers and content pages
  yearbook ingest <YEARBOOK> front_cover cover.png
  yearbook ingest <YEARBOOK> content p1.jpg p2.jpg p3.jpg

  # Reordering
  yearbook list <YEARBOOK>
  yearbook reorder <PAGE> 1
  yearbook swap <PAGE_A> <PAGE_B>
  yearbook move <PAGE> left
  yearbook delete <PAGE>

  # Access checks
  yearbook user <USER> viewer
  yearbook grant <USER> <SCHOOL> 2024
  yearbook resolve /api/secure-image/yearbooks/pdf_pages_<id>/page_2.jpg --as <USER> -o page.jpg

ENVIRONMENT VARIABLES:
  YEARBOOK_STATE          State file (default: yearbook-state.json)
  YEARBOOK_STORAGE_ROOT   Blob directory (default: uploads/yearbooks)
  PDFIUM_LIB_PATH         Path to libpdfium (file or directory)
  RUST_LOG                Overrides the log filter

A .env file in the working directory is loaded when present.
"#;

#[derive(Parser, Debug)]
#[command(
    name = "yearbook",
    version,
    about = "Manage yearbook pages: ingest images or PDFs, reorder, and check access",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// JSON file holding yearbooks, pages, TOC items and users.
    #[arg(long, global = true, env = "YEARBOOK_STATE", default_value = "yearbook-state.json")]
    state: PathBuf,

    #[arg(long, global = true, env = "YEARBOOK_STORAGE_ROOT", default_value = "uploads/yearbooks")]
    storage_root: PathBuf,

    #[arg(long, global = true, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    #[arg(long, global = true, env = "YEARBOOK_EXTRACTION_TIMEOUT", default_value_t = 120)]
    extraction_timeout: u64,

    #[arg(long, global = true, env = "YEARBOOK_ALLOW_PDF_COVER")]
    allow_pdf_cover: bool,

    /// Print results as JSON.
    #[arg(long, global = true, env = "YEARBOOK_JSON")]
    json: bool,

    #[arg(short, long, global = true, env = "YEARBOOK_VERBOSE")]
    verbose: bool,

    #[arg(short, long, global = true, env = "YEARBOOK_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a yearbook for a school and year.
    Create {
        #[arg(long)]
        school: Uuid,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        title: String,
    },
    /// Change title, orientation, upload type or initialisation.
    Configure {
        yearbook: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        orientation: Option<Orientation>,
        #[arg(long)]
        upload_type: Option<UploadType>,
        #[arg(long)]
        initialized: bool,
        #[arg(long)]
        price: Option<u64>,
    },
    /// Publish (or with --unpublish, withdraw) a yearbook.
    Publish {
        yearbook: Uuid,
        #[arg(long)]
        unpublish: bool,
    },
    /// Ingest files as a front cover, back cover or content pages.
    Ingest {
        yearbook: Uuid,
        page_type: PageType,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        no_progress: bool,
    },
    /// List pages in reading order.
    List { yearbook: Uuid },
    /// Move a content page to a new number.
    Reorder { page: Uuid, new_page_number: u32 },
    /// Exchange the numbers of two content pages.
    Swap { page_a: Uuid, page_b: Uuid },
    /// Swap a content page with its left or right neighbour.
    Move { page: Uuid, direction: Direction },
    /// Delete a page; later content pages close the gap.
    Delete { page: Uuid },
    /// Rewrite content numbers to 1..N in current order.
    Renumber { yearbook: Uuid },
    /// Apply a JSON array of staged edits in one step.
    Batch { yearbook: Uuid, edits: PathBuf },
    /// Register or update a user.
    User {
        id: Uuid,
        role: Role,
        #[arg(long)]
        school: Option<Uuid>,
    },
    /// Record (or with --revoke, remove) a yearbook purchase.
    Grant {
        user: Uuid,
        school: Uuid,
        year: i32,
        #[arg(long)]
        revoke: bool,
    },
    /// Resolve an image reference as a caller and optionally save the bytes.
    Resolve {
        reference: String,
        #[arg(long = "as")]
        as_user: Option<Uuid>,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Table of contents.
    #[command(subcommand)]
    Toc(TocCommand),
}

#[derive(Subcommand, Debug)]
enum TocCommand {
    Add {
        yearbook: Uuid,
        title: String,
        page_number: u32,
        #[arg(long)]
        description: Option<String>,
    },
    Update {
        id: Uuid,
        #[arg(long)]
        title: Option<String>,
        #[arg(long)]
        page_number: Option<u32>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, conflicts_with = "description")]
        clear_description: bool,
    },
    Rm {
        id: Uuid,
    },
    List {
        yearbook: Uuid,
    },
    /// Items pointing past the last content page.
    Dangling {
        yearbook: Uuid,
    },
}

/// Everything the CLI persists between runs.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateFile {
    #[serde(flatten)]
    snapshot: Snapshot,
    #[serde(default)]
    users: Vec<UserRecord>,
}

struct State {
    store: Arc<MemoryPageStore>,
    users: Arc<MemoryEntitlements>,
}

impl State {
    async fn load(path: &Path) -> Result<Self> {
        let file = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice::<StateFile>(&bytes)
                .with_context(|| format!("Failed to parse state file {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        let store = MemoryPageStore::from_snapshot(file.snapshot)
            .with_context(|| format!("State file {} is inconsistent", path.display()))?;
        Ok(Self {
            store: Arc::new(store),
            users: Arc::new(MemoryEntitlements::from_records(file.users)),
        })
    }

    async fn save(&self, path: &Path) -> Result<()> {
        let file = StateFile {
            snapshot: self.store.snapshot(),
            users: self.users.records(),
        };
        let json = serde_json::to_vec_pretty(&file).context("Failed to serialise state")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, path)
            .await
            .with_context(|| format!("Failed to replace {}", path.display()))?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli)?;
    let state = State::load(&cli.state).await?;
    let service = YearbookService::with_pdfium(
        config.clone(),
        state.store.clone(),
        Arc::new(FsBlobStore::new(&config.storage_root)),
        state.users.clone(),
    );

    let mutated = run(&cli, &service, &state).await?;
    if mutated {
        state.save(&cli.state).await?;
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .storage_root(&cli.storage_root)
        .extraction_timeout_secs(cli.extraction_timeout)
        .allow_pdf_cover_upload(cli.allow_pdf_cover);
    if let Some(ref lib) = cli.pdfium_lib {
        builder = builder.pdfium_library_path(lib);
    }
    builder.build().context("Invalid configuration")
}

/// Runs one subcommand. Returns whether the state file needs saving.
async fn run(cli: &Cli, service: &YearbookService, state: &State) -> Result<bool> {
    match &cli.command {
        Command::Create {
            school,
            year,
            title,
        } => {
            let yb = service.setup().create_yearbook(*school, *year, title).await?;
            emit(cli, &yb, || format!("{} yearbook {}", green("✔"), bold(&yb.id.to_string())))?;
            Ok(true)
        }

        Command::Configure {
            yearbook,
            title,
            orientation,
            upload_type,
            initialized,
            price,
        } => {
            let changes = Configure {
                title: title.clone(),
                orientation: *orientation,
                upload_type: *upload_type,
                initialized: initialized.then_some(true),
                price: *price,
            };
            let yb = service.setup().configure(*yearbook, changes).await?;
            emit(cli, &yb, || {
                format!(
                    "{} {}  {} mode  initialised={}",
                    green("✔"),
                    yb.title,
                    yb.upload_type,
                    yb.is_initialized
                )
            })?;
            Ok(true)
        }

        Command::Publish {
            yearbook,
            unpublish,
        } => {
            let yb = service.setup().set_published(*yearbook, !unpublish).await?;
            emit(cli, &yb, || format!("{} published={}", green("✔"), yb.is_published))?;
            Ok(true)
        }

        Command::Ingest {
            yearbook,
            page_type,
            files,
            title,
            no_progress,
        } => {
            let mut uploads = Vec::with_capacity(files.len());
            for path in files {
                uploads.push(read_upload(path).await?);
            }
            let mut request = IngestRequest::new(*yearbook, *page_type, uploads);
            if let Some(t) = title {
                request = request.with_title(t.clone());
            }
            let show_progress = !cli.quiet && !cli.json && !no_progress;
            let created = if show_progress {
                let cb: ProgressCallback = CliProgressCallback::new();
                service.ingest_with_progress(request, cb).await?
            } else {
                service.ingest(request).await?
            };
            emit(cli, &created, || describe_created(&created))?;
            Ok(true)
        }

        Command::List { yearbook } => {
            let pages = service.pages(*yearbook).await?;
            emit(cli, &pages, || page_table(&pages))?;
            Ok(false)
        }

        Command::Reorder {
            page,
            new_page_number,
        } => {
            let moved = service
                .reorder(ReorderRequest {
                    page_id: *page,
                    new_page_number: *new_page_number,
                })
                .await?;
            emit(cli, &moved, || {
                format!("{} page {} is now #{}", green("✔"), moved.id, moved.page_number)
            })?;
            Ok(true)
        }

        Command::Swap { page_a, page_b } => {
            let swapped = service
                .swap(SwapRequest {
                    page_a_id: *page_a,
                    page_b_id: *page_b,
                })
                .await?;
            emit(cli, &swapped, || {
                format!(
                    "{} #{} ⇄ #{}",
                    green("✔"),
                    swapped.page_a.page_number,
                    swapped.page_b.page_number
                )
            })?;
            Ok(true)
        }

        Command::Move { page, direction } => {
            let yearbook = yearbook_of(state, *page).await?;
            let changed = service
                .ordering()
                .move_adjacent(yearbook, *page, *direction)
                .await?;
            emit(cli, &changed, || page_table(&changed))?;
            Ok(true)
        }

        Command::Delete { page } => {
            let deleted = service
                .delete(yearbook_pages::DeleteRequest { page_id: *page })
                .await?;
            emit(cli, &deleted, || {
                format!(
                    "{} deleted {} ({})  {} page(s) shifted",
                    green("✔"),
                    deleted.deleted_page_id,
                    deleted.page_type,
                    deleted.shifted
                )
            })?;
            Ok(true)
        }

        Command::Renumber { yearbook } => {
            let writes = service.ordering().renumber(*yearbook).await?;
            emit(cli, &writes, || format!("{} {writes} write(s)", green("✔")))?;
            Ok(true)
        }

        Command::Batch { yearbook, edits } => {
            let raw = tokio::fs::read(edits)
                .await
                .with_context(|| format!("Failed to read {}", edits.display()))?;
            let edits: Vec<Edit> =
                serde_json::from_slice(&raw).context("Edits must be a JSON array of edit objects")?;
            let outcome = service.ordering().apply_batch(*yearbook, &edits).await?;
            emit(cli, &outcome, || {
                format!(
                    "{} {} edit(s) applied, {} deleted, {} write(s)\n{}",
                    green("✔"),
                    edits.len(),
                    outcome.deleted.len(),
                    outcome.writes,
                    page_table(&outcome.pages)
                )
            })?;
            Ok(true)
        }

        Command::User { id, role, school } => {
            if *role == Role::School && school.is_none() {
                bail!("school users need --school");
            }
            let identity = Identity {
                subject_id: *id,
                role: *role,
                school_id: *school,
            };
            state.users.register(identity.clone());
            emit(cli, &identity, || format!("{} user {} ({:?})", green("✔"), id, role))?;
            Ok(true)
        }

        Command::Grant {
            user,
            school,
            year,
            revoke,
        } => {
            let changed = if *revoke {
                state.users.revoke(*user, *school, *year)
            } else if state.users.grant(*user, *school, *year) {
                true
            } else {
                bail!("unknown user {user}; register it with `yearbook user` first");
            };
            emit(cli, &changed, || {
                let verb = if *revoke { "revoked" } else { "granted" };
                format!("{} {verb} {school}/{year} for {user}", green("✔"))
            })?;
            Ok(changed)
        }

        Command::Resolve {
            reference,
            as_user,
            output,
        } => {
            let caller: Caller = service.gateway().caller_for(*as_user).await?;
            match service.resolve(reference, &caller).await {
                Ok(image) => {
                    let summary = serde_json::json!({
                        "pageId": image.page_id,
                        "grant": image.grant,
                        "contentType": image.content_type,
                        "cacheControl": image.cache_control,
                        "length": image.length,
                    });
                    if let Some(path) = output {
                        let bytes = yearbook_pages::store::BlobReader {
                            length: image.length,
                            stream: image.body,
                        }
                        .read_all()
                        .await?;
                        tokio::fs::write(path, bytes)
                            .await
                            .with_context(|| format!("Failed to write {}", path.display()))?;
                    }
                    emit(cli, &summary, || {
                        format!(
                            "{} {:?}  {}  {} bytes",
                            green("✔"),
                            image.grant,
                            image.content_type,
                            image.length
                        )
                    })?;
                    Ok(false)
                }
                Err(denied) => {
                    if cli.json {
                        println!("{}", serde_json::to_string_pretty(&denied)?);
                    }
                    bail!("{} ({}): {}", denied.status_code(), denied.reason(), denied)
                }
            }
        }

        Command::Toc(cmd) => run_toc(cli, service, cmd).await,
    }
}

async fn run_toc(cli: &Cli, service: &YearbookService, cmd: &TocCommand) -> Result<bool> {
    let toc = service.toc();
    match cmd {
        TocCommand::Add {
            yearbook,
            title,
            page_number,
            description,
        } => {
            let item = toc
                .create(*yearbook, title, *page_number, description.clone())
                .await?;
            emit(cli, &item, || format!("{} {} → page {}", green("✔"), item.title, item.page_number))?;
            Ok(true)
        }
        TocCommand::Update {
            id,
            title,
            page_number,
            description,
            clear_description,
        } => {
            let update = TocUpdate {
                title: title.clone(),
                page_number: *page_number,
                description: if *clear_description {
                    Some(None)
                } else {
                    description.clone().map(Some)
                },
            };
            let item = toc.update(*id, update).await?;
            emit(cli, &item, || format!("{} {} → page {}", green("✔"), item.title, item.page_number))?;
            Ok(true)
        }
        TocCommand::Rm { id } => {
            toc.delete(*id).await?;
            emit(cli, id, || format!("{} removed {id}", green("✔")))?;
            Ok(true)
        }
        TocCommand::List { yearbook } | TocCommand::Dangling { yearbook } => {
            let items = if matches!(cmd, TocCommand::List { .. }) {
                toc.list(*yearbook).await?
            } else {
                toc.dangling(*yearbook).await?
            };
            emit(cli, &items, || {
                items
                    .iter()
                    .map(|i| format!("{:>4}  {}  {}", i.page_number, i.title, dim(&i.id.to_string())))
                    .collect::<Vec<_>>()
                    .join("\n")
            })?;
            Ok(false)
        }
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

async fn yearbook_of(state: &State, page: Uuid) -> Result<Uuid> {
    use yearbook_pages::PageStore;
    state
        .store
        .page(page)
        .await?
        .map(|p| p.yearbook_id)
        .with_context(|| format!("Page {page} not found"))
}

async fn read_upload(path: &Path) -> Result<UploadFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let content_type = match ext.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    };
    Ok(UploadFile::new(file_name, content_type, bytes))
}

/// Print `value` as JSON with `--json`, otherwise the human rendering.
fn emit<T: Serialize + ?Sized>(cli: &Cli, value: &T, human: impl FnOnce() -> String) -> Result<()> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if cli.json {
        let json = serde_json::to_string_pretty(value).context("Failed to serialise output")?;
        writeln!(handle, "{json}")?;
    } else if !cli.quiet {
        writeln!(handle, "{}", human())?;
    }
    Ok(())
}

fn describe_created(created: &CreatedPages) -> String {
    let head = match created {
        CreatedPages::Single { page } => format!("{} {} page created", green("✔"), page.page_type),
        CreatedPages::Many { pages } => format!("{} {} content pages created", green("✔"), pages.len()),
        CreatedPages::Pdf { pages_created, .. } => format!(
            "{} {} pages extracted  {}",
            green("✔"),
            pages_created,
            dim("covers auto-assigned")
        ),
    };
    format!("{head}\n{}", page_table(created.pages()))
}

fn page_table(pages: &[YearbookPage]) -> String {
    pages
        .iter()
        .map(|p| {
            let slot = match p.page_type {
                PageType::FrontCover => cyan("front"),
                PageType::BackCover => cyan("back "),
                PageType::Content => format!("{:>5}", p.page_number),
            };
            format!("{slot}  {}  {}  {}", p.id, p.title, dim(&p.image_ref))
        })
        .collect::<Vec<_>>()
        .join("\n")
}
