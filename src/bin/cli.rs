use std::io::{IsTerminal, Read};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, CommandFactory, Parser as ClapParser, Subcommand};
use reqwest::header::CONTENT_TYPE;
use tracing::error;

use songdrop::config::{BackendConfig, ServerConfig};
use songdrop::logging::{LogFormat, init_logging};
use songdrop::storage::GitHubBackend;
use songdrop::{
    DEFAULT_MAX_BYTES, FormBuilder, Library, MultipartConfig, SongRecord, UploadConfig,
    UploadResponse, format_debug, format_fields_only, format_json, parse_form_with_config,
};

const DEFAULT_LIBRARY: &str = "songdrop-library.json";

/// songdrop: MP3 upload endpoint and tools.
///
/// Parses multipart/form-data bodies, serves the upload endpoint, uploads
/// songs to a running server and manages the local song library.
#[derive(ClapParser)]
#[command(name = "songdrop", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log output format.
    #[arg(long, global = true, env = "SONGDROP_LOG_FORMAT", default_value = "pretty", value_enum)]
    log_format: LogFormat,

    /// Log level filter (RUST_LOG takes precedence).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Command {
    /// Parse a multipart/form-data body and print the fields and file.
    Parse(ParseArgs),
    /// Run the upload endpoint.
    Serve(ServeArgs),
    /// Upload an MP3 to a running server and record it in the library.
    Upload(UploadArgs),
    /// Check that the storage backend's credentials work.
    Check(BackendArgs),
    /// Inspect or edit the local song library.
    Library(LibraryArgs),
}

#[derive(Args)]
struct ParseArgs {
    /// Path to a file containing the raw body.
    /// Reads from stdin when neither FILE nor --raw is given.
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Raw body string (escape sequences \r \n \t \\ are expanded).
    #[arg(long)]
    raw: Option<String>,

    /// Content-Type header value carrying the boundary.
    #[arg(short, long)]
    content_type: String,

    /// Output format.
    #[arg(short, long, default_value = "json", value_enum)]
    format: OutputFormat,

    /// Pretty-print JSON output (ignored for other formats).
    #[arg(short, long)]
    pretty: bool,

    /// Maximum allowed body size in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    max_bytes: usize,

    /// Name of the file field.
    #[arg(long, default_value = "file")]
    file_field: String,

    /// Fail on malformed parts instead of skipping them.
    #[arg(long)]
    strict: bool,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable debug output
    Debug,
    /// Text fields only, one name=value per line
    Fields,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum BackendKind {
    /// GitHub repository contents API
    Github,
    /// Internet Archive S3-like API
    Archive,
    /// Local directory
    Local,
}

#[derive(Args)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "SONGDROP_LISTEN", default_value = "0.0.0.0:3000")]
    listen: SocketAddr,

    /// Shared upload password.
    #[arg(long, env = "UPLOAD_PASSWORD", hide_env_values = true)]
    password: String,

    /// Largest accepted MP3 in bytes.
    #[arg(long, env = "SONGDROP_MAX_FILE_SIZE", default_value_t = DEFAULT_MAX_BYTES)]
    max_file_size: usize,

    #[command(flatten)]
    backend: BackendArgs,
}

/// Storage backend selection and credentials.
#[derive(Args)]
struct BackendArgs {
    /// Where uploads are stored.
    #[arg(long, env = "SONGDROP_BACKEND", default_value = "github", value_enum)]
    backend: BackendKind,

    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    #[arg(long, env = "GITHUB_USERNAME")]
    github_username: Option<String>,

    #[arg(long, env = "GITHUB_REPO", default_value = GitHubBackend::DEFAULT_REPO)]
    github_repo: String,

    #[arg(long, env = "GITHUB_BRANCH", default_value = GitHubBackend::DEFAULT_BRANCH)]
    github_branch: String,

    /// GitHub API base URL, for GitHub Enterprise.
    #[arg(long, env = "GITHUB_API_URL")]
    github_api_url: Option<String>,

    #[arg(long, env = "IA_ACCESS_KEY", hide_env_values = true)]
    ia_access_key: Option<String>,

    #[arg(long, env = "IA_SECRET_KEY", hide_env_values = true)]
    ia_secret_key: Option<String>,

    #[arg(long, env = "IA_ENDPOINT")]
    ia_endpoint: Option<String>,

    /// Directory for the local backend.
    #[arg(long)]
    storage_dir: Option<PathBuf>,

    /// Base URL the local directory is served from.
    #[arg(long)]
    public_url: Option<String>,
}

impl BackendArgs {
    fn into_config(self) -> BackendConfig {
        match self.backend {
            BackendKind::Github => BackendConfig::GitHub {
                token: self.github_token,
                owner: self.github_username,
                repo: self.github_repo,
                branch: self.github_branch,
                api_base: self.github_api_url,
            },
            BackendKind::Archive => BackendConfig::InternetArchive {
                access_key: self.ia_access_key,
                secret_key: self.ia_secret_key,
                endpoint: self.ia_endpoint,
            },
            BackendKind::Local => BackendConfig::Local {
                root: self.storage_dir,
                public_base_url: self.public_url,
            },
        }
    }
}

impl ServeArgs {
    fn into_config(self) -> ServerConfig {
        let mut upload = UploadConfig::new(self.password);
        upload.max_file_size = self.max_file_size;
        ServerConfig::new(self.listen, upload, self.backend.into_config())
    }
}

#[derive(Args)]
struct UploadArgs {
    /// MP3 file to upload.
    #[arg(value_name = "MP3")]
    file: PathBuf,

    /// Short name for the song.
    #[arg(long)]
    short_name: String,

    /// Name to appear as uploader.
    #[arg(long, env = "SONGDROP_DISPLAY_NAME")]
    display_name: Option<String>,

    /// Shared upload password.
    #[arg(long, env = "UPLOAD_PASSWORD", hide_env_values = true)]
    password: String,

    /// Upload endpoint URL.
    #[arg(long, default_value = "http://localhost:3000/upload")]
    server: String,

    /// Library file to record the upload in.
    #[arg(long, env = "SONGDROP_LIBRARY", default_value = DEFAULT_LIBRARY)]
    library: PathBuf,
}

#[derive(Args)]
struct LibraryArgs {
    /// Library file.
    #[arg(long, env = "SONGDROP_LIBRARY", default_value = DEFAULT_LIBRARY)]
    path: PathBuf,

    #[command(subcommand)]
    action: LibraryAction,
}

#[derive(Subcommand)]
enum LibraryAction {
    /// List all songs, newest first.
    List {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show songs whose name, uploader or URL contain TERM.
    Search { term: String },
    /// Remove one song by id.
    Remove { id: String },
    /// Remove every song.
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_logging(cli.log_format, &cli.log_level) {
        eprintln!("warning: {e}");
    }

    match cli.command {
        Command::Parse(args) => run_parse(args),
        Command::Serve(args) => run_serve(args).await,
        Command::Upload(args) => run_upload(args).await,
        Command::Check(args) => run_check(args).await,
        Command::Library(args) => run_library(args),
    }
}

// ---------------------------------------------------------------------------
// parse
// ---------------------------------------------------------------------------

fn run_parse(args: ParseArgs) -> ExitCode {
    // When no input source is provided and stdin is a terminal (not piped),
    // show help instead of blocking.
    if args.file.is_none() && args.raw.is_none() && std::io::stdin().is_terminal() {
        Cli::command().print_help().ok();
        println!();
        return ExitCode::SUCCESS;
    }

    let data = match read_input(&args) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("Error reading input: {e}");
            return ExitCode::from(1);
        }
    };

    let config = MultipartConfig {
        file_field_name: args.file_field,
        max_bytes: args.max_bytes,
        strict: args.strict,
        ..MultipartConfig::default()
    };

    let result = match parse_form_with_config(&data, &args.content_type, config) {
        Ok(r) => r,
        Err(e) => {
            eprintln!("Parse error: {e}");
            return ExitCode::from(2);
        }
    };

    let output = match args.format {
        OutputFormat::Json => format_json(&result, args.pretty),
        OutputFormat::Debug => format_debug(&result),
        OutputFormat::Fields => format_fields_only(&result),
    };

    print!("{output}");
    if matches!(args.format, OutputFormat::Json) {
        println!();
    }
    ExitCode::SUCCESS
}

/// Read the raw body from --raw, a file, or stdin.
fn read_input(args: &ParseArgs) -> Result<Vec<u8>, std::io::Error> {
    if let Some(raw) = &args.raw {
        return Ok(unescape(raw).into_bytes());
    }
    match &args.file {
        Some(path) => std::fs::read(path),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Expand C-style escape sequences (`\r`, `\n`, `\t`, `\\`) in a string.
///
/// Any other `\X` sequence is kept as-is (both the backslash and `X`).
fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(ch) = chars.next() {
        if ch == '\\' {
            match chars.next() {
                Some('r') => out.push('\r'),
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(ch);
        }
    }
    out
}

// ---------------------------------------------------------------------------
// serve
// ---------------------------------------------------------------------------

async fn run_serve(args: ServeArgs) -> ExitCode {
    match songdrop::server::run(args.into_config()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::from(1)
        }
    }
}

// ---------------------------------------------------------------------------
// upload
// ---------------------------------------------------------------------------

async fn run_upload(args: UploadArgs) -> ExitCode {
    let bytes = match tokio::fs::read(&args.file).await {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Error reading {}: {e}", args.file.display());
            return ExitCode::from(1);
        }
    };
    let filename = file_name_of(&args.file);

    let mut form = FormBuilder::with_random_boundary().text("shortName", args.short_name.trim());
    if let Some(display_name) = &args.display_name {
        form = form.text("displayName", display_name.trim());
    }
    let form = form
        .text("password", &args.password)
        .file("file", &filename, "audio/mpeg", &bytes);

    let response = reqwest::Client::new()
        .post(&args.server)
        .header(CONTENT_TYPE, form.content_type())
        .body(form.build())
        .send()
        .await;

    let reply: UploadResponse = match response {
        Ok(resp) => match resp.json().await {
            Ok(reply) => reply,
            Err(e) => {
                eprintln!("Unexpected response from {}: {e}", args.server);
                return ExitCode::from(1);
            }
        },
        Err(e) => {
            eprintln!("Upload request failed: {e}");
            return ExitCode::from(1);
        }
    };

    match reply {
        UploadResponse::Success { receipt, .. } => {
            println!("Uploaded {} as {}", receipt.short_name, receipt.file_name);
            println!("URL: {}", receipt.url);
            println!("Use in game: /stream {}", receipt.url);

            if let Some(page_url) = &receipt.page_url {
                println!("Page: {page_url}");
            }

            let record = SongRecord::from_receipt(&receipt, &filename, bytes.len() as u64);
            match Library::open(&args.library).and_then(|mut lib| lib.add(record)) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    eprintln!("Uploaded, but failed to update library: {e}");
                    ExitCode::from(1)
                }
            }
        }
        UploadResponse::Failure { error, details, .. } => {
            match details {
                Some(details) => eprintln!("Upload failed: {error} ({details})"),
                None => eprintln!("Upload failed: {error}"),
            }
            ExitCode::from(2)
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload.mp3".to_owned())
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

async fn run_check(args: BackendArgs) -> ExitCode {
    let backend = match args.into_config().build() {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    let report = match backend.check().await {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Cannot reach {}: {e}", backend.name());
            return ExitCode::from(1);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error: {e}"),
    }
    if report.ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}

// ---------------------------------------------------------------------------
// library
// ---------------------------------------------------------------------------

fn run_library(args: LibraryArgs) -> ExitCode {
    let mut library = match Library::open(&args.path) {
        Ok(lib) => lib,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(1);
        }
    };

    let outcome = match args.action {
        LibraryAction::List { json: true } => {
            match serde_json::to_string_pretty(library.songs()) {
                Ok(s) => println!("{s}"),
                Err(e) => eprintln!("Error: {e}"),
            }
            Ok(())
        }
        LibraryAction::List { json: false } => {
            print_songs(library.songs().iter());
            Ok(())
        }
        LibraryAction::Search { term } => {
            print_songs(library.search(&term).into_iter());
            Ok(())
        }
        LibraryAction::Remove { id } => library.remove(&id).map(|removed| {
            if removed {
                println!("Removed {id}");
            } else {
                println!("No song with id {id}");
            }
        }),
        LibraryAction::Clear => library.clear().map(|()| println!("Library cleared.")),
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

fn print_songs<'a>(songs: impl Iterator<Item = &'a SongRecord>) {
    let mut count = 0;
    for song in songs {
        count += 1;
        println!(
            "{}  {}  by {}  {:.2} MB  {}  plays: {}",
            song.id,
            song.short_name,
            song.uploaded_by,
            song.file_size as f64 / (1024.0 * 1024.0),
            song.upload_date.format("%Y-%m-%d"),
            song.play_count
        );
        println!("    /stream {}", song.file_url);
    }
    if count == 0 {
        println!("No songs uploaded yet");
    }
}
