//! CLI entry point for `mimeconv`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};

use mimeconv::cache::DecodeCache;
use mimeconv::config::{self, Config};
use mimeconv::export::eml;
use mimeconv::extract::{DocumentMeta, HandlerRegistry, ParsedDocument};
use mimeconv::model::mime::guess_content_type;
use mimeconv::parser::eml::read_eml;
use mimeconv::store::{BlobStore, FileBlobStore};
use mimeconv::tnef::{BasicTnefDecoder, TnefDecoder};
use mimeconv::visitor::{
    run_converters, run_mutators, ConversionContext, ConverterServices, VisitorRegistry,
};

#[derive(Parser)]
#[command(
    name = "mimeconv",
    version,
    about = "Convert and index MIME messages",
    long_about = "Expands TNEF (winmail.dat) and uuencoded attachments into standard MIME \
                  and extracts indexable text from stored documents."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the converter passes over an .eml file
    Convert {
        path: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Run the mutator passes instead of the converters
        #[arg(long)]
        mutators: bool,
    },
    /// Extract indexable text from a file
    Extract {
        path: PathBuf,
        /// Content type (default: guessed from the file extension)
        #[arg(long, value_name = "TYPE")]
        content_type: Option<String>,
        /// Creator address, e.g. "Ann <ann@example.com>"
        #[arg(long, value_name = "ADDR")]
        creator: Option<String>,
        #[arg(long)]
        description: Option<String>,
        /// Version stamped on the document
        #[arg(long)]
        version: Option<u32>,
        #[arg(long)]
        json: bool,
    },
    /// Decode a raw TNEF (winmail.dat) file into MIME
    Tnef {
        path: PathBuf,
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = config::load_config();

    // Configure logging: stderr + optional log file
    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match cli.command {
        Commands::Convert {
            path,
            output,
            mutators,
        } => cmd_convert(&config, &path, output.as_deref(), mutators),
        Commands::Extract {
            path,
            content_type,
            creator,
            description,
            version,
            json,
        } => cmd_extract(
            &config,
            &path,
            ExtractArgs {
                content_type,
                creator,
                description,
                version,
                json,
            },
        ),
        Commands::Tnef { path, output } => cmd_tnef(&config, &path, output.as_deref()),
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    // Try to set up file logging
    let log_path = config::log_file_path(config);
    let log_dir = log_path.parent().map(Path::to_path_buf).unwrap_or_default();
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_name = log_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mimeconv.log".to_string());
        let file_appender = tracing_appender::rolling::never(&log_dir, file_name);
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        // Fall back to stderr only
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mimeconv", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

/// Parse an .eml file, run the configured passes and write the result.
fn cmd_convert(
    config: &Config,
    path: &Path,
    output: Option<&Path>,
    mutators: bool,
) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("File not found: {}", path.display());
    }

    let cache = match DecodeCache::open(config::decode_cache_root(config)) {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            tracing::warn!(error = %e, "Decode cache unavailable, decoding in memory");
            None
        }
    };
    let services = ConverterServices::from_config(config, cache.clone());
    let registry = VisitorRegistry::from_config(config, &services);
    let identity = path.to_string_lossy().into_owned();
    let ctx = ConversionContext::new().with_identity(identity.as_str());

    let start = Instant::now();
    let message = read_eml(path, config.converters.max_depth)?;
    let visited = if mutators {
        run_mutators(&registry, &ctx, message)?
    } else {
        run_converters(&registry, &ctx, message)?
    };
    let elapsed = start.elapsed();

    match output {
        Some(out) => {
            let written = eml::export_eml(&visited.message, out)?;
            eprintln!("Wrote {}", written.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            eml::write_message(&visited.message, &mut stdout)?;
            stdout.flush()?;
        }
    }

    eprintln!(
        "{} ({} ms)",
        if visited.modified {
            "Message converted"
        } else {
            "Message unchanged"
        },
        elapsed.as_millis()
    );

    if let Some(cache) = cache {
        let deleted = cache.purge(&identity);
        tracing::debug!(deleted, "Released decoded payloads");
    }
    Ok(())
}

struct ExtractArgs {
    content_type: Option<String>,
    creator: Option<String>,
    description: Option<String>,
    version: Option<u32>,
    json: bool,
}

/// Store a file in a scratch blob store and print its extracted document.
fn cmd_extract(config: &Config, path: &Path, args: ExtractArgs) -> anyhow::Result<()> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("cannot open {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let content_type = args.content_type.unwrap_or_else(|| {
        filename
            .as_deref()
            .map(guess_content_type)
            .unwrap_or("application/octet-stream")
            .to_string()
    });
    let mut meta = DocumentMeta::new(content_type);
    meta.filename = filename;
    meta.creator = args.creator;
    meta.description = args.description;
    meta.created = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(chrono::DateTime::<chrono::Utc>::from);

    let scratch = tempfile::tempdir()?;
    let store: Arc<dyn BlobStore> = Arc::new(FileBlobStore::open(scratch.path())?);
    let doc = ParsedDocument::from_stream(
        &mut file,
        meta,
        Arc::new(HandlerRegistry::default()),
        store,
        &config.documents,
    )?;
    if let Some(version) = args.version {
        doc.set_version(version);
    }

    if args.json {
        let out = serde_json::json!({
            "digest": doc.digest(),
            "size": doc.size(),
            "fragment": doc.fragment(),
            "temporary_failure": doc.has_temporary_analysis_failure(),
            "document": doc.document(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        let document = doc.document();
        println!();
        println!("  Digest:       {}", doc.digest());
        println!("  Size:         {} bytes", doc.size());
        println!("  Content type: {}", doc.content_type());
        if let Some(from) = &document.from {
            println!("  From tokens:  {from}");
        }
        if let Some(version) = document.version {
            println!("  Version:      {version}");
        }
        if doc.has_temporary_analysis_failure() {
            println!("  Status:       temporary failure, retry later");
        }
        println!("  Fragment:     {}", doc.fragment());
        println!();
    }
    Ok(())
}

/// Decode a raw TNEF file and write the MIME rendition.
fn cmd_tnef(config: &Config, path: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let mut file = std::io::BufReader::new(
        std::fs::File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
    );
    let decoder = BasicTnefDecoder::new()
        .with_max_attribute_len(config.converters.tnef_max_attribute_len);
    let mut message = decoder
        .decode(&mut file)
        .with_context(|| format!("cannot decode {}", path.display()))?;
    message.save_changes();

    match output {
        Some(out) => {
            let written = eml::export_eml(&message, out)?;
            eprintln!("Wrote {}", written.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            eml::write_message(&message, &mut stdout)?;
            stdout.flush()?;
        }
    }
    Ok(())
}
