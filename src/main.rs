//! `scanbox`: inspect and manage the local document store from a shell.

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use scanbox_config::Config;
use scanbox_storage::backend::LocalBackend;
use scanbox_store::{DocumentPatch, DocumentStore};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open local storage")]
    Storage,
    #[display("could not add document")]
    Add,
    #[display("no document with id `{_0}`")]
    NoSuchDocument(#[error(not(source))] String),
    #[display("could not list payloads")]
    Orphans,
    #[display("could not encode output")]
    Output,
}

#[derive(Parser, Debug)]
#[command(name = "scanbox", version, about = "Local document store for scanned pages")]
struct Cli {
    /// Config file (TOML, YAML or JSON); defaults to the platform config file if present.
    #[arg(short, long, global = true, env = "SCANBOX_CONFIG")]
    config: Option<PathBuf>,
    /// Log debug output from the store to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List documents, newest first.
    List {
        /// Only documents whose name contains this text, ignoring case.
        #[arg(short, long)]
        search: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Print one document as JSON.
    Show { id: String },
    /// Add an image as a new document.
    Add {
        source: PathBuf,
        /// Defaults to the configured name format, e.g. "Scan 6/20/2024".
        #[arg(short, long)]
        name: Option<String>,
    },
    /// Rename a document.
    Rename { id: String, name: String },
    /// Delete a document and its payload.
    Delete { id: String },
    /// List payload files no document refers to.
    Orphans,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_filter = if cli.verbose {
        "warn,scanbox=debug,scanbox_store=debug,scanbox_storage=debug,scanbox_config=debug"
    } else {
        "warn,scanbox=info,scanbox_store=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = open(cli.config).await?;
    match cli.command {
        Command::List { search, json } => {
            let documents = store.search(search.as_deref().unwrap_or_default());
            if json {
                println!("{}", serde_json::to_string_pretty(&documents).or_raise(|| ErrorKind::Output)?);
            } else {
                for document in documents.iter() {
                    println!(
                        "{}\t{}\t{}\t{}\t{}",
                        document.id,
                        document.created_at.date(),
                        document.kind,
                        document.pages,
                        document.name
                    );
                }
            }
        },
        Command::Show { id } => {
            let document = store.get(&id).ok_or_raise(|| ErrorKind::NoSuchDocument(id))?;
            println!("{}", serde_json::to_string_pretty(&document).or_raise(|| ErrorKind::Output)?);
        },
        Command::Add { source, name } => {
            let document = store.add(&source, name.as_deref()).await.or_raise(|| ErrorKind::Add)?;
            println!("{}", document.id);
        },
        Command::Rename { id, name } => {
            if !store.update(&id, DocumentPatch::default().with_name(name)).await {
                exn::bail!(ErrorKind::NoSuchDocument(id));
            }
        },
        Command::Delete { id } => {
            if !store.delete(&id).await {
                exn::bail!(ErrorKind::NoSuchDocument(id));
            }
        },
        Command::Orphans => {
            for file in store.orphaned_payloads().await.or_raise(|| ErrorKind::Orphans)? {
                println!("{}\t{}", file.path.display(), file.size);
            }
        },
    }
    Ok(())
}

async fn open(config_file: Option<PathBuf>) -> Result<DocumentStore> {
    let config = Config::load(config_file.as_deref()).or_raise(|| ErrorKind::Config)?;
    let root = config.data_dir().or_raise(|| ErrorKind::Config)?;
    let options = config.store_options().or_raise(|| ErrorKind::Config)?;
    let backend = Arc::new(LocalBackend::new("local", &root).or_raise(|| ErrorKind::Storage)?);
    let store = DocumentStore::with_backend(backend.clone(), options).or_raise(|| ErrorKind::Storage)?;
    let count = store.load().await;
    tracing::debug!(root = %backend.root().display(), count, "Opened document store");
    Ok(store)
}
