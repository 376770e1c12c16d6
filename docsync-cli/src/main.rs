//! DocSync terminal client.
//!
//! Lists and creates documents through the directory service, joins a
//! document over the realtime channel, and can run the relay itself.

mod terminal;

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{watch, Mutex};

use docsync_collab::{
    derive_display, filter_documents, ClientConfig, DirectoryClient, DocumentRequest, NewDocument,
    Notifier, RejoinPolicy, RelayConfig, RelayServer, Session, SharedSurface,
};
use docsync_core::{ChangeOrigin, DocumentId, MemorySurface, RichTextSurface};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "docsync")]
#[command(version)]
#[command(about = "Collaborative rich text documents from the terminal")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct GlobalOptions {
    /// Realtime endpoint.
    #[arg(long, env = "DOCSYNC_SERVER_URL", default_value = "ws://127.0.0.1:3001", global = true)]
    server_url: String,

    /// Directory service base url.
    #[arg(long, env = "DOCSYNC_DIRECTORY_URL", global = true)]
    directory_url: Option<String>,

    /// Web front end that share links point at.
    #[arg(long, env = "DOCSYNC_SHARE_BASE", default_value = "http://localhost:3000", global = true)]
    share_base: String,

    /// Autosave period in milliseconds.
    #[arg(long, default_value_t = 2000, global = true)]
    autosave_ms: u64,
}

impl GlobalOptions {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_url: self.server_url.clone(),
            directory_url: self.directory_url.clone(),
            autosave_interval: Duration::from_millis(self.autosave_ms),
            ..Default::default()
        }
    }

    fn directory(&self) -> Result<DirectoryClient, Box<dyn Error>> {
        let url = self
            .directory_url
            .as_deref()
            .ok_or("no directory configured (set --directory-url or DOCSYNC_DIRECTORY_URL)")?;
        Ok(DirectoryClient::new(url))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List documents in the directory.
    List {
        /// Only show documents whose filename or creator contains this.
        #[arg(long)]
        search: Option<String>,
    },
    /// Create a document and print its id.
    New {
        filename: String,
        #[arg(long, env = "DOCSYNC_USER")]
        user: String,
    },
    /// Join a document. Lines typed on stdin are appended to it.
    Open(OpenArgs),
    /// Run the relay server.
    Serve {
        #[arg(long, default_value = "127.0.0.1:3001")]
        bind: SocketAddr,
        /// Answer unknown documents with document-not-found.
        #[arg(long)]
        no_create: bool,
        #[arg(long, default_value_t = 100)]
        max_peers: usize,
    },
}

#[derive(Args)]
struct OpenArgs {
    /// Document id or share link.
    document: String,
    #[arg(long, env = "DOCSYNC_USER")]
    user: Option<String>,
    /// Create the document under this name if the relay does not know it.
    #[arg(long)]
    filename: Option<String>,
    /// Keep the connection unbound after a reconnect.
    #[arg(long)]
    stay: bool,
}

#[tokio::main]
async fn main() -> CliResult {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::List { search } => list(&cli.global, search.as_deref()).await,
        Commands::New { filename, user } => create(&cli.global, &filename, user).await,
        Commands::Open(args) => open(&cli.global, args).await,
        Commands::Serve { bind, no_create, max_peers } => {
            let config = RelayConfig {
                bind_addr: bind,
                create_missing: !no_create,
                max_peers_per_room: max_peers,
                ..Default::default()
            };
            serve(config).await
        }
    }
}

async fn list(global: &GlobalOptions, search: Option<&str>) -> CliResult {
    let documents = global.directory()?.list_documents().await?;
    let shown = filter_documents(&documents, search.unwrap_or(""));
    print!("{}", terminal::render_listing(&shown));
    Ok(())
}

async fn create(global: &GlobalOptions, filename: &str, user: String) -> CliResult {
    let document = NewDocument::new(filename, user)?;
    let id = global.directory()?.create_document(&document).await?;
    println!("{id}");
    Ok(())
}

async fn serve(config: RelayConfig) -> CliResult {
    let server = RelayServer::new(config);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats().await;
            info!(
                "Relay stopping: {} connections served, {} changes relayed",
                stats.total_connections, stats.changes_relayed
            );
        }
    }
    Ok(())
}

async fn open(global: &GlobalOptions, args: OpenArgs) -> CliResult {
    let mut config = global.client_config();
    if args.stay {
        config.rejoin_policy = RejoinPolicy::Stay;
    }

    let id = DocumentId::from_link(&args.document)?;
    let mut request = DocumentRequest::new(id);
    if let Some(user) = args.user {
        request = request.with_username(user);
    }
    if let Some(filename) = args.filename {
        request = request.with_filename(filename);
    }

    let notifier = Notifier::new(config.notice_ttl);
    let mut notices = notifier.subscribe();
    let surface: SharedSurface<MemorySurface> = Arc::new(Mutex::new(MemorySurface::default()));

    let session = match Session::connect(&config, request, surface.clone(), notifier).await {
        Ok(session) => session,
        Err(e) => {
            while let Ok(notice) = notices.try_recv() {
                eprintln!("{}", terminal::render_notice(&notice));
            }
            return Err(e.into());
        }
    };

    let title = session
        .details()
        .map(|details| details.filename.clone())
        .unwrap_or_else(|| id.to_string());
    println!("── {title} ──");
    session
        .notifier()
        .success(terminal::share_notice(&id.share_url(&global.share_base)));
    println!("{}", terminal::render_document(&surface.lock().await.text()));

    let (listener, mut changes) = surface.lock().await.on_change();
    let mut presence = session.watch_presence();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let result: CliResult = async {
        loop {
            tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => {
                        let mut surface = surface.lock().await;
                        let text = terminal::typed_line(&surface.text(), &line);
                        if let Err(e) = surface.append_text(&text) {
                            log::warn!("Edit dropped: {}", e);
                        }
                    }
                    None => break,
                },
                Some(event) = changes.recv() => {
                    if event.origin == ChangeOrigin::ProgrammaticEdit {
                        println!("remote change {}", terminal::render_change(&event.delta));
                        println!("{}", terminal::render_document(&surface.lock().await.text()));
                    }
                }
                count = next_count(&mut presence) => {
                    println!("{}", terminal::render_presence(&derive_display(count)));
                }
                notice = notices.recv() => {
                    if let Ok(notice) = notice {
                        println!("{}", terminal::render_notice(&notice));
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }
    .await;

    surface.lock().await.off_change(listener);
    session.close().await;
    result
}

/// Next collaborator count, or never once the tracker has gone away.
async fn next_count(presence: &mut Option<watch::Receiver<u32>>) -> u32 {
    if let Some(rx) = presence {
        if rx.changed().await.is_ok() {
            return *rx.borrow_and_update();
        }
    }
    *presence = None;
    std::future::pending().await
}
