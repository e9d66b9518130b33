mod config;

use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use client_core::{
    parameter_table, Backends, ClientEvent, ControlPosition, EventBus, FileSaver, HttpBackend,
    LibraryView, Notification, NotificationSurface, SessionOptions, UserSession,
};
use shared::domain::{AuthenticatedUser, FileId, TransformKind, UserId};
use tracing::{info, warn};

use crate::config::{load_settings, Settings, DEFAULT_CONFIG_FILE};

const LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "qblur", about = "Image library and transform jobs")]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    user_id: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the library once it has loaded.
    List,
    /// Follow library changes until interrupted.
    Watch,
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    Delete {
        id: String,
    },
    Download {
        id: String,
    },
    /// Run a transform job and wait for the produced file.
    Transform {
        kind: KindArg,
        id: String,
        #[arg(long, default_value_t = 49)]
        position: i64,
        #[arg(long)]
        log: bool,
    },
    /// Create the account profile and copy the template files if needed.
    Seed,
    /// Print the position to parameter table for a transform.
    Scale {
        kind: KindArg,
        #[arg(long)]
        log: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Rotate,
    Blur,
}

impl From<KindArg> for TransformKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Rotate => TransformKind::Rotate,
            KindArg::Blur => TransformKind::Blur,
        }
    }
}

struct ConsoleSurface;

impl NotificationSurface for ConsoleSurface {
    fn notify(&self, notification: &Notification) {
        eprintln!("{}: {}", notification.title, notification.description);
    }
}

/// Saves downloads into a directory, keeping only the final path component of
/// the display name.
struct DirectorySaver {
    root: PathBuf,
}

#[async_trait]
impl FileSaver for DirectorySaver {
    async fn save(&self, file_name: &str, _content_type: &str, bytes: Vec<u8>) -> Result<()> {
        let name = Path::new(file_name)
            .file_name()
            .ok_or_else(|| anyhow!("invalid file name '{file_name}'"))?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("failed to create {}", self.root.display()))?;
        let target = self.root.join(name);
        tokio::fs::write(&target, bytes)
            .await
            .with_context(|| format!("failed to write {}", target.display()))?;
        println!("saved {}", target.display());
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    if let Command::Scale { kind, log } = &args.command {
        print_scale((*kind).into(), *log);
        return Ok(());
    }

    let mut settings = load_settings(&args.config)?;
    if let Some(url) = args.backend_url.clone() {
        settings.backend_url = url;
    }
    if let Some(user_id) = args.user_id.clone() {
        settings.user_id = Some(user_id);
    }

    let session = sign_in(&settings).await?;
    let result = run(&session, &settings, args.command).await;
    session.sign_out().await;
    result
}

async fn sign_in(settings: &Settings) -> Result<UserSession> {
    let user_id = settings
        .user_id
        .clone()
        .ok_or_else(|| anyhow!("no user id configured (set user_id or QBLUR_USER_ID)"))?;
    let user = AuthenticatedUser {
        user_id: UserId::new(user_id),
        display_name: settings.display_name.clone(),
        email: settings.email.clone(),
    };

    let mut http = HttpBackend::new(settings.backend_url.clone());
    if let Some(token) = &settings.bearer_token {
        http = http.with_bearer_token(token.clone());
    }
    let http = Arc::new(http);
    let backends = Backends::new(http.clone(), http.clone())
        .with_jobs(http.clone())
        .with_fetcher(http)
        .with_saver(Arc::new(DirectorySaver {
            root: settings.download_dir.clone(),
        }));
    let events = EventBus::default().with_surface(Arc::new(ConsoleSurface));
    let options = SessionOptions {
        template_prefix: settings.template_prefix.clone(),
        job_timeout: settings.job_timeout(),
    };

    info!(backend = %settings.backend_url, "qblur: signing in");
    Ok(UserSession::sign_in(backends, user, events, options).await?)
}

async fn run(session: &UserSession, settings: &Settings, command: Command) -> Result<()> {
    let library = session.library();
    match command {
        Command::List => {
            library.wait_until_loaded(LOAD_TIMEOUT).await?;
            print_view(&library.view());
        }
        Command::Watch => {
            let mut events = session.subscribe_events();
            library.wait_until_loaded(LOAD_TIMEOUT).await?;
            print_view(&library.view());
            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    event = events.recv() => match event {
                        Ok(ClientEvent::LibraryUpdated(view)) => print_view(&view),
                        Ok(ClientEvent::UploadStageChanged { file_id, file_name, stage }) => {
                            println!("upload {file_name} ({file_id}): {stage:?}");
                        }
                        Ok(ClientEvent::FeedError(message)) => eprintln!("feed error: {message}"),
                        Ok(_) => {}
                        Err(err) => {
                            warn!(error = %err, "qblur: event stream interrupted");
                        }
                    }
                }
            }
        }
        Command::Upload { paths } => {
            for path in paths {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?;
                let file_name = path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?;
                let content_type = mime_guess::from_path(&path).first_or_octet_stream();
                let file_id = library
                    .upload(bytes, file_name, content_type.essence_str())
                    .await?;
                println!("{file_id}\t{file_name}");
            }
        }
        Command::Delete { id } => {
            session.delete_file(&FileId::new(id)).await?;
        }
        Command::Download { id } => {
            library.wait_until_loaded(LOAD_TIMEOUT).await?;
            if !library.download(&FileId::new(id.clone())).await? {
                println!("no downloadable file with id {id}");
            }
        }
        Command::Transform {
            kind,
            id,
            position,
            log,
        } => {
            let position = ControlPosition::new(position)?;
            let transforms = session.transforms();
            transforms.select_file(Some(FileId::new(id))).await;
            transforms.set_kind(kind.into()).await;
            transforms.set_use_log(log).await;
            transforms.set_position(position).await;
            let parameter = transforms.settings().await.parameter();
            println!("submitting {} with parameter {parameter}", TransformKind::from(kind));

            let created = transforms.submit().await?;
            let wait = settings.job_timeout().unwrap_or(LOAD_TIMEOUT);
            let entry = library.wait_for_available(&created, wait).await?;
            println!("{}\t{}", entry.id, entry.file_name);
        }
        Command::Seed => {
            let outcome = session.seeder().ensure_initialized().await?;
            println!("{outcome:?}");
        }
        Command::Scale { kind, log } => print_scale(kind.into(), log),
    }
    Ok(())
}

fn print_view(view: &LibraryView) {
    if view.is_empty() {
        println!("(no files)");
        return;
    }
    for entry in &view.entries {
        let size = entry
            .size
            .map(|(x, y)| format!("{x}x{y}"))
            .unwrap_or_else(|| "-".to_string());
        let state = match (&entry.url, entry.uploaded) {
            (Some(url), _) => url.to_string(),
            (None, true) => "loading".to_string(),
            (None, false) => "uploading".to_string(),
        };
        println!("{}\t{}\t{}\t{size}\t{state}", entry.id, entry.file_name, entry.content_type);
    }
}

fn print_scale(kind: TransformKind, use_log: bool) {
    for (position, parameter) in parameter_table(kind, use_log) {
        println!("{:>2}\t{parameter}", position.get());
    }
}
