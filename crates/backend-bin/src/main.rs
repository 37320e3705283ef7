// ============================
// crates/backend-bin/src/main.rs
// ============================
use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use grimstack_backend::{
    config::Settings,
    create_router,
    mail::{LogMailer, MailQueue},
    storage::{MemoryStore, UserRepository, UserUpdate},
    AppState,
};
use grimstack_common::Role;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "grimstack-server", version, about = "Passwordless auth server")]
struct Cli {
    /// Config file (TOML, or JSON when it ends in .json)
    #[arg(long, short, env = "GRIMSTACK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Grant a role to a user in the store snapshot.
    ///
    /// Edits the snapshot file directly, so the server must be stopped: a
    /// running server rewrites the file from memory and would drop the
    /// grant. Refuses to run while the configured bind address is in use.
    GrantRole {
        #[arg(long)]
        username: String,
        #[arg(long)]
        role: Role,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("loading configuration")?;

    init_tracing(&settings);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(settings).await,
        Command::GrantRole { username, role } => grant_role(&settings, &username, role).await,
    }
}

fn init_tracing(settings: &Settings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.to_ascii_lowercase()));

    if settings.dev_mode {
        tracing_subscriber::fmt().with_env_filter(filter).pretty().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    }
}

async fn open_store(settings: &Settings) -> anyhow::Result<MemoryStore> {
    match &settings.store.snapshot_path {
        Some(path) => MemoryStore::load_snapshot(path)
            .await
            .with_context(|| format!("loading store snapshot {}", path.display())),
        None => Ok(MemoryStore::new()),
    }
}

async fn serve(settings: Settings) -> anyhow::Result<()> {
    let store = Arc::new(open_store(&settings).await?);
    let (mail, mail_worker) = MailQueue::start(Arc::new(LogMailer), settings.mail.queue_capacity);

    let bind_addr = settings.bind_addr;
    let snapshot_path = settings.store.snapshot_path.clone();
    let snapshot_every = Duration::from_secs(settings.store.snapshot_interval_secs);

    let state = Arc::new(AppState::new(settings, store.clone(), mail)?);
    let app = create_router(state.clone());

    let (stop_tx, stop_rx) = watch::channel(false);
    let purger = tokio::spawn(purge_rate_limits(state.clone(), stop_rx.clone()));
    let snapshotter = snapshot_path
        .clone()
        .map(|path| tokio::spawn(snapshot_loop(store.clone(), path, snapshot_every, stop_rx)));

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;
    tracing::info!(%bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "could not listen for shutdown signal");
            }
            tracing::info!("shutting down");
        })
        .await?;

    let _ = stop_tx.send(true);
    let _ = purger.await;
    if let Some(task) = snapshotter {
        let _ = task.await;
    }

    // the mail worker stops once the last queue handle is gone
    drop(state);
    if tokio::time::timeout(Duration::from_secs(5), mail_worker)
        .await
        .is_err()
    {
        tracing::warn!("mail queue not drained before shutdown");
    }

    if let Some(path) = snapshot_path {
        store
            .save_snapshot(&path)
            .await
            .with_context(|| format!("writing store snapshot {}", path.display()))?;
        tracing::info!(path = %path.display(), "store snapshot written");
    }
    Ok(())
}

async fn purge_rate_limits(state: Arc<AppState>, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(state.limiter.window());
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = state.limiter.cleanup(Utc::now()).await {
                    tracing::warn!(error = %e, "rate limit purge failed");
                }
            }
            _ = stop.changed() => break,
        }
    }
}

async fn snapshot_loop(
    store: Arc<MemoryStore>,
    path: PathBuf,
    every: Duration,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = store.save_snapshot(&path).await {
                    tracing::error!(error = %e, path = %path.display(), "store snapshot failed");
                }
            }
            _ = stop.changed() => break,
        }
    }
}

async fn grant_role(settings: &Settings, username: &str, role: Role) -> anyhow::Result<()> {
    let Some(path) = &settings.store.snapshot_path else {
        bail!("store.snapshot_path is not configured, nothing to edit");
    };
    ensure_server_stopped(settings.bind_addr).await?;
    let store = open_store(settings).await?;

    let Some(user) = store.find_by_username(username).await? else {
        bail!("no user named {username}");
    };
    let user = store.update(&user.key, UserUpdate::GrantRole(role)).await?;
    store.save_snapshot(path).await?;

    tracing::info!(user = %user.username, %role, "role granted");
    Ok(())
}

async fn ensure_server_stopped(bind_addr: SocketAddr) -> anyhow::Result<()> {
    if let Err(e) = TcpListener::bind(bind_addr).await {
        bail!("{bind_addr} is in use ({e}); stop the server before editing its snapshot");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use grimstack_backend::auth::RoleSet;
    use grimstack_backend::storage::NewUser;
    use tempfile::TempDir;

    async fn snapshot_with_alice(dir: &TempDir) -> Settings {
        let path = dir.path().join("users.json");
        let store = MemoryStore::new();
        store
            .create(
                NewUser {
                    email: "a@x.com".to_string(),
                    username: "alice".to_string(),
                    roles: RoleSet::of(&[Role::Verified]),
                },
                Utc::now(),
            )
            .await
            .unwrap();
        store.save_snapshot(&path).await.unwrap();

        let mut settings = Settings::default();
        settings.store.snapshot_path = Some(path);
        settings
    }

    async fn is_admin(settings: &Settings) -> bool {
        let store = open_store(settings).await.unwrap();
        let alice = store.find_by_username("alice").await.unwrap().unwrap();
        alice.is_admin()
    }

    #[tokio::test]
    async fn test_grant_role_updates_snapshot() {
        let dir = TempDir::new().unwrap();
        let mut settings = snapshot_with_alice(&dir).await;
        settings.bind_addr = "127.0.0.1:0".parse().unwrap();

        grant_role(&settings, "alice", Role::Admin).await.unwrap();
        assert!(is_admin(&settings).await);

        assert!(grant_role(&settings, "nobody", Role::Admin).await.is_err());
    }

    #[tokio::test]
    async fn test_grant_role_refuses_while_server_runs() {
        let dir = TempDir::new().unwrap();
        let mut settings = snapshot_with_alice(&dir).await;
        let running = TcpListener::bind("127.0.0.1:0").await.unwrap();
        settings.bind_addr = running.local_addr().unwrap();

        let err = grant_role(&settings, "alice", Role::Admin).await.unwrap_err();
        assert!(err.to_string().contains("stop the server"));
        assert!(!is_admin(&settings).await);
    }
}
