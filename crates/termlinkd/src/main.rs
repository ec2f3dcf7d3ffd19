use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use termlinkd::ServerConfig;
use tl_api::{build_router, AppState};
use tl_pty::PtyManager;
use tl_session::{SessionConfig, SessionManager};
use tl_store::SessionStore;
use tl_ws::WsService;

#[derive(Parser)]
#[command(name = "termlinkd", version, about = "Remote terminal daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start {
        /// Port to bind to (overrides PORT)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Print version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "termlinkd=info,tl_api=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start { port } => {
            let mut config = ServerConfig::from_env();
            if let Some(port) = port {
                config.port = port;
            }

            config.ensure_data_dirs()?;

            let store = Arc::new(SessionStore::open(&config.db_path)?);
            let pty_manager = Arc::new(PtyManager::new());
            let ws = Arc::new(WsService::new(Arc::clone(&pty_manager)));

            let mut session_config = SessionConfig::new(config.log_dir.clone());
            session_config.max_sessions_per_user = config.max_sessions_per_user;
            let sessions = Arc::new(SessionManager::new(
                Arc::clone(&store),
                Arc::clone(&ws),
                session_config,
            ));

            let state = AppState::new(Arc::clone(&sessions), Arc::clone(&ws));
            let app = build_router(state);

            let addr: SocketAddr = config.bind_addr().parse()?;
            tracing::info!("listening on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;

            let shutdown = async move {
                #[cfg(unix)]
                {
                    let mut terminate =
                        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                            .expect("failed to install SIGTERM handler");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = terminate.recv() => {}
                    }
                }
                #[cfg(not(unix))]
                {
                    tokio::signal::ctrl_c()
                        .await
                        .expect("failed to listen for ctrl+c");
                }
                tracing::info!("shutting down");
                sessions.close();
                pty_manager.close_all();
                ws.close();
            };

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await?;

            Ok(())
        }

        Commands::Version => {
            println!("termlinkd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
