use portcullis_server::{AppState, observability, routes, server};

#[tokio::main]
async fn main() {
    // Load .env if present; useful for PORTCULLIS_CLIENT_SECRET locally.
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io) if io.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: failed to load .env file: {e}");
    }

    let (config_path, source) = portcullis_server::resolve_config_path();
    let config = match portcullis_server::load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };

    observability::init_tracing(&config.logging.level);
    tracing::info!(path = %config_path, source = %source, "Configuration loaded");

    let state = match AppState::from_config(&config).await {
        Ok(state) => state,
        Err(e) => {
            eprintln!("Startup failed: {e}");
            std::process::exit(2);
        }
    };

    if let Err(e) = server::serve(&config.server, routes::router(state)).await {
        eprintln!("Server error: {e}");
        std::process::exit(1);
    }
}
