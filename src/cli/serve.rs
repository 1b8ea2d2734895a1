use crate::{
    config::Settings,
    error, info,
    server::{self, AppState},
    warning,
};

/// Runs the web server until ctrl-c.
pub async fn serve(settings: Settings, open_browser: bool) {
    let store = server::open_store(&settings);
    let login_url = format!("{}/auth/login", settings.public_url.trim_end_matches('/'));
    let state = AppState::new(settings, store);

    info!("Serving on {}", state.settings.server_address);
    if open_browser && webbrowser::open(&login_url).is_err() {
        warning!(
            "Failed to open browser. Please navigate to the following URL manually:\n{}",
            login_url
        )
    }

    if let Err(e) = server::start_server(state).await {
        error!("Server stopped. Err: {}", e);
    }
}
