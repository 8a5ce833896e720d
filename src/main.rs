use std::time::Duration;

mod account;
mod app;
mod auth;
mod config;
mod error;
mod mailer;
mod membership;
mod ratelimit;
mod state;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "membergate=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let app_state = state::AppState::init().await?;

    sqlx::migrate!("./migrations").run(&app_state.db).await?;

    spawn_token_sweeper(app_state.db.clone());

    let app = app::build_app(app_state);
    app::serve(app).await
}

/// Hourly sweep of expired reset tokens. Expiry itself is decided at
/// verification time; this only reclaims storage.
fn spawn_token_sweeper(db: sqlx::PgPool) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(3600));
        ticker.tick().await; // first tick fires immediately, skip it
        loop {
            ticker.tick().await;
            match auth::reset::cleanup_expired(&db).await {
                Ok(count) if count > 0 => {
                    tracing::info!(count, "expired reset tokens removed");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "reset token sweep failed"),
            }
        }
    });
}
