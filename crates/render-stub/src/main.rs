use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 47900;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,subtitler_render_stub=info,tower_http=info".into()),
        )
        .init();

    let port = env_or("SUBTITLER_STUB_PORT", DEFAULT_PORT);
    let step = env_or("SUBTITLER_STUB_STEP", subtitler_render_stub::state::DEFAULT_STEP);

    let state = subtitler_render_stub::state::StubState::with_step(step);
    let app = subtitler_render_stub::app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("bind render stub port");
    info!(step, "Render stub listening on {addr}");
    axum::serve(listener, app).await.expect("render stub server");
}
