use std::net::SocketAddr;
use std::sync::Arc;

use rollcall_backend::utils::config::Config;
use rollcall_backend::utils::logging;
use rollcall_backend::vision::VisionBackend;
use rollcall_backend::{api, db, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cfg = Config::from_env();

    std::fs::create_dir_all(&cfg.images_dir)?;
    let conn = db::open_or_create(&cfg.db_path)?;

    #[cfg(feature = "facial-recognition")]
    let vision: Arc<dyn VisionBackend> =
        Arc::new(rollcall_backend::vision::opencv::OpencvBackend::new(cfg.cascade_path.clone()));
    #[cfg(not(feature = "facial-recognition"))]
    let vision: Arc<dyn VisionBackend> = Arc::new(rollcall_backend::vision::DisabledBackend);

    let port = cfg.port;
    let state = Arc::new(AppState::new(cfg, conn, vision)?);
    let app = api::routes::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
