use std::sync::Arc;

use anyhow::Context;

use orgdesk_infra::Settings;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    orgdesk_observability::init();

    let settings = Settings::from_env().context("invalid configuration")?;
    let engine = orgdesk_api::app::services::build_engine(&settings)
        .await
        .context("failed to initialize services")?;

    let app = orgdesk_api::app::build_app(Arc::new(engine));

    let listener = tokio::net::TcpListener::bind(&settings.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", settings.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
