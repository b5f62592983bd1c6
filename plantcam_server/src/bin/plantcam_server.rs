//! PlantCam server binary.
//!
use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use clap::Parser;
use env_logger::TimestampPrecision;
use plantcam_server::{
    config::ServerConfig, context::AppContext, endpoints::router, meter::spawn_meter_logger,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let ctx = Arc::new(AppContext::from_config(&config));

    // Load the model in the background, the page is usable meanwhile
    {
        let ctx = Arc::clone(&ctx);
        let config = config.clone();
        tokio::spawn(async move { ctx.load_model(&config).await });
    }

    spawn_meter_logger(Arc::clone(ctx.meter()));

    // Serve HTTP server
    let addr: SocketAddr = config.server_address.parse()?;
    log::info!("Serving on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(router(ctx).into_make_service())
        .await?;

    Ok(())
}
