use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() {
    let fmt_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "maildesk_sync=info,error".into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(fmt_filter))
        .init();

    if let Err(e) = maildesk_sync::run().await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}
