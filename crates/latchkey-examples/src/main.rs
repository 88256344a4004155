mod scenarios;

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let scenario = std::env::args().nth(1).unwrap_or_default();
    match scenario.as_str() {
        "keyed-checkout" => scenarios::keyed_checkout::run().await,
        "config-refresh" => scenarios::config_refresh::run().await,
        _ => {
            eprintln!("usage: latchkey-examples <keyed-checkout|config-refresh>");
            std::process::exit(2);
        }
    }
}
