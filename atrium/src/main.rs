use clap::Parser;
use gateway::Config;
use metrics_exporter_statsd::StatsdBuilder;
use tracing_subscriber::EnvFilter;

/// Multi-tenant API gateway for the low-code platform.
#[derive(Parser)]
#[command(name = "atrium", version)]
struct Cli {
    /// Overrides GATEWAY_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            std::process::exit(1);
        }
    };
    if let Some(port) = cli.port {
        config.port = port;
    }

    if let Some((host, port)) = config.statsd.clone() {
        match StatsdBuilder::from(host.as_str(), port).build(Some("atrium")) {
            Ok(recorder) => {
                if let Err(err) = metrics::set_global_recorder(recorder) {
                    tracing::warn!(error = %err, "metrics recorder already installed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "could not connect statsd exporter"),
        }
    }

    if let Err(err) = gateway::run(config).await {
        tracing::error!(error = %err, "gateway exited");
        std::process::exit(2);
    }
}
