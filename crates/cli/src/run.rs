use std::time::Duration;

use console::style;
use gqlstream_core::{ControllerConfig, GraphQLController, ServerError, start_server};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::demo::{DemoContext, DemoEngine};

#[derive(Debug, thiserror::Error)]
pub enum RunCommandError {
    #[error(transparent)]
    Server(#[from] ServerError),
}

#[derive(Debug, Clone, PartialEq, clap::Args)]
pub struct RunCommand {
    /// Address to bind
    #[arg(long, env = "GQLSTREAM_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to run the server on
    #[arg(long, env = "GQLSTREAM_PORT", default_value = "8080")]
    pub port: u16,

    /// Prefix of every endpoint, e.g. /api
    #[arg(long, env = "GQLSTREAM_PATH_PREFIX", default_value = "")]
    pub path_prefix: String,

    /// Seconds of idleness before an SSE subscription sends a ping (0 disables pings)
    #[arg(long, env = "GQLSTREAM_PING_INTERVAL", default_value = "10")]
    pub ping_interval: u64,

    /// Seconds between WebSocket keep-alive frames (0 disables them)
    #[arg(long, env = "GQLSTREAM_KEEP_ALIVE", default_value = "0")]
    pub keep_alive: u64,

    /// Frames queued per WebSocket before subscriptions wait for the client
    #[arg(long, env = "GQLSTREAM_OUTBOUND_BUFFER", default_value = "100")]
    pub outbound_buffer: usize,

    /// Allow cross-origin requests from any origin
    #[arg(long, env = "GQLSTREAM_CORS")]
    pub cors: bool,
}

impl RunCommand {
    pub fn config(&self) -> ControllerConfig {
        ControllerConfig::default()
            .with_path_prefix(self.path_prefix.as_str())
            .with_ping_interval(seconds(self.ping_interval))
            .with_keep_alive(seconds(self.keep_alive))
            .with_outbound_buffer(self.outbound_buffer)
    }

    pub async fn execute(&self) -> Result<(), RunCommandError> {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();

        let config = self.config();
        let controller = GraphQLController::new(DemoEngine, DemoContext::default(), config.clone());
        let addr = format!("{}:{}", self.host, self.port);

        self.print_banner(&config);

        let mut app = controller.router();
        if self.cors {
            app = app.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
                    .expose_headers(Any),
            );
        }

        let shutdown = controller.shutdown_token();
        let signal_controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C");
                signal_controller.shutdown();
            }
        });

        start_server(app, &addr, shutdown).await?;
        Ok(())
    }

    fn print_banner(&self, config: &ControllerConfig) {
        let base = format!("http://localhost:{}", self.port);

        println!();
        println!("{}", style("gqlstream").green());
        println!();
        println!("{}", style("Endpoints").dim());
        println!(
            "{} {}{}",
            style("  GET|POST").yellow(),
            base,
            config.route("/graphql")
        );
        println!(
            "{} {}{}",
            style("       GET").yellow(),
            base,
            config.route("/sse-subscription")
        );
        println!(
            "{} {}{}",
            style("        WS").magenta(),
            base.replacen("http", "ws", 1),
            config.route("/subscriptions")
        );
        println!();
        println!("{}", style("Press Ctrl+C to stop").dim());
        println!();
    }
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct Cli {
        #[command(flatten)]
        run: RunCommand,
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["gqlstream"]).unwrap();
        let config = cli.run.config();

        assert_eq!(cli.run.port, 8080);
        assert!(!cli.run.cors);
        assert_eq!(config.path_prefix, "");
        assert_eq!(config.ping_interval, Some(Duration::from_secs(10)));
        assert_eq!(config.keep_alive, None);
        assert_eq!(config.outbound_buffer, 100);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "gqlstream",
            "--port",
            "9000",
            "--path-prefix",
            "api/",
            "--ping-interval",
            "0",
            "--keep-alive",
            "15",
            "--outbound-buffer",
            "0",
            "--cors",
        ])
        .unwrap();
        let config = cli.run.config();

        assert_eq!(cli.run.port, 9000);
        assert!(cli.run.cors);
        assert_eq!(config.path_prefix, "/api");
        assert_eq!(config.ping_interval, None);
        assert_eq!(config.keep_alive, Some(Duration::from_secs(15)));
        assert_eq!(config.outbound_buffer, 1);
    }
}
