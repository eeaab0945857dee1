use std::process;

use clap::{Parser, Subcommand};

mod demo;
mod run;

#[derive(Parser, Debug)]
#[clap(author, version, about = "gqlstream - GraphQL subscriptions over WebSockets and SSE", long_about = None)]
struct Opts {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// Serve the demo schema
    Run(run::RunCommand),
}

#[tokio::main]
async fn main() {
    let opts: Opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            let _ = e.print();
            process::exit(e.exit_code());
        }
    };

    if let Err(e) = handle_command(opts).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn handle_command(opts: Opts) -> Result<(), String> {
    match opts.command {
        Command::Run(cmd) => cmd.execute().await.map_err(|e| e.to_string()),
    }
}
