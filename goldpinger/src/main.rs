use clap::{Parser, Subcommand};

use goldpinger::command::serve::{run_server, ServeArgs};

#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
enum Cmd {
    /// Run the probing engine and its HTTP server
    Serve(ServeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();

    match args.cmd {
        Cmd::Serve(serve_args) => {
            run_server(serve_args).await?;
        }
    }

    Ok(())
}
