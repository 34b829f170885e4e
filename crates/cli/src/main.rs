use clap::Parser;
use drover_cli::{
    cli::{Cli, Commands},
    config, logging, serve,
};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let orchestrator_config = match config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            error!(target = "drover", error = %err, "startup failed");
            std::process::exit(err.exit_code());
        }
    };

    match cli.command {
        Commands::Serve {
            socket,
            engine,
            max_sessions,
        } => {
            let mut orchestrator_config = orchestrator_config;
            if let Some(max_sessions) = max_sessions {
                orchestrator_config.max_sessions = max_sessions;
            }
            if let Err(err) = serve::run(orchestrator_config, socket, engine).await {
                error!(target = "drover", error = %err, "serve failed");
                std::process::exit(err.exit_code());
            }
        }
        Commands::CheckConfig => match serde_json::to_string_pretty(&orchestrator_config) {
            Ok(rendered) => println!("{rendered}"),
            Err(err) => {
                error!(target = "drover", error = %err, "could not render configuration");
                std::process::exit(1);
            }
        },
    }
}
