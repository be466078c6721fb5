use anyhow::Result;
use clap::Parser;
use meetingest::{
    app,
    cli::{handle_decrypt_command, handle_encrypt_command, handle_sign_command, Cli, CliCommand},
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Some(CliCommand::Version) => {
            println!("meetingest {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Decrypt(args)) => return handle_decrypt_command(args, config_path),
        Some(CliCommand::Encrypt(args)) => return handle_encrypt_command(args, config_path),
        Some(CliCommand::Sign(args)) => return handle_sign_command(args, config_path),
        None => {}
    }

    app::run_service(config_path).await
}
