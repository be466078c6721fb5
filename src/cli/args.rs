use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "meetingest")]
#[command(about = "Webhook ingestion for meeting recordings", long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: <config dir>/meetingest/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
pub enum CliCommand {
    /// Print version information
    Version,
    /// Decrypt a webhook payload
    Decrypt(DecryptArgs),
    /// Encrypt a plaintext the way the platform does
    Encrypt(EncryptArgs),
    /// Compute a delivery signature
    Sign(SignArgs),
}

#[derive(ClapArgs, Debug)]
pub struct DecryptArgs {
    /// Base64 ciphertext (the `data` field or `check_str`)
    pub ciphertext: String,
    /// Encoding key; defaults to the configured one
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct EncryptArgs {
    pub plaintext: String,
    /// Encoding key; defaults to the configured one
    #[arg(long)]
    pub key: Option<String>,
}

#[derive(ClapArgs, Debug)]
pub struct SignArgs {
    pub timestamp: String,
    pub nonce: String,
    /// Ciphertext being signed
    pub data: String,
    /// Webhook token; defaults to the configured one
    #[arg(long)]
    pub token: Option<String>,
}
