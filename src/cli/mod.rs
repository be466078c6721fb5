//! Operator commands for inspecting and crafting webhook deliveries.

pub mod args;

use crate::config::Config;
use crate::crypto;
use anyhow::{Context, Result};
use std::path::Path;

pub use args::{Cli, CliCommand, DecryptArgs, EncryptArgs, SignArgs};

pub fn handle_decrypt_command(args: DecryptArgs, config_path: Option<&Path>) -> Result<()> {
    let key = resolve_key(args.key, config_path)?;
    let plaintext = crypto::decrypt(&args.ciphertext, &key).context("Failed to decrypt payload")?;
    println!("{}", plaintext);
    Ok(())
}

pub fn handle_encrypt_command(args: EncryptArgs, config_path: Option<&Path>) -> Result<()> {
    let key = resolve_key(args.key, config_path)?;
    let ciphertext = crypto::encrypt(&args.plaintext, &key).context("Failed to encrypt payload")?;
    println!("{}", ciphertext);
    Ok(())
}

pub fn handle_sign_command(args: SignArgs, config_path: Option<&Path>) -> Result<()> {
    let token = match args.token {
        Some(token) => token,
        None => Config::load(config_path)?.webhook.token()?.to_string(),
    };
    println!(
        "{}",
        crypto::compute_signature(&token, &args.timestamp, &args.nonce, &args.data)
    );
    Ok(())
}

fn resolve_key(key: Option<String>, config_path: Option<&Path>) -> Result<String> {
    match key {
        Some(key) => Ok(key),
        None => Ok(Config::load(config_path)?
            .webhook
            .encoding_aes_key()?
            .to_string()),
    }
}
