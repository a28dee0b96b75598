//! `wirestate keygen`: print a fresh sealing key entry.

use anyhow::{Context, Result};

use crate::codec::{generate_secret, validate_key_id};

/// `[[codec.keys]]` entry for `id` with a random secret.
pub fn key_entry(id: &str) -> Result<String> {
    validate_key_id(id)?;
    let secret = generate_secret().context("failed to read system randomness")?;
    Ok(format!("[[codec.keys]]\nid = \"{id}\"\nsecret = \"{secret}\"\n"))
}

pub fn run(id: &str) -> Result<()> {
    print!("{}", key_entry(id)?);
    Ok(())
}
