//! `wirestate inspect`: open a blob with the configured keyring.
//!
//! Fails the same way dispatch would: a blob that does not verify under
//! any configured key is reported as an integrity failure, nothing more.

use std::io::Read;

use anyhow::{Context, Result};
use serde_json::{Value, json};

use crate::{codec::StateCodec, config::WireConfig};

/// Decoded blob as a JSON report.
pub fn report(codec: &StateCodec, blob: &str) -> Result<Value> {
    let opened = codec.open(blob)?;
    Ok(json!({
        "class": opened.class,
        "key": opened.key,
        "state": opened.state,
    }))
}

pub fn run(config: &WireConfig, blob: &str, pretty: bool) -> Result<()> {
    let blob = if blob == "-" {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("failed to read blob from stdin")?;
        input
    } else {
        blob.to_string()
    };

    let codec = StateCodec::new(config.codec.keyring()?);
    let report = report(&codec, &blob)?;
    let output = if pretty {
        serde_json::to_string_pretty(&report)?
    } else {
        serde_json::to_string(&report)?
    };
    println!("{output}");
    Ok(())
}
