//! Beacon CLI (`beacon-cli`)
//!
//! Operator tool for working with alert envelopes offline: generate
//! keypairs, sign an envelope with the threshold set of private keys, and
//! decode an envelope for inspection. The daemon never sees private keys;
//! signing happens here and the result is submitted over the admin API.

use anyhow::{bail, Context};
use beacon_core::sign_digest;
use beacon_model::{content_hash, Alert, AlertType, Payload};
use clap::{Parser, Subcommand};
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Parser, Debug)]
#[command(name = "beacon-cli", version, about = "Beacon alert envelope tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a fresh secp256k1 keypair
    Keygen,

    /// Build and sign an alert envelope
    Sign {
        #[arg(long)]
        sequence: u32,

        /// Numeric alert type code
        #[arg(long)]
        alert_type: u32,

        /// Payload bytes, hex-encoded
        #[arg(long)]
        payload: String,

        /// Unix seconds; defaults to now
        #[arg(long)]
        timestamp: Option<u64>,

        /// Signing private key (32-byte hex); repeat for each signer
        #[arg(long = "key")]
        keys: Vec<String>,

        /// Signatures the network requires
        #[arg(long, default_value_t = 3)]
        threshold: usize,
    },

    /// Decode an alert envelope and print its contents
    Inspect {
        /// Envelope, hex-encoded
        #[arg(long)]
        raw: String,

        #[arg(long, default_value_t = 3)]
        threshold: usize,
    },
}

fn main() -> anyhow::Result<()> {
    match Cli::parse().command {
        Command::Keygen => keygen(),
        Command::Sign {
            sequence,
            alert_type,
            payload,
            timestamp,
            keys,
            threshold,
        } => sign(sequence, alert_type, &payload, timestamp, &keys, threshold),
        Command::Inspect { raw, threshold } => inspect(&raw, threshold),
    }
}

fn keygen() -> anyhow::Result<()> {
    let key = SigningKey::random(&mut OsRng);
    let public = key.verifying_key().to_encoded_point(true);
    println!("private: {}", hex::encode(key.to_bytes()));
    println!("public:  {}", hex::encode(public.as_bytes()));
    Ok(())
}

fn sign(
    sequence: u32,
    alert_type: u32,
    payload_hex: &str,
    timestamp: Option<u64>,
    key_hexes: &[String],
    threshold: usize,
) -> anyhow::Result<()> {
    if key_hexes.len() != threshold {
        bail!("exactly {threshold} private keys required, got {}", key_hexes.len());
    }

    let alert_type = AlertType::from_code(alert_type).context("unknown alert type")?;
    let payload_bytes = hex::decode(payload_hex).context("payload is not valid hex")?;
    let payload =
        Payload::read(alert_type, &payload_bytes).context("payload does not parse")?;

    let timestamp = timestamp.unwrap_or_else(|| {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    });

    let mut alert = Alert::unsigned(sequence, timestamp, payload);
    let digest = alert.signing_digest();
    for key_hex in key_hexes {
        let key_bytes = hex::decode(key_hex).context("private key is not valid hex")?;
        let key = SigningKey::from_slice(&key_bytes).context("invalid private key")?;
        let signature =
            sign_digest(&digest, &key).map_err(|e| anyhow::anyhow!("signing failed: {e}"))?;
        alert.signatures.push(signature);
    }

    println!("{}", hex::encode(alert.serialize()));
    Ok(())
}

fn inspect(raw_hex: &str, threshold: usize) -> anyhow::Result<()> {
    let raw = hex::decode(raw_hex).context("envelope is not valid hex")?;
    let alert =
        Alert::parse(&raw, threshold).map_err(|e| anyhow::anyhow!("envelope rejected: {e}"))?;

    println!("type:       {} ({})", alert.alert_type(), alert.alert_type().code());
    println!("sequence:   {}", alert.sequence_number);
    println!("timestamp:  {}", alert.timestamp);
    println!("version:    {}", alert.version);
    println!("signatures: {}", alert.signatures.len());
    println!("hash:       {}", content_hash(&raw));
    println!("text:       {}", alert.payload.message_string());
    Ok(())
}
