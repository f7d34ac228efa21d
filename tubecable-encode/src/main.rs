//! tubecable-encode: entry point.
//!
//! ```text
//! tubecable-encode --input img.rgb --width 640 --height 480   Encode to stream.bin
//! tubecable-encode --config <path>                            Load a custom config TOML
//! tubecable-encode --gen-config                               Write default config to stdout
//! tubecable-encode --export-table <path>                      Write the Huffman table as text
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tubecable_core::Mode;
use tubecable_encode::config::EncodeConfig;
use tubecable_encode::encoder::{EncodeRequest, encode_image, export_table};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tubecable-encode", about = "Encode raw images into a DisplayLink command stream")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tubecable.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Raw RGB888 image (row-major, no header).
    #[arg(short, long, required_unless_present_any = ["gen_config", "export_table"])]
    input: Option<PathBuf>,

    /// Image width in pixels.
    #[arg(long, default_value_t = 0)]
    width: usize,

    /// Image height in pixels.
    #[arg(long, default_value_t = 0)]
    height: usize,

    /// Captured command stream.
    #[arg(short, long, default_value = "stream.bin")]
    output: PathBuf,

    /// Display mode, e.g. 1024x768. Overrides the config.
    #[arg(long)]
    mode: Option<Mode>,

    /// Stream key as 32 hex digits. Overrides the config.
    #[arg(long)]
    key: Option<String>,

    /// Write the active Huffman table to this path and exit.
    #[arg(long)]
    export_table: Option<PathBuf>,

    /// Use RLE/raw writes instead of Huffman compression.
    #[arg(long)]
    no_compress: bool,
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&EncodeConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config and apply command-line overrides.
    let mut config = EncodeConfig::load(&cli.config);
    if let Some(mode) = cli.mode {
        config.display.mode = mode;
    }
    if let Some(key) = cli.key {
        config.cipher.key = key;
    }
    if cli.no_compress {
        config.stream.compress = false;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.file.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&config.logging.file)?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }

    info!("tubecable-encode v{}", env!("CARGO_PKG_VERSION"));

    if let Some(path) = cli.export_table {
        export_table(&config, &path)?;
        return Ok(());
    }

    // clap guarantees --input here.
    let Some(input) = cli.input else {
        return Ok(());
    };
    let mode = config.display.mode;
    let request = EncodeRequest {
        input,
        width: if cli.width == 0 { mode.width() as usize } else { cli.width },
        height: if cli.height == 0 { mode.height() as usize } else { cli.height },
        output: cli.output,
    };
    info!(
        mode = %mode,
        width = request.width,
        height = request.height,
        compress = config.stream.compress,
        vendor = config.device.vendor,
        product = config.device.product,
        "encoding"
    );

    let summary = encode_image(&config, &request)?;
    println!(
        "{} pixels -> {} bytes in {} transfers ({})",
        summary.pixels,
        summary.bytes_written,
        summary.bulk_transfers,
        request.output.display()
    );

    Ok(())
}
