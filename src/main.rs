use clap::{Parser, Subcommand};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use unmobi::batch::unlock_all;
use unmobi::decrypt::KeystreamMode;
use unmobi::engine::{inspect, load_container, UnlockOptions};
use unmobi::naming::{claim_file_name, output_file_name};
use unmobi::pid::{device_pid, DeviceSerial, Pid};

#[derive(Parser)]
#[command(name = "unmobi", about = "Remove device-serial DRM from Mobipocket e-books")]
struct Cli {
    /// Debug logging (overrides RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Unlock one or more books with a device serial number
    Unlock {
        #[arg(short, long, required = true, num_args = 1..)]
        file: Vec<PathBuf>,
        /// 16-character device serial number
        #[arg(short, long)]
        serial: String,
        /// Existing directory for the unlocked copies
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
        /// Additional PID to try (8 characters, or 10 with checksum)
        #[arg(long = "pid")]
        pids: Vec<String>,
        /// Re-key the cipher at every text record
        #[arg(long)]
        per_record_keystream: bool,
        /// Reset the clipping limit and text-to-speech restrictions
        #[arg(long)]
        lift_restrictions: bool,
        /// Skip decompressing the text to check its length
        #[arg(long)]
        no_verify: bool,
    },
    /// Print the device PID for a serial number
    Pid {
        serial: String,
    },
    /// Show book metadata
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {

        // ── Unlock ───────────────────────────────────────────────────────────
        Commands::Unlock { file, serial, output_dir, pids, per_record_keystream, lift_restrictions, no_verify } => {
            if !output_dir.is_dir() {
                return Err(format!("output directory {} does not exist", output_dir.display()).into());
            }
            DeviceSerial::parse(&serial)?;
            let options = UnlockOptions {
                keystream: if per_record_keystream { KeystreamMode::PerRecord } else { KeystreamMode::Cumulative },
                verify_text: !no_verify,
                lift_restrictions,
                extra_pids: pids.iter().map(|p| Pid::parse(p)).collect::<Result<Vec<_>, _>>()?,
            };

            let mut failed = 0usize;
            let mut inputs = Vec::with_capacity(file.len());
            for path in &file {
                match std::fs::read(path) {
                    Ok(bytes) => inputs.push((path, bytes)),
                    Err(e) => {
                        error!(path = %path.display(), "cannot read book: {e}");
                        failed += 1;
                    }
                }
            }

            let books: Vec<&[u8]> = inputs.iter().map(|(_, bytes)| bytes.as_slice()).collect();
            let results = unlock_all(&books, &serial, &options);
            let mut taken = HashSet::new();
            for ((path, _), result) in inputs.iter().zip(results) {
                match result {
                    Ok(unlocked) => {
                        let name = claim_file_name(output_file_name(&unlocked.title, path), &mut taken);
                        let out = output_dir.join(name);
                        if let Err(e) = std::fs::write(&out, &unlocked.data) {
                            eprintln!("  failed    {}: cannot write {}: {e}", path.display(), out.display());
                            failed += 1;
                            continue;
                        }
                        println!("  unlocked  {} → {}", path.display(), out.display());
                        if unlocked.print_replica {
                            println!("            Print Replica book; rename to .azw4 to open as such");
                        }
                        debug!(pid = %unlocked.pid, "key holder");
                    }
                    Err(e) => {
                        eprintln!("  failed    {}: {e}", path.display());
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                return Err(format!("{failed} of {} book(s) could not be unlocked", file.len()).into());
            }
        }

        // ── Pid ──────────────────────────────────────────────────────────────
        Commands::Pid { serial } => {
            let serial = DeviceSerial::parse(&serial)?;
            println!("{}", device_pid(&serial).with_checksum());
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let bytes = std::fs::read(&input)?;
            let container = load_container(&bytes)?;
            let info = inspect(&container)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }
            print_info(&input, &info);
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_info(path: &Path, info: &unmobi::BookInfo) {
    let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".into());
    println!("── Mobipocket book ──────────────────────────────────────");
    println!("  Path           {}", path.display());
    println!("  Title          {}", info.title);
    println!("  Author         {}", or_dash(&info.author));
    println!("  Publisher      {}", or_dash(&info.publisher));
    println!("  Database       {} ({:?})", info.database_name, info.kind);
    if let Some(created) = info.created {
        println!("  Created        {}", created.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("  Records        {}", info.record_count);
    println!("  Compression    {}", info.compression.name());
    println!("  Encryption     {:?}", info.encryption);
    println!("  Text           {} B in {} record(s)", info.text_length, info.text_records);
    if let Some(version) = info.format_version {
        println!("  MOBI version   {version}");
    }
    println!("  Codepage       {}", info.codepage);
    match &info.drm {
        Some(drm) => println!("  Vouchers       {} at offset {}", drm.count, drm.offset),
        None      => println!("  Vouchers       none"),
    }
    if let Some(keys) = &info.tamper_keys {
        println!("  Tamper keys    {keys} (book-bound PID)");
    }
    println!("  EXTH tags      {:?}", info.exth_tags);
}
