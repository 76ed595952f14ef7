use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use cfbvfs::{Container, DirEntry, EntryKind};

#[derive(Parser)]
#[command(name = "cfbvfs", about = "Compound File Binary (OLE2) container inspector")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every entry in the container
    Ls {
        input: PathBuf,
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show header fields and parse diagnostics
    Info {
        input: PathBuf,
    },
    /// Write one stream to stdout, addressed by /-separated path
    Cat {
        input: PathBuf,
        path: String,
    },
    /// Extract every stream into a directory tree
    Extract {
        input: PathBuf,
        #[arg(short = 'C', long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Open the container and report damage (exit 1 on warnings)
    Check {
        input: PathBuf,
    },
}

#[derive(Serialize)]
struct EntryListing {
    path: String,
    kind: &'static str,
    size: u64,
    mini: bool,
    class_id: String,
    modified: Option<String>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    match Cli::parse().command {

        // ── Ls ───────────────────────────────────────────────────────────────
        Commands::Ls { input, json } => {
            let container = Container::open(File::open(&input)?)?;
            if json {
                let listing: Vec<EntryListing> = container
                    .walk()
                    .map(|(path, entry)| EntryListing {
                        path,
                        kind: kind_name(entry),
                        size: entry.size,
                        mini: entry.in_mini_stream(),
                        class_id: entry.class_id.hyphenated().to_string(),
                        modified: entry.modified.map(|t| t.to_rfc3339()),
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                println!("{:<7} {:>12}  Path", "Kind", "Size");
                for (path, entry) in container.walk() {
                    println!("{:<7} {:>12}  {}", kind_name(entry), entry.size, path);
                }
            }
        }

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input } => {
            let container = Container::open(File::open(&input)?)?;
            let sb = container.superblock();
            println!("── Compound file ───────────────────────────────────────");
            println!("  Path             {}", input.display());
            println!("  Version          {}.{}", sb.major_version, sb.minor_version);
            println!("  Big-block size   {} B (shift {})", sb.big_block_size(), sb.big_block_shift);
            println!("  Small-block size {} B (shift {})", sb.small_block_size(), sb.small_block_shift);
            println!("  Mini threshold   {} B", sb.threshold);
            println!("  BAT sectors      {}", sb.bat_sectors);
            println!("  SBAT sectors     {} (start {:#010X})", sb.sbat_sectors, sb.sbat_start);
            println!("  Meta-BAT sectors {}", sb.meta_bat_sectors);
            println!("  Directory start  {:#010X}", sb.directory_start);
            println!("  Root class id    {}", container.root_class_id().hyphenated());
            println!("  Root class bytes {}", hex::encode(container.root_class_id().to_bytes_le()));
            println!("  Entries          {}", container.walk().count());
            println!("  Warnings         {}", container.warnings().len());
            for w in container.warnings() {
                println!("    - {w}");
            }
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, path } => {
            let container = Container::open(File::open(&input)?)?;
            let mut stream = match container.open_stream_by_path(&path) {
                Some(s) => s,
                None => {
                    eprintln!("No stream at path: {path}");
                    std::process::exit(2);
                }
            };
            let data = stream.read_all()?;
            if stream.truncated() {
                eprintln!(
                    "warning: {path}: recovered {} of {} declared bytes",
                    data.len(),
                    stream.len()
                );
            }
            std::io::stdout().write_all(&data)?;
        }

        // ── Extract ──────────────────────────────────────────────────────────
        Commands::Extract { input, output_dir } => {
            let container = Container::open(File::open(&input)?)?;
            for (path, entry) in container.walk() {
                if entry.kind != EntryKind::Stream {
                    continue;
                }
                let mut stream = match container.open_stream(entry.id) {
                    Some(s) => s,
                    None => continue,
                };
                let data = match stream.read_all() {
                    Ok(d) => d,
                    Err(e) => {
                        eprintln!("skipped {path}: {e}");
                        continue;
                    }
                };
                let dest = sanitized_path(&output_dir, &path);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                File::create(&dest)?.write_all(&data)?;
                if stream.truncated() {
                    println!("  extracted {path} (TRUNCATED: {} of {} bytes)", data.len(), entry.size);
                } else {
                    println!("  extracted {path} ({} bytes)", data.len());
                }
            }
            println!("Extracted to: {}", output_dir.display());
        }

        // ── Check ────────────────────────────────────────────────────────────
        Commands::Check { input } => {
            let container = match Container::open(File::open(&input)?) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("FATAL: {e}");
                    std::process::exit(2);
                }
            };
            if container.warnings().is_empty() {
                println!("OK: {} entries, no damage detected", container.walk().count());
            } else {
                println!("DAMAGED: container opened with {} warning(s)", container.warnings().len());
                for w in container.warnings() {
                    println!("  - {w}");
                }
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn kind_name(entry: &DirEntry) -> &'static str {
    match entry.kind {
        EntryKind::Storage => "dir",
        EntryKind::Stream => "stream",
        EntryKind::Root => "root",
    }
}

/// Map container paths onto the local filesystem, defusing separator and
/// control characters that are legal in entry names.
fn sanitized_path(base: &Path, container_path: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    for segment in container_path.split('/') {
        let clean: String = segment
            .chars()
            .map(|c| if c.is_control() || matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        match clean.as_str() {
            "" | "." | ".." => out.push("_"),
            _ => out.push(clean),
        }
    }
    out
}
