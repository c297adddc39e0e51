use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use biozip::reader::{unzip_to_file, ArchiveReader, UnzipOptions};
use biozip::writer::{zip_files, ZipOptions};
use biozip::DataType;

#[derive(Parser)]
#[command(name = "biozip", version = "1.0.0", about = "Compressor for genomic text formats (.bioz)")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress one or more inputs into a .bioz archive (multiple inputs
    /// concatenate, one component each)
    Zip {
        #[arg(short, long)]
        output: PathBuf,
        /// Input type: vcf, sam, fastq, fasta, gff, 23andme (default: detect)
        #[arg(short = 't', long)]
        input_type: Option<String>,
        /// Text block size in MiB
        #[arg(long, default_value = "16")]
        block_size: usize,
        /// Worker threads (0 = all cores)
        #[arg(long, default_value = "0")]
        threads: usize,
        #[arg(short, long, default_value = "3")]
        level: i32,
        /// Encrypt with AES-256-GCM
        #[arg(short, long)]
        password: Option<String>,
        /// Round whitelisted numeric fields to two significant digits
        #[arg(long)]
        round: bool,
        #[arg(short, long, required = true, num_args = 1..)]
        input: Vec<PathBuf>,
    },
    /// Decompress a .bioz archive to a file
    Unzip {
        input: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
        /// Regions: chrom, chrom:pos, chrom:start-end (repeatable)
        #[arg(short, long)]
        regions: Vec<String>,
        /// Identifier-substring filter (FASTA/FASTQ records)
        #[arg(short, long)]
        grep: Option<String>,
        /// FASTA: one line per sequence instead of the original wrapping
        #[arg(long)]
        fasta_single_line: bool,
    },
    /// Decompress to stdout
    Cat {
        input: PathBuf,
        #[arg(short, long)]
        password: Option<String>,
        #[arg(short, long)]
        regions: Vec<String>,
        #[arg(short, long)]
        grep: Option<String>,
        #[arg(long)]
        fasta_single_line: bool,
    },
    /// Show archive metadata
    List {
        input: PathBuf,
        /// Emit the manifest as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(())  => ExitCode::SUCCESS,
        Err(e)  => {
            eprintln!("biozip: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    match Cli::parse().command {

        // ── Zip ──────────────────────────────────────────────────────────────
        Commands::Zip {
            output, input, input_type, block_size, threads, level, password, round,
        } => {
            let opts = ZipOptions {
                block_size: block_size.max(1) * 1024 * 1024,
                threads,
                level,
                password,
                round,
                input_type: input_type.as_deref().map(parse_input_type).transpose()?,
            };
            let stats = zip_files(&input, &output, opts)?;
            let ratio = if stats.out_bytes > 0 {
                stats.txt_bytes as f64 / stats.out_bytes as f64
            } else {
                0.0
            };
            println!(
                "Created: {}  ({} component(s), {} B → {} B, {:.1}x)",
                output.display(), stats.components, stats.txt_bytes, stats.out_bytes, ratio
            );
            if stats.skipped > 0 {
                println!("Skipped {} unsupported input(s)", stats.skipped);
            }
        }

        // ── Unzip ────────────────────────────────────────────────────────────
        Commands::Unzip { input, output, password, regions, grep, fasta_single_line } => {
            let opts = UnzipOptions { password, regions, grep, fasta_single_line };
            let stats = unzip_to_file(&input, &output, &opts)?;
            println!(
                "Unpacked: {} ({} B{})",
                output.display(),
                stats.bytes_out,
                if stats.verified { ", digest verified" } else { "" }
            );
        }

        // ── Cat ──────────────────────────────────────────────────────────────
        Commands::Cat { input, password, regions, grep, fasta_single_line } => {
            let opts = UnzipOptions { password, regions, grep, fasta_single_line };
            let mut reader = ArchiveReader::open(&input, opts.password.as_deref())?;
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            reader.unzip(&mut lock, &opts)?;
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, json } => {
            let reader = ArchiveReader::open(&input, None);
            let reader = match reader {
                // Metadata listing works without a password: only the
                // footer is needed and it is never encrypted — but open()
                // insists on a key for encrypted archives, so report that
                // case cleanly.
                Err(biozip::BiozError::PasswordRequired) => {
                    eprintln!("biozip: archive is encrypted; metadata requires --password via unzip");
                    return Err(Box::new(biozip::BiozError::PasswordRequired));
                }
                other => other?,
            };
            let m = reader.manifest();
            if json {
                println!("{}", serde_json::to_string_pretty(&m)?);
            } else {
                println!("── .bioz archive ────────────────────────────────────────");
                println!("  Path           {}", m.path);
                println!("  Format version {}", m.format_version);
                println!("  Encrypted      {}", m.encrypted);
                println!("  Block size     {} B", m.block_size);
                println!("  Created        {}", m.created);
                println!("  Sections       {}", m.num_sections);
                println!("  Archive digest {}", m.archive_digest);
                println!("  Components     {}", m.components.len());
                println!();
                println!("{:<24} {:>8} {:>14} {:>8}  Digest", "Name", "Type", "Size", "Blocks");
                for c in &m.components {
                    println!(
                        "{:<24} {:>8} {:>14} {:>8}  {}",
                        c.name, c.data_type, c.txt_len, c.num_blocks, &c.digest[..16]
                    );
                }
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn parse_input_type(s: &str) -> Result<DataType, Box<dyn std::error::Error>> {
    match s.to_lowercase().as_str() {
        "vcf"            => Ok(DataType::Vcf),
        "sam"            => Ok(DataType::Sam),
        "fastq" | "fq"   => Ok(DataType::Fastq),
        "fasta" | "fa"   => Ok(DataType::Fasta),
        "gff" | "gff3"   => Ok(DataType::Gff),
        "23andme" | "me" => Ok(DataType::Me23),
        other            => Err(format!("unknown input type '{other}'").into()),
    }
}
