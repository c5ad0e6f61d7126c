use clap::{Parser, Subcommand, ValueEnum};
use env_logger::Env;
use log::{debug, LevelFilter};
use serde::Serialize;
use stubcodec::argument::{Argument, StubCodec, StubHeader, StubOptions};
use stubcodec::cipher::CipherProfile;
use stubcodec::serialization;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "stubcodec", about = "Build and inspect runtime argument stubs and struct blobs")]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
    /// Keystream profile; must match the runtime that consumes the stub
    #[arg(long, global = true, value_enum, default_value = "word32")]
    profile: ProfileArg,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProfileArg {
    Word32,
    Word64,
}

impl From<ProfileArg> for CipherProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::Word32 => CipherProfile::Word32,
            ProfileArg::Word64 => CipherProfile::Word64,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Encode arguments into an encrypted stub
    Encode {
        #[arg(short, long)]
        output: PathBuf,
        /// ID=VALUE; VALUE is @PATH (file contents), 0x<hex>, or literal text
        #[arg(short, long = "arg", value_name = "ID=VALUE")]
        args: Vec<String>,
    },
    /// Decrypt a stub and list its arguments
    Decode {
        input: PathBuf,
        /// Print a JSON array instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the cleartext stub header and verify its checksum
    Header {
        input: PathBuf,
    },
    /// Show the descriptor table of a serialized struct blob
    Inspect {
        input: PathBuf,
    },
}

#[derive(Serialize)]
struct ArgumentView {
    id:   u32,
    size: usize,
    data: String,
}

impl From<&Argument> for ArgumentView {
    fn from(arg: &Argument) -> Self {
        ArgumentView {
            id:   arg.id,
            size: arg.data.len(),
            data: hex::encode(&arg.data),
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let options = StubOptions { profile: cli.profile.into() };
    let codec = StubCodec::new(options);

    match cli.command {

        // ── Encode ───────────────────────────────────────────────────────────
        Commands::Encode { output, args } => {
            let args = args
                .iter()
                .map(String::as_str)
                .map(parse_arg)
                .collect::<Result<Vec<_>, _>>()?;
            let stub = codec.encode(&args)?;
            std::fs::write(&output, &stub)?;
            println!(
                "Created: {} ({} argument(s), {} B, {})",
                output.display(),
                args.len(),
                stub.len(),
                options.profile.name()
            );
        }

        // ── Decode ───────────────────────────────────────────────────────────
        Commands::Decode { input, json } => {
            let stub = std::fs::read(&input)?;
            let args = codec.decode(&stub)?;
            if json {
                let views: Vec<ArgumentView> = args.iter().map(ArgumentView::from).collect();
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                println!("Stub: {}", input.display());
                println!("{:>10} {:>10}  Data", "ID", "Size");
                for arg in &args {
                    println!("{:>10} {:>10}  {}", arg.id, arg.data.len(), preview(&arg.data));
                }
            }
        }

        // ── Header ───────────────────────────────────────────────────────────
        Commands::Header { input } => {
            let stub = std::fs::read(&input)?;
            let header = StubHeader::parse(&stub)?;
            println!("── Argument stub ─────────────────────────────────────────");
            println!("  Path           {}", input.display());
            println!("  Size           {} B", stub.len());
            println!("  Key            {}", hex::encode(header.key));
            println!("  Arguments      {}", header.count);
            println!("  Payload size   {} B", header.payload_size);
            println!("  Checksum       {:#010x}", header.checksum);
            println!("  Computed       {:#010x}", header.compute_checksum());
            println!("  Valid          {}", header.is_valid());
        }

        // ── Inspect ──────────────────────────────────────────────────────────
        Commands::Inspect { input } => {
            let blob = std::fs::read(&input)?;
            let layout = serialization::inspect(&blob)?;
            println!("Blob: {}", input.display());
            println!("  Header         {} B", layout.header_len);
            println!("  Fields         {}", layout.fields.len());
            println!("  Payload        {} B declared, {} B present", layout.declared_bytes, layout.payload_bytes);
            println!("{:>5}  {:<9} {:>10} {:>10}  Data", "#", "Storage", "Offset", "Length");
            for (i, field) in layout.fields.iter().enumerate() {
                let start = layout.header_len + field.offset;
                let data = blob
                    .get(start..start + field.descriptor.len())
                    .map(preview)
                    .unwrap_or_else(|| "<truncated>".into());
                println!(
                    "{:>5}  {:<9} {:>10} {:>10}  {}",
                    i,
                    field.descriptor.storage().to_string(),
                    field.offset,
                    field.descriptor.len(),
                    data
                );
            }
        }
    }

    Ok(())
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn init_logging(debug: bool) {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("warn"));
    if debug {
        builder.filter_level(LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

/// Parse `ID=VALUE` into an argument.
fn parse_arg(spec: &str) -> Result<Argument, Box<dyn std::error::Error>> {
    let (id, value) = spec
        .split_once('=')
        .ok_or_else(|| format!("argument '{}' is not ID=VALUE", spec))?;
    let id: u32 = id
        .trim()
        .parse()
        .map_err(|e| format!("argument id '{}': {}", id, e))?;
    let data = if let Some(path) = value.strip_prefix('@') {
        read_file(Path::new(path))?
    } else if let Some(digits) = value.strip_prefix("0x") {
        hex::decode(digits).map_err(|e| format!("argument {}: {}", id, e))?
    } else {
        value.as_bytes().to_vec()
    };
    debug!("argument {}: {} B", id, data.len());
    Ok(Argument::new(id, data))
}

fn read_file(path: &Path) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e).into())
}

/// Hex of the first 16 bytes.
fn preview(data: &[u8]) -> String {
    const LIMIT: usize = 16;
    if data.len() > LIMIT {
        format!("{}…", hex::encode(&data[..LIMIT]))
    } else {
        hex::encode(data)
    }
}
