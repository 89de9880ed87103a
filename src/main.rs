use anyhow::Context;
use clap::Parser;
use pbjson::{DecodeOptions, FileDescriptor, MessageDecoder, DEFAULT_MAX_DEPTH};
use std::io::{Read, Write};
use std::path::PathBuf;

// keeps recursion well inside the main thread's stack
const MAX_DEPTH_LIMIT: u64 = 1024;

#[derive(Parser)]
#[command(name = "pbjson")]
#[command(about = "Decode a protobuf payload to JSON using a JSON schema description")]
struct Cli {
    /// Schema description (package, messages, fields) as JSON
    #[arg(long)]
    schema: PathBuf,

    /// Root message type, e.g. .mypackage.Outer.Inner
    #[arg(long = "type", value_name = "TYPE")]
    type_name: String,

    /// Payload file; reads stdin when omitted
    input: Option<PathBuf>,

    /// Write JSON here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Payload starts with a gRPC message frame
    #[arg(long)]
    grpc: bool,

    /// Deepest embedded message to decode
    #[arg(
        long,
        default_value_t = DEFAULT_MAX_DEPTH as u64,
        value_parser = clap::value_parser!(u64).range(0..=MAX_DEPTH_LIMIT)
    )]
    max_depth: u64,

    #[arg(long)]
    pretty: bool,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let schema = std::fs::read(&cli.schema)
        .with_context(|| format!("reading schema {}", cli.schema.display()))?;
    let file: FileDescriptor = serde_json::from_slice(&schema)
        .with_context(|| format!("parsing schema {}", cli.schema.display()))?;

    let payload = match &cli.input {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };
    tracing::info!(bytes = payload.len(), type_name = %cli.type_name, "decoding payload");

    let options = DecodeOptions::default()
        .max_depth(usize::try_from(cli.max_depth)?)
        .grpc_frame(cli.grpc);
    let decoder = MessageDecoder::new(&file).with_options(options);
    let message = decoder
        .decode_root(&payload, &cli.type_name)
        .with_context(|| format!("decoding {}", cli.type_name))?;

    let mut json = if cli.pretty {
        serde_json::to_vec_pretty(&message)?
    } else {
        serde_json::to_vec(&message)?
    };
    json.push(b'\n');

    match &cli.output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path.display()))?
        }
        None => std::io::stdout().write_all(&json)?,
    }
    Ok(())
}
