use anyhow::{Context, Result};
use clap::Parser;
use ragescript::resource::Container;
use ragescript::script::{DecompileOptions, Decoder, Machine};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "rage-decompile", version, about = "Decompile RAGE scripts to pseudo-C")]
struct Args {
    /// Script to decompile; the file name must contain `xsc` or `ysc`
    path: PathBuf,

    /// Natives dictionary (JSON) used to name native calls
    #[arg(long, default_value = "./natives.json")]
    natives: PathBuf,

    /// Native hash translation table
    #[arg(long, default_value = "./native_translation.dat")]
    translation: PathBuf,

    /// Prefix each block with its start address
    #[arg(long)]
    show_addresses: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let options = DecompileOptions {
        show_addresses: args.show_addresses,
        natives_path: Some(args.natives),
        translation_path: Some(args.translation),
    };

    let container = Container::open(&args.path)?;
    let name = container.name.clone();

    let natives = match options.load_natives() {
        Ok(db) => {
            if let Some(db) = &db {
                tracing::info!("loaded {} native names", db.len());
            }
            db
        }
        Err(e) if !e.is_fatal() => {
            tracing::warn!("{}; native calls will show raw hashes", e);
            None
        }
        Err(e) => return Err(e.into()),
    };

    let code = Decoder::new(container.arch, natives.as_ref())
        .decode_all(container.region())
        .with_context(|| format!("Failed to decode {}", name))?;
    tracing::debug!("decoded {} instructions", code.len());

    let file = Machine::new(name.clone(), code, options)
        .decompile()
        .with_context(|| format!("Failed to decompile {}", name))?;
    if !file.warnings.is_empty() {
        tracing::info!("{}: {} warnings", name, file.warnings.len());
    }

    print!("{}", file);
    Ok(())
}
