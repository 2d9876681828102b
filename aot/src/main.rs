// il2asm - IL bytecode to x86 assembly AOT compiler
//
// Compiles an executable assembly description, plus every assembly it
// references, into a single NASM listing.
//
// Usage:
//   il2asm app.json -o app.asm
//   il2asm app.json -L ../runtime --debug -vv

use anyhow::{Context, Result};
use clap::Parser;
use il2asm::{CompileOptions, RuntimeRefs, TargetPlatform, TextAssembler};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "il2asm")]
#[command(about = "IL bytecode to x86 assembly AOT compiler")]
#[command(version)]
struct Args {
    /// Entry assembly description (JSON)
    input: PathBuf,

    /// Output assembly listing
    #[arg(short, long, default_value = "output.asm")]
    output: PathBuf,

    /// Target platform
    #[arg(long, default_value = "x86")]
    platform: String,

    /// Extra directories searched for referenced assemblies
    #[arg(short = 'L', long = "search-dir")]
    search_dir: Vec<PathBuf>,

    /// Assembly providing the runtime hooks
    #[arg(long)]
    runtime_assembly: Option<String>,

    /// Full name of the type providing the runtime hooks
    #[arg(long)]
    runtime_type: Option<String>,

    /// Emit method layout comments
    #[arg(long)]
    debug: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let platform: TargetPlatform = args
        .platform
        .parse()
        .context("Invalid --platform")?;

    let mut runtime = RuntimeRefs::default();
    if let Some(assembly) = args.runtime_assembly {
        runtime.assembly = assembly;
    }
    if let Some(type_name) = args.runtime_type {
        runtime.type_name = type_name;
    }

    let options = CompileOptions {
        platform,
        debug: args.debug,
        runtime,
    };

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let mut asm = TextAssembler::new(BufWriter::new(file));

    let summary = il2asm::compile_with_options(&args.input, options, args.search_dir, &mut asm);
    let summary = match summary {
        Ok(summary) => summary,
        Err(err) => {
            // Nothing was rendered; don't leave an empty listing behind
            drop(asm);
            discard_output(&args.output);
            return Err(err)
                .with_context(|| format!("Failed to compile {}", args.input.display()));
        }
    };

    tracing::info!(
        methods = summary.methods.len(),
        static_fields = summary.fields.len(),
        output = %args.output.display(),
        "wrote listing"
    );

    Ok(())
}

/// Remove a listing left behind by a failed run, logging if that fails
fn discard_output(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove incomplete output");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.asm");
        std::fs::write(&path, b"").unwrap();
        discard_output(&path);
        assert!(!path.exists());

        // Already gone: warns instead of failing
        discard_output(&path);
        discard_output(dir.path());
        assert!(dir.path().exists());
    }
}
