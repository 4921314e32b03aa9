//! shivc CLI
//!
//! Compiles a single `.c` file to an executable (or, with `-S`, to
//! assembly text) and prints diagnostics in the pinned
//! `<line>: <kind>: <message>` format (spec.md 6). Exit code is 0 iff
//! no errors were diagnosed and the downstream assembler/linker (when
//! invoked) succeeded.

use clap::Parser as ClapParser;
use shivc::CompilerConfig;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "shivc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "A self-hosting-oriented compiler for a C subset, targeting x86-64 Linux")]
struct Cli {
    /// Input .c source file
    input: PathBuf,

    /// Output path (defaults to the input filename without its extension)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Emit assembly only; skip invoking the assembler/linker
    #[arg(short = 'S')]
    assembly_only: bool,

    /// Additional directory to search for included headers (repeatable)
    #[arg(long = "include-dir", value_name = "DIR")]
    include_dirs: Vec<PathBuf>,
}

fn main() {
    let cli = Cli::parse();

    let output = cli.output.unwrap_or_else(|| {
        let stem = cli.input.file_stem().unwrap_or_default();
        PathBuf::from(stem)
    });

    let mut config = CompilerConfig::new().with_emit_assembly_only(cli.assembly_only);
    for dir in cli.include_dirs {
        config = config.with_include_dir(dir);
    }

    let (diags, result) = shivc::compile_file_with_config(&cli.input, &output, &config);
    for d in diags.sorted() {
        eprintln!("{}", d);
    }

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            if !diags.has_errors() {
                // A diagnostic-free failure (I/O, a missing header, the
                // external assembler/linker) still needs its own message;
                // diagnosed compile errors were already printed above.
                eprintln!("error: {}", e);
            }
            process::exit(1);
        }
    }
}
