//! Assembly to HIT program compiler CLI.
//!
//! Reads an assembly source file and writes a HIT container.
//!
//! # Usage
//! ```text
//! assembler <input.asm> [OPTIONS]
//! ```
//!
//! # Arguments
//! - `input.asm`: Assembly source file to compile
//!
//! # Options
//! - `-o, --output <file>`: Output file path (defaults to `<input>.hit`)
//! - `-l, --list`: Print the export table after compiling
//!
//! # Examples
//! ```text
//! assembler lobby.asm
//! assembler lobby.asm -o build/lobby.hit
//! assembler lobby.asm -l
//! ```

use hitvm::virtual_machine::assembler::assemble_file;
use hitvm::virtual_machine::program::ProgramImage;
use hitvm::{error, info};
use std::env;
use std::fs;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 || args[1] == "--help" || args[1] == "-h" {
        print_usage(&args[0]);
        process::exit(if args.len() < 2 { 1 } else { 0 });
    }

    let input_path = &args[1];
    let mut output_path: Option<String> = None;
    let mut list = false;

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            k @ ("--output" | "-o") => {
                i += 1;
                if i >= args.len() {
                    error!("{k} requires an argument");
                    process::exit(1);
                }
                output_path = Some(args[i].clone());
                i += 1;
            }
            "--list" | "-l" => {
                list = true;
                i += 1;
            }
            other => {
                error!("Unexpected argument: {}\n", other);
                print_usage(&args[0]);
                process::exit(1);
            }
        }
    }

    if !Path::new(input_path).exists() {
        error!("Input file does not exist: {}", input_path);
        process::exit(1);
    }

    let output_path = output_path.unwrap_or_else(|| {
        let p = Path::new(input_path);
        let stem = p.file_stem().unwrap_or_default().to_string_lossy();
        let parent = p.parent().unwrap_or(Path::new("."));
        parent
            .join(format!("{}.hit", stem))
            .to_string_lossy()
            .into_owned()
    });

    if let Some(parent) = Path::new(&output_path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        error!("Output directory does not exist: {}", parent.display());
        process::exit(1);
    }

    let program = match assemble_file(input_path) {
        Ok(p) => p,
        Err(e) => {
            error!("Assembly failed: {}", e);
            process::exit(1);
        }
    };

    let bytes = program.to_bytes();

    if let Err(e) = fs::write(&output_path, &bytes) {
        error!("Failed to write output file: {}", e);
        process::exit(1);
    }

    info!(
        "Compiled {} -> {} ({} bytes)",
        input_path,
        output_path,
        bytes.len()
    );

    if list {
        print_exports(&program);
    }
}

/// Prints the export table as an aligned two-column listing.
fn print_exports(program: &ProgramImage) {
    let track_w = program
        .exports()
        .iter()
        .map(|e| e.track_id.to_string().len())
        .max()
        .unwrap_or(0)
        .max("track".len());

    println!("Exports ({} code bytes):", program.bytes().len() - program.code_start());
    println!("{:>track_w$}  entry", "track");
    println!("{}", "-".repeat(track_w + 2 + 10));
    for entry in program.exports() {
        if entry.address == 0 {
            println!("{:>track_w$}  simple", entry.track_id);
        } else {
            println!("{:>track_w$}  0x{:08x}", entry.track_id, entry.address);
        }
    }
}

const USAGE: &str = "\
HIT Assembler

USAGE:
    {program} <input.asm> [OPTIONS]

ARGS:
    <input.asm>    Assembly source file to compile

OPTIONS:
    -o, --output <file>     Output file path (defaults to <input>.hit)
    -l, --list              Print the export table after compiling
    -h, --help              Print this help message

EXAMPLES:
    # Compile to default output name
    {program} lobby.asm

    # Compile with explicit output
    {program} lobby.asm -o build/lobby.hit

    # Compile and show which tracks the program exports
    {program} lobby.asm -l
";

fn print_usage(program: &str) {
    info!("{}", USAGE.replace("{program}", program));
}
