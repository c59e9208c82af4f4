use std::env;
use std::path::{Path, PathBuf};
use std::process;

use famiasm::assembler::{Assembler, Options, OutputDest, OutputMode, replace_ext};
use famiasm::logging;

const USAGE: &str = "\
Usage: famiasm [options] sourcefile [outputfile] [listfile]

Options:
  -?, -h    show this help and exit
  -l        create a listing file
  -L        listing with macros and repeats expanded
  -d<name>  define <name> as having the value 1
  -q        quiet mode (suppress all informational output)
  -n        export FCEUX-compatible .nl label files, one per 16K bank
  -f        export a flat `name = 0xvalue` (Lua) symbol file
  -m        export a Mesen-compatible .mlb label file with comments
  -c        export a .cdl code/data coverage file
  -i        create an IPS patch instead of a binary

The output name defaults to the source name with a .bin (or .ips)
extension; listing, coverage and symbol files follow the output name.";

fn usage_and_exit() -> ! {
    eprintln!("{USAGE}");
    process::exit(1);
}

fn main() {
    let args: Vec<String> = env::args().collect();

    let mut listing = false;
    let mut expand_listing = false;
    let mut quiet = false;
    let mut nl = false;
    let mut lua = false;
    let mut mlb = false;
    let mut cdl = false;
    let mut ips = false;
    let mut defines = Vec::new();
    let mut positional = Vec::new();

    for arg in &args[1..] {
        match arg.as_str() {
            "-?" | "-h" => usage_and_exit(),
            "-l" => listing = true,
            "-L" => {
                listing = true;
                expand_listing = true;
            }
            "-q" => quiet = true,
            "-n" => nl = true,
            "-f" => lua = true,
            "-m" => mlb = true,
            "-c" => cdl = true,
            "-i" => ips = true,
            other => {
                if let Some(name) = other.strip_prefix("-d") {
                    if name.is_empty() {
                        usage_and_exit();
                    }
                    defines.push(name.to_string());
                } else if other.starts_with('-') {
                    usage_and_exit();
                } else {
                    positional.push(other.to_string());
                }
            }
        }
    }

    let Some(source) = positional.first().cloned() else {
        usage_and_exit();
    };
    let output = positional
        .get(1)
        .cloned()
        .unwrap_or_else(|| replace_ext(&source, if ips { "ips" } else { "bin" }));
    let list_path = positional
        .get(2)
        .cloned()
        .unwrap_or_else(|| replace_ext(&output, "lst"));

    let opts = Options {
        mode: if ips { OutputMode::Patch } else { OutputMode::Binary },
        dest: OutputDest::Disk(PathBuf::from(&output)),
        defines,
        listing: listing.then(|| PathBuf::from(&list_path)),
        expand_listing,
        coverage: cdl.then(|| PathBuf::from(replace_ext(&output, "cdl"))),
        bank_maps: nl.then(|| PathBuf::from(&output)),
        flat_map: lua.then(|| PathBuf::from(replace_ext(&output, "lua"))),
        combined_map: mlb.then(|| PathBuf::from(replace_ext(&output, "mlb"))),
    };

    if !quiet {
        println!("famiasm {}", env!("CARGO_PKG_VERSION"));
    }

    let mut asm = Assembler::new(opts);
    match asm.run_file(Path::new(&source)) {
        Ok(()) => {
            if !quiet {
                println!("{output} written.");
            }
        }
        Err(e) => {
            logging::error(&e.to_string());
            process::exit(1);
        }
    }
}
