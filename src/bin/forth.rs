//! A thin command-line driver. Argument parsing uses `argh`, the crate
//! this workspace already depends on for it; every flag below resolves
//! to one or two calls against the public host API — no VM logic lives
//! here.

use std::io::{self, Read};
use std::path::PathBuf;

use argh::FromArgs;

use threadforth::kernel::DEFAULT_CORE_SIZE;
use threadforth::{Forth, ForthError, Result};

const DEFAULT_CORE_FILE: &str = "forth.core";

#[derive(FromArgs)]
/// A threaded-code Forth interpreter.
struct Args {
    /// eval the given string before processing any files
    #[argh(option, short = 'e')]
    eval: Option<String>,

    /// save the core image on exit under this name
    #[argh(option, short = 's')]
    save_as: Option<String>,

    /// save the core image on exit under the default name
    #[argh(switch, short = 'd')]
    save_default: bool,

    /// core size in KiB, used only when starting fresh (incompatible with -l)
    #[argh(option, short = 'm')]
    core_kb: Option<usize>,

    /// load a core image instead of starting fresh
    #[argh(option, short = 'l')]
    load: Option<PathBuf>,

    /// source files, evaluated in order; falls back to stdin if none are given
    #[argh(positional)]
    files: Vec<PathBuf>,
}

fn main() {
    let args: Args = argh::from_env();

    let mut forth = match build_instance(&args) {
        Ok(forth) => forth,
        Err(e) => {
            eprintln!("forth: {e}");
            std::process::exit(1);
        }
    };

    if let Some(src) = &args.eval {
        if let Err(e) = forth.eval(src) {
            eprintln!("forth: {e}");
        }
    }

    if args.files.is_empty() {
        if args.eval.is_none() {
            if let Err(e) = run_stdin(&mut forth) {
                eprintln!("forth: {e}");
            }
        }
    } else {
        for path in &args.files {
            if let Err(e) = forth.set_file_input(path) {
                eprintln!("forth: {}: {e}", path.display());
                continue;
            }
            if let Err(e) = forth.run() {
                eprintln!("forth: {e}");
            }
        }
    }

    // `-s NAME` sets a custom save name and enables saving; `-d` enables
    // saving under the default name. The reference driver expresses this
    // as one switch case falling through into the other; here the two
    // are independent branches with the same observable effect (see
    // `SPEC_FULL.md` §9, "-s/-d CLI option pair").
    let save_name = match (&args.save_as, args.save_default) {
        (Some(name), _) => Some(name.clone()),
        (None, true) => Some(DEFAULT_CORE_FILE.to_string()),
        (None, false) => None,
    };
    if let Some(name) = save_name {
        if let Err(e) = forth.save_core(std::path::Path::new(&name)) {
            eprintln!("forth: failed to save core to {name}: {e}");
        }
    }
}

fn build_instance(args: &Args) -> Result<Forth> {
    if let Some(path) = &args.load {
        if args.core_kb.is_some() {
            eprintln!("forth: -m is ignored with -l");
        }
        return Forth::load_core(path);
    }
    let core_size = args
        .core_kb
        .map(|kb| kb * 1024 / std::mem::size_of::<threadforth::Cell>())
        .unwrap_or(DEFAULT_CORE_SIZE);
    Forth::init(core_size)
}

fn run_stdin(forth: &mut Forth) -> Result<()> {
    let mut source = String::new();
    io::stdin()
        .read_to_string(&mut source)
        .map_err(ForthError::from)?;
    forth.eval(&source)
}
