use std::{fs, process, sync::mpsc};

use avm2::{Event, EventLoop, EventLoopSettings, Outcome, ShutdownMode, Vm, VmSettings};
use clap::Parser as ClapParser;
use log::{debug, error, info};
use object::Atom;

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// ABC files to load and run in order
    #[arg(required = true, help = "The .abc files to execute")]
    files: Vec<String>,

    /// Print a listing of each unit instead of running it
    #[arg(long, help = "Disassemble inputs instead of executing")]
    dump: bool,

    #[arg(long, help = "Interpret every method, never compile to native code")]
    no_native: bool,

    #[arg(long, default_value_t = 256, help = "Maximum call depth")]
    max_recursion: usize,

    /// Instructions each entry script may execute
    #[arg(long, help = "Instruction budget per entry script")]
    budget: Option<u64>,

    #[arg(long, help = "Log every executed instruction at trace level")]
    trace: bool,

    #[arg(short, long, action = clap::ArgAction::Count, help = "Raise log verbosity")]
    verbose: u8,

    /// Stop at the first uncaught error and drop the files still queued
    #[arg(long, help = "Discard pending files after the first failure")]
    discard_on_exit: bool,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(if cli.trace { cli.verbose.max(3) } else { cli.verbose });

    let settings = VmSettings {
        max_recursion: cli.max_recursion,
        instruction_budget: cli.budget,
        native_code: !cli.no_native,
        trace_execution: cli.trace,
        ..VmSettings::default()
    };
    if let Err(err) = settings.validate() {
        eprintln!("Invalid settings: {err}");
        process::exit(2);
    }
    let mode = if cli.discard_on_exit {
        ShutdownMode::Discard
    } else {
        ShutdownMode::Drain
    };
    let events = match EventLoop::spawn(
        EventLoopSettings {
            shutdown: mode,
            ..EventLoopSettings::default()
        },
        move || Vm::new(settings),
    ) {
        Ok(events) => events,
        Err(err) => {
            eprintln!("Error starting vm: {err}");
            process::exit(1);
        }
    };
    let queue = events.queue();

    // Decode everything up front so a bad file fails before any script runs.
    let mut units = Vec::with_capacity(cli.files.len());
    for filename in &cli.files {
        let bytes = match fs::read(filename) {
            Ok(bytes) => bytes,
            Err(err) => {
                eprintln!("Error reading file '{filename}': {err}");
                process::exit(1);
            }
        };
        match bytecode::read_abc(&bytes) {
            Ok(file) => units.push((filename.clone(), file)),
            Err(err) => {
                eprintln!("Error decoding {filename}: {err}");
                process::exit(1);
            }
        }
    }

    let (done_tx, done_rx) = mpsc::channel();
    let submitted = units.len();
    let dump = cli.dump;
    for (filename, file) in units {
        let name = filename.clone();
        let task = Event::task(move |vm| {
            let unit = vm.load(&file)?;
            if dump {
                let text = vm.disassemble(unit)?;
                println!("== {name} ==");
                print!("{text}");
                return Ok(Atom::Undefined);
            }
            let value = vm.run_entry(unit)?;
            debug!("{name} done: {:?}", vm.heap_stats());
            Ok(value)
        });
        let done = done_tx.clone();
        queue.submit_with_fence(task, move |outcome| {
            let _ = done.send((filename, outcome));
        });
    }
    drop(done_tx);

    let mut failed = false;
    for (filename, outcome) in done_rx.iter().take(submitted) {
        match outcome {
            Outcome::Completed => {}
            Outcome::Uncaught(uncaught) => {
                error!("uncaught error in {filename}");
                eprintln!("{uncaught}");
                failed = true;
            }
            Outcome::Discarded => {
                eprintln!("Skipped {filename}");
                failed = true;
            }
        }
        if failed && cli.discard_on_exit {
            break;
        }
    }

    match events.shutdown(mode) {
        Ok(report) => info!("{report:?}"),
        Err(err) => {
            eprintln!("Error stopping vm: {err}");
            process::exit(1);
        }
    }
    if failed {
        process::exit(1);
    }
}
