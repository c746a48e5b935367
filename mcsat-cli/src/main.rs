//! mcsat command-line interface.
//!
//! `mcsat solve <input-file>` reads an SMT-LIB2 script, runs the solver
//! and prints `sat`, `unsat` or `unknown`. Exit codes: 0 sat, 10 unsat,
//! 20 unknown, 1 on any error.

use clap::{Parser, Subcommand};
use mcsat_core::smtlib::parse_script;
use mcsat_core::terms::{Sort, TermManager};
use mcsat_core::SolverConfig;
use mcsat_solver::{Internalizer, LubyRestart, Solver, SolverResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const EXIT_SAT: u8 = 0;
const EXIT_UNSAT: u8 = 10;
const EXIT_UNKNOWN: u8 = 20;
const EXIT_ERROR: u8 = 1;

/// MCSat solver for quantifier-free linear real arithmetic.
#[derive(Parser, Debug)]
#[command(name = "mcsat", version, about)]
struct Cli {
    /// Log level: error, warn, info, debug, trace.
    #[arg(long, default_value = "warn", global = true)]
    log: Level,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decide satisfiability of an SMT-LIB2 input file.
    Solve {
        /// Input file.
        input: PathBuf,

        /// Print the model after a sat answer.
        #[arg(long)]
        model: bool,

        /// Give up after this many conflicts.
        #[arg(long)]
        max_conflicts: Option<u64>,

        /// Restart every `n`-conflict Luby window instead of never.
        #[arg(long)]
        restarts: Option<u64>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("error: failed to install log subscriber");
        return ExitCode::from(EXIT_ERROR);
    }

    match cli.command {
        Command::Solve {
            input,
            model,
            max_conflicts,
            restarts,
        } => match solve(&input, model, max_conflicts, restarts) {
            Ok(result) => {
                let (answer, code) = match result {
                    SolverResult::Sat => ("sat", EXIT_SAT),
                    SolverResult::Unsat => ("unsat", EXIT_UNSAT),
                    SolverResult::Unknown => ("unknown", EXIT_UNKNOWN),
                };
                println!("{answer}");
                ExitCode::from(code)
            }
            Err(error) => {
                eprintln!("error: {error}");
                ExitCode::from(EXIT_ERROR)
            }
        },
    }
}

fn solve(
    input: &PathBuf,
    print_model: bool,
    max_conflicts: Option<u64>,
    restarts: Option<u64>,
) -> mcsat_core::Result<SolverResult> {
    let text = std::fs::read_to_string(input)?;
    let mut manager = TermManager::new();
    let script = parse_script(&text, &mut manager)?;

    let config = SolverConfig {
        max_conflicts,
        ..SolverConfig::default()
    };
    let mut solver = Solver::for_qf_lra(config);
    if let Some(unit) = restarts {
        solver.set_restart_policy(Box::new(LubyRestart::new(unit)));
    }

    let mut internalizer = Internalizer::new(&manager);
    internalizer.assert_formulas(&mut solver, &script.assertions)?;

    let result = solver.check();
    tracing::info!(
        conflicts = solver.statistics().conflicts,
        decisions = solver.statistics().decisions,
        restarts = solver.statistics().restarts,
        "search finished"
    );

    if print_model && result == SolverResult::Sat {
        for (name, term) in &script.declarations {
            match manager.sort(*term) {
                Sort::Bool => {
                    let value = internalizer
                        .literal_for(*term)
                        .and_then(|lit| lit.eval(solver.trail().bool_model()));
                    if let Some(value) = value {
                        println!("(define-fun {name} () Bool {value})");
                    }
                }
                Sort::Real => {
                    let value = internalizer
                        .rational_var(*term)
                        .and_then(|ord| solver.trail().rational_model().value(ord));
                    if let Some(value) = value {
                        println!("(define-fun {name} () Real {value})");
                    }
                }
            }
        }
    }
    Ok(result)
}
