use std::process;

use clap::Parser;
use indicatif::ProgressBar;

use variant_sudoku_solver::io;
use variant_sudoku_solver::solver::{self, Config, ProgressUpdate, Solver, StepGuides};

/// Constraint-propagation solver for variant sudoku puzzles.
#[derive(Parser)]
#[clap(name = "variant-sudoku-solver")]
struct Args {
    /// Input file, or '-' for stdin.
    input: String,

    /// Count all solutions instead of printing them.
    #[clap(long)]
    count: bool,

    /// Print per-cell value unions over all solutions.
    #[clap(long)]
    all_possibilities: bool,

    /// Check whether the house layout admits any solution.
    #[clap(long)]
    validate_layout: bool,

    /// Print the first N propagation steps.
    #[clap(long)]
    steps: Option<usize>,

    /// Maximum number of solutions to print in solve mode.
    #[clap(long, default_value_t = 2)]
    max_solutions: usize,

    /// Disable the progress display.
    #[clap(long)]
    quiet: bool,
}

fn main() {
    let args = Args::parse();

    let input = io::input::read(&args.input).unwrap_or_else(|e| {
        eprintln!("could not read {}: {e}", args.input);
        process::exit(1);
    });
    let constraint = io::parser::parse_text(&input).unwrap_or_else(|e| {
        eprintln!("could not parse input: {e}");
        process::exit(1);
    });

    ctrlc::set_handler(|| {
        eprintln!("interrupted");
        process::exit(130);
    })
    .expect("could not install the interrupt handler");

    let mut config = Config::default();
    let progress_bar = if !args.quiet && atty::is(atty::Stream::Stderr) {
        let bar = ProgressBar::new_spinner();
        let callback_bar = bar.clone();
        config.progress_callback = Some(Box::new(move |update: &ProgressUpdate| {
            callback_bar.set_message(io::output::counters(update.counters));
            callback_bar.tick();
        }));
        Some(bar)
    } else {
        None
    };

    let finish = |bar: &Option<ProgressBar>| {
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    };

    if args.validate_layout {
        let mut solver = Solver::new(&constraint, config);
        let valid = solver.validate_layout().expect("validation run was reset");
        finish(&progress_bar);
        println!("{}", if valid { "valid layout" } else { "invalid layout" });
        process::exit(if valid { 0 } else { 1 });
    }

    if args.count {
        let mut solver = Solver::new(&constraint, config);
        let count = solver.count_solutions();
        finish(&progress_bar);
        println!("{count} solutions");
        println!("{}", io::output::counters(solver.counters()));
        return;
    }

    if args.all_possibilities {
        let mut solver = Solver::new(&constraint, config);
        let all = solver
            .solve_all_possibilities()
            .expect("possibility run was reset");
        finish(&progress_bar);
        println!("{}", io::output::pencilmarks_as_grid(&constraint, &all));
        println!("{} distinct solutions seen", solver.counters().solutions);
        return;
    }

    if let Some(num_steps) = args.steps {
        let mut solver = Solver::new(&constraint, config);
        let guides = StepGuides::new();
        for n in 0..num_steps {
            match solver.nth_step(n, &guides).expect("step run was reset") {
                None => break,
                Some(step) => {
                    let location = match step.latest_cell {
                        Some(cell) => constraint.shape.cell_name(cell),
                        None => String::from("start"),
                    };
                    let removed = step
                        .diff_pencilmarks
                        .iter()
                        .map(|d| d.count())
                        .sum::<usize>();
                    let status = if step.is_solution {
                        " solution"
                    } else if step.has_contradiction {
                        " contradiction"
                    } else {
                        ""
                    };
                    println!("step {n}: {location}, {removed} candidates removed{status}");
                }
            }
        }
        finish(&progress_bar);
        return;
    }

    let solutions = solver::solve(&constraint, config)
        .take(args.max_solutions)
        .collect::<Vec<_>>();
    finish(&progress_bar);
    if solutions.is_empty() {
        println!("no solutions");
        process::exit(1);
    }
    for solution in &solutions {
        println!("{}", io::output::solution_as_grid(&constraint, solution));
    }
    if solutions.len() == args.max_solutions {
        println!("stopped after {} solutions", solutions.len());
    }
}
