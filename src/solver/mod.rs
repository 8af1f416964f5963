pub mod all_different;
pub mod candidate_selector;
pub mod cell_exclusions;
pub mod debug_log;
pub mod engine;
pub mod handler_accumulator;
pub mod handlers;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::ops::RangeInclusive;

use rand::rngs::StdRng;
use thiserror::Error;

use crate::types::{CellIndex, CellValue, Constraint, FixedValues};
use crate::value_set::ValueSet;

use self::debug_log::DebugSink;
use self::engine::{grid_to_solution, Engine};

pub const VALID_NUM_VALUE_RANGE: RangeInclusive<u32> = 1..=16;

/// Propagation found an empty cell domain. Expected; drives backtracking.
#[derive(Debug)]
pub struct Contradiction;
pub type SolverResult = std::result::Result<(), Contradiction>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SolverError {
    #[error("iterator no longer valid")]
    StaleIterator,
}

pub type Solution = Vec<CellValue>;

#[derive(Copy, Clone, Debug, Default)]
pub struct Counters {
    pub solutions: u64,
    pub guesses: u64,
    pub backtracks: u64,
    pub cells_searched: u64,
    pub values_tried: u64,
    pub constraints_processed: u64,
    pub progress_ratio: f64,
    pub branches_ignored: f64,
}

pub struct ProgressUpdate<'a> {
    pub counters: &'a Counters,
    pub sample_solution: Option<&'a [CellValue]>,
}

pub type ProgressCallback = dyn FnMut(&ProgressUpdate);

/// When the engine suspends and hands an event to the consumer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum YieldMode {
    OnSolution,
    OnStep,
    /// Yield every n-th contradiction (and still every solution).
    OnContradiction(u64),
}

/// Identifies one run of the engine. Advancing a token after a newer run
/// has started fails with [`SolverError::StaleIterator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RunToken {
    pub(crate) counter: u64,
}

/// One yielded event: a solution, a propagation step, or a contradiction
/// sample, depending on the yield mode.
pub struct SolverOutput {
    pub grid: Vec<ValueSet>,
    pub old_grid: Option<Vec<ValueSet>>,
    pub cell_order: Vec<CellIndex>,
    pub values: ValueSet,
    pub is_solution: bool,
    pub has_contradiction: bool,
}

/// User override for one step of a step-mode run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepGuide {
    pub cell: Option<CellIndex>,
    pub value: Option<CellValue>,
}

pub type StepGuides = HashMap<u64, StepGuide>;

/// Bookkeeping for step mode: the step counter, the grid as of the
/// previous yield, and the user's guides.
pub struct StepState {
    pub step: u64,
    pub old_grid: Vec<ValueSet>,
    pub guides: StepGuides,
}

/// One step as presented to the consumer.
pub struct StepResult {
    pub pencilmarks: Vec<ValueSet>,
    pub diff_pencilmarks: Vec<ValueSet>,
    pub latest_cell: Option<CellIndex>,
    pub is_solution: bool,
    pub has_contradiction: bool,
    pub values: ValueSet,
}

/// Result of [`Solver::solve_all_possibilities`].
pub struct AllPossibilities {
    pub solutions: Vec<Solution>,
    pub pencilmarks: Vec<ValueSet>,
}

pub struct Config {
    pub search_randomizer: Option<StdRng>,
    pub progress_callback: Option<Box<ProgressCallback>>,
    pub progress_log_frequency: u32,
    pub solution_cap: Option<usize>,
    pub debug_sink: Option<Box<DebugSink>>,
}

impl Default for Config {
    fn default() -> Config {
        const LOG_UPDATE_FREQUENCY: u32 = 21;
        Config {
            search_randomizer: None,
            progress_callback: None,
            progress_log_frequency: LOG_UPDATE_FREQUENCY,
            solution_cap: None,
            debug_sink: None,
        }
    }
}

/// Enumerate the solutions of a puzzle.
pub fn solve(constraint: &Constraint, config: Config) -> SolutionIter {
    let mut engine = Engine::new(constraint, config);
    let token = engine.start_run(YieldMode::OnSolution);
    SolutionIter { engine, token }
}

pub struct SolutionIter {
    engine: Engine,
    token: RunToken,
}

impl SolutionIter {
    pub fn counters(&self) -> &Counters {
        self.engine.counters()
    }
}

impl Iterator for SolutionIter {
    type Item = Solution;

    fn next(&mut self) -> Option<Self::Item> {
        self.engine
            .next_event(&self.token)
            .expect("owned run token cannot go stale")
            .map(|output| grid_to_solution(&output.grid))
    }
}

#[derive(Clone, PartialEq, Eq)]
enum RunKind {
    Solutions,
    Steps { with_guides: bool },
}

struct ActiveRun {
    token: RunToken,
    kind: RunKind,
    yielded: usize,
}

/// Session facade over one engine: counting, indexed solutions, indexed
/// steps, per-cell solution unions, and layout validation.
pub struct Solver {
    engine: Engine,
    solution_cap: Option<usize>,
    base_fixed_values: FixedValues,
    active_run: Option<ActiveRun>,
}

impl Solver {
    pub fn new(constraint: &Constraint, config: Config) -> Solver {
        let solution_cap = config.solution_cap;
        Solver {
            engine: Engine::new(constraint, config),
            solution_cap,
            base_fixed_values: constraint.fixed_values.clone(),
            active_run: None,
        }
    }

    pub fn counters(&self) -> &Counters {
        self.engine.counters()
    }

    pub fn dump_backtrack_triggers(&mut self) {
        self.engine.dump_backtrack_triggers();
    }

    /// Exhaust the search and return the number of solutions.
    pub fn count_solutions(&mut self) -> u64 {
        let token = self.engine.start_run(YieldMode::OnSolution);
        self.active_run = None;
        while let Ok(Some(_)) = self.engine.next_event(&token) {}
        self.engine.counters().solutions
    }

    /// The n-th solution (0-based), or `None` when fewer exist. Moving
    /// forward resumes the current run; moving backward restarts it.
    pub fn nth_solution(&mut self, n: usize) -> Result<Option<Solution>, SolverError> {
        let resumable = matches!(
            &self.active_run,
            Some(run) if run.kind == RunKind::Solutions && run.yielded <= n
        );
        if !resumable {
            let token = self.engine.start_run(YieldMode::OnSolution);
            self.active_run = Some(ActiveRun {
                token,
                kind: RunKind::Solutions,
                yielded: 0,
            });
        }

        let run = self.active_run.as_mut().expect("run was just installed");
        while run.yielded <= n {
            match self.engine.next_event(&run.token)? {
                None => return Ok(None),
                Some(output) => {
                    run.yielded += 1;
                    if run.yielded == n + 1 {
                        return Ok(Some(grid_to_solution(&output.grid)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// The n-th propagation step (0-based). The iterator is keyed on the
    /// presence of guides: switching between guided and unguided stepping
    /// restarts the run.
    pub fn nth_step(
        &mut self,
        n: usize,
        guides: &StepGuides,
    ) -> Result<Option<StepResult>, SolverError> {
        let kind = RunKind::Steps {
            with_guides: !guides.is_empty(),
        };
        let resumable = matches!(
            &self.active_run,
            Some(run) if run.kind == kind && run.yielded <= n
        );
        if !resumable {
            let token = self.engine.start_step_run(guides.clone());
            self.active_run = Some(ActiveRun {
                token,
                kind,
                yielded: 0,
            });
        }

        let run = self.active_run.as_mut().expect("run was just installed");
        while run.yielded <= n {
            match self.engine.next_event(&run.token)? {
                None => return Ok(None),
                Some(output) => {
                    run.yielded += 1;
                    if run.yielded == n + 1 {
                        return Ok(Some(make_step_result(output)));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Union every solution into per-cell pencilmarks. Once two solutions
    /// are known, branches that cannot contribute a novel value are
    /// pruned, so full enumeration is avoided.
    pub fn solve_all_possibilities(&mut self) -> Result<AllPossibilities, SolverError> {
        let token = self.engine.start_run(YieldMode::OnSolution);
        self.active_run = None;

        let num_cells = self.engine.num_cells();
        let mut pencilmarks = vec![ValueSet::empty(); num_cells];
        let mut solutions = Vec::new();

        while let Some(output) = self.engine.next_event(&token)? {
            for (union, cell) in pencilmarks.iter_mut().zip(&output.grid) {
                *union |= *cell;
            }
            if self.solution_cap.map_or(true, |cap| solutions.len() < cap) {
                solutions.push(grid_to_solution(&output.grid));
            }
            if self.engine.counters().solutions >= 2 {
                self.engine.set_uninteresting_values(pencilmarks.clone());
            }
        }

        Ok(AllPossibilities {
            solutions,
            pencilmarks,
        })
    }

    /// Check that the house geometry admits any solution at all. Each
    /// house in turn is filled with the identity permutation (legal up to
    /// value relabelling) and searched under a contradiction budget;
    /// attempts with no verdict are retried without a budget, best
    /// progress first.
    pub fn validate_layout(&mut self) -> Result<bool, SolverError> {
        const CONTRADICTION_BUDGET: u64 = 200;

        self.active_run = None;
        let houses = self.engine.house_cell_lists();
        let mut no_verdict: Vec<(f64, Vec<CellIndex>)> = Vec::new();
        let mut verdict = None;

        for house in &houses {
            self.engine.reset_fixed_values(identity_fill(house));
            let token = self.engine.start_run(YieldMode::OnContradiction(1));

            let mut contradictions = 0;
            let outcome = loop {
                match self.engine.next_event(&token)? {
                    None => break Some(false),
                    Some(output) if output.is_solution => break Some(true),
                    Some(_) => {
                        contradictions += 1;
                        if contradictions >= CONTRADICTION_BUDGET {
                            break None;
                        }
                    }
                }
            };

            match outcome {
                Some(result) => {
                    verdict = Some(result);
                    break;
                }
                None => {
                    no_verdict.push((self.engine.counters().progress_ratio, house.clone()));
                }
            }
        }

        let result = match verdict {
            Some(result) => result,
            None => {
                // Budget exhausted everywhere; finish the attempt that got
                // furthest, this time to completion.
                no_verdict.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
                match no_verdict.first() {
                    // No houses means nothing can be violated.
                    None => true,
                    Some((_, house)) => {
                        self.engine.reset_fixed_values(identity_fill(house));
                        let token = self.engine.start_run(YieldMode::OnSolution);
                        self.engine.next_event(&token)?.is_some()
                    }
                }
            }
        };

        self.engine.reset_fixed_values(self.base_fixed_values.clone());
        Ok(result)
    }
}

fn identity_fill(house: &[CellIndex]) -> FixedValues {
    house
        .iter()
        .enumerate()
        .map(|(i, &cell)| (cell, CellValue::from_index(i as u32)))
        .collect()
}

fn make_step_result(output: SolverOutput) -> StepResult {
    let diff_pencilmarks = match &output.old_grid {
        Some(old_grid) => old_grid
            .iter()
            .zip(&output.grid)
            .map(|(old, new)| {
                let mut removed = *old;
                removed.remove_set(*new);
                removed
            })
            .collect(),
        None => vec![ValueSet::empty(); output.grid.len()],
    };

    StepResult {
        latest_cell: output.cell_order.last().copied(),
        diff_pencilmarks,
        pencilmarks: output.grid,
        is_solution: output.is_solution,
        has_contradiction: output.has_contradiction,
        values: output.values,
    }
}
