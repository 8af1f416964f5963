use rand::prelude::SliceRandom;

use crate::types::{CellIndex, CellValue, Constraint, FixedValues, Shape};
use crate::value_set::ValueSet;

use super::candidate_selector::CandidateSelector;
use super::cell_exclusions::CellExclusions;
use super::debug_log::{DebugLogger, DebugRecord};
use super::handler_accumulator::HandlerAccumulator;
use super::handlers::{self, HandlerSet};
use super::{
    Config, Counters, ProgressCallback, ProgressUpdate, RunToken, SolverError, SolverOutput,
    StepGuides, StepState, YieldMode,
};

// Every 2^14 branches the trigger histogram is halved, so stale
// contradictions stop dominating the cell scores.
const BACKTRACK_DECAY_MASK: u64 = (1 << 14) - 1;

/// The search driver: an explicit-stack depth-first search over the grid
/// stack, producing a lazy stream of solutions, steps and contradictions.
///
/// The recursion stack holds cell depths (the number of decided cells on
/// the path), not frames; the grid frame for a node is the stack length at
/// the time it is popped. Guesses copy the current frame up; singleton
/// chains reuse it in place.
pub struct Engine {
    shape: Shape,
    num_cells: usize,
    started: bool,
    done: bool,
    run_counter: u64,
    yield_mode: YieldMode,
    fixed_values: FixedValues,
    rec_stack: Vec<usize>,
    grid_stack: Vec<ValueSet>,
    full_cell: ValueSet,
    handler_set: HandlerSet,
    cell_exclusions: CellExclusions,
    accumulator: HandlerAccumulator,
    selector: CandidateSelector,
    cell_priorities: Vec<u32>,
    backtrack_triggers: Vec<u32>,
    remaining_stack: Vec<f64>,
    last_contradiction_cell: Vec<Option<CellIndex>>,
    uninteresting_values: Option<Vec<ValueSet>>,
    step_state: Option<StepState>,
    new_node: bool,
    iteration_counter: u64,
    sample_solution: Option<Vec<CellValue>>,
    counters: Counters,
    progress_metadata: ProgressMetadata,
    debug_log: DebugLogger,
}

impl Engine {
    pub fn new(constraint: &Constraint, config: Config) -> Engine {
        let (handler_set, cell_exclusions) = handlers::make_handlers(constraint);
        Engine::with_handler_set(constraint, handler_set, cell_exclusions, config)
    }

    /// Build an engine over an externally-assembled handler set.
    pub fn with_handler_set(
        constraint: &Constraint,
        handler_set: HandlerSet,
        cell_exclusions: CellExclusions,
        mut config: Config,
    ) -> Engine {
        let shape = &constraint.shape;
        assert!(shape.num_values <= ValueSet::BITS as u32);
        let num_cells = shape.num_cells;

        let accumulator = HandlerAccumulator::new(num_cells, &handler_set);
        let houses = handler_set
            .house_cells()
            .map(|cells| cells.to_vec())
            .collect();
        let mut selector = CandidateSelector::new(num_cells, houses);
        if let Some(rng) = &mut config.search_randomizer {
            let mut cell_order = (0..num_cells).collect::<Vec<_>>();
            cell_order.shuffle(rng);
            selector.set_initial_cell_order(cell_order);
        }

        let cell_priorities = handler_set.cell_priorities(num_cells);
        let progress_metadata =
            ProgressMetadata::new(&mut config.progress_callback, config.progress_log_frequency);

        let mut new = Engine {
            shape: *shape,
            num_cells,
            started: false,
            done: false,
            run_counter: 0,
            yield_mode: YieldMode::OnSolution,
            fixed_values: constraint.fixed_values.clone(),
            rec_stack: Vec::with_capacity(num_cells),
            grid_stack: vec![ValueSet::empty(); (num_cells + 1) * num_cells],
            full_cell: ValueSet::full(shape.num_values),
            handler_set,
            cell_exclusions,
            accumulator,
            selector,
            backtrack_triggers: cell_priorities.clone(),
            cell_priorities,
            remaining_stack: vec![0.0; num_cells + 1],
            last_contradiction_cell: vec![None; num_cells + 1],
            uninteresting_values: None,
            step_state: None,
            new_node: false,
            iteration_counter: 0,
            sample_solution: None,
            counters: Counters::default(),
            progress_metadata,
            debug_log: DebugLogger::new(config.debug_sink.take()),
        };
        new.reset_search();
        new
    }

    /// Begin a new run. Any iterator from a previous run is invalidated.
    pub fn start_run(&mut self, yield_mode: YieldMode) -> RunToken {
        self.run_counter += 1;
        self.yield_mode = yield_mode;
        self.step_state = None;
        self.reset_search();
        RunToken {
            counter: self.run_counter,
        }
    }

    /// Begin a step-mode run, with user overrides for specific steps.
    pub fn start_step_run(&mut self, guides: StepGuides) -> RunToken {
        let token = self.start_run(YieldMode::OnStep);
        self.step_state = Some(StepState {
            step: 0,
            old_grid: Vec::new(),
            guides,
        });
        token
    }

    /// Advance the run identified by `token` to its next event.
    pub fn next_event(&mut self, token: &RunToken) -> Result<Option<SolverOutput>, SolverError> {
        if token.counter != self.run_counter {
            return Err(SolverError::StaleIterator);
        }
        Ok(self.run())
    }

    /// Replace the givens used by the next run.
    pub fn reset_fixed_values(&mut self, fixed_values: FixedValues) {
        self.fixed_values = fixed_values;
    }

    /// Per-cell masks of values already witnessed in solutions; branches
    /// that cannot add a novel value are skipped.
    pub fn set_uninteresting_values(&mut self, values: Vec<ValueSet>) {
        assert_eq!(values.len(), self.num_cells);
        self.uninteresting_values = Some(values);
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    pub fn house_cell_lists(&self) -> Vec<Vec<CellIndex>> {
        self.handler_set
            .house_cells()
            .map(|cells| cells.to_vec())
            .collect()
    }

    pub fn cell_exclusions(&self) -> &CellExclusions {
        &self.cell_exclusions
    }

    /// Write the trigger histogram to the debug sink. Panics if logging
    /// is disabled, like any other debug-log call.
    pub fn dump_backtrack_triggers(&mut self) {
        self.debug_log
            .dump_backtrack_triggers(&self.backtrack_triggers);
    }

    fn reset_search(&mut self) {
        self.started = false;
        self.done = false;
        self.rec_stack.clear();
        self.accumulator.clear();
        self.selector.reset();
        self.backtrack_triggers.copy_from_slice(&self.cell_priorities);
        self.remaining_stack.fill(0.0);
        self.last_contradiction_cell.fill(None);
        self.uninteresting_values = None;
        self.iteration_counter = 0;
        self.new_node = false;
        self.sample_solution = None;

        // These counters are confusing when aggregated across runs.
        self.counters.progress_ratio = 0.0;
        self.counters.branches_ignored = 0.0;
        self.counters.solutions = 0;
    }

    fn run(&mut self) -> Option<SolverOutput> {
        if self.done {
            return None;
        }
        let num_cells = self.num_cells;

        if !self.started {
            self.started = true;
            self.maybe_call_progress();

            let ok = self.initialize_grid();
            if ok {
                self.rec_stack.push(0);
                self.remaining_stack[0] = 1.0;
                self.new_node = true;
            } else {
                // Unsatisfiable from the start: nothing left to search.
                self.counters.progress_ratio = 1.0;
            }
            self.maybe_call_progress();

            if self.step_state.is_some() {
                // The first step shows the grid after setup, with no diff.
                let snapshot = self.grid_stack[..num_cells].to_vec();
                if let Some(state) = &mut self.step_state {
                    state.old_grid = snapshot;
                }
                return Some(self.make_output(0, 0, ValueSet::empty(), false, !ok));
            }
        }

        while let Some(cell_depth) = self.rec_stack.pop() {
            let depth = self.rec_stack.len();
            let is_new_node = self.new_node;
            self.new_node = false;

            // All cells decided: this frame is a solution.
            if cell_depth == num_cells {
                if !is_new_node {
                    continue;
                }
                self.counters.solutions += 1;
                self.counters.progress_ratio += self.remaining_stack[depth];
                self.store_sample_solution(depth);
                if self.debug_log.enabled() {
                    self.debug_log.log(&DebugRecord {
                        loc: "engine::run",
                        msg: "solution found",
                        cells: &[],
                    });
                }
                self.maybe_call_progress();
                return Some(self.make_output(depth, num_cells, ValueSet::empty(), true, false));
            }

            if is_new_node {
                self.counters.cells_searched += 1;
            }

            let start = depth * num_cells;
            let selection = self.selector.select_next_candidate(
                cell_depth,
                &self.grid_stack[start..start + num_cells],
                &self.backtrack_triggers,
                self.step_state.as_ref(),
                is_new_node,
            );

            // This node has no branches left.
            if selection.count == 0 {
                continue;
            }

            // Split the remaining progress of this node evenly over the
            // sibling branches; each visit takes one share.
            let delta = self.remaining_stack[depth] / selection.count as f64;
            self.remaining_stack[depth] -= delta;

            self.counters.values_tried += selection.batch_size as u64;
            self.iteration_counter += 1;
            if self.iteration_counter & BACKTRACK_DECAY_MASK == 0 {
                for bt in &mut self.backtrack_triggers {
                    *bt >>= 1;
                }
            }

            let branched_cell = self.selector.cell_order()[cell_depth];

            let child_depth = if selection.count > 1 {
                // A guess: keep this frame for the remaining siblings and
                // work on a copy. The tried value is cleared here so the
                // return visit starts from the untried remainder.
                self.counters.guesses += 1;
                self.push_grid_onto_stack(depth);
                self.grid_cell_mut(depth, branched_cell)
                    .remove_set(selection.value);
                self.rec_stack.push(cell_depth);
                depth + 1
            } else {
                depth
            };

            let old_values = *self.grid_cell_mut(child_depth, branched_cell);
            *self.grid_cell_mut(child_depth, branched_cell) = selection.value;

            let next_cell_depth = cell_depth + selection.batch_size;
            let grid_complete = next_cell_depth == num_cells;
            for i in 0..selection.batch_size {
                let cell = self.selector.cell_order()[cell_depth + i];
                self.accumulator.add_for_fixed_cell(cell);
                if !grid_complete {
                    self.accumulator.add_aux_for_cell(cell);
                }
                self.accumulator.add_for_cell(cell);
            }

            // The cell that contradicted a sibling branch is likely to
            // contradict this one; check it early.
            if let Some(cell) = self.last_contradiction_cell[cell_depth] {
                self.accumulator.add_for_cell(cell);
                if selection.count == 1 {
                    self.last_contradiction_cell[cell_depth] = None;
                }
            }

            let start = child_depth * num_cells;
            let propagated = handlers::enforce_constraints(
                &mut self.grid_stack[start..start + num_cells],
                grid_complete,
                &mut self.accumulator,
                &mut self.handler_set,
                &mut self.counters,
            );

            if propagated.is_err() {
                self.last_contradiction_cell[cell_depth] = Some(branched_cell);
                self.counters.backtracks += 1;
                self.backtrack_triggers[branched_cell] += 1;
                self.counters.progress_ratio += delta;
                if self.debug_log.enabled() {
                    let msg = format!("contradiction on cell {branched_cell}");
                    self.debug_log.log(&DebugRecord {
                        loc: "engine::run",
                        msg: &msg,
                        cells: &[branched_cell],
                    });
                }
                match self.yield_mode {
                    YieldMode::OnStep => {
                        return Some(self.make_output(
                            child_depth,
                            cell_depth + 1,
                            old_values,
                            false,
                            true,
                        ));
                    }
                    YieldMode::OnContradiction(every) => {
                        if self.counters.backtracks % every == 0 {
                            return Some(self.make_output(
                                child_depth,
                                cell_depth + 1,
                                old_values,
                                false,
                                true,
                            ));
                        }
                    }
                    YieldMode::OnSolution => {}
                }
                continue;
            }

            self.maybe_call_progress_throttled();

            self.remaining_stack[child_depth] = delta;
            let pruned = match &self.uninteresting_values {
                Some(uninteresting) => self.grid_stack[start..start + num_cells]
                    .iter()
                    .zip(uninteresting)
                    .all(|(cell, seen)| {
                        let mut novel = *cell;
                        novel.remove_set(*seen);
                        novel.is_empty()
                    }),
                None => false,
            };
            if pruned {
                self.counters.branches_ignored += delta;
            } else {
                self.rec_stack.push(next_cell_depth);
                self.new_node = true;
            }

            if matches!(self.yield_mode, YieldMode::OnStep) {
                return Some(self.make_output(child_depth, cell_depth + 1, old_values, false, false));
            }
        }

        self.done = true;
        self.maybe_call_progress();
        None
    }

    fn initialize_grid(&mut self) -> bool {
        let num_cells = self.num_cells;

        self.grid_stack[..num_cells].fill(self.full_cell);
        for (cell, value) in &self.fixed_values {
            self.grid_stack[*cell] = ValueSet::from_index(value.index());
        }

        let shape = self.shape;
        let initialized = handlers::initialize_handlers(
            &mut self.handler_set,
            &mut self.grid_stack[..num_cells],
            &mut self.cell_exclusions,
            &shape,
        );

        // Run every handler once to reach the first fixpoint.
        for cell in 0..num_cells {
            self.accumulator.add_for_cell(cell);
        }
        let drained = handlers::enforce_constraints(
            &mut self.grid_stack[..num_cells],
            false,
            &mut self.accumulator,
            &mut self.handler_set,
            &mut self.counters,
        )
        .is_ok();

        initialized && drained
    }

    #[inline]
    fn frame(&self, depth: usize) -> &[ValueSet] {
        let start = depth * self.num_cells;
        &self.grid_stack[start..start + self.num_cells]
    }

    #[inline]
    fn grid_cell_mut(&mut self, depth: usize, cell: CellIndex) -> &mut ValueSet {
        &mut self.grid_stack[depth * self.num_cells + cell]
    }

    // Copy the frame at `depth` over the frame at `depth + 1`. Frames live
    // in one contiguous buffer, so this is a single slice copy.
    fn push_grid_onto_stack(&mut self, depth: usize) {
        let num_cells = self.num_cells;
        let (front, back) = self.grid_stack.split_at_mut((depth + 1) * num_cells);
        back[..num_cells].copy_from_slice(&front[depth * num_cells..]);
    }

    fn store_sample_solution(&mut self, depth: usize) {
        if !self.progress_metadata.is_active() {
            return;
        }
        self.sample_solution = Some(grid_to_solution(self.frame(depth)));
    }

    fn make_output(
        &mut self,
        depth: usize,
        order_len: usize,
        values: ValueSet,
        is_solution: bool,
        has_contradiction: bool,
    ) -> SolverOutput {
        let grid = self.frame(depth).to_vec();
        let cell_order = self.selector.cell_order()[..order_len].to_vec();

        let old_grid = match &mut self.step_state {
            Some(state) => {
                let old = std::mem::replace(&mut state.old_grid, grid.clone());
                state.step += 1;
                Some(old)
            }
            None => None,
        };

        SolverOutput {
            grid,
            old_grid,
            cell_order,
            values,
            is_solution,
            has_contradiction,
        }
    }

    fn maybe_call_progress(&mut self) {
        self.progress_metadata
            .call(&self.counters, self.sample_solution.as_deref());
    }

    fn maybe_call_progress_throttled(&mut self) {
        self.progress_metadata.call_throttled(
            self.iteration_counter,
            &self.counters,
            self.sample_solution.as_deref(),
        );
    }
}

pub fn grid_to_solution(grid: &[ValueSet]) -> Vec<CellValue> {
    grid.iter()
        .map(|vs| {
            CellValue::from_index(
                vs.value()
                    .unwrap_or_else(|| panic!("unresolved cell in solution: {vs:?}")),
            )
        })
        .collect()
}

struct ProgressMetadata {
    callback: Option<Box<ProgressCallback>>,
    frequency_mask: u64,
    next_check: u64,
}

impl ProgressMetadata {
    fn new(callback: &mut Option<Box<ProgressCallback>>, log_frequency: u32) -> ProgressMetadata {
        match callback {
            None => ProgressMetadata {
                callback: None,
                frequency_mask: u64::MAX,
                next_check: u64::MAX,
            },
            Some(_) => ProgressMetadata {
                callback: callback.take(),
                frequency_mask: (1u64 << log_frequency) - 1,
                next_check: 0,
            },
        }
    }

    fn is_active(&self) -> bool {
        self.callback.is_some()
    }

    #[inline]
    fn call_throttled(
        &mut self,
        progress_counter: u64,
        counters: &Counters,
        sample_solution: Option<&[CellValue]>,
    ) {
        if progress_counter > self.next_check {
            self.next_check = progress_counter | self.frequency_mask;
            self.call(counters, sample_solution);
        }
    }

    #[inline]
    fn call(&mut self, counters: &Counters, sample_solution: Option<&[CellValue]>) {
        if let Some(callback) = &mut self.callback {
            callback(&ProgressUpdate {
                counters,
                sample_solution,
            });
        }
    }
}
