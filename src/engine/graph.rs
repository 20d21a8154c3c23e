//! Pipeline graph validation.
//!
//! The dataflow is `Partition → Sample → Reduce`. Before a run starts the
//! graph must be acyclic and connected, and the reducer may only consume
//! sampler output. The graph also issues run ids so that every run gets a
//! fresh [`AggregateState`]; a state carried over from an earlier run is
//! rejected as corruption.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::engine::reducer::AggregateState;
use crate::error::{EstimateError, EstimateResult};

/// Stage of the estimation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Work partitioner (source).
    Partition,
    /// Scheduler and sampler lanes.
    Sample,
    /// Reducer (sink).
    Reduce,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Partition => write!(f, "partition"),
            Self::Sample => write!(f, "sample"),
            Self::Reduce => write!(f, "reduce"),
        }
    }
}

const ALL_STAGES: [Stage; 3] = [Stage::Partition, Stage::Sample, Stage::Reduce];

/// Composed dataflow graph plus the run ledger.
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    edges: BTreeSet<(Stage, Stage)>,
    /// Id of the most recently started run (0 = none yet).
    current_run: u64,
}

impl Default for PipelineGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl PipelineGraph {
    /// The standard `Partition → Sample → Reduce` pipeline.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .with_edge(Stage::Partition, Stage::Sample)
            .with_edge(Stage::Sample, Stage::Reduce)
    }

    /// A graph with the three stages and no edges.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            edges: BTreeSet::new(),
            current_run: 0,
        }
    }

    /// Add an edge `from → to`.
    #[must_use]
    pub fn with_edge(mut self, from: Stage, to: Stage) -> Self {
        self.edges.insert((from, to));
        self
    }

    /// Edges of the graph in a stable order.
    pub fn edges(&self) -> impl Iterator<Item = (Stage, Stage)> + '_ {
        self.edges.iter().copied()
    }

    /// Id of the most recently started run.
    #[must_use]
    pub const fn current_run(&self) -> u64 {
        self.current_run
    }

    /// Check the graph is acyclic, connected from `Partition`, and that
    /// `Reduce` depends on `Sample` only.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` describing the first violated rule.
    pub fn validate(&self) -> EstimateResult<()> {
        self.topological_order()?;

        let reduce_inputs: Vec<Stage> = self
            .edges
            .iter()
            .filter(|(_, to)| *to == Stage::Reduce)
            .map(|(from, _)| *from)
            .collect();
        if reduce_inputs != [Stage::Sample] {
            return Err(EstimateError::corruption(format!(
                "reduce must depend on sample only, found inputs {reduce_inputs:?}"
            )));
        }

        let reachable = self.reachable_from(Stage::Partition);
        if let Some(missing) = ALL_STAGES.iter().find(|s| !reachable.contains(s)) {
            return Err(EstimateError::corruption(format!(
                "stage {missing} is not reachable from partition"
            )));
        }

        Ok(())
    }

    /// Stages in dependency order (Kahn's algorithm).
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if the graph has a cycle.
    pub fn topological_order(&self) -> EstimateResult<Vec<Stage>> {
        let mut in_degree: BTreeMap<Stage, usize> = ALL_STAGES.iter().map(|s| (*s, 0)).collect();
        for (_, to) in &self.edges {
            *in_degree.entry(*to).or_default() += 1;
        }

        let mut ready: VecDeque<Stage> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(s, _)| *s)
            .collect();
        let mut order = Vec::with_capacity(ALL_STAGES.len());

        while let Some(stage) = ready.pop_front() {
            order.push(stage);
            for (_, to) in self.edges.iter().filter(|(from, _)| *from == stage) {
                if let Some(d) = in_degree.get_mut(to) {
                    *d -= 1;
                    if *d == 0 {
                        ready.push_back(*to);
                    }
                }
            }
        }

        if order.len() != in_degree.len() {
            let stuck: Vec<String> = in_degree
                .keys()
                .filter(|s| !order.contains(s))
                .map(ToString::to_string)
                .collect();
            return Err(EstimateError::corruption(format!(
                "cycle through stages [{}]",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    fn reachable_from(&self, start: Stage) -> BTreeSet<Stage> {
        let mut seen = BTreeSet::from([start]);
        let mut frontier = vec![start];
        while let Some(stage) = frontier.pop() {
            for (_, to) in self.edges.iter().filter(|(from, _)| *from == stage) {
                if seen.insert(*to) {
                    frontier.push(*to);
                }
            }
        }
        seen
    }

    /// Validate the graph and open a new run with a fresh aggregate state.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if the graph is invalid.
    pub fn begin_run(&mut self, expected_task_count: u64) -> EstimateResult<AggregateState> {
        self.validate()?;
        self.current_run += 1;
        tracing::debug!(run_id = self.current_run, expected_task_count, "opened run");
        Ok(AggregateState::new(self.current_run, expected_task_count))
    }

    /// Check a state was issued for the current run and is untouched.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if the state is stale or already written.
    pub fn check_fresh(&self, state: &AggregateState) -> EstimateResult<()> {
        if self.current_run == 0 {
            return Err(EstimateError::corruption("no run has been opened on this graph"));
        }
        if state.run_id() != self.current_run {
            return Err(EstimateError::corruption(format!(
                "aggregate state belongs to run {} but run {} is current",
                state.run_id(),
                self.current_run
            )));
        }
        if !state.is_pristine() {
            return Err(EstimateError::corruption(format!(
                "aggregate state for run {} already holds {} result(s)",
                state.run_id(),
                state.completed_task_count()
            )));
        }
        Ok(())
    }
}
