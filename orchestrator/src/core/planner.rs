//! Branch planning: which stages run after a stage finishes.

use tracing::{debug, info};

use crate::core::descriptor::Registry;
use crate::core::prereq::{ArtifactProbe, Readiness, Resolver};
use crate::core::run_state::RunState;
use crate::core::types::Outcome;

/// Edge-following planner for one run.
pub struct Planner<'a, P: ArtifactProbe> {
    registry: &'a Registry,
    resolver: &'a Resolver<'a, P>,
    /// Reserved for the safety governor; never scheduled from an edge.
    terminal: &'a str,
}

impl<'a, P: ArtifactProbe> Planner<'a, P> {
    pub fn new(registry: &'a Registry, resolver: &'a Resolver<'a, P>, terminal: &'a str) -> Self {
        Self {
            registry,
            resolver,
            terminal,
        }
    }

    /// Candidates reachable from `finished` for `outcome`, filtered to
    /// registered, unsettled, runnable stages.
    pub fn next_stages(&self, finished: &str, outcome: Outcome, state: &RunState) -> Vec<String> {
        let Some(descriptor) = self.registry.get(finished) else {
            debug!(stage = %finished, "finished stage not in registry, no edges");
            return Vec::new();
        };
        let mut next = Vec::new();
        for candidate in descriptor.edges(outcome, self.terminal) {
            if self.admissible(&candidate, state) && !next.contains(&candidate) {
                next.push(candidate);
            }
        }
        debug!(stage = %finished, ?outcome, next = ?next, "planned next stages");
        next
    }

    /// Merge the plans of every stage finished in one wave, keeping the first
    /// occurrence of each candidate.
    pub fn next_wave<'s, I>(&self, finished: I, state: &RunState) -> Vec<String>
    where
        I: IntoIterator<Item = (&'s str, Outcome)>,
    {
        let mut wave: Vec<String> = Vec::new();
        for (stage, outcome) in finished {
            for candidate in self.next_stages(stage, outcome, state) {
                if !wave.contains(&candidate) {
                    wave.push(candidate);
                }
            }
        }
        wave
    }

    /// Filter an explicit stage list (initial wave) the same way edges are filtered.
    pub fn admit_initial(&self, stages: &[String], state: &RunState) -> Vec<String> {
        let mut wave: Vec<String> = Vec::new();
        for stage in stages {
            if self.admissible(stage, state) && !wave.contains(stage) {
                wave.push(stage.clone());
            }
        }
        wave
    }

    /// Stages that would be dispatched next when resuming: walk edges of
    /// settled stages from `initial` until reaching unsettled ones.
    pub fn resume_frontier(&self, initial: &[String], state: &RunState) -> Vec<String> {
        let mut frontier: Vec<String> = Vec::new();
        let mut visited: Vec<String> = Vec::new();
        let mut queue: Vec<String> = initial.to_vec();

        while !queue.is_empty() {
            let stage = queue.remove(0);
            if visited.contains(&stage) {
                continue;
            }
            visited.push(stage.clone());

            let outcome = if state.is_completed(&stage) {
                Some(Outcome::Success)
            } else if state.is_failed(&stage) {
                Some(Outcome::Failure)
            } else {
                None
            };
            match outcome {
                Some(outcome) => {
                    if let Some(descriptor) = self.registry.get(&stage) {
                        queue.extend(descriptor.edges(outcome, self.terminal));
                    }
                }
                None => {
                    if self.admissible(&stage, state) && !frontier.contains(&stage) {
                        frontier.push(stage);
                    }
                }
            }
        }
        frontier
    }

    fn admissible(&self, candidate: &str, state: &RunState) -> bool {
        if candidate == self.terminal {
            debug!(stage = %candidate, "terminal stage deferred to end of run");
            return false;
        }
        let Some(descriptor) = self.registry.get(candidate) else {
            info!(stage = %candidate, "stage not in registry, skipping");
            return false;
        };
        if state.is_settled(candidate) {
            debug!(stage = %candidate, "stage already settled, skipping");
            return false;
        }
        match self.resolver.readiness(descriptor, state) {
            Readiness::Runnable => true,
            Readiness::Unmet { missing } => {
                info!(stage = %candidate, missing = %missing, "prerequisites not met, skipping");
                false
            }
        }
    }
}
