//! Goal resolution: initial stages, required inputs, expected outputs.

use std::collections::BTreeMap;
use std::fmt;

use tracing::info;

use crate::io::config::OrchestratorConfig;

/// A goal's required inputs were neither supplied nor always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingGoalInputs {
    pub goal: String,
    pub missing: Vec<String>,
}

impl fmt::Display for MissingGoalInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "goal '{}' requires inputs that were not supplied: {} (pass --input <name>=<value>)",
            self.goal,
            self.missing.join(", ")
        )
    }
}

impl std::error::Error for MissingGoalInputs {}

/// What a run needs to know about its goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalPlan {
    pub goal: String,
    pub initial_stages: Vec<String>,
    pub expected_outputs: Vec<String>,
}

impl GoalPlan {
    /// Resolve `goal` against the configuration. Stages named on the command
    /// line replace the goal's initial stages.
    pub fn resolve(
        config: &OrchestratorConfig,
        goal: &str,
        cli_stages: &[String],
        explicit_inputs: &BTreeMap<String, String>,
    ) -> Result<Self, MissingGoalInputs> {
        let goal_config = config.goals.get(goal);
        if goal_config.is_none() {
            info!(goal = %goal, entry = %config.entry_stage, "unknown goal, starting at entry stage");
        }

        let missing: Vec<String> = goal_config
            .map(|g| g.required_inputs.as_slice())
            .unwrap_or_default()
            .iter()
            .filter(|input| {
                !explicit_inputs.contains_key(input.as_str())
                    && !config.always_present_inputs.contains(input)
            })
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(MissingGoalInputs {
                goal: goal.to_string(),
                missing,
            });
        }

        let initial_stages = if cli_stages.is_empty() {
            config.initial_stages(goal)
        } else {
            cli_stages.to_vec()
        };
        Ok(Self {
            goal: goal.to_string(),
            initial_stages,
            expected_outputs: goal_config
                .map(|g| g.expected_outputs.clone())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::GoalConfig;

    fn config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.always_present_inputs = vec!["region".to_string()];
        config.goals.insert(
            "wells".to_string(),
            GoalConfig {
                description: "wells only".to_string(),
                initial_stages: vec!["curve-smith".to_string(), "drillcast".to_string()],
                required_inputs: vec!["region".to_string(), "las_files".to_string()],
                expected_outputs: vec!["qc_report.md".to_string()],
            },
        );
        config
    }

    #[test]
    fn missing_required_inputs_are_reported() {
        let err = GoalPlan::resolve(&config(), "wells", &[], &BTreeMap::new()).unwrap_err();
        assert_eq!(err.missing, vec!["las_files"]);
        assert!(err.to_string().contains("las_files"));
    }

    #[test]
    fn goal_initial_stages_unless_overridden() {
        let inputs = BTreeMap::from([("las_files".to_string(), "/w".to_string())]);
        let plan = GoalPlan::resolve(&config(), "wells", &[], &inputs).expect("plan");
        assert_eq!(plan.initial_stages, vec!["curve-smith", "drillcast"]);
        assert_eq!(plan.expected_outputs, vec!["qc_report.md"]);

        let plan = GoalPlan::resolve(&config(), "wells", &["titletracker".to_string()], &inputs)
            .expect("plan");
        assert_eq!(plan.initial_stages, vec!["titletracker"]);
    }

    #[test]
    fn unknown_goal_starts_at_entry_stage() {
        let plan = GoalPlan::resolve(&config(), "whatever", &[], &BTreeMap::new()).expect("plan");
        assert_eq!(plan.initial_stages, vec!["geowiz"]);
        assert!(plan.expected_outputs.is_empty());
    }
}
