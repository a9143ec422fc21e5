//! Default capability scorer.
//!
//! Pure ranking over skill/language overlap with the task's tags. Agents
//! that share nothing with the task are still eligible at a floor score so
//! a generalist fleet keeps working; scoring only orders preference.

use super::{CapabilityScorer, RankedCandidate};
use crate::models::agent::{Agent, AgentRole};
use crate::models::task::Task;

/// Score given to an eligible agent with no tag overlap.
const BASE_SCORE: f64 = 0.5;
/// Bonus per matching skill or language tag.
const MATCH_BONUS: f64 = 0.25;

/// Skill-overlap [`CapabilityScorer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SkillScorer;

impl CapabilityScorer for SkillScorer {
    fn rank(&self, task: &Task, agents: &[Agent]) -> Vec<RankedCandidate> {
        let mut ranked: Vec<RankedCandidate> = agents
            .iter()
            .map(|agent| {
                let eligible = agent.active && agent.role == AgentRole::Worker;
                let matches = task
                    .tags
                    .iter()
                    .filter(|tag| {
                        agent
                            .capabilities
                            .skills
                            .iter()
                            .chain(agent.capabilities.languages.iter())
                            .any(|have| have.eq_ignore_ascii_case(tag))
                    })
                    .count();
                #[allow(clippy::cast_precision_loss)] // tag counts are tiny
                let score = if eligible {
                    (BASE_SCORE + MATCH_BONUS * matches as f64).min(1.0)
                } else {
                    0.0
                };
                RankedCandidate {
                    agent: agent.clone(),
                    score,
                    eligible,
                }
            })
            .collect();

        // Stable order: best score first, then agent id for determinism.
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.agent.id.cmp(&b.agent.id))
        });
        ranked
    }
}
