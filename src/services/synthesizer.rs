//! Trace synthesizer: converts a terminated, successful run log into a
//! canonical replayable trace.
//!
//! Synthesis is conservative. A failed, empty, or ambiguous log produces
//! nothing (a silent no-op, not an error): a run that cannot be replayed
//! deterministically must never become a trace.

use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use crate::domain::errors::{TraceError, TraceResult};
use crate::domain::models::{
    ErrorPolicy, ExecutionTrace, ParamValue, RunLog, Step, ValidationCheck,
};

/// Synthesizer tunables.
#[derive(Debug, Clone)]
pub struct SynthesizerConfig {
    /// Upper bound on the seed confidence of a new trace.
    pub seed_confidence_cap: f64,
    /// Default retry count assigned to synthesized steps.
    pub retry_count: u32,
    /// Default retry delay assigned to synthesized steps, milliseconds.
    pub retry_delay_ms: u64,
}

impl Default for SynthesizerConfig {
    fn default() -> Self {
        Self {
            seed_confidence_cap: 0.75,
            retry_count: 2,
            retry_delay_ms: 1000,
        }
    }
}

/// Converts run logs into traces.
#[derive(Debug, Clone, Default)]
pub struct TraceSynthesizer {
    config: SynthesizerConfig,
}

impl TraceSynthesizer {
    pub fn new(config: SynthesizerConfig) -> Self {
        Self { config }
    }

    /// Synthesize a trace from a terminated run.
    ///
    /// Returns `Ok(None)` when the run is not synthesizable: failed
    /// outcome, empty log, unnamed tools, no successful actions, or an
    /// ambiguous output reference. A dependency graph that somehow forms
    /// a cycle is rejected loudly as [`TraceError::TraceCorrupt`], never
    /// silently repaired.
    pub fn synthesize(
        &self,
        goal: &str,
        log: &RunLog,
        success: bool,
    ) -> TraceResult<Option<ExecutionTrace>> {
        if !success || log.is_empty() {
            return Ok(None);
        }
        if log.iter().any(|r| r.tool_name.trim().is_empty()) {
            tracing::debug!(goal, "log has unnamed tool invocations, skipping synthesis");
            return Ok(None);
        }

        // Only successful actions become steps; failed attempts the engine
        // recovered from are noise, but they lower the quality score.
        let clean: Vec<_> = log.iter().filter(|r| r.success).collect();
        if clean.is_empty() {
            return Ok(None);
        }

        let ids: Vec<Uuid> = clean.iter().map(|_| Uuid::new_v4()).collect();
        let mut steps: Vec<Step> = Vec::with_capacity(clean.len());

        for (i, record) in clean.iter().enumerate() {
            let mut step = Step {
                id: ids[i],
                tool_name: record.tool_name.clone(),
                parameters: Default::default(),
                validations: vec![ValidationCheck::ToolSucceeded],
                error_policy: ErrorPolicy::Retry {
                    count: self.config.retry_count,
                    delay_ms: self.config.retry_delay_ms,
                },
                depends_on: Default::default(),
            };

            for (key, value) in &record.parameters {
                match Self::find_producer(&clean[..i], value) {
                    ProducerMatch::None => {
                        step.parameters.insert(key.clone(), ParamValue::Literal(value.clone()));
                    }
                    ProducerMatch::One(j) => {
                        step.parameters.insert(key.clone(), ParamValue::OutputOf(ids[j]));
                        step.depends_on.insert(ids[j]);
                    }
                    ProducerMatch::Ambiguous => {
                        tracing::debug!(
                            goal,
                            parameter = key.as_str(),
                            "ambiguous output reference, skipping synthesis"
                        );
                        return Ok(None);
                    }
                }
            }

            steps.push(step);
        }

        // Steps whose output is consumed downstream must produce something.
        let referenced: HashSet<Uuid> = steps.iter().flat_map(|s| s.referenced_steps()).collect();
        for step in &mut steps {
            if referenced.contains(&step.id) {
                step.validations.push(ValidationCheck::ResultNonEmpty);
            }
        }

        // Inference only creates backward edges, but the invariant is
        // load-bearing: check explicitly and reject rather than repair.
        if let Some(cycle) = detect_cycle(&steps) {
            return Err(TraceError::TraceCorrupt(format!(
                "synthesized step graph contains a cycle: {}",
                cycle.iter().map(Uuid::to_string).collect::<Vec<_>>().join(" -> ")
            )));
        }

        let quality = self.quality_score(log.len(), &clean);
        let seed = quality.min(self.config.seed_confidence_cap);
        let estimated = log.duration_secs().max(1.0);

        let trace = ExecutionTrace::new(goal, steps, seed, estimated);
        trace.validate()?;

        tracing::info!(
            goal,
            trace_id = %trace.id,
            steps = trace.steps.len(),
            confidence = trace.confidence,
            "synthesized new trace"
        );
        Ok(Some(trace))
    }

    /// Quality from log completeness and cleanliness: the fraction of
    /// actions that succeeded, weighted by how many of those produced a
    /// usable result.
    fn quality_score(&self, total: usize, clean: &[&crate::domain::models::ActionRecord]) -> f64 {
        let cleanliness = clean.len() as f64 / total as f64;
        let with_result = clean.iter().filter(|r| !r.result.is_null()).count();
        let completeness = with_result as f64 / clean.len() as f64;
        cleanliness * (0.5 + 0.5 * completeness)
    }

    /// Find which earlier record produced `value`.
    fn find_producer(
        earlier: &[&crate::domain::models::ActionRecord],
        value: &serde_json::Value,
    ) -> ProducerMatch {
        if Self::is_trivial(value) {
            return ProducerMatch::None;
        }
        let matches: Vec<usize> = earlier
            .iter()
            .enumerate()
            .filter(|(_, r)| &r.result == value)
            .map(|(j, _)| j)
            .collect();
        match matches.len() {
            0 => ProducerMatch::None,
            1 => ProducerMatch::One(matches[0]),
            _ => ProducerMatch::Ambiguous,
        }
    }

    /// Values too generic to be meaningful output references.
    fn is_trivial(value: &serde_json::Value) -> bool {
        match value {
            serde_json::Value::Null | serde_json::Value::Bool(_) => true,
            serde_json::Value::String(s) => s.is_empty(),
            serde_json::Value::Array(a) => a.is_empty(),
            serde_json::Value::Object(o) => o.is_empty(),
            serde_json::Value::Number(_) => false,
        }
    }
}

enum ProducerMatch {
    None,
    One(usize),
    Ambiguous,
}

/// DFS cycle detection over the step graph. Returns the cycle path when
/// one exists.
fn detect_cycle(steps: &[Step]) -> Option<Vec<Uuid>> {
    let graph: HashMap<Uuid, Vec<Uuid>> = steps
        .iter()
        .map(|s| (s.id, s.depends_on.iter().copied().collect()))
        .collect();

    let mut visited = HashSet::new();
    let mut rec_stack = HashSet::new();
    let mut path = Vec::new();

    for &start in graph.keys() {
        if !visited.contains(&start)
            && visit(start, &graph, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(path);
        }
    }
    None
}

fn visit(
    node: Uuid,
    graph: &HashMap<Uuid, Vec<Uuid>>,
    visited: &mut HashSet<Uuid>,
    rec_stack: &mut HashSet<Uuid>,
    path: &mut Vec<Uuid>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(&node) {
        for &neighbor in neighbors {
            if !visited.contains(&neighbor) {
                if visit(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(&neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(&node);
    path.pop();
    false
}
