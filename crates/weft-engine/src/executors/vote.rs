use futures::future::BoxFuture;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use weft_core::definition::{NodeConfig, NodeType, VoteConfig};
use weft_core::error::Result;
use weft_core::event::WorkflowEvent;
use weft_transform::path::lookup;
use weft_transform::value::display;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::config_mismatch;

/// Share comparisons tolerate float error so 3/5 meets a 0.6 threshold.
const EPSILON: f64 = 1e-9;

/// Tallies ballots against the configured options; the outcome doubles as
/// the output port.
pub struct VoteExecutor;

#[derive(Debug, Clone, PartialEq)]
struct Ballot {
    vote: String,
    voter: Option<String>,
    reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
struct Tally {
    outcome: String,
    counts: Vec<(String, usize)>,
    total: usize,
}

impl NodeExecutor for VoteExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Vote
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Vote(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Vote));
            };
            let ballots = collect_ballots(config, &ctx.primary_input());
            for ballot in &ballots {
                ctx.emit(WorkflowEvent::VoteCast {
                    node_id: ctx.node.id.clone(),
                    voter: ballot.voter.clone(),
                    vote: ballot.vote.clone(),
                    reason: ballot.reason.clone(),
                });
            }

            let result = tally(config, &ballots);
            let mut counts = Map::new();
            for (option, n) in &result.counts {
                counts.insert(option.clone(), Value::from(*n));
            }
            info!(
                node_id = %ctx.node.id,
                outcome = %result.outcome,
                total = result.total,
                "Vote tallied"
            );
            ctx.emit(WorkflowEvent::VoteTallied {
                node_id: ctx.node.id.clone(),
                outcome: result.outcome.clone(),
                tally: counts.clone(),
                total: result.total,
            });

            let votes: Vec<Value> = ballots
                .iter()
                .map(|b| json!({"vote": b.vote, "voter": b.voter, "reason": b.reason}))
                .collect();
            let output = json!({
                "outcome": result.outcome,
                "tally": counts,
                "total": result.total,
                "threshold": config.threshold,
                "votes": votes,
            });
            Ok(NodeOutcome::new(output).with_port(result.outcome))
        })
    }
}

/// Ballots whose vote is one of the configured options. A non-array input is
/// treated as a single record; string records are the vote itself.
fn collect_ballots(config: &VoteConfig, input: &Value) -> Vec<Ballot> {
    let records = match input {
        Value::Array(items) => items.clone(),
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    };
    let text = |record: &Value, field: &str| {
        lookup(record, field)
            .filter(|v| !v.is_null())
            .map(|v| display(&v))
    };

    let mut ballots = Vec::new();
    for record in &records {
        let ballot = match record {
            Value::String(s) => Ballot {
                vote: s.clone(),
                voter: None,
                reason: None,
            },
            Value::Object(_) => match text(record, &config.vote_field) {
                Some(vote) => Ballot {
                    vote,
                    voter: text(record, &config.voter_field),
                    reason: text(record, &config.reason_field),
                },
                None => continue,
            },
            _ => continue,
        };
        if config.vote_options.contains(&ballot.vote) {
            ballots.push(ballot);
        } else {
            debug!(vote = %ballot.vote, "Ignoring vote outside configured options");
        }
    }
    ballots
}

fn tally(config: &VoteConfig, ballots: &[Ballot]) -> Tally {
    let counts: Vec<(String, usize)> = config
        .vote_options
        .iter()
        .map(|option| (option.clone(), ballots.iter().filter(|b| &b.vote == option).count()))
        .collect();
    let total = ballots.len();
    let outcome = counts
        .iter()
        .find(|(_, n)| total > 0 && *n as f64 / total as f64 + EPSILON >= config.threshold)
        .map(|(option, _)| option.clone())
        .unwrap_or_else(|| config.default_outcome.clone());
    Tally {
        outcome,
        counts,
        total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::test_support::{node, run};

    fn votes(pass: usize, fail: usize) -> Value {
        let mut out = Vec::new();
        for i in 0..pass {
            out.push(json!({"vote": "pass", "voter": format!("p{}", i)}));
        }
        for i in 0..fail {
            out.push(json!({"vote": "fail", "voter": format!("f{}", i), "reason": "no"}));
        }
        Value::Array(out)
    }

    #[test]
    fn sixty_percent_meets_threshold() {
        let config = VoteConfig::new(&["pass", "fail"], 0.6);
        let result = tally(&config, &collect_ballots(&config, &votes(3, 2)));
        assert_eq!(result.outcome, "pass");
        assert_eq!(result.total, 5);
        assert_eq!(result.counts, vec![("pass".to_string(), 3), ("fail".to_string(), 2)]);
    }

    #[test]
    fn tie_falls_back_to_default() {
        let config = VoteConfig::new(&["pass", "fail"], 0.6);
        assert_eq!(tally(&config, &collect_ballots(&config, &votes(3, 3))).outcome, "queue");

        let mut custom = config.clone();
        custom.default_outcome = "escalate".into();
        assert_eq!(tally(&custom, &[]).outcome, "escalate");
    }

    #[test]
    fn ballots_accept_strings_custom_fields_and_ignore_unknown_options() {
        let mut config = VoteConfig::new(&["yes", "no"], 0.5);
        config.vote_field = "decision.value".into();
        config.voter_field = "who".into();
        let input = json!([
            "yes",
            {"decision": {"value": "no"}, "who": "bob"},
            {"decision": {"value": "maybe"}},
            42
        ]);
        let ballots = collect_ballots(&config, &input);
        assert_eq!(ballots.len(), 2);
        assert_eq!(ballots[1].voter.as_deref(), Some("bob"));

        let single = collect_ballots(&config, &json!({"decision": {"value": "yes"}}));
        assert_eq!(single.len(), 1);
    }

    #[tokio::test]
    async fn node_output_and_port() {
        let out = run(
            node("v", NodeType::Vote, json!({"voteOptions": ["pass", "fail"], "threshold": 0.6})),
            votes(3, 2),
        )
        .await
        .unwrap();
        assert_eq!(out.output_port.as_deref(), Some("pass"));
        assert_eq!(out.output["tally"], json!({"pass": 3, "fail": 2}));
        assert_eq!(out.output["total"], json!(5));
        assert_eq!(out.output["votes"].as_array().unwrap().len(), 5);
        assert_eq!(out.output["votes"][4]["reason"], json!("no"));
    }
}
