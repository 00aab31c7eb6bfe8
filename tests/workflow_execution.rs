use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use weft_core::definition::{NodeType, WorkflowDefinition};
use weft_core::event::WorkflowEvent;
use weft_core::instance::{InstanceStatus, NodeStatus, StepAction, WorkflowInstance};
use weft_core::traits::HumanResponse;
use weft_engine::{HumanRequest, NodeRegistry, WorkflowEngine};
use weft_test_utils::{definition, edge, node, port_edge, trigger, MockLlm, ScriptedHuman};

fn drain(rx: &mut broadcast::Receiver<WorkflowEvent>) -> Vec<WorkflowEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn status(instance: &WorkflowInstance, node_id: &str) -> NodeStatus {
    instance.node_state(node_id).expect("node state").status
}

fn log_output(id: &str) -> weft_core::definition::WorkflowNode {
    node(id, NodeType::Output, json!({"destination": "log"}))
}

fn template(id: &str, source: &str) -> weft_core::definition::WorkflowNode {
    node(id, NodeType::Transform, json!({"transformType": "template", "template": source}))
}

async fn wait_for_pending(engine: &WorkflowEngine, count: usize) -> Vec<HumanRequest> {
    for _ in 0..400 {
        let pending = engine.pending_human().await;
        if pending.len() >= count {
            return pending;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} pending human requests", count);
}

#[tokio::test]
async fn single_trigger_completes() {
    let engine = WorkflowEngine::builder().build();
    let mut rx = engine.subscribe();
    let instance = engine
        .execute(&definition(vec![trigger("start")], vec![]), json!({"a": 1}))
        .await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.output, None);
    assert_eq!(status(&instance, "start"), NodeStatus::Success);
    assert_eq!(instance.node_state("start").unwrap().output, Some(json!({"a": 1})));
    assert!(instance.completed_at.is_some());

    let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec!["workflow:started", "node:started", "node:completed", "workflow:completed"]
    );
}

#[tokio::test]
async fn linear_chain_produces_output() {
    let def = definition(
        vec![
            trigger("start"),
            template("greet", "Hello {{name}}"),
            log_output("out"),
        ],
        vec![edge("start", "greet"), edge("greet", "out")],
    );
    let instance = WorkflowEngine::builder()
        .build()
        .execute(&def, json!({"name": "Ada"}))
        .await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.output, Some(json!("Hello Ada")));
    let actions: Vec<(String, StepAction)> = instance
        .history
        .iter()
        .map(|s| (s.node_id.clone(), s.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("start".to_string(), StepAction::Started),
            ("start".to_string(), StepAction::Completed),
            ("greet".to_string(), StepAction::Started),
            ("greet".to_string(), StepAction::Completed),
            ("out".to_string(), StepAction::Started),
            ("out".to_string(), StepAction::Completed),
        ]
    );
}

fn branching() -> WorkflowDefinition {
    definition(
        vec![
            trigger("start"),
            node(
                "check",
                NodeType::Condition,
                json!({"rules": [{"field": "score", "operator": "greater_than", "value": 5}]}),
            ),
            template("high", "high {{score}}"),
            template("low", "low {{score}}"),
            log_output("high_out"),
        ],
        vec![
            edge("start", "check"),
            port_edge("check", "true", "high"),
            port_edge("check", "false", "low"),
            edge("high", "high_out"),
        ],
    )
}

#[tokio::test]
async fn condition_true_follows_true_port_and_skips_false() {
    let engine = WorkflowEngine::builder().build();
    let mut rx = engine.subscribe();
    let instance = engine.execute(&branching(), json!({"score": 9})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(status(&instance, "high"), NodeStatus::Success);
    assert_eq!(status(&instance, "low"), NodeStatus::Skipped);
    assert_eq!(instance.output, Some(json!("high 9")));
    assert!(instance
        .steps_for("low")
        .any(|s| s.action == StepAction::Skipped));

    let skipped: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkflowEvent::NodeSkipped { node_id } => Some(node_id),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec!["low"]);
}

#[tokio::test]
async fn condition_false_follows_false_port_and_skips_true() {
    let instance = WorkflowEngine::builder()
        .build()
        .execute(&branching(), json!({"score": 2}))
        .await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(status(&instance, "high"), NodeStatus::Skipped);
    assert_eq!(status(&instance, "low"), NodeStatus::Success);
    // Skipping is not transitive: nodes behind a skipped node stay idle.
    assert_eq!(status(&instance, "high_out"), NodeStatus::Idle);
    assert_eq!(instance.output, None);
}

#[tokio::test]
async fn split_merge_object_waits_for_both_branches() {
    let llm = Arc::new(MockLlm::new().with_response("draft text"));
    let def = definition(
        vec![
            trigger("start"),
            node("fan", NodeType::Split, Value::Null),
            node("writer", NodeType::Agent, json!({"inputTemplate": "Write about {{topic}}"})),
            node("facts", NodeType::Transform, json!({"transformType": "jq", "jqExpression": ".topic"})),
            node(
                "join",
                NodeType::Merge,
                json!({"strategy": "object", "keyMapping": {"a": "draft", "b": "topic"}}),
            ),
            log_output("out"),
        ],
        vec![
            edge("start", "fan"),
            edge("fan", "writer"),
            edge("fan", "facts"),
            edge("writer", "join").to_port("a"),
            edge("facts", "join").to_port("b"),
            edge("join", "out"),
        ],
    );
    let engine = WorkflowEngine::builder().llm(llm.clone()).build();
    let mut rx = engine.subscribe();
    let instance = engine.execute(&def, json!({"topic": "rivers"})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(
        instance.node_state("join").unwrap().output,
        Some(json!({"draft": "draft text", "topic": "rivers"}))
    );
    assert_eq!(instance.node_state("join").unwrap().execution_count, 1);
    assert_eq!(llm.calls()[0].prompt, "Write about rivers");

    let join_started = drain(&mut rx)
        .iter()
        .filter(|e| matches!(e, WorkflowEvent::NodeStarted { node_id, .. } if node_id == "join"))
        .count();
    assert_eq!(join_started, 1);
}

#[tokio::test]
async fn merge_fires_after_one_branch_is_skipped() {
    let def = definition(
        vec![
            trigger("start"),
            node("gate", NodeType::Condition, json!({"rules": [{"field": "ok", "operator": "equals", "value": true}]})),
            template("yes", "accepted"),
            template("no", "rejected"),
            node("join", NodeType::Merge, json!({"strategy": "concatenate"})),
        ],
        vec![
            edge("start", "gate"),
            port_edge("gate", "true", "yes"),
            port_edge("gate", "false", "no"),
            edge("yes", "join").to_port("a"),
            edge("no", "join").to_port("b"),
        ],
    );
    let instance = WorkflowEngine::builder().build().execute(&def, json!({"ok": true})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(status(&instance, "no"), NodeStatus::Skipped);
    assert_eq!(instance.node_state("join").unwrap().output, Some(json!(["accepted"])));
}

#[tokio::test]
async fn merge_keeps_every_unported_branch() {
    let def = definition(
        vec![
            trigger("start"),
            node("fan", NodeType::Split, Value::Null),
            template("a", "A"),
            template("b", "B"),
            node("join", NodeType::Merge, json!({"strategy": "concatenate"})),
            node("keyed", NodeType::Merge, json!({"strategy": "object", "keyMapping": {"a": "first"}})),
        ],
        vec![
            edge("start", "fan"),
            edge("fan", "a"),
            edge("fan", "b"),
            edge("a", "join"),
            edge("b", "join"),
            edge("a", "keyed"),
            edge("b", "keyed"),
        ],
    );
    let instance = WorkflowEngine::builder().build().execute(&def, json!({})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.node_state("join").unwrap().output, Some(json!(["A", "B"])));
    assert_eq!(
        instance.node_state("keyed").unwrap().output,
        Some(json!({"first": "A", "b": "B"}))
    );
    assert_eq!(instance.node_state("join").unwrap().execution_count, 1);
}

fn counted_loop(max_iterations: Option<u32>) -> WorkflowDefinition {
    let mut config = json!({"loopType": "times", "count": 3});
    if let Some(max) = max_iterations {
        config["maxIterations"] = json!(max);
    }
    definition(
        vec![
            trigger("start"),
            node("again", NodeType::Loop, config),
            node("body", NodeType::Transform, json!({"transformType": "expression", "expression": "input + 1"})),
            log_output("out"),
        ],
        vec![
            edge("start", "again"),
            port_edge("again", "continue", "body"),
            edge("body", "again"),
            port_edge("again", "done", "out"),
        ],
    )
}

#[tokio::test]
async fn times_loop_continues_three_times_then_done() {
    let engine = WorkflowEngine::builder().build();
    let mut rx = engine.subscribe();
    let instance = engine.execute(&counted_loop(None), json!(0)).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.node_state("again").unwrap().execution_count, 4);
    assert_eq!(instance.node_state("body").unwrap().execution_count, 3);
    assert_eq!(instance.output, Some(json!("3")));

    let events = drain(&mut rx);
    let ports: Vec<Option<String>> = events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::NodeCompleted { node_id, output_port, .. } if node_id == "again" => {
                Some(output_port.clone())
            }
            _ => None,
        })
        .collect();
    let expected: Vec<Option<String>> = ["continue", "continue", "continue", "done"]
        .iter()
        .map(|p| Some(p.to_string()))
        .collect();
    assert_eq!(ports, expected);

    // While the loop is still continuing its done branch is pending, not skipped.
    assert!(!events.iter().any(|e| matches!(e, WorkflowEvent::NodeSkipped { .. })));
    assert!(instance.steps_for("out").all(|s| s.action != StepAction::Skipped));
    assert_eq!(instance.node_state("out").unwrap().execution_count, 1);
}

#[tokio::test]
async fn loop_past_max_iterations_fails_the_workflow() {
    let instance = WorkflowEngine::builder()
        .build()
        .execute(&counted_loop(Some(2)), json!(0))
        .await;

    assert_eq!(instance.status, InstanceStatus::Failed);
    assert!(instance
        .error
        .as_deref()
        .unwrap()
        .contains("exceeded maximum iterations"));
    assert_eq!(status(&instance, "again"), NodeStatus::Error);
    assert_eq!(instance.node_state("body").unwrap().execution_count, 2);
    assert_eq!(status(&instance, "out"), NodeStatus::Idle);
}

fn ballot_workflow() -> WorkflowDefinition {
    definition(
        vec![
            trigger("start"),
            node("tally", NodeType::Vote, json!({"voteOptions": ["pass", "fail"], "threshold": 0.6})),
            template("passed", "shipped"),
            template("failed", "rework"),
            template("queued", "queued for review"),
        ],
        vec![
            edge("start", "tally"),
            port_edge("tally", "pass", "passed"),
            port_edge("tally", "fail", "failed"),
            port_edge("tally", "queue", "queued"),
        ],
    )
}

#[tokio::test]
async fn vote_outcome_routes_branches() {
    let engine = WorkflowEngine::builder().build();
    let mut rx = engine.subscribe();
    let three_two = json!(["pass", "pass", "pass", "fail", "fail"]);
    let instance = engine.execute(&ballot_workflow(), three_two).await;

    assert_eq!(instance.node_state("tally").unwrap().output.as_ref().unwrap()["outcome"], json!("pass"));
    assert_eq!(status(&instance, "passed"), NodeStatus::Success);
    assert_eq!(status(&instance, "failed"), NodeStatus::Skipped);
    assert_eq!(status(&instance, "queued"), NodeStatus::Skipped);

    let events = drain(&mut rx);
    assert_eq!(events.iter().filter(|e| e.kind() == "vote:cast").count(), 5);
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::VoteTallied { outcome, total: 5, .. } if outcome == "pass"
    )));

    let tie = json!(["pass", "pass", "pass", "fail", "fail", "fail"]);
    let instance = engine.execute(&ballot_workflow(), tie).await;
    assert_eq!(status(&instance, "queued"), NodeStatus::Success);
    assert_eq!(status(&instance, "passed"), NodeStatus::Skipped);
}

fn review_workflow() -> WorkflowDefinition {
    definition(
        vec![
            trigger("start"),
            node(
                "review",
                NodeType::Human,
                json!({"prompt": "Publish {{title}}?", "choices": ["approve", "reject"], "contextFields": ["title"]}),
            ),
            template("publish", "published {{context.title}}"),
            template("archive", "archived"),
        ],
        vec![
            edge("start", "review"),
            port_edge("review", "approve", "publish"),
            port_edge("review", "reject", "archive"),
        ],
    )
}

#[tokio::test]
async fn human_provider_answers_and_routes() {
    let human = Arc::new(ScriptedHuman::new().answer("approve"));
    let engine = WorkflowEngine::builder().human_provider(human.clone()).build();
    let mut rx = engine.subscribe();
    let instance = engine.execute(&review_workflow(), json!({"title": "Q3 report"})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(human.prompts(), vec!["Publish Q3 report?"]);
    assert_eq!(
        instance.node_state("publish").unwrap().output,
        Some(json!("published Q3 report"))
    );
    assert_eq!(status(&instance, "archive"), NodeStatus::Skipped);

    let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
    let requested = kinds.iter().position(|k| *k == "human:requested").unwrap();
    let responded = kinds.iter().position(|k| *k == "human:responded").unwrap();
    assert!(requested < responded);
}

#[tokio::test]
async fn human_wait_resolved_by_respond_human() {
    let engine = Arc::new(WorkflowEngine::builder().build());
    let runner = engine.clone();
    let task = tokio::spawn(async move {
        runner.execute(&review_workflow(), json!({"title": "Draft"})).await
    });

    let pending = wait_for_pending(&engine, 1).await;
    assert_eq!(pending[0].id, "review#1");
    assert_eq!(pending[0].context, json!({"title": "Draft"}));
    assert_eq!(
        engine.snapshot().await.unwrap().status,
        InstanceStatus::WaitingHuman
    );

    engine
        .respond_human_to("review#1", HumanResponse::new("reject").with_text("not yet"))
        .await
        .unwrap();
    let instance = task.await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(status(&instance, "archive"), NodeStatus::Success);
    assert_eq!(
        instance.node_state("review").unwrap().output.as_ref().unwrap()["freeText"],
        json!("not yet")
    );
    assert!(engine.respond_human("approve", None).await.is_err());
}

#[tokio::test]
async fn cancel_rejects_pending_human_and_stops_dispatch() {
    let engine = Arc::new(WorkflowEngine::builder().build());
    let mut rx = engine.subscribe();
    let runner = engine.clone();
    let task = tokio::spawn(async move {
        runner.execute(&review_workflow(), json!({"title": "Draft"})).await
    });

    wait_for_pending(&engine, 1).await;
    engine.cancel().await;
    let instance = task.await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Cancelled);
    assert!(engine.pending_human().await.is_empty());
    assert_eq!(status(&instance, "publish"), NodeStatus::Idle);
    assert_eq!(status(&instance, "archive"), NodeStatus::Idle);
    assert!(drain(&mut rx).iter().any(|e| e.kind() == "workflow:cancelled"));
}

#[tokio::test]
async fn parallel_human_waits_are_independent() {
    let def = definition(
        vec![
            trigger("start"),
            node("fan", NodeType::Split, Value::Null),
            node("legal", NodeType::Human, json!({"prompt": "Legal ok?", "choices": ["yes", "no"]})),
            node("brand", NodeType::Human, json!({"prompt": "Brand ok?", "choices": ["yes", "no"]})),
            node("join", NodeType::Merge, json!({"strategy": "object"})),
        ],
        vec![
            edge("start", "fan"),
            edge("fan", "legal"),
            edge("fan", "brand"),
            edge("legal", "join").to_port("legal"),
            edge("brand", "join").to_port("brand"),
        ],
    );
    let engine = Arc::new(WorkflowEngine::builder().build());
    let runner = engine.clone();
    let task = tokio::spawn(async move { runner.execute(&def, json!({})).await });

    let pending = wait_for_pending(&engine, 2).await;
    let mut ids: Vec<String> = pending.iter().map(|r| r.id.clone()).collect();
    ids.sort();
    assert_eq!(ids, vec!["brand#1", "legal#1"]);

    engine.respond_human_to("brand#1", HumanResponse::new("no")).await.unwrap();
    engine.respond_human_to("legal#1", HumanResponse::new("yes")).await.unwrap();
    let instance = task.await.unwrap();

    assert_eq!(instance.status, InstanceStatus::Completed);
    let joined = instance.node_state("join").unwrap().output.clone().unwrap();
    assert_eq!(joined["legal"]["choice"], json!("yes"));
    assert_eq!(joined["brand"]["choice"], json!("no"));
}

#[tokio::test]
async fn failing_split_branch_does_not_stop_sibling() {
    let def = definition(
        vec![
            trigger("start"),
            node("fan", NodeType::Split, Value::Null),
            node("broken", NodeType::Transform, json!({"transformType": "jq", "jqExpression": ".a[["})),
            template("fine", "still ran"),
        ],
        vec![edge("start", "fan"), edge("fan", "broken"), edge("fan", "fine")],
    );
    let engine = WorkflowEngine::builder().build();
    let mut rx = engine.subscribe();
    let instance = engine.execute(&def, json!({})).await;

    assert_eq!(instance.status, InstanceStatus::Failed);
    assert!(instance.error.as_deref().unwrap().contains("broken"));
    assert_eq!(status(&instance, "broken"), NodeStatus::Error);
    assert_eq!(status(&instance, "fine"), NodeStatus::Success);

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, WorkflowEvent::NodeFailed { node_id, .. } if node_id == "broken")));
    assert!(events.iter().any(|e| e.kind() == "workflow:failed"));
}

#[tokio::test]
async fn runaway_script_fails_its_node_not_the_process() {
    let deep_jq = format!("{}.{}", "(".repeat(20_000), ")".repeat(20_000));
    let def = definition(
        vec![
            trigger("start"),
            node("fan", NodeType::Split, Value::Null),
            node(
                "recurse",
                NodeType::Transform,
                json!({"transformType": "javascript", "code": "const f = (n) => f(n + 1); return f(0);"}),
            ),
            node(
                "pad",
                NodeType::Transform,
                json!({"transformType": "javascript", "code": "return 'x'.padStart(100000000000);"}),
            ),
            node("nested", NodeType::Transform, json!({"transformType": "jq", "jqExpression": deep_jq})),
            template("fine", "still ran"),
        ],
        vec![
            edge("start", "fan"),
            edge("fan", "recurse"),
            edge("fan", "pad"),
            edge("fan", "nested"),
            edge("fan", "fine"),
        ],
    );
    let instance = WorkflowEngine::builder().build().execute(&def, json!({})).await;

    assert_eq!(instance.status, InstanceStatus::Failed);
    assert_eq!(status(&instance, "fine"), NodeStatus::Success);
    let error_of = |id: &str| instance.node_state(id).unwrap().error.clone().unwrap_or_default();
    assert_eq!(status(&instance, "recurse"), NodeStatus::Error);
    assert!(error_of("recurse").contains("maximum call stack size exceeded"));
    assert_eq!(status(&instance, "pad"), NodeStatus::Error);
    assert!(error_of("pad").contains("RangeError"));
    assert_eq!(status(&instance, "nested"), NodeStatus::Error);
    assert!(error_of("nested").contains("nests deeper than"));
}

#[tokio::test]
async fn deeply_nested_condition_expression_fails_the_node() {
    let expression = format!("{}true{}", "(".repeat(20_000), ")".repeat(20_000));
    let def = definition(
        vec![
            trigger("start"),
            node(
                "check",
                NodeType::Condition,
                json!({"rules": [{"field": "x", "operator": "custom", "expression": expression}]}),
            ),
            template("yes", "yes"),
        ],
        vec![edge("start", "check"), port_edge("check", "true", "yes")],
    );
    let instance = WorkflowEngine::builder().build().execute(&def, json!({"x": 1})).await;

    assert_eq!(instance.status, InstanceStatus::Failed);
    assert_eq!(status(&instance, "check"), NodeStatus::Error);
    assert_eq!(status(&instance, "yes"), NodeStatus::Idle);
}

#[tokio::test]
async fn unregistered_node_type_fails_immediately() {
    let mut registry = NodeRegistry::with_builtins();
    registry.unregister(NodeType::Vote);
    let def = definition(
        vec![
            trigger("start"),
            node("tally", NodeType::Vote, json!({"voteOptions": ["a"], "threshold": 0.5})),
        ],
        vec![edge("start", "tally")],
    );
    let instance = WorkflowEngine::builder()
        .registry(registry)
        .build()
        .execute(&def, json!(["a"]))
        .await;

    assert_eq!(instance.status, InstanceStatus::Failed);
    assert!(instance.error.as_deref().unwrap().contains("vote"));
    assert_eq!(status(&instance, "tally"), NodeStatus::Error);
}

#[tokio::test]
async fn invalid_definition_fails_without_running() {
    let def = definition(vec![template("lonely", "x")], vec![]);
    let engine = WorkflowEngine::builder().build();
    let mut rx = engine.subscribe();
    let instance = engine.execute(&def, json!({})).await;

    assert_eq!(instance.status, InstanceStatus::Failed);
    assert!(instance.error.as_deref().unwrap().contains("no trigger"));
    assert!(instance.history.is_empty());
    let kinds: Vec<&str> = drain(&mut rx).iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["workflow:failed"]);
}

#[tokio::test]
async fn variables_flow_between_nodes() {
    let def = definition(
        vec![
            trigger("start"),
            node("remember", NodeType::Output, json!({"destination": "variable", "variableName": "customer"})),
            node(
                "script",
                NodeType::Transform,
                json!({
                    "transformType": "javascript",
                    "code": "return `${variables.greeting}, ${variables.customer.name}`;"
                }),
            ),
            log_output("out"),
        ],
        vec![
            edge("start", "remember"),
            edge("remember", "script"),
            edge("script", "out"),
        ],
    )
    .with_variable("greeting", json!("Welcome"));
    let instance = WorkflowEngine::builder()
        .build()
        .execute(&def, json!({"name": "Ada"}))
        .await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.data["customer"], json!({"name": "Ada"}));
    assert_eq!(
        instance.output,
        Some(json!([{"name": "Ada"}, "Welcome, Ada"]))
    );
}

#[tokio::test]
async fn agent_failure_fails_workflow() {
    let llm = Arc::new(MockLlm::new().with_failure("quota exceeded"));
    let def = definition(
        vec![trigger("start"), node("ask", NodeType::Agent, json!({}))],
        vec![edge("start", "ask")],
    );
    let instance = WorkflowEngine::builder()
        .llm(llm)
        .build()
        .execute(&def, json!("hi"))
        .await;

    assert_eq!(instance.status, InstanceStatus::Failed);
    assert!(instance.error.as_deref().unwrap().contains("quota exceeded"));
}

#[test]
fn template_and_mapping_round_trip() {
    let rendered =
        weft_transform::render_template("{{#each items}}{{this}}-{{/each}}", &json!({"items": [1, 2, 3]}))
            .unwrap();
    assert_eq!(rendered, "1-2-3-");

    let mapping: Vec<weft_core::definition::FieldMapping> =
        serde_json::from_value(json!([{"from": "a.b", "to": "x.y", "transform": "string"}])).unwrap();
    let extracted = weft_transform::extract_variables(&json!({"a": {"b": 5}}), &mapping).unwrap();
    assert_eq!(Value::Object(extracted), json!({"x": {"y": "5"}}));
}

#[test]
fn scripts_are_idempotent_and_denylist_always_rejects() {
    let config = weft_core::config::ScriptConfig::default();
    let code = "const xs = input.map(x => x * 2); return xs.join(',');";
    let input = json!([1, 2, 3]);
    let first = weft_transform::run_script(code, &input, &json!({}), &config).unwrap();
    let second = weft_transform::run_script(code, &input, &json!({}), &config).unwrap();
    assert_eq!(first, json!("2,4,6"));
    assert_eq!(first, second);

    for forbidden in ["eval('1')", "process.exit()", "return globalThis", "fetch('x')"] {
        let err = weft_transform::run_script(forbidden, &input, &json!({}), &config).unwrap_err();
        assert!(
            matches!(err, weft_core::error::WeftError::ForbiddenIdentifier(_)),
            "{} should be rejected, got {:?}",
            forbidden,
            err
        );
    }
}
