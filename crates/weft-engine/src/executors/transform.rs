use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::debug;

use weft_core::definition::{NodeConfig, NodeType, TransformConfig};
use weft_core::error::{Result, WeftError};
use weft_transform::jq::jq_query;
use weft_transform::mapping::extract_variables;
use weft_transform::path::lookup;
use weft_transform::script::{eval_expression, run_script};
use weft_transform::template::Template;

use crate::context::{NodeExecutionContext, NodeExecutor, NodeOutcome};
use crate::executors::config_mismatch;

/// Reshapes data with the transform sub-language. Evaluation errors become
/// the node's error string.
pub struct TransformExecutor;

impl NodeExecutor for TransformExecutor {
    fn node_type(&self) -> NodeType {
        NodeType::Transform
    }

    fn execute<'a>(&'a self, ctx: &'a NodeExecutionContext) -> BoxFuture<'a, Result<NodeOutcome>> {
        Box::pin(async move {
            let NodeConfig::Transform(config) = &ctx.node.config else {
                return Err(config_mismatch(ctx, NodeType::Transform));
            };
            match apply(ctx, config).await {
                Ok(output) => Ok(NodeOutcome::new(output)),
                Err(e) => {
                    debug!(
                        node_id = %ctx.node.id,
                        transform = config.transform_type(),
                        error = %e,
                        "Transform failed"
                    );
                    Ok(NodeOutcome::failed(e.to_string()))
                }
            }
        })
    }
}

async fn apply(ctx: &NodeExecutionContext, config: &TransformConfig) -> Result<Value> {
    let input = ctx.primary_input();
    match config {
        TransformConfig::Template { template } => Ok(Value::String(ctx.render(template).await?)),

        TransformConfig::Jq { jq_expression } => jq_query(&input, jq_expression),

        TransformConfig::Extract { fields } => {
            let mut out = Map::new();
            for field in fields {
                out.insert(field.clone(), lookup(&input, field).unwrap_or(Value::Null));
            }
            Ok(Value::Object(out))
        }

        TransformConfig::Map {
            map_expression,
            array_field,
        } => {
            let items = match array_field {
                Some(field) => lookup(&input, field),
                None => Some(input.clone()),
            };
            let Some(Value::Array(items)) = items else {
                return Err(WeftError::Template(format!(
                    "map transform expects an array at '{}'",
                    array_field.as_deref().unwrap_or("input")
                )));
            };
            let template = Template::compile(map_expression)?;
            let options = ctx.template_options();
            let variables = Value::Object(ctx.variables().await);
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.into_iter().enumerate() {
                let mut data = match &item {
                    Value::Object(fields) => fields.clone(),
                    _ => Map::new(),
                };
                data.insert("item".into(), item);
                data.insert("index".into(), Value::from(index));
                data.insert("input".into(), input.clone());
                data.insert("variables".into(), variables.clone());
                out.push(Value::String(template.render(&Value::Object(data), options)?));
            }
            Ok(Value::Array(out))
        }

        TransformConfig::Javascript { code } => {
            let variables = Value::Object(ctx.variables().await);
            let code = code.clone();
            let script = ctx.config().script.clone();
            // The interpreter is synchronous and bounded by its own budgets.
            tokio::task::spawn_blocking(move || run_script(&code, &input, &variables, &script))
                .await
                .map_err(|e| WeftError::Script(format!("script task failed: {}", e)))?
        }

        TransformConfig::Expression { expression } => {
            let variables = Value::Object(ctx.variables().await);
            eval_expression(
                expression,
                &[("input", &input), ("variables", &variables)],
                &ctx.config().script,
            )
        }

        TransformConfig::Mapping { mappings } => extract_variables(&input, mappings).map(Value::Object),
    }
}
