//! Evaluators used to move data between workflow nodes.

pub mod jq;
pub mod mapping;
pub mod path;
pub mod script;
pub mod template;
pub mod value;

mod stack;

pub use jq::{jq_eval, jq_query};
pub use mapping::{apply_transform, extract_variables};
pub use path::{get_path, lookup, set_path};
pub use script::{eval_expression, run_script, Sandbox};
pub use template::{render_template, render_template_with, Template, TemplateOptions};
