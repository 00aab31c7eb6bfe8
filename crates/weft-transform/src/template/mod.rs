//! Handlebars-flavoured templates.
//!
//! Source is lexed into text and tag tokens, parsed into a block tree, then
//! rendered against a JSON scope stack. Output is not HTML-escaped: `{{x}}`
//! and `{{{x}}}` render identically, since templates produce prompts, file
//! contents and messages rather than markup.

mod helpers;
mod lexer;
mod parser;
mod render;

use serde_json::Value;

use weft_core::error::Result;

use crate::stack::on_evaluator_stack;

#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateOptions {
    /// Fail on unresolved variables instead of leaving the tag in place.
    pub strict: bool,
}

impl TemplateOptions {
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

/// A parsed template, reusable across renders.
#[derive(Debug, Clone)]
pub struct Template {
    nodes: Vec<parser::Node>,
}

impl Template {
    pub fn compile(source: &str) -> Result<Self> {
        on_evaluator_stack(|| {
            let tokens = lexer::tokenize(source)?;
            Ok(Self {
                nodes: parser::parse(tokens)?,
            })
        })
    }

    pub fn render(&self, data: &Value, options: TemplateOptions) -> Result<String> {
        on_evaluator_stack(|| {
            let mut out = String::new();
            render::Renderer::new(data, options.strict).render(&self.nodes, &mut out)?;
            Ok(out)
        })
    }
}

/// Render `source` against `data` in non-strict mode.
pub fn render_template(source: &str, data: &Value) -> Result<String> {
    render_template_with(source, data, TemplateOptions::default())
}

pub fn render_template_with(source: &str, data: &Value, options: TemplateOptions) -> Result<String> {
    Template::compile(source)?.render(data, options)
}

/// Names of the built-in helpers.
pub fn helper_names() -> &'static [&'static str] {
    helpers::HELPER_NAMES
}
