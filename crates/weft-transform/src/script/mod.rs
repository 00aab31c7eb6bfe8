//! Sandboxed script and expression evaluation.
//!
//! Code is lexed (rejecting denylisted identifiers before anything runs),
//! parsed to an AST and walked by a budgeted interpreter. The only names in
//! scope are the caller's bindings and the built-in allowlist; there is no
//! I/O, no timers and no access to the host.

mod ast;
mod builtins;
mod interp;
mod lexer;
mod parser;

use serde_json::Value;

use weft_core::config::ScriptConfig;
use weft_core::error::{Result, WeftError};

use interp::{declare, Env, Fault, Interpreter, Limits, Val};

use crate::stack::on_evaluator_stack;

pub use lexer::DENYLIST;

/// Evaluator configured with one set of budgets.
#[derive(Debug, Clone)]
pub struct Sandbox {
    limits: Limits,
    max_output_bytes: usize,
}

impl Sandbox {
    pub fn new(config: &ScriptConfig) -> Self {
        Self {
            limits: Limits {
                max_operations: config.max_operations,
                timeout: config.timeout(),
            },
            max_output_bytes: config.max_output_bytes,
        }
    }

    /// Run a statement list. The result is the top-level `return` value, or
    /// the last expression statement's value; `undefined` becomes `null`.
    pub fn run(&self, code: &str, bindings: &[(&str, &Value)]) -> Result<Value> {
        on_evaluator_stack(|| {
            let program = parser::parse_program(lexer::tokenize(code)?)?;
            let scope = self.root_scope(bindings)?;
            let mut interpreter = Interpreter::new(self.limits);
            let result = interpreter.run_program(&program, &scope);
            tracing::trace!(operations = interpreter.operations(), "script finished");
            self.finish(result)
        })
    }

    /// Evaluate a single expression. Statement syntax is refused outright.
    pub fn eval_expression(&self, expr: &str, bindings: &[(&str, &Value)]) -> Result<Value> {
        if let Some(c) = expr.chars().find(|c| matches!(c, ';' | '{' | '}')) {
            return Err(WeftError::Script(format!(
                "expressions may not contain '{}'",
                c
            )));
        }
        on_evaluator_stack(|| {
            let parsed = parser::parse_expression(lexer::tokenize(expr)?)?;
            let scope = self.root_scope(bindings)?;
            let mut interpreter = Interpreter::new(self.limits);
            let result = interpreter.eval(&parsed, &scope);
            self.finish(result)
        })
    }

    fn root_scope(&self, bindings: &[(&str, &Value)]) -> Result<interp::Scope> {
        let scope = Env::root();
        for name in builtins::GLOBALS {
            declare(&scope, name, Val::Global(*name), false);
        }
        for (name, value) in bindings {
            lexer::check_identifier(name)?;
            declare(&scope, name, Val::Json((*value).clone()), false);
        }
        Ok(scope)
    }

    fn finish(&self, result: interp::R<Val>) -> Result<Value> {
        let value = result.and_then(|v| v.to_json()).map_err(fault_to_error)?;
        if nesting_depth(&value) > MAX_RESULT_DEPTH {
            return Err(WeftError::Script(format!(
                "result nests deeper than {} levels",
                MAX_RESULT_DEPTH
            )));
        }
        let size = serde_json::to_vec(&value)?.len();
        if size > self.max_output_bytes {
            return Err(WeftError::Script(format!(
                "result of {} bytes exceeds the {} byte output limit",
                size, self.max_output_bytes
            )));
        }
        Ok(value)
    }
}

/// Same bound `serde_json` applies when parsing, so results stay loadable.
const MAX_RESULT_DEPTH: usize = 128;

fn nesting_depth(value: &Value) -> usize {
    let mut deepest = 0;
    let mut pending = vec![(value, 1)];
    while let Some((v, depth)) = pending.pop() {
        deepest = deepest.max(depth);
        match v {
            Value::Array(items) => pending.extend(items.iter().map(|i| (i, depth + 1))),
            Value::Object(map) => pending.extend(map.values().map(|i| (i, depth + 1))),
            _ => {}
        }
    }
    deepest
}

fn fault_to_error(fault: Fault) -> WeftError {
    match fault {
        Fault::Fatal(e) => e,
        Fault::Thrown(Val::Json(Value::Object(map))) => {
            let message = map.get("message").map(crate::value::display).unwrap_or_default();
            match map.get("name").and_then(Value::as_str) {
                Some(name) => WeftError::Script(format!("{}: {}", name, message)),
                None if !message.is_empty() => WeftError::Script(message),
                None => WeftError::Script(Val::Json(Value::Object(map)).to_js_string()),
            }
        }
        Fault::Thrown(other) => WeftError::Script(other.to_js_string()),
    }
}

/// Run `code` with `input` and `variables` bound.
pub fn run_script(code: &str, input: &Value, variables: &Value, config: &ScriptConfig) -> Result<Value> {
    Sandbox::new(config).run(code, &[("input", input), ("variables", variables)])
}

/// Evaluate one expression against arbitrary bindings.
pub fn eval_expression(expr: &str, bindings: &[(&str, &Value)], config: &ScriptConfig) -> Result<Value> {
    Sandbox::new(config).eval_expression(expr, bindings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(code: &str, input: Value) -> Result<Value> {
        run_script(code, &input, &json!({"region": "eu"}), &ScriptConfig::default())
    }

    fn expr(src: &str, input: Value) -> Result<Value> {
        eval_expression(src, &[("input", &input)], &ScriptConfig::default())
    }

    #[test]
    fn returns_last_expression_or_return_value() {
        assert_eq!(run("input.a + 1", json!({"a": 2})).unwrap(), json!(3));
        assert_eq!(
            run("const xs = input.items; return xs.map(x => x * 2);", json!({"items": [1, 2]})).unwrap(),
            json!([2, 4])
        );
        assert_eq!(run("let x;", json!(null)).unwrap(), Value::Null);
    }

    #[test]
    fn statements_and_closures() {
        let code = r#"
            const totals = {};
            for (const order of input.orders) {
                const key = order.customer;
                totals[key] = (totals[key] ?? 0) + order.amount;
            }
            let best = null;
            for (const name in totals) {
                if (best === null || totals[name] > totals[best]) best = name;
            }
            return { best, total: Object.values(totals).reduce((a, b) => a + b, 0), region: variables.region };
        "#;
        let input = json!({"orders": [
            {"customer": "ana", "amount": 5},
            {"customer": "bo", "amount": 7},
            {"customer": "ana", "amount": 4},
        ]});
        assert_eq!(run(code, input).unwrap(), json!({"best": "ana", "total": 16, "region": "eu"}));
    }

    #[test]
    fn array_mutation_writes_back_to_binding() {
        let code = "const out = []; for (let i = 0; i < 3; i++) { out.push(i * i); } out.sort((a, b) => b - a); return out;";
        assert_eq!(run(code, json!(null)).unwrap(), json!([4, 1, 0]));
    }

    #[test]
    fn builtins_and_templates() {
        assert_eq!(
            run("`${input.name.toUpperCase()} has ${input.tags.length} tags`", json!({"name": "ada", "tags": ["a", "b"]}))
                .unwrap(),
            json!("ADA has 2 tags")
        );
        assert_eq!(run("Math.max(1, 7, 3) + Math.round(2.5)", json!(null)).unwrap(), json!(10));
        assert_eq!(run("JSON.parse('{\"a\":[1]}').a[0]", json!(null)).unwrap(), json!(1));
        assert_eq!(run("JSON.stringify({a: 1})", json!(null)).unwrap(), json!("{\"a\":1}"));
        assert_eq!(run("parseInt('42px') + parseFloat('0.5')", json!(null)).unwrap(), json!(42.5));
        assert_eq!(run("typeof input.missing", json!({})).unwrap(), json!("undefined"));
        assert_eq!(run("[3, 10, 2].sort()", json!(null)).unwrap(), json!([10, 2, 3]));
    }

    #[test]
    fn identical_runs_give_identical_output() {
        let code = "return input.values.filter(v => v % 2).map(v => ({ v, sq: v ** 2 }));";
        let input = json!({"values": [1, 2, 3, 4, 5]});
        let first = run(code, input.clone()).unwrap();
        let second = run(code, input).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn denylisted_identifiers_rejected_before_running() {
        for code in [
            "eval('1')",
            "require('fs')",
            "process.exit(1)",
            "const f = () => globalThis; f()",
            "input.constructor",
            "while (true) {} ; fetch('x')",
        ] {
            let err = run(code, json!({})).unwrap_err();
            assert!(matches!(err, WeftError::ForbiddenIdentifier(_)), "{}: {:?}", code, err);
        }
    }

    #[test]
    fn computed_forbidden_keys_rejected_at_runtime() {
        for code in ["const k = 'proto' + 'type'; input[k]", "input['__proto__']", "({ ['__proto__']: 1 })"] {
            let err = run(code, json!({})).unwrap_err();
            assert!(matches!(err, WeftError::ForbiddenIdentifier(_)), "{}: {:?}", code, err);
        }
    }

    #[test]
    fn unknown_globals_are_reference_errors() {
        let err = run("console.log(1)", json!({})).unwrap_err();
        assert!(err.to_string().contains("console is not defined"));
    }

    #[test]
    fn thrown_errors_surface_their_message() {
        let err = run("throw new Error('bad input')", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "Script error: Error: bad input");
        assert_eq!(run("throw 'plain'", json!({})).unwrap_err().to_string(), "Script error: plain");
    }

    #[test]
    fn try_catch_recovers() {
        let code = "let r; try { r = input.a.b; } catch (e) { r = 'fallback'; } return r;";
        assert_eq!(run(code, json!({})).unwrap(), json!("fallback"));
    }

    #[test]
    fn operation_budget_enforced() {
        let config = ScriptConfig {
            max_operations: 1_000,
            ..ScriptConfig::default()
        };
        let err = run_script("let i = 0; while (true) { i++; }", &json!(null), &json!({}), &config).unwrap_err();
        assert!(err.to_string().contains("operation budget"), "{}", err);
    }

    #[test]
    fn wall_clock_timeout_enforced() {
        let config = ScriptConfig {
            timeout_ms: 20,
            max_operations: u64::MAX,
            ..ScriptConfig::default()
        };
        let err = run_script("while (true) {}", &json!(null), &json!({}), &config).unwrap_err();
        assert!(matches!(err, WeftError::ScriptTimeout(20)));
    }

    #[test]
    fn output_size_capped() {
        let config = ScriptConfig {
            max_output_bytes: 64,
            ..ScriptConfig::default()
        };
        let err = run_script("'x'.repeat(100)", &json!(null), &json!({}), &config).unwrap_err();
        assert!(err.to_string().contains("output limit"));
    }

    #[test]
    fn expressions_are_single_expressions() {
        assert_eq!(expr("input.score >= 0.5 ? 'high' : 'low'", json!({"score": 0.7})).unwrap(), json!("high"));
        assert_eq!(expr("input.items?.[0]?.name ?? 'none'", json!({})).unwrap(), json!("none"));
        for src in ["1; 2", "{ a: 1 }", "(() => { return 1 })()"] {
            assert!(expr(src, json!({})).is_err(), "{}", src);
        }
    }

    #[test]
    fn runaway_recursion_is_a_script_error() {
        let err = run("const f = (n) => f(n + 1); return f(0);", json!(null)).unwrap_err();
        assert!(matches!(err, WeftError::Script(_)), "{:?}", err);
        assert!(err.to_string().contains("maximum call stack size exceeded"), "{}", err);

        let err = run("function down(n) { return n === 0 ? 0 : 1 + down(n - 1); } down(1e6)", json!(null)).unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("maximum call stack size exceeded") || message.contains("nests deeper than"),
            "{}",
            message
        );
        assert_eq!(
            run("function down(n) { return n === 0 ? 0 : 1 + down(n - 1); } down(50)", json!(null)).unwrap(),
            json!(50)
        );
    }

    #[test]
    fn deeply_nested_source_is_rejected() {
        let n = 20_000;
        let cases = [
            format!("{}1{}", "(".repeat(n), ")".repeat(n)),
            format!("{}1{}", "[".repeat(n), "]".repeat(n)),
            format!("{}1", "!".repeat(n)),
            format!("2{}", " ** 2".repeat(n)),
            format!("input{}", ".a".repeat(n)),
            format!("1{}", " + 1".repeat(n)),
            format!("{}{}", "{".repeat(n), "}".repeat(n)),
            format!("{}1{}", "`${".repeat(n), "}`".repeat(n)),
        ];
        for code in &cases {
            let err = run(code, json!({})).unwrap_err();
            assert!(matches!(err, WeftError::Script(_)), "{:?}", err);
            assert!(err.to_string().contains("deeper than"), "{}", err);
        }
        assert_eq!(run(&format!("{}1{}", "(".repeat(100), ")".repeat(100)), json!(null)).unwrap(), json!(1));
        assert!(expr(&format!("{}1{}", "(".repeat(n), ")".repeat(n)), json!(null)).is_err());
    }

    #[test]
    fn oversized_strings_and_arrays_throw_range_errors() {
        for code in [
            "'x'.padStart(100000000000)",
            "'x'.padEnd(100000000000, 'ab')",
            "let s = 'x'.repeat(10000); while (true) { s = s + s; }",
            "let s = 'x'.repeat(10000); while (true) { s = s.concat(s); }",
            "Array.from({ length: 1e12 })",
        ] {
            let err = run(code, json!(null)).unwrap_err();
            assert!(err.to_string().contains("RangeError"), "{}: {}", code, err);
        }
        let caught = "try { 'x'.padStart(1e11); } catch (e) { return 'caught'; }";
        assert_eq!(run(caught, json!(null)).unwrap(), json!("caught"));
    }

    #[test]
    fn deeply_nested_results_are_rejected() {
        let err = run("let o = 1; for (let i = 0; i < 200; i++) { o = [o]; } return o;", json!(null)).unwrap_err();
        assert!(err.to_string().contains("result nests deeper than"), "{}", err);
        let ok = run("let o = 1; for (let i = 0; i < 20; i++) { o = { o }; } return o;", json!(null));
        assert!(ok.is_ok());
    }

    #[test]
    fn variables_are_not_mutated_through_scripts() {
        let vars = json!({"count": 1});
        let out = run_script("variables.count = 5; variables.count", &json!(null), &vars, &ScriptConfig::default())
            .unwrap();
        assert_eq!(out, json!(5));
        assert_eq!(vars, json!({"count": 1}));
    }
}
