//! Stage `condition` expression evaluation, reusing the text-template
//! engine with a curated helper function set. `tera` functions take named
//! arguments rather than positional calls, so the dialect here is
//! `success(stage="x")`, `env(key="x")`, `eq(a="1", b="1")`, `ne(...)`,
//! `contains(a="...", b="...")` — a deliberate syntax adaptation, documented
//! in `DESIGN.md`.

use std::collections::HashMap;
use std::sync::Arc;

use tera::{Function, Tera, Value};

use crate::stages::orchestrator::StageOutcome;

fn arg_str(args: &HashMap<String, Value>, key: &str) -> tera::Result<String> {
    match args.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(format!("condition helper missing required argument '{}'", key).into()),
    }
}

struct StageStatusFn {
    results: Arc<HashMap<String, StageOutcome>>,
    want_success: bool,
}

impl Function for StageStatusFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let stage = arg_str(args, "stage")?;
        let outcome = self.results.get(&stage);
        let matched = match outcome {
            Some(o) => o.success == self.want_success,
            None => false,
        };
        Ok(Value::Bool(matched))
    }
}

struct EnvFn {
    env: Arc<HashMap<String, String>>,
}

impl Function for EnvFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let key = arg_str(args, "key")?;
        Ok(match self.env.get(&key) {
            Some(v) => Value::String(v.clone()),
            None => Value::Null,
        })
    }
}

struct EqFn(bool);

impl Function for EqFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let a = arg_str(args, "a")?;
        let b = arg_str(args, "b")?;
        Ok(Value::Bool((a == b) == self.0))
    }
}

struct ContainsFn;

impl Function for ContainsFn {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let a = arg_str(args, "a")?;
        let b = arg_str(args, "b")?;
        Ok(Value::Bool(a.contains(&b)))
    }
}

/// Evaluates a stage's `condition`. Empty or literal `"true"` runs
/// unconditionally; `"false"` always skips; anything else is rendered as a
/// tera boolean expression. Parse/exec errors, or a render that isn't
/// exactly `"true"`/`"false"`, are treated as "do not run".
pub fn evaluate(
    condition: &str,
    results: &HashMap<String, StageOutcome>,
    global_env: &HashMap<String, String>,
) -> bool {
    let trimmed = condition.trim();
    if trimmed.is_empty() || trimmed == "true" {
        return true;
    }
    if trimmed == "false" {
        return false;
    }

    let mut tera = Tera::default();
    let results = Arc::new(results.clone());
    let env = Arc::new(global_env.clone());
    tera.register_function("success", StageStatusFn { results: results.clone(), want_success: true });
    tera.register_function("failed", StageStatusFn { results: results.clone(), want_success: false });
    tera.register_function("env", EnvFn { env });
    tera.register_function("eq", EqFn(true));
    tera.register_function("ne", EqFn(false));
    tera.register_function("contains", ContainsFn);

    let template = format!("{{% if {} %}}true{{% else %}}false{{% endif %}}", trimmed);
    match tera.render_str(&template, &tera::Context::new()) {
        Ok(rendered) => rendered.trim() == "true",
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(success: bool) -> StageOutcome {
        StageOutcome { name: "s".into(), success, skipped: false, skip_reason: None, error: None, extracted_env: HashMap::new() }
    }

    #[test]
    fn empty_condition_runs() {
        assert!(evaluate("", &HashMap::new(), &HashMap::new()));
    }

    #[test]
    fn success_helper_checks_prior_stage_outcome() {
        let mut results = HashMap::new();
        results.insert("stage1".to_string(), outcome(true));
        assert!(evaluate("success(stage=\"stage1\")", &results, &HashMap::new()));
        assert!(!evaluate("failed(stage=\"stage1\")", &results, &HashMap::new()));
    }

    #[test]
    fn malformed_condition_is_treated_as_skip() {
        assert!(!evaluate("{{ not valid tera", &HashMap::new(), &HashMap::new()));
    }
}
