//! Structural validation of step outputs

use crate::merge::risk_level_score;
use crate::step::StepKind;
use serde_json::Value;

fn require_str<'a>(item: &'a Value, field: &str, context: &str) -> Result<&'a str, String> {
    item.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("{} is missing string field '{}'", context, field))
}

fn require_array<'a>(payload: &'a Value, field: &str) -> Result<&'a Vec<Value>, String> {
    payload
        .get(field)
        .and_then(Value::as_array)
        .ok_or_else(|| format!("output is missing array field '{}'", field))
}

fn check_optional_score(item: &Value, context: &str) -> Result<(), String> {
    match item.get("risk_score") {
        None | Some(Value::Null) => Ok(()),
        Some(v) => match v.as_f64() {
            Some(score) if (0.0..=1.0).contains(&score) => Ok(()),
            _ => Err(format!("{} has risk_score outside [0, 1]", context)),
        },
    }
}

/// Validate a step payload against the contract of its kind
pub fn validate_output(kind: StepKind, payload: &Value) -> Result<(), String> {
    if !payload.is_object() {
        return Err(format!("{} output must be a JSON object", kind));
    }

    match kind {
        StepKind::Validate => match payload.get("valid") {
            None | Some(Value::Bool(_)) => Ok(()),
            Some(_) => Err("field 'valid' must be a boolean".to_string()),
        },
        StepKind::Analyze => {
            for (i, risk) in require_array(payload, "risks")?.iter().enumerate() {
                let context = format!("risk #{}", i);
                require_str(risk, "clause", &context)?;
                let level = require_str(risk, "risk_level", &context)?;
                if risk_level_score(level).is_none() {
                    return Err(format!("{} has unknown risk_level '{}'", context, level));
                }
                check_optional_score(risk, &context)?;
            }
            match payload.get("overall_score") {
                None | Some(Value::Null) => Ok(()),
                Some(v) if v.is_number() => Ok(()),
                Some(_) => Err("field 'overall_score' must be a number".to_string()),
            }
        }
        StepKind::Negotiate => {
            for (i, redline) in require_array(payload, "redlines")?.iter().enumerate() {
                let context = format!("redline #{}", i);
                require_str(redline, "clause", &context)?;
                require_str(redline, "suggestion", &context)?;
                check_optional_score(redline, &context)?;
            }
            Ok(())
        }
        StepKind::Communicate => {
            require_str(payload, "draft", "output")?;
            Ok(())
        }
    }
}
