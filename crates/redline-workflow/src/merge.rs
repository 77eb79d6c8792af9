//! Deterministic reducer for outputs of steps sharing a kind
//!
//! Risks and redlines are keyed by exact clause text; the entry with the
//! highest risk score wins and first-seen order is kept. The first non-empty
//! communication draft wins.

use crate::step::StepKind;
use serde_json::{json, Value};
use std::collections::HashMap;

/// Numeric weight of an enumerated risk level
pub fn risk_level_score(level: &str) -> Option<f64> {
    match level.to_ascii_lowercase().as_str() {
        "low" => Some(0.25),
        "medium" => Some(0.5),
        "high" => Some(0.75),
        "critical" => Some(1.0),
        _ => None,
    }
}

/// Explicit `risk_score`, falling back to the weight of `risk_level`
pub fn item_score(item: &Value) -> f64 {
    item.get("risk_score")
        .and_then(Value::as_f64)
        .or_else(|| {
            item.get("risk_level")
                .and_then(Value::as_str)
                .and_then(risk_level_score)
        })
        .unwrap_or(0.0)
}

fn merge_keyed(outputs: &[Value], field: &str) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in outputs
        .iter()
        .filter_map(|o| o.get(field).and_then(Value::as_array))
        .flatten()
    {
        let Some(clause) = item.get("clause").and_then(Value::as_str) else {
            continue;
        };

        match index.get(clause) {
            Some(&pos) => {
                if item_score(item) > item_score(&merged[pos]) {
                    merged[pos] = item.clone();
                }
            }
            None => {
                index.insert(clause.to_string(), merged.len());
                merged.push(item.clone());
            }
        }
    }

    merged
}

/// Reduce the payloads of several steps of one kind into a single payload
pub fn merge_outputs(kind: StepKind, outputs: &[Value]) -> Value {
    match kind {
        StepKind::Validate => {
            let valid = outputs
                .iter()
                .all(|o| o.get("valid").and_then(Value::as_bool).unwrap_or(true));
            json!({ "valid": valid })
        }
        StepKind::Analyze => {
            let risks = merge_keyed(outputs, "risks");
            let overall = outputs
                .iter()
                .filter_map(|o| o.get("overall_score").and_then(Value::as_f64))
                .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
            let mut merged = json!({ "risks": risks });
            if let Some(score) = overall {
                merged["overall_score"] = json!(score);
            }
            merged
        }
        StepKind::Negotiate => json!({ "redlines": merge_keyed(outputs, "redlines") }),
        StepKind::Communicate => {
            let draft = outputs
                .iter()
                .filter_map(|o| o.get("draft").and_then(Value::as_str))
                .find(|d| !d.trim().is_empty())
                .unwrap_or_default();
            json!({ "draft": draft })
        }
    }
}
