//! Intent compilation (spec §4.F, §9 "Natural-language intent parsing"): an
//! ordered list of `(matcher, planner)` pairs over a normalized intent
//! string. No ML, no parser generator — matches the teacher's own
//! `compiler.rs` preference for small, explicit, testable rules
//! (`pagi-evolution/src/compiler.rs`).

use autarch_types::{Plan, Step};

/// One recognized pattern: `matches` tests the lowercased intent, `plan`
/// builds the Plan from the original (unlowercased) intent text so captured
/// symbols keep their casing.
struct Pattern {
    matches: fn(&str) -> bool,
    plan: fn(&str) -> Plan,
}

fn federated_plan(_raw: &str) -> Plan {
    Plan {
        steps: vec![Step {
            tool_name: "start_federated_training".to_string(),
            args: serde_json::json!({ "rounds": "adaptive" }),
            topic_tag: "federated_learning".to_string(),
        }],
    }
}

/// Captures the word immediately following "function" as the optimization
/// target, falling back to the whole intent if no such word is found.
fn optimize_function_plan(raw: &str) -> Plan {
    let target = raw
        .split_whitespace()
        .skip_while(|w| !w.eq_ignore_ascii_case("function"))
        .nth(1)
        .unwrap_or(raw)
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
        .to_string();
    Plan {
        steps: vec![Step {
            tool_name: "analyze_and_patch".to_string(),
            args: serde_json::json!({ "target": target, "goal": "performance" }),
            topic_tag: "optimization".to_string(),
        }],
    }
}

/// Capabilities are taken from the words following "with", comma-or-space
/// separated; empty if the intent names none.
fn symbiotic_plan(raw: &str) -> Plan {
    let capabilities: Vec<String> = raw
        .split_whitespace()
        .skip_while(|w| !w.eq_ignore_ascii_case("with"))
        .skip(1)
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string())
        .filter(|w| !w.is_empty())
        .collect();
    Plan {
        steps: vec![Step {
            tool_name: "initialize_symbiotic_link".to_string(),
            args: serde_json::json!({ "capabilities": capabilities }),
            topic_tag: "symbiosis".to_string(),
        }],
    }
}

const SEED_PATTERNS: &[Pattern] = &[
    Pattern {
        matches: |s| s.contains("federated"),
        plan: federated_plan,
    },
    Pattern {
        matches: |s| s.contains("optimize") && s.contains("function"),
        plan: optimize_function_plan,
    },
    Pattern {
        matches: |s| s.contains("symbiotic"),
        plan: symbiotic_plan,
    },
];

pub struct IntentCompiler {
    default_tool: String,
}

impl IntentCompiler {
    pub fn new(default_tool: impl Into<String>) -> Self {
        Self {
            default_tool: default_tool.into(),
        }
    }

    /// Compiles a raw intent into a Plan. Unmatched intents fall back to a
    /// single-step plan against the configured default tool (spec §9,
    /// `intent.default_tool`).
    pub fn compile(&self, raw_intent: &str) -> Plan {
        let normalized = raw_intent.to_lowercase();
        for pattern in SEED_PATTERNS {
            if (pattern.matches)(&normalized) {
                return (pattern.plan)(raw_intent);
            }
        }
        Plan {
            steps: vec![Step {
                tool_name: self.default_tool.clone(),
                args: serde_json::json!({ "intent": raw_intent }),
                topic_tag: "general".to_string(),
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiler() -> IntentCompiler {
        IntentCompiler::new("echo")
    }

    #[test]
    fn federated_keyword_compiles_single_training_step() {
        let plan = compiler().compile("start federated learning now");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool_name, "start_federated_training");
        assert_eq!(plan.steps[0].topic_tag, "federated_learning");
    }

    #[test]
    fn optimize_function_captures_target_symbol() {
        let plan = compiler().compile("please optimize function parse_header for speed");
        assert_eq!(plan.steps[0].tool_name, "analyze_and_patch");
        assert_eq!(plan.steps[0].args["target"], "parse_header");
        assert_eq!(plan.steps[0].topic_tag, "optimization");
    }

    #[test]
    fn symbiotic_keyword_captures_capabilities() {
        let plan = compiler().compile("initialize symbiotic link with vision, audio");
        assert_eq!(plan.steps[0].tool_name, "initialize_symbiotic_link");
        assert_eq!(
            plan.steps[0].args["capabilities"],
            serde_json::json!(["vision", "audio"])
        );
    }

    #[test]
    fn unmatched_intent_falls_back_to_default_tool() {
        let plan = compiler().compile("echo hello");
        assert_eq!(plan.steps.len(), 1);
        assert_eq!(plan.steps[0].tool_name, "echo");
        assert_eq!(plan.steps[0].topic_tag, "general");
    }

    #[test]
    fn two_submissions_of_same_intent_are_independent_plans() {
        let plan_a = compiler().compile("echo hello");
        let plan_b = compiler().compile("echo hello");
        assert_eq!(plan_a.steps[0].tool_name, plan_b.steps[0].tool_name);
        // Independence here means no shared/memoized state — both plans
        // compile fresh from the same input with no implicit dedup.
    }
}
