use crate::extraction::JsonObject;
use crate::prompts::Intensity;

/// What a free-text request to the smart entry asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Generate { description: String },
    Refine { feedback: String },
    Shrink { intensity: Intensity },
    List,
    View { persona_id: Option<String> },
    Activate { persona_id: Option<String> },
    Delete { persona_id: Option<String> },
    Rollback,
    Status,
    Apply,
    Cancel,
    Help,
    /// The classifier failed or named an action outside the fixed set.
    Unrecognized { action: Option<String> },
}

/// Context handed to the classifier alongside the query.
#[derive(Debug, Clone, Default)]
pub struct IntentContext {
    pub current_persona_id: Option<String>,
    pub persona_list: Vec<String>,
    pub has_pending: bool,
}

impl IntentContext {
    /// Comma separated list capped at ten ids.
    pub fn persona_list_text(&self) -> String {
        if self.persona_list.is_empty() {
            return "无".to_string();
        }
        let mut text = self.persona_list.iter().take(10).cloned().collect::<Vec<_>>().join(", ");
        if self.persona_list.len() > 10 {
            text.push_str(&format!(" (共 {} 个)", self.persona_list.len()));
        }
        text
    }
}

fn field(obj: &JsonObject, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

impl Intent {
    /// Map the classifier's JSON to an intent. Empty description or feedback
    /// fall back to the raw query.
    pub fn from_json(obj: &JsonObject, query: &str) -> Self {
        let Some(action) = field(obj, "action") else {
            return Intent::Unrecognized { action: None };
        };
        match action.to_lowercase().as_str() {
            "generate" => Intent::Generate {
                description: field(obj, "description").unwrap_or_else(|| query.to_string()),
            },
            "refine" => Intent::Refine {
                feedback: field(obj, "feedback").unwrap_or_else(|| query.to_string()),
            },
            "shrink" => Intent::Shrink {
                intensity: field(obj, "intensity").map(|s| Intensity::parse(&s)).unwrap_or_default(),
            },
            "list" => Intent::List,
            "view" => Intent::View { persona_id: field(obj, "persona_id") },
            "activate" => Intent::Activate { persona_id: field(obj, "persona_id") },
            "delete" => Intent::Delete { persona_id: field(obj, "persona_id") },
            "rollback" => Intent::Rollback,
            "status" => Intent::Status,
            "apply" => Intent::Apply,
            "cancel" => Intent::Cancel,
            "help" => Intent::Help,
            _ => Intent::Unrecognized { action: Some(action) },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: serde_json::Value) -> JsonObject {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_generate_falls_back_to_query() {
        let i = Intent::from_json(&obj(json!({"action": "generate", "description": ""})), "傲娇猫娘");
        assert_eq!(i, Intent::Generate { description: "傲娇猫娘".into() });
    }

    #[test]
    fn test_shrink_intensity() {
        let i = Intent::from_json(&obj(json!({"action": "shrink", "intensity": "极限"})), "");
        assert_eq!(i, Intent::Shrink { intensity: Intensity::Extreme });
        let i = Intent::from_json(&obj(json!({"action": "SHRINK"})), "");
        assert_eq!(i, Intent::Shrink { intensity: Intensity::Light });
    }

    #[test]
    fn test_optional_persona_id() {
        let i = Intent::from_json(&obj(json!({"action": "activate", "persona_id": " "})), "");
        assert_eq!(i, Intent::Activate { persona_id: None });
        let i = Intent::from_json(&obj(json!({"action": "delete", "persona_id": "qp_a"})), "");
        assert_eq!(i, Intent::Delete { persona_id: Some("qp_a".into()) });
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(Intent::from_json(&obj(json!({})), "x"), Intent::Unrecognized { action: None });
        assert_eq!(
            Intent::from_json(&obj(json!({"action": "dance"})), "x"),
            Intent::Unrecognized { action: Some("dance".into()) }
        );
        assert_eq!(Intent::from_json(&obj(json!({"action": 3})), "x"), Intent::Unrecognized { action: None });
    }

    #[test]
    fn test_persona_list_text_caps_at_ten() {
        let ctx = IntentContext {
            persona_list: (0..12).map(|i| format!("p{}", i)).collect(),
            ..Default::default()
        };
        let text = ctx.persona_list_text();
        assert!(text.starts_with("p0, p1"));
        assert!(!text.contains("p10,"));
        assert!(text.ends_with("(共 12 个)"));
        assert_eq!(IntentContext::default().persona_list_text(), "无");
    }
}
