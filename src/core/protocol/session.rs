//! Session configuration payload.
//!
//! Built once per session and sent as the first outbound event. The tool
//! names and their required-argument lists are an external contract shared
//! with the model prompt and the tool-call handlers; changing them is a
//! protocol version bump.

use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use super::events::ClientEvent;

/// Transcription model used for input audio.
pub const TRANSCRIPTION_MODEL: &str = "gpt-4o-transcribe";

/// Options accepted by the session builder.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Enable server-side semantic turn detection. When off, turn
    /// boundaries are driven entirely by the client (push-to-talk).
    pub enable_semantic_vad: bool,
}

/// `session.update` payload.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub input_audio_transcription: InputAudioTranscription,
    /// Serialized as `null` when VAD is disabled; the endpoint treats a
    /// missing field as "keep server default", which is not what we want.
    pub turn_detection: Option<TurnDetection>,
    pub tools: Vec<ToolDef>,
}

/// Input audio transcription selector.
#[derive(Debug, Clone, Serialize)]
pub struct InputAudioTranscription {
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    #[serde(rename = "semantic_vad")]
    SemanticVad {
        eagerness: String,
        create_response: bool,
        interrupt_response: bool,
    },
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    fn function(name: &str, description: &str, parameters: serde_json::Value) -> Self {
        Self {
            tool_type: "function".to_string(),
            name: name.to_string(),
            description: description.to_string(),
            parameters,
        }
    }
}

/// Build the initial `session.update` event.
pub fn build_session_update(options: &SessionOptions) -> ClientEvent {
    let turn_detection = options.enable_semantic_vad.then(|| TurnDetection::SemanticVad {
        eagerness: "low".to_string(),
        create_response: true,
        interrupt_response: false,
    });

    ClientEvent::SessionUpdate {
        event_id: Uuid::new_v4().to_string(),
        session: SessionConfig {
            input_audio_transcription: InputAudioTranscription {
                model: TRANSCRIPTION_MODEL.to_string(),
            },
            turn_detection,
            tools: tool_schemas(),
        },
    }
}

/// The fixed, ordered tool list. Order and required-argument sets are part
/// of the external contract.
fn tool_schemas() -> Vec<ToolDef> {
    vec![
        ToolDef::function(
            "get_user_profile",
            "Read the learner profile: level, interests, known vocabulary.",
            json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        ),
        ToolDef::function(
            "update_user_profile",
            "Update one field of the learner profile.",
            json!({
                "type": "object",
                "properties": {
                    "field": { "type": "string" },
                    "value": { "type": "string" }
                },
                "required": ["field", "value"]
            }),
        ),
        ToolDef::function(
            "search_knowledge",
            "Search the reference corpus. Answers that use results must cite them.",
            json!({
                "type": "object",
                "properties": {
                    "query_original": { "type": "string", "description": "Query in the conversation language" },
                    "query_en": { "type": "string", "description": "Query translated to English" }
                },
                "required": ["query_original", "query_en"]
            }),
        ),
        ToolDef::function(
            "log_correction",
            "Record a correction made to the learner's speech.",
            json!({
                "type": "object",
                "properties": {
                    "original": { "type": "string" },
                    "corrected": { "type": "string" },
                    "correction_type": { "type": "string" }
                },
                "required": ["original", "corrected", "correction_type"]
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_json(options: &SessionOptions) -> serde_json::Value {
        serde_json::to_value(build_session_update(options)).unwrap()
    }

    #[test]
    fn test_turn_detection_null_when_vad_disabled() {
        let json = session_json(&SessionOptions::default());
        assert_eq!(json["type"], "session.update");
        assert!(json["session"]["turn_detection"].is_null());
    }

    #[test]
    fn test_semantic_vad_descriptor() {
        let json = session_json(&SessionOptions { enable_semantic_vad: true });
        let td = &json["session"]["turn_detection"];
        assert_eq!(td["type"], "semantic_vad");
        assert_eq!(td["eagerness"], "low");
        assert_eq!(td["create_response"], true);
        assert_eq!(td["interrupt_response"], false);
    }

    #[test]
    fn test_transcription_model_is_fixed() {
        let json = session_json(&SessionOptions::default());
        assert_eq!(
            json["session"]["input_audio_transcription"]["model"],
            TRANSCRIPTION_MODEL
        );
    }

    #[test]
    fn test_tool_order_and_required_arguments() {
        let json = session_json(&SessionOptions::default());
        let tools = json["session"]["tools"].as_array().unwrap();
        let names: Vec<&str> = tools.iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert_eq!(
            names,
            vec!["get_user_profile", "update_user_profile", "search_knowledge", "log_correction"]
        );

        let required = |name: &str| -> Vec<String> {
            tools
                .iter()
                .find(|t| t["name"] == name)
                .unwrap()["parameters"]["required"]
                .as_array()
                .unwrap()
                .iter()
                .map(|v| v.as_str().unwrap().to_string())
                .collect()
        };
        assert!(required("get_user_profile").is_empty());
        assert_eq!(required("update_user_profile"), vec!["field", "value"]);
        assert_eq!(required("search_knowledge"), vec!["query_original", "query_en"]);
        assert_eq!(
            required("log_correction"),
            vec!["original", "corrected", "correction_type"]
        );
    }

    #[test]
    fn test_every_event_has_unique_event_id() {
        let a = session_json(&SessionOptions::default());
        let b = session_json(&SessionOptions::default());
        assert_ne!(a["event_id"], b["event_id"]);
    }
}
