//! Draft-07 schema for terminal envelopes.
//!
//! Every terminal envelope must validate before emission; a failure is
//! fatal to the session and surfaces as [`EngineError::SchemaViolation`].

use serde_json::{json, Value};

use super::error::{EngineError, Result};

/// The embedded draft-07 envelope schema.
///
/// Required field names follow the wire shape, which mixes snake_case and
/// camelCase spellings inherited from the serialized format.
pub fn envelope_schema() -> Value {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "PatchEnvelope",
        "type": "object",
        "required": [
            "patch_id",
            "patch_data",
            "attempts",
            "confidenceComponents",
            "breakerState",
            "cascadeDepth",
            "resourceUsage",
            "trendMetadata",
            "success",
            "timestamp"
        ],
        "properties": {
            "patch_id": { "type": "string", "minLength": 1 },
            "patch_data": {
                "type": "object",
                "required": ["language", "original_code", "patched_code"],
                "properties": {
                    "language": { "type": "string" },
                    "original_code": { "type": "string" },
                    "patched_code": { "type": "string" }
                }
            },
            "attempts": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["ts", "success", "note", "breaker_snapshot"],
                    "properties": {
                        "success": { "type": "boolean" },
                        "note": { "type": "string" }
                    }
                }
            },
            "confidenceComponents": {
                "type": "object",
                "required": ["overall", "syntax", "logic", "risk", "calibration_method"],
                "properties": {
                    "overall": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "syntax": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "logic": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "risk": { "type": "number", "minimum": 0.0, "maximum": 1.0 },
                    "calibration_method": { "enum": ["temperature", "beta"] }
                }
            },
            "breakerState": { "enum": ["closed", "half_open", "open"] },
            "cascadeDepth": { "type": "integer", "minimum": 0 },
            "resourceUsage": {
                "type": "object",
                "required": ["limits", "observed"]
            },
            "trendMetadata": {
                "type": "object",
                "required": ["errors_detected", "errors_resolved", "error_trend"],
                "properties": {
                    "errors_detected": { "type": "integer", "minimum": 0 },
                    "errors_resolved": { "type": "integer", "minimum": 0 },
                    "error_trend": {
                        "enum": ["improving", "worsening", "plateauing", "unknown"]
                    }
                }
            },
            "success": { "type": "boolean" },
            "timestamp": { "type": "string", "format": "date-time" },
            "flagged_for_developer": { "type": "boolean" },
            "flaggedForDeveloper": { "type": "boolean" },
            "developer_message": { "type": "string" },
            "developerMessage": { "type": "string" },
            "envelope_hash": { "type": ["string", "null"] }
        }
    })
}

/// Validate a serialized envelope against the draft-07 schema.
pub fn validate_envelope(value: &Value) -> Result<()> {
    let schema = envelope_schema();
    let validator = jsonschema::draft7::new(&schema)
        .map_err(|e| EngineError::SchemaViolation(format!("schema compile failed: {e}")))?;

    if let Some(error) = validator.iter_errors(value).next() {
        return Err(EngineError::SchemaViolation(format!(
            "{} at {}",
            error, error.instance_path
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::envelope::PatchEnvelope;
    use chrono::Utc;
    use uuid::Uuid;

    fn terminal_envelope() -> PatchEnvelope {
        let mut env = PatchEnvelope::new(
            Uuid::new_v4(),
            "javascript",
            "let x = 1",
            "let x = 1;",
            json!({}),
        );
        env.set_timestamp(Utc::now());
        env.set_hash().unwrap();
        env
    }

    #[test]
    fn test_terminal_envelope_validates() {
        let env = terminal_envelope();
        validate_envelope(&env.to_value()).unwrap();
    }

    #[test]
    fn test_missing_required_field_rejected() {
        let mut value = terminal_envelope().to_value();
        value.as_object_mut().unwrap().remove("patch_data");
        let err = validate_envelope(&value).unwrap_err();
        assert!(err.to_string().contains("patch_data"));
    }

    #[test]
    fn test_missing_timestamp_rejected() {
        let env = PatchEnvelope::new(Uuid::new_v4(), "js", "a", "b", json!({}));
        // No timestamp set: serializes as null, which fails the string type.
        assert!(validate_envelope(&env.to_value()).is_err());
    }

    #[test]
    fn test_unknown_breaker_state_rejected() {
        let mut value = terminal_envelope().to_value();
        value["breakerState"] = json!("stuck");
        assert!(validate_envelope(&value).is_err());
    }

    #[test]
    fn test_out_of_range_confidence_rejected() {
        let mut value = terminal_envelope().to_value();
        value["confidenceComponents"]["overall"] = json!(1.5);
        assert!(validate_envelope(&value).is_err());
    }
}
