//! Strict ingress validation for the wire contract.

use super::model::{AiProcessRequest, AiProcessResponse, LegacyTaskType, TaskProgressUpdate};
use crate::errors::PipelineError;

/// Maximum `context` size accepted, in bytes. Configurable cap per the spec;
/// fixed here since no operator-facing knob was named for it.
pub const MAX_CONTEXT_BYTES: usize = 8 * 1024 * 1024;

/// Parse and validate a wire payload as an [`AiProcessRequest`].
///
/// On a validation failure (the JSON parsed fine but violated a contract
/// invariant) the parsed request is returned alongside the error so callers
/// can still publish a terminal failure result against its `task_id`. On a
/// parse failure there is no request to recover, so the second element is
/// `None`.
///
/// # Errors
/// Returns [`PipelineError::PoisonMessage`] if the JSON cannot be parsed, or
/// [`PipelineError::Validation`] if it parses but violates a contract
/// invariant.
pub fn parse_and_validate_request(
    payload: &[u8],
) -> Result<AiProcessRequest, (PipelineError, Option<AiProcessRequest>)> {
    let request: AiProcessRequest = serde_json::from_slice(payload).map_err(|e| (PipelineError::from(e), None))?;
    if let Err(err) = validate_request(&request) {
        return Err((err, Some(request)));
    }
    Ok(request)
}

/// Validate an already-parsed request.
///
/// # Errors
/// Returns [`PipelineError::Validation`] if `prompt` is empty or `context`
/// exceeds [`MAX_CONTEXT_BYTES`].
pub fn validate_request(request: &AiProcessRequest) -> Result<(), PipelineError> {
    if request.prompt.is_empty() {
        return Err(PipelineError::Validation("prompt must not be empty".into()));
    }
    if request.context.len() > MAX_CONTEXT_BYTES {
        return Err(PipelineError::Validation(format!(
            "context of {} bytes exceeds cap of {MAX_CONTEXT_BYTES} bytes",
            request.context.len()
        )));
    }
    Ok(())
}

/// Validate an [`AiProcessResponse`] before it is published.
///
/// # Errors
/// Returns [`PipelineError::Validation`] if the success/error mutual
/// exclusion invariant is violated, or `importanceLevel`/`progress`-style
/// bounds are out of range.
pub fn validate_response(response: &AiProcessResponse) -> Result<(), PipelineError> {
    if !response.is_well_formed() {
        return Err(PipelineError::Validation(
            "response success flag is inconsistent with result/error presence".into(),
        ));
    }
    if let Some(result) = &response.result {
        if let Some(level) = result.importance_level {
            if !(1..=5).contains(&level) {
                return Err(PipelineError::Validation(format!(
                    "importanceLevel {level} out of range 1..=5"
                )));
            }
        }
        if !(0.0..=1.0).contains(&result.confidence) {
            return Err(PipelineError::Validation(format!(
                "confidence {} out of range 0.0..=1.0",
                result.confidence
            )));
        }
    }
    Ok(())
}

/// Validate a [`TaskProgressUpdate`] before it is published.
///
/// # Errors
/// Returns [`PipelineError::Validation`] if `progress` exceeds 100.
pub fn validate_progress(update: &TaskProgressUpdate) -> Result<(), PipelineError> {
    if update.progress > 100 {
        return Err(PipelineError::Validation(format!(
            "progress {} exceeds 100",
            update.progress
        )));
    }
    Ok(())
}

/// Translate a legacy typed request into the unified contract by prefixing
/// the prompt, per the canonical-unified-contract decision recorded in
/// `DESIGN.md`.
#[must_use]
pub fn apply_legacy_prefix(legacy_type: LegacyTaskType, prompt: &str) -> String {
    format!("{}{}", legacy_type.prompt_prefix(), prompt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::model::RequestMetadata;
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_request(prompt: &str) -> AiProcessRequest {
        AiProcessRequest {
            task_id: Uuid::new_v4(),
            node_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            context: String::new(),
            prompt: prompt.to_string(),
            timestamp: Utc::now(),
            metadata: RequestMetadata::default(),
        }
    }

    #[test]
    fn empty_prompt_is_rejected() {
        let request = sample_request("");
        assert!(matches!(
            validate_request(&request),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn empty_context_is_accepted() {
        let request = sample_request("do the thing");
        assert!(validate_request(&request).is_ok());
    }

    #[test]
    fn oversized_context_is_rejected() {
        let mut request = sample_request("do the thing");
        request.context = "x".repeat(MAX_CONTEXT_BYTES + 1);
        assert!(matches!(
            validate_request(&request),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn malformed_json_is_a_poison_message() {
        let (err, recovered) = parse_and_validate_request(b"{not valid json").unwrap_err();
        assert!(matches!(err, PipelineError::PoisonMessage(_)));
        assert!(recovered.is_none());
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let payload = serde_json::json!({
            "taskId": Uuid::new_v4(),
            "nodeId": Uuid::new_v4(),
            "projectId": Uuid::new_v4(),
            "userId": Uuid::new_v4(),
            "prompt": "do the thing",
            "timestamp": Utc::now(),
            "unexpectedField": "should not be here",
        });
        let (err, recovered) = parse_and_validate_request(payload.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::PoisonMessage(_)));
        assert!(recovered.is_none());
    }

    #[test]
    fn validation_failure_still_recovers_the_parsed_request() {
        let payload = serde_json::json!({
            "taskId": Uuid::new_v4(),
            "nodeId": Uuid::new_v4(),
            "projectId": Uuid::new_v4(),
            "userId": Uuid::new_v4(),
            "context": "",
            "prompt": "",
            "timestamp": Utc::now(),
        });
        let (err, recovered) = parse_and_validate_request(payload.to_string().as_bytes()).unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(recovered.is_some());
    }

    #[test]
    fn legacy_prefix_is_prepended() {
        let out = apply_legacy_prefix(LegacyTaskType::Optimize, "this paragraph");
        assert_eq!(out, "Optimize the following content: this paragraph");
    }
}
