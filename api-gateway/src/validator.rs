// ==============================================================================
// validator.rs - Run Request Validation (API Gateway)
// ==============================================================================
// Description: Validates run submissions before any Job Record is created
// Author: Matt Barham
// Created: 2026-10-17
// Modified: 2026-10-17
// Version: 1.0.0
// Security: Allowlist-only identifier characters, size limits
// ==============================================================================

use anyhow::Result;
use tracing::debug;

use crate::models::StartRunRequest;

// Limits enforced at the validation layer
const MAX_IDENTIFIER_LENGTH: usize = 128;
const MAX_JOB_NAME_LENGTH: usize = 255;
const MAX_UNITS: usize = 100_000;

pub struct RequestValidator {
    max_units: usize,
}

impl RequestValidator {
    pub fn new() -> Self {
        Self {
            max_units: MAX_UNITS,
        }
    }

    /// Validate a run submission
    pub fn validate_start_run(&self, req: &StartRunRequest) -> Result<()> {
        self.validate_identifier("project", &req.project)?;
        if let Some(run_id) = &req.run_id {
            self.validate_identifier("run_id", run_id)?;
        }
        if req.user_id.trim().is_empty() {
            anyhow::bail!("user_id must not be empty");
        }

        if let Some(name) = &req.job_name {
            if name.chars().count() > MAX_JOB_NAME_LENGTH {
                anyhow::bail!("job_name longer than {} characters", MAX_JOB_NAME_LENGTH);
            }
        }
        if let Some(vcf) = &req.input_vcf {
            self.validate_identifier("input_vcf", vcf)?;
        }

        if req.units.len() > self.max_units {
            anyhow::bail!(
                "Too many work units: {} (max: {})",
                req.units.len(),
                self.max_units
            );
        }
        if let Some(pos) = req.units.iter().position(|u| !u.is_object()) {
            anyhow::bail!("Work unit {} is not a JSON object", pos);
        }

        debug!(
            "Validated run request for project {} ({} unit(s))",
            req.project,
            req.units.len()
        );
        Ok(())
    }

    /// Identifiers become path segments in the blob stores
    fn validate_identifier(&self, field: &str, value: &str) -> Result<()> {
        if value.is_empty() {
            anyhow::bail!("{} must not be empty", field);
        }
        if value.len() > MAX_IDENTIFIER_LENGTH {
            anyhow::bail!("{} longer than {} characters", field, MAX_IDENTIFIER_LENGTH);
        }
        if value.starts_with('.') {
            anyhow::bail!("{} cannot start with '.'", field);
        }
        if let Some(c) = value
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
        {
            anyhow::bail!("{} contains invalid character {:?}", field, c);
        }
        Ok(())
    }
}

impl Default for RequestValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(project: &str) -> StartRunRequest {
        serde_json::from_value(json!({
            "project": project,
            "user_id": "u1",
            "input_vcf": "sample.vcf.gz",
            "units": [{"chrom": "1", "start": 100}]
        }))
        .unwrap()
    }

    #[test]
    fn test_accepts_plain_request() {
        assert!(RequestValidator::new().validate_start_run(&request("cohort-2")).is_ok());
    }

    #[test]
    fn test_rejects_path_like_identifiers() {
        let validator = RequestValidator::new();
        for project in ["../etc", "a/b", "", ".hidden", "with space"] {
            assert!(
                validator.validate_start_run(&request(project)).is_err(),
                "{:?} accepted",
                project
            );
        }
    }

    #[test]
    fn test_unit_limits() {
        let validator = RequestValidator { max_units: 2 };
        let mut req = request("cohort");
        req.units = vec![json!({}), json!({}), json!({})];
        let err = validator.validate_start_run(&req).unwrap_err();
        assert!(err.to_string().contains("Too many work units"));

        req.units = vec![json!({}), json!("bare string")];
        let err = validator.validate_start_run(&req).unwrap_err();
        assert!(err.to_string().contains("Work unit 1"));
    }
}
