//! 护栏校验器
//!
//! validate：运行全部检查，得分取平均，只要有 Critical 违规即不通过。
//! enforce：不通过或存在可修正的违规时做一次修正（只改回复文本），重新校验；仍不通过则换成安全拒答。

use serde::Serialize;

use crate::config::GuardrailsSection;
use crate::decision::FunctionCall;

use super::checks::*;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub score: f32,
    pub violations: Vec<Violation>,
    pub recommendations: Vec<String>,
}

impl ValidationReport {
    pub fn has_critical(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Critical)
    }
}

/// enforce 的结果：最终给用户的文本与对应的校验报告
#[derive(Debug, Clone, Serialize)]
pub struct GuardedResponse {
    pub text: String,
    pub report: ValidationReport,
    pub corrected: bool,
    pub refused: bool,
}

pub struct GuardrailValidator {
    checks: Vec<Box<dyn GuardrailCheck>>,
    refusal_message: String,
}

impl GuardrailValidator {
    /// 无检查项的校验器，用 with_check 逐个添加
    pub fn empty(refusal_message: impl Into<String>) -> Self {
        Self {
            checks: Vec::new(),
            refusal_message: refusal_message.into(),
        }
    }

    /// 标准检查组合
    pub fn from_config(cfg: &GuardrailsSection) -> Result<Self, regex::Error> {
        Ok(Self::empty(cfg.refusal_message.clone())
            .with_check(ContentSafetyCheck::new(&cfg.blocked_terms))
            .with_check(ForbiddenActionCheck::new(&cfg.forbidden_skills))
            .with_check(SensitiveDataCheck::new()?)
            .with_check(SubstanceCheck::new(cfg.min_response_chars))
            .with_check(PrivacyCheck::new()?)
            .with_check(DisclosureCheck::new()?))
    }

    pub fn with_check(mut self, check: impl GuardrailCheck + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn refusal_message(&self) -> &str {
        &self.refusal_message
    }

    pub fn validate(
        &self,
        utterance: &str,
        response: &str,
        invocations: &[FunctionCall],
        user: &UserContext,
    ) -> ValidationReport {
        let input = GuardrailInput {
            utterance,
            response,
            invocations,
            user,
        };
        let outcomes: Vec<CheckOutcome> = self.checks.iter().map(|c| c.run(&input)).collect();

        let score = if outcomes.is_empty() {
            1.0
        } else {
            outcomes.iter().map(|o| o.score).sum::<f32>() / outcomes.len() as f32
        };
        let violations: Vec<Violation> = outcomes.into_iter().flat_map(|o| o.violations).collect();
        let mut recommendations: Vec<String> = Vec::new();
        for v in &violations {
            if !recommendations.contains(&v.recommendation) {
                recommendations.push(v.recommendation.clone());
            }
        }
        let passed = !violations.iter().any(|v| v.severity == Severity::Critical);

        ValidationReport {
            passed,
            score,
            violations,
            recommendations,
        }
    }

    pub fn enforce(
        &self,
        utterance: &str,
        response: &str,
        invocations: &[FunctionCall],
        user: &UserContext,
    ) -> GuardedResponse {
        let report = self.validate(utterance, response, invocations, user);
        let fixable = report.violations.iter().any(|v| v.fix.is_some());
        if report.passed && !fixable {
            return GuardedResponse {
                text: response.to_string(),
                report,
                corrected: false,
                refused: false,
            };
        }

        let fixes: Vec<&Fix> = report.violations.iter().filter_map(|v| v.fix.as_ref()).collect();
        let corrected = apply_fixes(response, &fixes);
        let second = self.validate(utterance, &corrected, invocations, user);

        if second.passed && !corrected.is_empty() {
            tracing::info!(
                user = %user.user_id,
                removed = fixes.len(),
                score = second.score,
                "guardrail correction applied"
            );
            return GuardedResponse {
                text: corrected,
                report: second,
                corrected: true,
                refused: false,
            };
        }

        tracing::warn!(
            user = %user.user_id,
            violations = ?second.violations.iter().map(|v| v.check).collect::<Vec<_>>(),
            "response replaced by refusal"
        );
        GuardedResponse {
            text: self.refusal_message.clone(),
            report: ValidationReport {
                passed: false,
                ..second
            },
            corrected: false,
            refused: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn validator() -> GuardrailValidator {
        let cfg = GuardrailsSection {
            forbidden_skills: vec!["wire_transfer".into()],
            ..Default::default()
        };
        GuardrailValidator::from_config(&cfg).unwrap()
    }

    fn user() -> UserContext {
        UserContext::new("u1", "s1")
    }

    #[test]
    fn test_clean_response_passes_untouched() {
        let text = "The feasibility study for Turin shows a positive return.";
        let guarded = validator().enforce("feasibility Turin", text, &[], &user());
        assert_eq!(guarded.text, text);
        assert!(guarded.report.passed);
        assert!(!guarded.corrected);
        assert_eq!(guarded.report.score, 1.0);
        assert_eq!(validator().check_names().len(), 6);
    }

    #[test]
    fn test_card_number_is_corrected_not_refused() {
        let text = "Payment registered with card 5500-0000-0000-0004, thank you for your order.";
        let report = validator().validate("pay", text, &[], &user());
        assert!(report.passed);
        assert!(report.violations.iter().any(|v| v.check == "privacy" && v.severity == Severity::Medium));
        assert!(report.score < 1.0);

        let guarded = validator().enforce("pay", text, &[], &user());
        assert!(guarded.corrected);
        assert!(!guarded.refused);
        assert!(!guarded.text.contains("5500"));
        assert!(guarded.text.starts_with("Payment registered with card"));
        assert!(guarded.text.ends_with("thank you for your order."));
    }

    #[test]
    fn test_critical_content_is_refused() {
        let v = validator();
        let guarded = v.enforce("how?", "Sure, here is how tax evasion can be arranged.", &[], &user());
        assert!(guarded.refused);
        assert!(!guarded.report.passed);
        assert_eq!(guarded.text, v.refusal_message());
    }

    #[test]
    fn test_forbidden_invocation_fails_but_is_reported() {
        let call = FunctionCall {
            skill_id: "wire_transfer".into(),
            arguments: Map::new(),
            confidence: 0.9,
            reasoning: String::new(),
        };
        let report = validator().validate("send money", "Transfer completed successfully.", &[call], &user());
        assert!(!report.passed);
        assert!(report.has_critical());
        assert!(!report.recommendations.is_empty());
    }
}
