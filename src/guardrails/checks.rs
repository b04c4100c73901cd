//! 护栏检查项
//!
//! 每个检查独立运行，返回自己的得分与违规列表。违规可以携带修正（删除片段或整句），
//! 修正只作用于回复文本，从不改动技能调用。

use std::collections::HashSet;

use regex::Regex;
use serde::Serialize;

use crate::decision::FunctionCall;

/// 违规严重程度；只有 Critical 会让整体校验失败
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// 单项检查出现该级别违规时的得分
    pub fn score(&self) -> f32 {
        match self {
            Severity::Low => 0.8,
            Severity::Medium => 0.6,
            Severity::High => 0.3,
            Severity::Critical => 0.0,
        }
    }
}

/// 对回复文本的修正（字节区间）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fix {
    Redact {
        start: usize,
        end: usize,
        replacement: String,
    },
    /// 删除包含该区间的整句
    DropSentence { start: usize, end: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub check: &'static str,
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<Fix>,
}

/// 单项检查结果
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub check: &'static str,
    pub score: f32,
    pub violations: Vec<Violation>,
}

impl CheckOutcome {
    fn from_violations(check: &'static str, violations: Vec<Violation>) -> Self {
        let score = violations
            .iter()
            .map(|v| v.severity.score())
            .fold(1.0_f32, f32::min);
        Self {
            check,
            score,
            violations,
        }
    }
}

/// 校验时的用户上下文
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserContext {
    pub user_id: String,
    pub session_id: String,
}

impl UserContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
        }
    }
}

pub struct GuardrailInput<'a> {
    pub utterance: &'a str,
    pub response: &'a str,
    pub invocations: &'a [FunctionCall],
    pub user: &'a UserContext,
}

pub trait GuardrailCheck: Send + Sync {
    fn name(&self) -> &'static str;

    fn run(&self, input: &GuardrailInput<'_>) -> CheckOutcome;
}

/// 屏蔽词（不可修正，直接 Critical）
pub struct ContentSafetyCheck {
    blocked_terms: Vec<String>,
}

impl ContentSafetyCheck {
    pub fn new(blocked_terms: &[String]) -> Self {
        Self {
            blocked_terms: blocked_terms
                .iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        }
    }
}

impl GuardrailCheck for ContentSafetyCheck {
    fn name(&self) -> &'static str {
        "content_safety"
    }

    fn run(&self, input: &GuardrailInput<'_>) -> CheckOutcome {
        let lowered = input.response.to_lowercase();
        let violations = self
            .blocked_terms
            .iter()
            .filter(|term| lowered.contains(term.as_str()))
            .map(|term| Violation {
                check: self.name(),
                severity: Severity::Critical,
                message: format!("response mentions blocked topic '{}'", term),
                recommendation: "Do not provide guidance on unlawful activities.".into(),
                fix: None,
            })
            .collect();
        CheckOutcome::from_violations(self.name(), violations)
    }
}

/// 策略禁止的技能调用（调用本身不会被拦截，只影响回复与本轮是否算成功）
pub struct ForbiddenActionCheck {
    forbidden: HashSet<String>,
}

impl ForbiddenActionCheck {
    pub fn new(forbidden: &[String]) -> Self {
        Self {
            forbidden: forbidden.iter().cloned().collect(),
        }
    }
}

impl GuardrailCheck for ForbiddenActionCheck {
    fn name(&self) -> &'static str {
        "forbidden_actions"
    }

    fn run(&self, input: &GuardrailInput<'_>) -> CheckOutcome {
        let violations = input
            .invocations
            .iter()
            .filter(|call| self.forbidden.contains(&call.skill_id))
            .map(|call| Violation {
                check: self.name(),
                severity: Severity::Critical,
                message: format!("skill '{}' is forbidden by policy", call.skill_id),
                recommendation: format!("Remove '{}' from the allowed actions.", call.skill_id),
                fix: None,
            })
            .collect();
        CheckOutcome::from_violations(self.name(), violations)
    }
}

/// 凭据与账户信息泄露：IBAN、API Key、密码
pub struct SensitiveDataCheck {
    patterns: Vec<(&'static str, Regex)>,
}

impl SensitiveDataCheck {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            patterns: vec![
                ("IBAN", Regex::new(r"\b[A-Z]{2}\d{2}(?: ?[A-Z0-9]{4}){3,7}(?: ?[A-Z0-9]{1,3})?\b")?),
                ("API key", Regex::new(r"\b(?:sk|pk|api)[-_][A-Za-z0-9_\-]{16,}\b")?),
                ("password", Regex::new(r"(?i)\b(?:password|passwd|pwd)\s*[:=]\s*\S+")?),
            ],
        })
    }
}

impl GuardrailCheck for SensitiveDataCheck {
    fn name(&self) -> &'static str {
        "sensitive_data"
    }

    fn run(&self, input: &GuardrailInput<'_>) -> CheckOutcome {
        let mut violations = Vec::new();
        for (label, re) in &self.patterns {
            for m in re.find_iter(input.response) {
                violations.push(Violation {
                    check: self.name(),
                    severity: Severity::High,
                    message: format!("response contains what looks like a {}", label),
                    recommendation: "Never echo credentials or account identifiers.".into(),
                    fix: Some(Fix::Redact {
                        start: m.start(),
                        end: m.end(),
                        replacement: "[redacted]".into(),
                    }),
                });
            }
        }
        CheckOutcome::from_violations(self.name(), violations)
    }
}

/// 回复过短或为空
pub struct SubstanceCheck {
    min_chars: usize,
}

impl SubstanceCheck {
    pub fn new(min_chars: usize) -> Self {
        Self { min_chars }
    }
}

impl GuardrailCheck for SubstanceCheck {
    fn name(&self) -> &'static str {
        "substance"
    }

    fn run(&self, input: &GuardrailInput<'_>) -> CheckOutcome {
        let len = input.response.trim().chars().count();
        let severity = if len == 0 {
            Some(Severity::High)
        } else if len < self.min_chars {
            Some(Severity::Medium)
        } else {
            None
        };
        let violations = severity
            .map(|severity| Violation {
                check: self.name(),
                severity,
                message: format!("response has {} characters, expected at least {}", len, self.min_chars),
                recommendation: "Give the user a complete answer.".into(),
                fix: None,
            })
            .into_iter()
            .collect();
        CheckOutcome::from_violations(self.name(), violations)
    }
}

/// 个人数据：卡号样式的 16 位数字、意大利税号；用户自己在本轮说过的不算
pub struct PrivacyCheck {
    card: Regex,
    tax_code: Regex,
}

impl PrivacyCheck {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            card: Regex::new(r"\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{4}\b")?,
            tax_code: Regex::new(r"(?i)\b[A-Z]{6}\d{2}[A-Z]\d{2}[A-Z]\d{3}[A-Z]\b")?,
        })
    }
}

impl GuardrailCheck for PrivacyCheck {
    fn name(&self) -> &'static str {
        "privacy"
    }

    fn run(&self, input: &GuardrailInput<'_>) -> CheckOutcome {
        let mut violations = Vec::new();
        for (label, re) in [("payment card number", &self.card), ("tax code", &self.tax_code)] {
            for m in re.find_iter(input.response) {
                if input.utterance.contains(m.as_str()) {
                    continue;
                }
                violations.push(Violation {
                    check: self.name(),
                    severity: Severity::Medium,
                    message: format!("response contains a {}", label),
                    recommendation: "Remove personal identifiers from the answer.".into(),
                    fix: Some(Fix::Redact {
                        start: m.start(),
                        end: m.end(),
                        replacement: "[removed]".into(),
                    }),
                });
            }
        }
        CheckOutcome::from_violations(self.name(), violations)
    }
}

/// 暴露自动化身份的套话，整句删除
pub struct DisclosureCheck {
    phrases: Regex,
}

impl DisclosureCheck {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            phrases: Regex::new(
                r"(?i)\b(?:as an ai(?: language model)?|as a (?:large )?language model|i am an ai|my system prompt|my training data|in quanto (?:modello linguistico|intelligenza artificiale))\b",
            )?,
        })
    }
}

impl GuardrailCheck for DisclosureCheck {
    fn name(&self) -> &'static str {
        "automation_disclosure"
    }

    fn run(&self, input: &GuardrailInput<'_>) -> CheckOutcome {
        let violations = self
            .phrases
            .find_iter(input.response)
            .map(|m| Violation {
                check: self.name(),
                severity: Severity::Low,
                message: format!("response discloses automation internals: '{}'", m.as_str()),
                recommendation: "Answer directly without talking about the assistant itself.".into(),
                fix: Some(Fix::DropSentence {
                    start: m.start(),
                    end: m.end(),
                }),
            })
            .collect();
        CheckOutcome::from_violations(self.name(), violations)
    }
}

/// 将修正应用到文本：整句删除先换算成区间，重叠区间合并后从后往前替换
pub fn apply_fixes(text: &str, fixes: &[&Fix]) -> String {
    let mut spans: Vec<(usize, usize, String)> = fixes
        .iter()
        .map(|fix| match fix {
            Fix::Redact {
                start,
                end,
                replacement,
            } => (*start, *end, replacement.clone()),
            Fix::DropSentence { start, end } => {
                let (s, e) = sentence_bounds(text, *start, *end);
                (s, e, String::new())
            }
        })
        .filter(|(s, e, _)| s < e && *e <= text.len() && text.is_char_boundary(*s) && text.is_char_boundary(*e))
        .collect();
    spans.sort_by_key(|(s, _, _)| *s);

    let mut merged: Vec<(usize, usize, String)> = Vec::new();
    for span in spans {
        match merged.last_mut() {
            Some(last) if span.0 < last.1 => {
                if span.1 > last.1 {
                    last.1 = span.1;
                }
                if span.2.is_empty() {
                    last.2.clear();
                }
            }
            _ => merged.push(span),
        }
    }

    let mut out = text.to_string();
    for (start, end, replacement) in merged.into_iter().rev() {
        out.replace_range(start..end, &replacement);
    }
    collapse_spaces(&out)
}

fn sentence_bounds(text: &str, start: usize, end: usize) -> (usize, usize) {
    let is_stop = |c: char| matches!(c, '.' | '!' | '?' | '\n');
    let s = text[..start.min(text.len())]
        .char_indices()
        .rev()
        .find(|(_, c)| is_stop(*c))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let e = text[end.min(text.len())..]
        .char_indices()
        .find(|(_, c)| is_stop(*c))
        .map(|(i, c)| end + i + c.len_utf8())
        .unwrap_or(text.len());
    (s, e)
}

fn collapse_spaces(text: &str) -> String {
    text.lines()
        .map(|l| l.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input<'a>(response: &'a str, user: &'a UserContext) -> GuardrailInput<'a> {
        GuardrailInput {
            utterance: "hi",
            response,
            invocations: &[],
            user,
        }
    }

    #[test]
    fn test_card_number_is_medium_with_fix() {
        let user = UserContext::default();
        let outcome = PrivacyCheck::new()
            .unwrap()
            .run(&input("Your card 4111 1111 1111 1111 is on file.", &user));
        assert_eq!(outcome.violations.len(), 1);
        assert_eq!(outcome.violations[0].severity, Severity::Medium);
        let fixes: Vec<&Fix> = outcome.violations.iter().filter_map(|v| v.fix.as_ref()).collect();
        assert_eq!(
            apply_fixes("Your card 4111 1111 1111 1111 is on file.", &fixes),
            "Your card [removed] is on file."
        );
    }

    #[test]
    fn test_card_from_user_is_ignored() {
        let user = UserContext::default();
        let outcome = PrivacyCheck::new().unwrap().run(&GuardrailInput {
            utterance: "my card is 4111111111111111",
            response: "Noted card 4111111111111111.",
            invocations: &[],
            user: &user,
        });
        assert!(outcome.violations.is_empty());
        assert_eq!(outcome.score, 1.0);
    }

    #[test]
    fn test_disclosure_drops_sentence() {
        let user = UserContext::default();
        let text = "As an AI language model, I cannot visit sites. The feasibility looks good.";
        let outcome = DisclosureCheck::new().unwrap().run(&input(text, &user));
        let fixes: Vec<&Fix> = outcome.violations.iter().filter_map(|v| v.fix.as_ref()).collect();
        assert_eq!(apply_fixes(text, &fixes), "The feasibility looks good.");
    }

    #[test]
    fn test_blocked_term_is_critical() {
        let user = UserContext::default();
        let outcome = ContentSafetyCheck::new(&["money laundering".to_string()])
            .run(&input("Here is how money laundering works", &user));
        assert_eq!(outcome.violations[0].severity, Severity::Critical);
        assert_eq!(outcome.score, 0.0);
    }

    #[test]
    fn test_substance_and_secrets() {
        let user = UserContext::default();
        assert_eq!(SubstanceCheck::new(12).run(&input("ok", &user)).violations[0].severity, Severity::Medium);
        assert_eq!(SubstanceCheck::new(12).run(&input("  ", &user)).violations[0].severity, Severity::High);

        let outcome = SensitiveDataCheck::new()
            .unwrap()
            .run(&input("Use password: hunter2 to log in", &user));
        assert_eq!(outcome.violations[0].severity, Severity::High);
    }
}
