//! 护栏：回复发出前的事后校验（不拦截技能执行，只决定用户看到的文本与本轮是否算成功）

pub mod checks;
pub mod validator;

pub use checks::{
    apply_fixes, CheckOutcome, ContentSafetyCheck, DisclosureCheck, Fix, ForbiddenActionCheck,
    GuardrailCheck, GuardrailInput, PrivacyCheck, SensitiveDataCheck, Severity, SubstanceCheck,
    UserContext, Violation,
};
pub use validator::{GuardedResponse, GuardrailValidator, ValidationReport};
