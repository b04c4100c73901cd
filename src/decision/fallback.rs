//! 本地关键词回退：模型不可用或回复为空时给出确定性的回应

use crate::resilience::normalize;

const GREETING: &str = "Hello! I can help you with feasibility studies, business plans and sensitivity analyses for your real-estate projects. What would you like to do?";
const HELP: &str = "I can run a feasibility analysis for a location, prepare a business plan, run a sensitivity analysis on a previous result, compare locations and save your projects. Tell me what you need.";
const THANKS: &str = "You're welcome! Let me know if there is anything else I can do.";
const ANALYSIS: &str = "To run an analysis I need at least the location of the project. Which city should I use?";
const SAVE: &str = "To save a project I need a result to save. Run an analysis first, then ask me to save it.";
const DEFAULT: &str = "I'm having trouble processing your request right now. Could you rephrase it, or tell me which analysis you need?";

/// 按关键词挑选回应；始终返回非空文本
pub fn keyword_response(utterance: &str) -> &'static str {
    let text = normalize(utterance);
    let has = |words: &[&str]| {
        words
            .iter()
            .any(|w| text.split(|c: char| !c.is_alphanumeric()).any(|token| token == *w) || (w.contains(' ') && text.contains(w)))
    };

    if has(&["hello", "hi", "hey", "ciao", "buongiorno", "salve"]) {
        GREETING
    } else if has(&["thanks", "thank you", "grazie"]) {
        THANKS
    } else if has(&["help", "aiuto", "what can you do", "cosa sai fare"]) {
        HELP
    } else if has(&["feasibility", "fattibilità", "business plan", "sensitivity", "sensibilità", "analysis", "analisi"]) {
        ANALYSIS
    } else if has(&["save", "salva"]) {
        SAVE
    } else {
        DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords() {
        assert_eq!(keyword_response("Ciao!"), GREETING);
        assert_eq!(keyword_response("thank you so much"), THANKS);
        assert_eq!(keyword_response("what can you do?"), HELP);
        assert_eq!(keyword_response("Run a feasibility analysis"), ANALYSIS);
        assert_eq!(keyword_response("salva"), SAVE);
        assert_eq!(keyword_response("xyz"), DEFAULT);
        // "this" 不应命中 "hi"
        assert_eq!(keyword_response("this"), DEFAULT);
    }
}
