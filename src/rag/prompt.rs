//! # Prompt Builder
//!
//! Assembles the generation prompt from a question and the retrieved passages:
//!
//! 1. a fixed system instruction (role, grounding rule, citation format)
//! 2. the question, verbatim
//! 3. a numbered reference block built from a budget-limited prefix of the passages
//! 4. a closing directive to cite by number and stay within the references
//!
//! Citation numbers follow retrieval order, so `[n]` in the prompt is always the
//! n-th entry of [`BuiltPrompt::sources`].

use crate::rag::passage::Passage;

/// Longest passage excerpt rendered inside a citation.
pub const DEFAULT_DISPLAY_CHARS: usize = 600;

const SYSTEM_INSTRUCTION: &str = "أنت «عدالة»، مساعد قانوني متخصص في الأنظمة السعودية. \
أجب باللغة العربية الفصحى وبإيجاز، معتمدًا فقط على المراجع النظامية المرفقة، \
ولا تنسب إلى النظام مواد أو أحكامًا غير واردة فيها. \
إذا لم تكفِ المراجع للإجابة فاذكر ذلك صراحةً.";

const QUERY_HEADING: &str = "السؤال:";
const REFERENCES_HEADING: &str = "المراجع:";
const URL_LABEL: &str = "الرابط:";
const ELLIPSIS: &str = "…";

const CLOSING_DIRECTIVE: &str = "التعليمات: استشهد بالمراجع بذكر رقم المرجع بين قوسين مربعين \
بجوار كل معلومة تذكرها، ولا تستخدم أي مصدر غير المراجع المذكورة أعلاه.";

/// A prompt ready for the generation backend plus the passages it cites, in citation order.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltPrompt {
    pub text: String,
    pub sources: Vec<Passage>,
}

#[derive(Debug, Clone)]
pub struct PromptBuilder {
    display_chars: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_DISPLAY_CHARS)
    }
}

impl PromptBuilder {
    pub fn new(display_chars: usize) -> Self {
        Self { display_chars }
    }

    /// Build a prompt for `query` over `passages` (already in retrieval order).
    ///
    /// Passages are accepted in order while their accumulated text length stays
    /// within `max_ctx_chars`; the first passage is always accepted. Lengths are
    /// counted in characters, not bytes.
    pub fn build(&self, query: &str, passages: &[Passage], max_ctx_chars: usize) -> BuiltPrompt {
        let sources = select_within_budget(passages, max_ctx_chars);

        let citations: Vec<String> = sources
            .iter()
            .enumerate()
            .map(|(i, passage)| self.render_citation(i + 1, passage))
            .collect();

        let mut text = String::new();
        text.push_str(SYSTEM_INSTRUCTION);
        text.push_str("\n\n");
        text.push_str(QUERY_HEADING);
        text.push('\n');
        text.push_str(query);
        text.push_str("\n\n");
        text.push_str(REFERENCES_HEADING);
        text.push('\n');
        text.push_str(&citations.join("\n\n"));
        text.push_str("\n\n");
        text.push_str(CLOSING_DIRECTIVE);

        BuiltPrompt { text, sources }
    }

    fn render_citation(&self, number: usize, passage: &Passage) -> String {
        let mut line = format!("[{}] {}\n{}", number, passage.display_title(), self.excerpt(&passage.text));
        if let Some(url) = &passage.url {
            line.push('\n');
            line.push_str(URL_LABEL);
            line.push(' ');
            line.push_str(url);
        }
        line
    }

    fn excerpt(&self, text: &str) -> String {
        let text = text.trim();
        if text.chars().count() <= self.display_chars {
            return text.to_string();
        }
        let mut cut: String = text.chars().take(self.display_chars).collect();
        cut.push_str(ELLIPSIS);
        cut
    }
}

fn select_within_budget(passages: &[Passage], max_ctx_chars: usize) -> Vec<Passage> {
    let mut kept = Vec::new();
    let mut used = 0usize;

    for passage in passages {
        let len = passage.text.chars().count();
        if !kept.is_empty() && used + len > max_ctx_chars {
            break;
        }
        used += len;
        kept.push(passage.clone());
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage_with_text(n: usize, chars: usize) -> Passage {
        Passage::new(&format!("نظام {}", n), None, &"ن".repeat(chars), None)
    }

    #[test]
    fn test_citations_numbered_in_order() {
        let passages = vec![
            Passage::new("نظام العمل", Some("المادة 77"), "إنهاء العقد", Some("https://laws.example/77")),
            Passage::new("نظام المرور", None, "السرعة", None),
            Passage::new("", None, "نص بلا عنوان", None),
        ];
        let prompt = PromptBuilder::default().build("ما حكم إنهاء العقد؟", &passages, 7000);

        assert_eq!(prompt.sources, passages);
        let first = prompt.text.find("[1] المادة 77 — نظام العمل").unwrap();
        let second = prompt.text.find("[2] نظام المرور").unwrap();
        let third = prompt.text.find("[3] قانون غير مُسمّى").unwrap();
        assert!(first < second && second < third);
        assert!(!prompt.text.contains("[4]"));
        assert!(prompt.text.contains("الرابط: https://laws.example/77"));
        assert!(prompt.text.contains("ما حكم إنهاء العقد؟"));
        assert!(prompt.text.ends_with(CLOSING_DIRECTIVE));
    }

    #[test]
    fn test_budget_stops_before_overflow() {
        let passages: Vec<Passage> = (0..5).map(|i| passage_with_text(i, 100)).collect();
        let prompt = PromptBuilder::default().build("سؤال", &passages, 250);
        assert_eq!(prompt.sources.len(), 2);

        let used: usize = prompt.sources.iter().map(|p| p.text.chars().count()).sum();
        assert!(used <= 250);
    }

    #[test]
    fn test_budget_always_keeps_first_passage() {
        let passages = vec![passage_with_text(0, 5000), passage_with_text(1, 10)];
        let prompt = PromptBuilder::default().build("سؤال", &passages, 100);
        assert_eq!(prompt.sources.len(), 1);
        assert_eq!(prompt.sources[0], passages[0]);
    }

    #[test]
    fn test_budget_counts_characters_not_bytes() {
        // 100 Arabic characters are 200 bytes in UTF-8
        let passages = vec![passage_with_text(0, 100), passage_with_text(1, 100)];
        let prompt = PromptBuilder::default().build("سؤال", &passages, 200);
        assert_eq!(prompt.sources.len(), 2);
    }

    #[test]
    fn test_long_text_truncated_with_ellipsis() {
        let passages = vec![passage_with_text(0, 700)];
        let prompt = PromptBuilder::new(600).build("سؤال", &passages, 7000);
        let expected = format!("{}{}", "ن".repeat(600), ELLIPSIS);
        assert!(prompt.text.contains(&expected));
        assert!(!prompt.text.contains(&"ن".repeat(601)));
    }

    #[test]
    fn test_empty_passages_keep_directive() {
        let prompt = PromptBuilder::default().build("سؤال", &[], 7000);
        assert!(prompt.sources.is_empty());
        assert!(!prompt.text.contains("[1]"));
        assert!(prompt.text.contains(REFERENCES_HEADING));
        assert!(prompt.text.ends_with(CLOSING_DIRECTIVE));
    }
}
