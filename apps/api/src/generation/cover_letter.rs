//! Cover-letter request shape and output validation.

use serde::Serialize;
use thiserror::Error;

use crate::generation::prompts::COVER_LETTER_PROMPT_TEMPLATE;
use crate::llm_client::prompts::{GROUNDING_INSTRUCTION, PLAIN_TEXT_INSTRUCTION};
use crate::models::user::User;
use crate::models::vacancy::VacancyCandidate;

/// Letters shorter than this are treated as a failed generation.
const MIN_LETTER_CHARS: usize = 40;

/// Everything the generation service needs for one vacancy.
#[derive(Debug, Clone, Serialize)]
pub struct CoverLetterRequest {
    pub vacancy_title: String,
    pub company_name: String,
    pub requirements: String,
    pub responsibilities: String,
    pub user_experience: String,
    pub user_skills: Vec<String>,
    pub additional_info: Option<String>,
    pub max_length: usize,
}

impl CoverLetterRequest {
    pub fn for_candidate(user: &User, candidate: &VacancyCandidate, max_length: usize) -> Self {
        Self {
            vacancy_title: candidate.title.clone(),
            company_name: candidate.employer.clone(),
            requirements: candidate.requirement.clone().unwrap_or_default(),
            responsibilities: candidate.responsibility.clone().unwrap_or_default(),
            user_experience: user.profile.experience_summary.clone(),
            user_skills: user.profile.skills.clone(),
            additional_info: user.profile.additional_info.clone(),
            max_length,
        }
    }

    pub fn to_prompt(&self) -> String {
        let or_dash = |s: &str| if s.trim().is_empty() { "-".to_string() } else { s.to_string() };

        let company_name = or_dash(&self.company_name);
        let requirements = or_dash(&self.requirements);
        let responsibilities = or_dash(&self.responsibilities);
        let user_experience = or_dash(&self.user_experience);
        let user_skills = or_dash(&self.user_skills.join(", "));
        let additional_info = or_dash(self.additional_info.as_deref().unwrap_or_default());
        let max_length = self.max_length.to_string();

        fill_template(
            COVER_LETTER_PROMPT_TEMPLATE,
            &[
                ("grounding_instruction", GROUNDING_INSTRUCTION),
                ("plain_text_instruction", PLAIN_TEXT_INSTRUCTION),
                ("vacancy_title", &self.vacancy_title),
                ("company_name", &company_name),
                ("requirements", &requirements),
                ("responsibilities", &responsibilities),
                ("user_experience", &user_experience),
                ("user_skills", &user_skills),
                ("additional_info", &additional_info),
                ("max_length", &max_length),
            ],
        )
    }
}

/// Replaces `{name}` placeholders in one pass. Inserted values are never
/// rescanned, so vacancy text containing braces comes through verbatim.
/// Unknown placeholders are left as they are.
fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let filled = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match filled {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LetterRejection {
    #[error("generated letter is empty")]
    Empty,
    #[error("generated letter is too short ({0} chars)")]
    TooShort(usize),
}

/// Trims generator output and fits it into `max_length` characters.
///
/// Over-long letters are cut back to the last sentence end that fits; if no
/// sentence boundary exists in the allowed prefix, the cut falls on the last
/// whitespace instead.
pub fn finalize_letter(raw: &str, max_length: usize) -> Result<String, LetterRejection> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(LetterRejection::Empty);
    }

    let total = text.chars().count();
    let letter = if total <= max_length {
        text.to_string()
    } else {
        truncate_at_boundary(text, max_length)
    };

    let len = letter.chars().count();
    if len < MIN_LETTER_CHARS.min(max_length) {
        return Err(LetterRejection::TooShort(len));
    }
    Ok(letter)
}

fn truncate_at_boundary(text: &str, max_chars: usize) -> String {
    let byte_end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    let prefix = &text[..byte_end];

    if let Some(end) = prefix.rfind(['.', '!', '?']) {
        return prefix[..=end].trim_end().to_string();
    }
    match prefix.rfind(char::is_whitespace) {
        Some(ws) => prefix[..ws].trim_end().to_string(),
        None => prefix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_letter_passes_through_trimmed() {
        let raw = "  Hello, I would love to join your team and build reliable services.  ";
        let letter = finalize_letter(raw, 2000).unwrap();
        assert_eq!(
            letter,
            "Hello, I would love to join your team and build reliable services."
        );
    }

    #[test]
    fn test_vacancy_text_with_placeholders_is_kept_verbatim() {
        let request = CoverLetterRequest {
            vacancy_title: "Backend {company_name} engineer".into(),
            company_name: "Ferris Corp".into(),
            requirements: "Write {max_length} lines of {unknown} code".into(),
            responsibilities: String::new(),
            user_experience: "Five years".into(),
            user_skills: vec!["Rust".into()],
            additional_info: None,
            max_length: 900,
        };
        let prompt = request.to_prompt();
        assert!(prompt.contains("Title: Backend {company_name} engineer"));
        assert!(prompt.contains("Requirements: Write {max_length} lines of {unknown} code"));
        assert!(prompt.contains("Company: Ferris Corp"));
        assert!(prompt.contains("Responsibilities: -"));
        assert!(prompt.contains("At most 900 characters"));
    }

    #[test]
    fn test_empty_output_is_rejected() {
        assert_eq!(finalize_letter("   \n", 2000), Err(LetterRejection::Empty));
    }

    #[test]
    fn test_tiny_output_is_rejected() {
        assert_eq!(finalize_letter("Hi.", 2000), Err(LetterRejection::TooShort(3)));
    }

    #[test]
    fn test_long_letter_cut_at_sentence_end() {
        let raw = "The first sentence is here and it is fine. Second sentence runs well past the limit.";
        let letter = finalize_letter(raw, 60).unwrap();
        assert_eq!(letter, "The first sentence is here and it is fine.");
    }

    #[test]
    fn test_long_letter_without_sentence_end_cut_at_whitespace() {
        let raw = "word ".repeat(30);
        let letter = finalize_letter(&raw, 60).unwrap();
        assert!(letter.chars().count() <= 60);
        assert!(letter.ends_with("word"));
    }

    #[test]
    fn test_truncation_respects_multibyte_chars() {
        let raw = "Здравствуйте! Меня заинтересовала ваша вакансия разработчика на Rust. Готов обсудить детали.";
        let letter = finalize_letter(raw, 70).unwrap();
        assert!(letter.chars().count() <= 70);
        assert!(letter.ends_with('.'));
    }

    #[test]
    fn test_prompt_fills_every_placeholder() {
        let request = CoverLetterRequest {
            vacancy_title: "Rust Engineer".into(),
            company_name: "Ferris Corp".into(),
            requirements: "Tokio".into(),
            responsibilities: String::new(),
            user_experience: "5 years backend".into(),
            user_skills: vec!["Rust".into(), "PostgreSQL".into()],
            additional_info: None,
            max_length: 1500,
        };
        let prompt = request.to_prompt();
        assert!(prompt.contains("Ferris Corp"));
        assert!(prompt.contains("Rust, PostgreSQL"));
        assert!(prompt.contains("At most 1500 characters"));
        assert!(!prompt.contains('{'), "unfilled placeholder in: {prompt}");
    }
}
