// All LLM prompt constants for the Generation module.
// Reuses cross-cutting fragments from llm_client::prompts.

/// System prompt for cover-letter writing.
pub const COVER_LETTER_SYSTEM: &str = "You are an experienced career coach writing short, \
    specific cover letters for job applications on a recruitment platform. \
    Write in the language of the vacancy title. \
    Be concrete and warm, never generic. \
    Do NOT repeat the vacancy text back verbatim.";

/// Cover-letter prompt template.
/// Replace: {grounding_instruction}, {plain_text_instruction}, {vacancy_title},
///          {company_name}, {requirements}, {responsibilities},
///          {user_experience}, {user_skills}, {additional_info}, {max_length}
pub const COVER_LETTER_PROMPT_TEMPLATE: &str = r#"{grounding_instruction}

{plain_text_instruction}

VACANCY:
Title: {vacancy_title}
Company: {company_name}
Requirements: {requirements}
Responsibilities: {responsibilities}

APPLICANT PROFILE (source of truth):
Experience: {user_experience}
Skills: {user_skills}
Additional information: {additional_info}

Write a cover letter for this vacancy.

HARD RULES:
1. At most {max_length} characters including spaces
2. Three short paragraphs at most
3. Mention the company by name once
4. Connect two or three of the applicant's real skills to the requirements above
5. End with a single sentence inviting the employer to get in touch"#;
