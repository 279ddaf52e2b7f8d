// Shared prompt fragments.
// Each service that needs LLM calls defines its own prompts.rs alongside it.

/// Instruction appended to every prompt that writes on the applicant's behalf.
pub const GROUNDING_INSTRUCTION: &str = "\
    CRITICAL: Use only facts present in the applicant profile below. \
    Do NOT invent employers, years of experience, degrees, or skills. \
    If the profile does not support a claim, leave it out.";

/// Instruction that keeps output free of chat-style framing.
pub const PLAIN_TEXT_INSTRUCTION: &str = "\
    Respond with the letter text only. \
    No greeting to the assistant, no markdown, no placeholders like [Name].";
