pub const SYSTEM_PROMPT: &str = "You are an expert HR assistant.";

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_pos, _)) => &text[..byte_pos],
        None => text,
    }
}

/// User prompt asking for a short fit assessment. The resume is cut to
/// `max_resume_chars` characters to stay within token limits.
pub fn build_user_prompt(job_description: &str, resume_text: &str, max_resume_chars: usize) -> String {
    format!(
        "You are an HR assistant AI.\n\
         Given the following job description and resume, provide a short explanation (3-5 lines)\n\
         about how well the candidate fits the role.\n\
         \n\
         JOB DESCRIPTION:\n\
         {}\n\
         \n\
         RESUME:\n\
         {}\n\
         \n\
         Explain:\n",
        job_description.trim(),
        truncate_chars(resume_text.trim(), max_resume_chars)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("ééé", 2), "éé");
    }

    #[test]
    fn test_prompt_truncates_resume() {
        let resume = format!("{}{}", "a".repeat(1500), "TAIL");
        let prompt = build_user_prompt("Rust engineer", &resume, 1500);

        assert!(prompt.contains("JOB DESCRIPTION:\nRust engineer\n"));
        assert!(prompt.contains(&"a".repeat(1500)));
        assert!(!prompt.contains("TAIL"));
        assert!(prompt.ends_with("Explain:\n"));
    }
}
