//! Prompt text for the summarization, relevance and labelling calls.

/// Article text beyond this many characters is not sent to the model.
pub const MAX_ARTICLE_CHARS: usize = 20_000;

/// Per-summary cap when sampling a cluster for labelling.
pub const MAX_LABEL_SUMMARY_CHARS: usize = 500;

pub const SUMMARY_SYSTEM_PROMPT: &str = r#"You are an expert analyst specializing in content discoverability and digital media.
Your task is to summarize articles by extracting and preserving ALL information related to discoverability
while removing irrelevant, non-substantive content.

Focus on:
- Content discovery mechanisms, algorithms, and platforms
- Discoverability challenges and solutions
- Search, recommendation, and curation systems
- Cultural content accessibility and visibility
- Platform policies affecting content discoverability
- Technology and AI in content discovery
- Creative industry discoverability issues
- Metadata, SEO, and content optimization

Remove:
- Marketing fluff and promotional language
- Biographical information not related to discoverability
- Company history unless directly relevant
- General background that doesn't relate to discoverability
- Redundant or repetitive statements

Provide a concise but comprehensive summary that preserves all discoverability-related details."#;

pub const RELEVANCE_SYSTEM_PROMPT: &str = r#"You are an expert in culture, creative industries, and cultural content.

Your task is to determine if an article is relevant to culture and creative industries for a study about DISCOVERABILITY.

RELEVANT articles discuss:
- Cultural content (e.g. film, TV, music, books, art, theater, museums, heritage)
- Creative industries (e.g. media, publishing, entertainment, gaming, fashion)
- Cultural policies and funding
- Arts organizations and cultural institutions
- Cultural content platforms and distribution
- Cultural participation and access
- Cultural diversity and representation

NOT RELEVANT articles focus primarily on:
- General tourism (unless discussing cultural tourism/heritage sites)
- Job market/employment (unless cultural sector jobs)
- General business/economics (unless cultural economics)
- Technology in general (unless for cultural content)
- Politics in general (unless cultural policy)

Answer ONLY with "YES" or "NO"."#;

pub const LABEL_SYSTEM_PROMPT: &str =
    "You are an expert in topic modeling and content analysis.";

pub fn summary_user_prompt(title: &str, url: &str, text: &str) -> String {
    let text = truncate_chars(text, MAX_ARTICLE_CHARS);
    format!(
        "Article Title: {title}\nArticle URL: {url}\n\nArticle Text:\n{text}\n\n\
         Please provide a focused summary extracting all discoverability-related information."
    )
}

pub fn relevance_user_prompt(title: &str, summary: &str) -> String {
    format!(
        "Title: {title}\n\nSummary: {summary}\n\n\
         Is this article relevant to culture and creative industries?"
    )
}

pub fn label_user_prompt(summaries: &[&str], keywords: &[String]) -> String {
    let documents = summaries
        .iter()
        .map(|s| format!("- {}", truncate_chars(s, MAX_LABEL_SUMMARY_CHARS)))
        .collect::<Vec<_>>()
        .join("\n");
    let keywords = if keywords.is_empty() {
        "(none)".to_string()
    } else {
        keywords.join(", ")
    };

    format!(
        "I have a topic that contains the following documents:\n{documents}\n\n\
         The topic is described by the following keywords: {keywords}\n\n\
         Based on the documents and keywords, create a short, descriptive label for this topic.\n\
         Focus on discoverability, content discovery, and media/creative industries themes.\n\
         The label should be 2-5 words, clear and specific.\n\n\
         Topic label:"
    )
}

pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    #[test]
    fn label_prompt_lists_documents_and_keywords() {
        let prompt = label_user_prompt(
            &["Streaming services tune recommendations", "Playlists shape discovery"],
            &["streaming".to_string(), "playlist".to_string()],
        );
        assert!(prompt.contains("- Playlists shape discovery"));
        assert!(prompt.contains("keywords: streaming, playlist"));
        assert!(prompt.ends_with("Topic label:"));
    }
}
