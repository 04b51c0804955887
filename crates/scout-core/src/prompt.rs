//! Prompts that seed a research conversation.

use std::fmt::Write;

use crate::research::ResearchQuery;

pub const SYSTEM_PROMPT: &str = "\
You are a research assistant that builds reliable profiles of music festivals.

Work in small steps: search, read the pages you find, and follow links that are \
likely to lead to the requested information. Prefer the festival's own website \
and well-known sources over aggregators.

Rules:
- Only report LinkedIn URLs you have passed through the URL validation tool.
- Do not repeat a tool call with identical input; its result will not change.
- Tool results that contain an \"error\" field failed. Try another approach \
  instead of retrying the same call.
- When every requested category is covered, or further searching is unlikely \
  to help, stop calling tools and reply with a short summary of what you found.";

/// Human-readable description of a well-known `targetInfo` category.
pub fn describe_target(target: &str) -> Option<&'static str> {
    let description = match target {
        "linkedin_company" => {
            "the LinkedIn company page of the festival or of the company that organizes it"
        }
        "linkedin_organizers" => {
            "LinkedIn profiles of the people who organize, book or run the festival"
        }
        "linkedin_event" => "LinkedIn event pages for past or upcoming editions",
        "website" => "the official festival website",
        "social_media" => {
            "official social media accounts (Instagram, Facebook, X, TikTok, YouTube)"
        }
        "contact" => "public contact details such as press or booking email addresses",
        "organizer" => "the legal entity or promoter that organizes the festival",
        "dates" => "the dates of the next edition",
        "location" => "the venue and city",
        _ => return None,
    };
    Some(description)
}

/// Build the opening user message for a validated query.
pub fn research_prompt(query: &ResearchQuery) -> String {
    let mut prompt = String::new();

    let _ = writeln!(prompt, "Research the music festival \"{}\".", query.festival_name);
    if let Some(id) = &query.festival_id {
        let _ = writeln!(prompt, "Internal festival id: {}", id);
    }

    prompt.push_str("\nInformation to find:\n");
    for target in &query.target_info {
        match describe_target(target) {
            Some(description) => {
                let _ = writeln!(prompt, "- {} ({})", target, description);
            }
            None => {
                let _ = writeln!(prompt, "- {}", target);
            }
        }
    }

    let _ = writeln!(
        prompt,
        "\nFollow links at most {} hop{} away from pages you find through search.",
        query.max_depth,
        if query.max_depth == 1 { "" } else { "s" }
    );
    let _ = write!(prompt, "Priority: {}.", query.priority);

    prompt
}
