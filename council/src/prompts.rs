//! Prompt assembly for every model-facing call.
//!
//! All builders are pure text functions; message framing and dispatch stay
//! in the pipeline. The ranking prompt carries the parse contract for
//! ballots, so its wording and `parse_ranking` must move together.

use crate::review::{AggregateRanking, AnonymizationMap};
use crate::types::CouncilSet;

/// Search findings are folded into council prompts up to this many chars.
pub const SEARCH_CONTEXT_CHARS: usize = 12000;
/// Synthesis text is compressed to this many chars for the infographic.
pub const SYNOPSIS_CHARS: usize = 2000;
pub const TITLE_MAX_CHARS: usize = 50;
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Stage 0 gate: strict YES/NO verdict on whether the question needs
/// fresh information from the web.
pub fn search_gate_prompt(question: &str) -> String {
    format!(
        r#"Determine if this question requires real-time web search to answer properly.

Question: {question}

Answer YES if the question:
- Asks about recent events, news, or current information
- Asks about specific dates, prices, or statistics that change over time
- Asks about people, companies, or products that require up-to-date information
- Cannot be answered well with stable background knowledge

Answer NO if the question:
- Is about general knowledge, concepts, or theory
- Is about coding, math, or technical problems
- Is asking for opinions or creative content
- Can be answered with historical or stable information

Respond with ONLY "YES" or "NO", nothing else."#
    )
}

/// Stage 0 research brief for the search-capable model.
pub fn search_prompt(question: &str) -> String {
    format!(
        r#"You are a professional research assistant. Conduct a thorough and comprehensive web search to gather all relevant information about the following question.

Question: {question}

Your research should include:

## 1. Core Facts & Background
- Define key terms and concepts
- Provide essential background information
- Include relevant statistics, numbers, and data points

## 2. Current State & Recent Developments
- Latest news and updates (within the past year)
- Current trends and market conditions if applicable
- Recent changes or announcements

## 3. Multiple Perspectives & Analysis
- Different viewpoints on the topic
- Expert opinions and analysis
- Pros and cons if applicable
- Controversies or debates surrounding the topic

## 4. Practical Information
- How-to guides or step-by-step processes if relevant
- Best practices and recommendations
- Common mistakes or misconceptions to avoid

## 5. Sources & References
- Cite all sources with URLs where possible
- Prioritize authoritative sources (official websites, academic papers, reputable news outlets)
- Include publication dates for time-sensitive information

Be thorough and detailed. The information you gather will be used by multiple AI models to formulate a comprehensive answer, so completeness is crucial.

Respond in the language of the question."#
    )
}

/// Wrap a question with stage 0 findings so council members see the search
/// context without mistaking it for the user's words.
pub fn augment_with_search(question: &str, search_context: &str) -> String {
    format!(
        r#"Here is relevant information from a web search that may help answer this question:

--- Web Search Results ---
{search_context}
--- End of Search Results ---

User's Question: {question}

Please use the search results above as context when formulating your response, but also apply your own knowledge and analysis."#
    )
}

/// Stage 2 ballot request. Responses appear in label order; the trailing
/// format contract is what `parse_ranking` expects.
pub fn ranking_prompt(question: &str, map: &AnonymizationMap, responses: &CouncilSet) -> String {
    let packet: Vec<String> = map
        .entries()
        .map(|(label, model)| {
            let text = responses.get(model).map(|r| r.text.as_str()).unwrap_or("");
            format!("{label}:\n{text}")
        })
        .collect();
    let packet = packet.join("\n\n");

    format!(
        r#"You are evaluating different responses to the following question:

Question: {question}

Here are the responses from different models (anonymized):

{packet}

Your task:
1. First, evaluate each response individually. For each response, explain what it does well and what it does poorly.
2. Then, at the very end of your response, provide a final ranking.

IMPORTANT: Your final ranking MUST be formatted EXACTLY as follows:
- Start with the line "FINAL RANKING:" (all caps, with colon)
- Then list the responses from best to worst as a numbered list
- Each line should be: number, period, space, then ONLY the response label (e.g., "1. Response A")
- Do not add any other text or explanations in the ranking section

Example of the correct format for your ENTIRE response:

Response A ... (evaluation)
Response B ... (evaluation)
Response C ... (evaluation)

FINAL RANKING:
1. Response C
2. Response A
3. Response B

Now provide your evaluation and ranking:"#
    )
}

/// Stage 3 synthesis brief. Identities are revealed here: the chairman sees
/// who wrote what, the raw peer reviews, and the aggregate standing.
pub fn chairman_prompt(
    question: &str,
    council: &CouncilSet,
    reviews: Option<&CouncilSet>,
    aggregate: Option<&AggregateRanking>,
) -> String {
    let mut responses_text = String::new();
    for result in council.ok_results() {
        responses_text.push_str(&format!("Model ({}):\n{}\n\n", result.model, result.text));
    }

    let mut review_section = String::new();
    if let Some(reviews) = reviews {
        review_section.push_str("--- Stage 2: Peer Reviews and Rankings ---\n");
        for result in reviews.ok_results() {
            review_section.push_str(&format!(
                "Reviewer ({}):\n{}\n\n",
                result.model, result.text
            ));
        }
    }
    if let Some(aggregate) = aggregate {
        review_section.push_str("--- Aggregate Ranking (best first) ---\n");
        for (position, entry) in aggregate.entries.iter().enumerate() {
            review_section.push_str(&format!(
                "{}. {} ({}) - {} points\n",
                position + 1,
                entry.label,
                entry.model,
                entry.points
            ));
        }
        review_section.push('\n');
    }
    if review_section.is_empty() {
        review_section.push_str("(Peer review was skipped for this turn.)\n");
    }

    format!(
        r#"You are the Chairman of the LLM Council.
Your goal is to synthesize a final, comprehensive answer to the user's query based on the initial responses from council members and their peer reviews.

User Query: {question}

--- Stage 1: Initial Responses ---
{responses_text}
{review_section}
--- Instructions ---
1. Analyze the user's query and the provided responses.
2. Identify the strengths and weaknesses pointed out in the peer reviews.
3. Synthesize a final answer that combines the best aspects of the council's responses.
4. Resolve any conflicts or disagreements between models based on facts and logic.
5. Provide a single, high-quality response that directly answers the user.

Respond in the language of the question."#
    )
}

pub fn title_prompt(question: &str) -> String {
    format!(
        r#"Generate a very short title (3-5 words maximum) that summarizes the following question.
The title should be concise and descriptive. Do not use quotes or punctuation in the title.

Question: {question}

Title:"#
    )
}

/// Normalize a model-produced title: strip quotes, bound the length, and
/// never return an empty string.
pub fn clean_title(raw: &str) -> String {
    let title = raw.trim().trim_matches(|c| c == '"' || c == '\'').trim();
    if title.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        let head: String = title.chars().take(TITLE_MAX_CHARS - 3).collect();
        return format!("{head}...");
    }
    title.to_string()
}

/// Stage 4 brief for the image model.
pub fn infographic_prompt(question: &str, synthesis: &str) -> String {
    let synopsis = crate::context::truncate_sentence(synthesis, SYNOPSIS_CHARS);
    format!(
        r#"Create a clean, professional infographic that visually summarizes the following information.

Original Question: {question}

Key Information to Visualize:
{synopsis}

Design Requirements:
- Use a clean, modern design style
- Include clear headings and sections
- Use icons or simple graphics to represent key concepts
- Make text legible and well-organized
- Use a professional color scheme (blues, greens, or neutral tones)
- Include the main question at the top
- Organize information in a logical visual hierarchy
- Add source citations if mentioned in the content

Create an infographic image that someone could quickly scan to understand the main points."#
    )
}

/// System prompt for the clarity gate. The verdict must come back as the
/// JSON object `ClarityVerdict` parses.
pub fn clarifier_system_prompt(force_followup: bool) -> String {
    let mut prompt = r#"You are an expert intent analyst for a multi-model deliberation system.
Your job is to determine if the user's latest request is specific and clear enough to be discussed by a council of models and then synthesized into one answer.

The user might ask vague questions like "Tell me about AI" or "Best laptop".

If the request is VAGUE or AMBIGUOUS:
- Set "sufficient" to false.
- Provide "reasoning" on why it is vague.
- Generate 1-2 specific, clarifying questions in "questions" to help the user narrow down their intent.
- For each question, provide 2-4 "options" (selectable choices) that the user can pick to answer easily.
- The tone should be helpful and inquisitive.

If the request is CLEAR and SPECIFIC (or if the conversation history clarifies it):
- Set "sufficient" to true.
- Provide "reasoning".
- Extract the "refined_topic" that summarizes the specific intent.

MULTI-TURN CLARIFICATION:
- If the user has provided answers to previous clarification questions, evaluate whether those answers are sufficient.
- Do NOT automatically accept the first answer as sufficient.
- If the user's answer is still broad, ask more follow-up questions.
- Continue asking until you have a precise, actionable topic for the council.

Output MUST be a valid JSON object with this structure:
{
    "sufficient": bool,
    "reasoning": str,
    "questions": [
        {
            "text": "Question text here?",
            "options": ["Option 1", "Option 2", "Option 3"]
        }
    ],
    "refined_topic": str (optional)
}"#
        .to_string();

    if force_followup {
        prompt.push_str(
            r#"

CRITICAL INSTRUCTION: FORCE FOLLOW-UP
The system has determined that at least one more round of clarification is needed.
Even if the user's answer seems reasonably clear, you must find an angle to ask deeper questions.
Do not set "sufficient" to true.
Find a nuance, a constraint, or a preference that has not been specified yet and ask about it.
Limit yourself to 1 or 2 high-impact questions. Do not overwhelm the user."#,
        );
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ModelId, ProviderResult};

    #[test]
    fn test_search_gate_prompt_demands_binary_answer() {
        let prompt = search_gate_prompt("What is the price of gold today?");
        assert!(prompt.contains("What is the price of gold today?"));
        assert!(prompt.contains(r#"Respond with ONLY "YES" or "NO""#));
    }

    #[test]
    fn test_augment_fences_search_context() {
        let augmented = augment_with_search("the question", "the findings");
        assert!(augmented.contains("--- Web Search Results ---"));
        assert!(augmented.contains("the findings"));
        assert!(augmented.contains("--- End of Search Results ---"));
        assert!(augmented.contains("User's Question: the question"));
    }

    #[test]
    fn test_ranking_prompt_lists_responses_in_label_order() {
        let models = vec![ModelId::from("m/one"), ModelId::from("m/two")];
        let map = AnonymizationMap::new(&models, 4);
        let set = CouncilSet::new(vec![
            ProviderResult::ok(ModelId::from("m/one"), "first answer".into(), 5),
            ProviderResult::ok(ModelId::from("m/two"), "second answer".into(), 5),
        ]);

        let prompt = ranking_prompt("q", &map, &set);
        assert!(prompt.contains("FINAL RANKING:"));
        let a = prompt.find("Response A:").unwrap();
        let b = prompt.find("Response B:").unwrap();
        assert!(a < b);
        assert!(prompt.contains("first answer"));
        assert!(prompt.contains("second answer"));
        // Identities never leak into the review packet.
        assert!(!prompt.contains("m/one"));
        assert!(!prompt.contains("m/two"));
    }

    #[test]
    fn test_chairman_prompt_reveals_identities() {
        let set = CouncilSet::new(vec![ProviderResult::ok(
            ModelId::from("m/one"),
            "answer".into(),
            5,
        )]);
        let map = AnonymizationMap::new(&[ModelId::from("m/one")], 9);
        let aggregate = crate::review::aggregate_rankings(&[], &map);

        let prompt = chairman_prompt("q", &set, None, Some(&aggregate));
        assert!(prompt.contains("Model (m/one):"));
        assert!(prompt.contains("Aggregate Ranking"));
    }

    #[test]
    fn test_chairman_prompt_notes_skipped_review() {
        let set = CouncilSet::new(vec![ProviderResult::ok(
            ModelId::from("m/one"),
            "answer".into(),
            5,
        )]);
        let prompt = chairman_prompt("q", &set, None, None);
        assert!(prompt.contains("Peer review was skipped"));
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("  \"Rust Memory Model\"  "), "Rust Memory Model");
        assert_eq!(clean_title(""), DEFAULT_TITLE);
        let long = "t".repeat(80);
        let cleaned = clean_title(&long);
        assert_eq!(cleaned.chars().count(), TITLE_MAX_CHARS);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn test_infographic_prompt_caps_synopsis() {
        let synthesis = "sentence. ".repeat(1000);
        let prompt = infographic_prompt("q", &synthesis);
        assert!(prompt.len() < synthesis.len());
        assert!(prompt.contains("Original Question: q"));
    }

    #[test]
    fn test_clarifier_force_followup_appends_block() {
        let normal = clarifier_system_prompt(false);
        let forced = clarifier_system_prompt(true);
        assert!(!normal.contains("FORCE FOLLOW-UP"));
        assert!(forced.contains("FORCE FOLLOW-UP"));
        assert!(forced.starts_with(&normal));
    }
}
