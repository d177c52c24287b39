//! Prompt text for each backend step.

use batching::records::ChunkSummaryRecord;
use batching::Chunk;

pub const CHUNK_SYSTEM: &str = "\
You summarize a batch of customer reviews about one project.
Rules:
- Stay neutral and factual. Use only what the reviews below say.
- Never invent amenities, prices or facts that no review mentions.
- Phrase complaints as neutral watch-outs.
- No marketing language.
Reply with a single JSON object that matches the provided schema.";

pub const PROJECT_SYSTEM: &str = "\
You write one project-level summary from several partial summaries of customer reviews.
Rules:
- Merge points that repeat across partial summaries.
- Stay neutral and factual. Claim nothing the partial summaries do not support.
- Phrase complaints as neutral watch-outs.
- headline: at most 90 characters.
- overall_summary: 150-250 words.
- top_highlights: 4-7 items. watchouts_or_gaps: 2-6. best_for: 2-5. not_ideal_for: 1-4. evidence_notes: 3-8.
Reply with a single JSON object that matches the provided schema.";

pub const TAG_SYSTEM: &str = "\
You write short display tags for customer reviews of a project.
Rules for every review:
- Exactly 3 tags.
- Each tag is 2-4 words in Title Case.
- No emojis and no personal names.
- Ground every tag in that review's text only.
- Tag 1: persona or intent. Tag 2: primary value. Tag 3: secondary value or experience.
- Soften negatives into neutral phrasing such as \"Needs Better Maintenance\".
Reply with a single JSON object that matches the provided schema.";

/// Appended to the system prompt on the second summary attempt.
pub const STRICT_JSON_SUFFIX: &str = "\n\
STRICT: Your previous reply was rejected. Return ONLY the JSON object. \
Every field is required. Lists hold plain strings. Text fields must not be empty.";

/// Appended to the tag system prompt for strict regeneration.
pub fn strict_tag_suffix(max_tag_len: usize) -> String {
    format!("\nSTRICT: Return exactly 3 tags. Each tag MUST be at most {max_tag_len} characters. No exceptions.")
}

pub fn chunk_user_prompt(chunk: &Chunk) -> String {
    format!(
        "Project: {name} (id {id})\n\
         Part {index} of {count}, {reviews} reviews.\n\n\
         Reviews:\n{text}\n\n\
         Fill chunk_summary with 80-140 words, then the list fields.",
        name = chunk.project_name,
        id = chunk.project_id,
        index = chunk.index,
        count = chunk.count,
        reviews = chunk.entries.len(),
        text = chunk.text(),
    )
}

pub fn project_user_prompt(project_id: &str, project_name: &str, chunks: &[ChunkSummaryRecord]) -> String {
    let parts = chunks
        .iter()
        .map(|c| {
            format!(
                "PART {index}:\nSummary: {summary}\nHighlights: {highlights}\nWatch-outs: {watchouts}\n\
                 Best for: {best}\nNot ideal for: {not_ideal}\nEvidence: {evidence}",
                index = c.chunk_index,
                summary = c.chunk_summary,
                highlights = c.body.top_highlights.join("; "),
                watchouts = c.body.watchouts_or_gaps.join("; "),
                best = c.body.best_for.join("; "),
                not_ideal = c.body.not_ideal_for.join("; "),
                evidence = c.body.evidence_notes.join("; "),
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Project: {project_name} (id {project_id})\n\
         Partial summaries ({n}):\n\n{parts}",
        n = chunks.len(),
    )
}

/// `inputs_json` is a JSON array of review payloads.
pub fn tag_batch_user_prompt(inputs_json: &str, count: usize) -> String {
    format!(
        "Tag each of these {count} reviews.\n\n\
         InputReviewsJSON:\n{inputs_json}\n\n\
         Return items: one object per review, each with its review_uid and tags."
    )
}

/// `input_json` is one review payload.
pub fn tag_single_user_prompt(input_json: &str) -> String {
    format!(
        "Tag this single review.\n\n\
         InputReviewJSON:\n{input_json}\n\n\
         Return tags: exactly 3 strings."
    )
}
