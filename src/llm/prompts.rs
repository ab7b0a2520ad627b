//! Prompt templates for the two model intents.
//!
//! Both templates demand JSON-only output. The extractor still tolerates
//! prose around the payload, because models ignore that instruction often
//! enough to matter.

/// Ask for 5-10 concepts related to `concept`.
pub fn related_concepts(concept: &str) -> String {
    format!(
        "List concepts related to \"{concept}\".\n\
         Respond with ONLY a JSON array of 5 to 10 objects, each with exactly these keys:\n\
         \"name\" (the related concept), \"relation\" (a short symbolic label such as \
         IS_A, PART_OF, or USED_IN), and \"relatedTo\" (always \"{concept}\").\n\
         Example: [{{\"name\":\"Machine Learning\",\"relation\":\"IS_A\",\"relatedTo\":\"{concept}\"}}]\n\
         Do not include any commentary, explanation, or markdown. Output the JSON array only."
    )
}

/// Ask whether a factual relationship holds between `a` and `b`.
pub fn relationship(a: &str, b: &str) -> String {
    format!(
        "Is there a meaningful real-world relationship between \"{a}\" and \"{b}\"?\n\
         If yes, respond with ONLY a single JSON object with exactly these keys:\n\
         \"name\" (one of the two concepts), \"relation\" (a short symbolic label such as \
         IS_A, PART_OF, or USED_IN), and \"relatedTo\" (the other concept).\n\
         If no real relationship exists, respond with exactly \
         {{\"name\":\"\",\"relation\":\"\",\"relatedTo\":\"\"}} or the literal null.\n\
         Do not include any commentary, explanation, or markdown. Output the JSON only."
    )
}
