pub fn build_extraction_prompt(chunk_text: &str) -> String {
    format!(
        r#"You build a knowledge graph from text. Read the passage below and list the
entities it names and the relationships it states between them.

Respond with a single JSON object of this form:
{{
  "entities": [
    {{"id": "E1", "name": "<surface form>", "type": "PERSON", "confidence": 0.9}}
  ],
  "relations": [
    {{"source": "E1", "target": "E2", "relation": "<predicate>", "confidence": 0.8}}
  ]
}}

Guidelines:
- "type" is one of PERSON, ORGANIZATION, LOCATION, CONCEPT, TECHNOLOGY, EVENT or OTHER
- "name" is copied from the passage as written
- "source" and "target" refer to entity ids from the same response
- "relation" is a short lower_snake_case verb phrase such as works_at or located_in
- "confidence" lies in [0, 1]
- Only state relationships the passage supports
- Reply with the JSON object and nothing else

Passage:
"""
{chunk_text}
"""
"#
    )
}

/// Ask the model to repair a response that failed validation
pub fn build_retry_prompt(invalid_output: &str, problem: &str) -> String {
    format!(
        r#"Your previous response could not be used: {problem}.

Previous response:
{invalid_output}

Return a corrected version as one JSON object with "entities" and "relations" arrays.
No code fences and no commentary.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_text() {
        let prompt = build_extraction_prompt("Sarah works at prismaticAI.");
        assert!(prompt.contains("\"\"\"\nSarah works at prismaticAI.\n\"\"\""));
        assert!(prompt.contains("\"relations\""));
    }

    #[test]
    fn test_retry_prompt_names_problem() {
        let prompt = build_retry_prompt("{\"entities\": 3}", "entities must be an array");
        assert!(prompt.contains("entities must be an array"));
        assert!(prompt.contains("{\"entities\": 3}"));
    }
}
