//! Question generation: prompts, parsing and brand-leak checks.

use crate::models::Question;
use serde_json::Value;
use std::collections::HashSet;

/// Prompt asking for `count` discovery questions that do not name the brand.
pub fn questions_prompt(brand: &str, context: &str, count: usize) -> String {
    let ids: Vec<String> = (1..=count).map(|i| format!("Q{}", i)).collect();
    format!(
        r#"You are an expert at creating natural, AEO-optimized questions that users would ask AI assistants.

Given this brand context:
{context}

Generate exactly {count} natural questions that users would realistically ask AI assistants when looking for solutions that "{brand}" provides.

Requirements:
- Users don't know the brand yet and are asking to discover solutions, prices, or providers.
- DO NOT USE the brand name in questions. The questions are used to check answers for brand mentions.
- Questions should be natural and conversational
- Questions should be the type users would ask when seeking recommendations
- Questions should be relevant to the brand's offerings
- Format as a JSON array of objects with "id" and "question" fields
- Use {ids} as IDs

Return ONLY the JSON array, no other text."#,
        ids = ids.join(", ")
    )
}

/// Follow-up prompt after some questions named the brand.
pub fn regenerate_prompt(brand: &str, context: &str, count: usize, leaking: &[String]) -> String {
    format!(
        "{}\n\nYour previous attempt mentioned \"{}\" in: {}. You MUST regenerate these questions WITHOUT the brand name.",
        questions_prompt(brand, context, count),
        brand,
        leaking.join(", ")
    )
}

fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

fn parse_value(raw: &str) -> Result<Value, String> {
    let cleaned = strip_code_fences(raw);
    if let Ok(value) = serde_json::from_str::<Value>(&cleaned) {
        return Ok(value);
    }

    match (cleaned.find('['), cleaned.rfind(']')) {
        (Some(start), Some(end)) if start < end => {
            serde_json::from_str(&cleaned[start..=end]).map_err(|e| e.to_string())
        }
        _ => Err("no JSON array found in response".to_string()),
    }
}

/// Whether `id` can be a segment of a store key (run ids and question ids).
pub fn id_is_usable(id: &str) -> bool {
    !id.is_empty() && !id.contains(':') && !id.chars().any(char::is_whitespace)
}

/// Parse the model's question list and check it has exactly `expected` entries.
///
/// Accepts a bare array or an object with a `questions` array. If any id is
/// missing, duplicated or unusable in a store key, ids are renumbered `Q1..Qn`.
pub fn parse_questions(raw: &str, expected: usize) -> Result<Vec<Question>, String> {
    let items = match parse_value(raw)? {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("questions") {
            Some(Value::Array(items)) => items,
            _ => return Err("expected a JSON array of questions".to_string()),
        },
        _ => return Err("expected a JSON array of questions".to_string()),
    };

    if items.len() != expected {
        return Err(format!(
            "expected exactly {} questions, got {}",
            expected,
            items.len()
        ));
    }

    let mut questions = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let text = item
            .get("question")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| format!("question {} has no text", index + 1))?;
        let id = item
            .get("id")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or("");

        questions.push(Question {
            id: id.to_string(),
            question: text.to_string(),
        });
    }

    let mut seen = HashSet::new();
    let ids_ok = questions
        .iter()
        .all(|q| id_is_usable(&q.id) && seen.insert(q.id.clone()));
    if !ids_ok {
        for (index, question) in questions.iter_mut().enumerate() {
            question.id = format!("Q{}", index + 1);
        }
    }

    Ok(questions)
}

/// Ids of questions that contain the brand name (case-insensitive).
pub fn leaking_questions(questions: &[Question], brand: &str) -> Vec<String> {
    let brand = brand.to_lowercase();
    questions
        .iter()
        .filter(|q| q.question.to_lowercase().contains(&brand))
        .map(|q| q.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_array() {
        let raw = r#"[
            {"id": "Q1", "question": "What are the best anvils?"},
            {"id": "Q2", "question": "Where can I buy rocket skates?"},
            {"id": "Q3", "question": "Which catalog has the most gadgets?"}
        ]"#;
        let questions = parse_questions(raw, 3).unwrap();
        assert_eq!(questions.len(), 3);
        assert_eq!(questions[1].id, "Q2");
        assert_eq!(questions[1].question, "Where can I buy rocket skates?");
    }

    #[test]
    fn test_parse_fenced_object_form() {
        let raw = "```json\n{\"questions\": [{\"id\": \"Q1\", \"question\": \"a?\"}]}\n```";
        let questions = parse_questions(raw, 1).unwrap();
        assert_eq!(questions[0].question, "a?");
    }

    #[test]
    fn test_parse_array_inside_prose() {
        let raw = "Sure! Here you go:\n[{\"id\":\"Q1\",\"question\":\"x?\"}]\nHope that helps.";
        assert_eq!(parse_questions(raw, 1).unwrap().len(), 1);
    }

    #[test]
    fn test_wrong_count_rejected() {
        let raw = r#"[{"id": "Q1", "question": "a?"}]"#;
        assert!(parse_questions(raw, 3).unwrap_err().contains("exactly 3"));
    }

    #[test]
    fn test_empty_question_rejected() {
        let raw = r#"[{"id": "Q1", "question": "  "}]"#;
        assert!(parse_questions(raw, 1).is_err());
        assert!(parse_questions("no json here", 1).is_err());
    }

    #[test]
    fn test_ids_renumbered_when_unusable() {
        let raw = r#"[
            {"id": "Q1", "question": "a?"},
            {"id": "Q1", "question": "b?"},
            {"question": "c?"}
        ]"#;
        let ids: Vec<_> = parse_questions(raw, 3)
            .unwrap()
            .into_iter()
            .map(|q| q.id)
            .collect();
        assert_eq!(ids, vec!["Q1", "Q2", "Q3"]);

        let raw = r#"[{"id": "a:b", "question": "a?"}]"#;
        assert_eq!(parse_questions(raw, 1).unwrap()[0].id, "Q1");
    }

    #[test]
    fn test_leaking_questions() {
        let questions = vec![
            Question {
                id: "Q1".to_string(),
                question: "Is ACME good for anvils?".to_string(),
            },
            Question {
                id: "Q2".to_string(),
                question: "Best anvil brands?".to_string(),
            },
        ];
        assert_eq!(leaking_questions(&questions, "Acme"), vec!["Q1"]);
    }

    #[test]
    fn test_prompts() {
        let prompt = questions_prompt("Acme", "Acme sells anvils", 3);
        assert!(prompt.contains("exactly 3"));
        assert!(prompt.contains("Q1, Q2, Q3"));
        assert!(prompt.contains("Acme sells anvils"));

        let retry = regenerate_prompt("Acme", "ctx", 3, &["Q2".to_string()]);
        assert!(retry.contains("WITHOUT the brand name"));
        assert!(retry.contains("Q2"));
    }
}
