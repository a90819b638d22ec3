//! Prompt templates for skill extraction and scoring, and reply parsing

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::types::JobSpec;

/// Cut `text` to at most `max_chars` characters on a char boundary
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Prompt asking for a JSON object of skill categories found in a resume
pub fn extraction_prompt(resume_text: &str, job: &JobSpec) -> String {
    format!(
        r#"You are an expert technical recruiter extracting structured information from a resume.

The resume is being screened for the position "{title}".

Extract the candidate's skills and experience as a single JSON object. Use camelCase keys,
one key per category, each value a list of strings. Suggested categories:
- programmingLanguages
- frameworks
- tools
- databases
- cloudPlatforms
- softSkills
- certifications
Add a "yearsOfExperience" number when the resume states it.

Only include information that is explicitly present in the resume.
Respond with the JSON object only, no commentary.

RESUME:
{resume}
"#,
        title = job.title,
        resume = resume_text,
    )
}

/// Prompt asking for a match score of extracted skills against a job
pub fn scoring_prompt(skills: &Map<String, Value>, job: &JobSpec) -> String {
    let skills_json =
        serde_json::to_string_pretty(skills).unwrap_or_else(|_| Value::Object(skills.clone()).to_string());
    let requirements = job
        .requirements
        .iter()
        .map(|r| format!("- {}", r))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an expert technical recruiter scoring how well a candidate matches a job.

JOB TITLE: {title}
{description}
REQUIREMENTS:
{requirements}

CANDIDATE SKILLS:
{skills}

Respond with a single JSON object and nothing else:
{{
  "overallScore": <integer 0-100>,
  "confidence": <number 0.0-1.0>,
  "matchedSkills": [<requirements the candidate meets>],
  "missingSkills": [<requirements the candidate lacks>],
  "reasoning": "<one or two sentences>"
}}
"#,
        title = job.title,
        description = job
            .description
            .as_deref()
            .map(|d| format!("DESCRIPTION: {}\n", d))
            .unwrap_or_default(),
        requirements = requirements,
        skills = skills_json,
    )
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fences(reply: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n(.*?)\n?\s*```\s*$").expect("Invalid regex")
    });

    match fence.captures(reply).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => reply.trim(),
    }
}

/// Parse a model reply as a JSON object
///
/// Tolerates code fences and prose around the object. Anything that is not
/// an object is `Error::MalformedResponse`.
pub fn parse_json_object(reply: &str) -> Result<Map<String, Value>> {
    let body = strip_code_fences(reply);

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(first_error) => {
            // Fall back to the outermost braces
            let start = body.find('{');
            let end = body.rfind('}');
            match (start, end) {
                (Some(start), Some(end)) if start < end => {
                    serde_json::from_str(&body[start..=end]).map_err(|e| {
                        Error::malformed(format!("reply is not valid JSON: {}", e))
                    })?
                }
                _ => {
                    return Err(Error::malformed(format!(
                        "reply is not valid JSON: {}",
                        first_error
                    )))
                }
            }
        }
    };

    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn test_prompts_include_inputs() {
        let job = JobSpec::new("J1", "Backend Engineer", vec!["Go".into(), "SQL".into()]);
        let prompt = extraction_prompt("Skills: Go, SQL", &job);
        assert!(prompt.contains("Skills: Go, SQL"));
        assert!(prompt.contains("Backend Engineer"));

        let mut skills = Map::new();
        skills.insert("programmingLanguages".into(), serde_json::json!(["Go"]));
        let prompt = scoring_prompt(&skills, &job);
        assert!(prompt.contains("- Go\n- SQL"));
        assert!(prompt.contains("programmingLanguages"));
    }

    #[test]
    fn test_parse_fenced_reply() {
        let reply = "```json\n{\"programmingLanguages\": [\"Go\"]}\n```";
        let map = parse_json_object(reply).unwrap();
        assert_eq!(map["programmingLanguages"][0], "Go");
    }

    #[test]
    fn test_parse_reply_with_prose() {
        let reply = "Here you go: {\"overallScore\": 70} Hope that helps.";
        let map = parse_json_object(reply).unwrap();
        assert_eq!(map["overallScore"], 70);
    }

    #[test]
    fn test_non_object_replies_are_malformed() {
        assert!(matches!(
            parse_json_object("I cannot score this."),
            Err(Error::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_json_object("[1, 2]"),
            Err(Error::MalformedResponse(_))
        ));
    }
}
