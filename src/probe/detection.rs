//! Brand mention detection on a raw model answer.
//!
//! The detection model is asked for `{"isVisible": bool, "position": int|null}`.
//! When its output cannot be parsed into that shape we fall back to a plain
//! case-insensitive substring match. The fallback never yields a position and
//! is reported as [`DetectionSource::Fallback`].

use serde::Deserialize;
use serde_json::Number;
use tracing::warn;

/// Where a detection verdict came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionSource {
    /// Validated structured output from the detection model.
    Parsed,
    /// Substring heuristic, reduced confidence.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub mentioned: bool,
    pub position: Option<u32>,
    pub source: DetectionSource,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDetection {
    is_visible: bool,
    #[serde(default)]
    position: Option<Number>,
}

/// Build the instruction sent to the detection model.
pub fn detection_prompt(brand: &str, answer: &str) -> String {
    format!(
        r#"Given this answer from an AI model, determine:
1. Is the brand "{brand}" mentioned in the answer? (true/false)
2. If yes, what position is it mentioned among other brands/products? (1 = first mentioned, 2 = second, etc., or null if not mentioned or if it's the only one)

Answer: "{answer}"

Return ONLY valid JSON with this structure (no markdown, no code fences):
{{
  "isVisible": boolean,
  "position": number or null
}}"#
    )
}

/// Remove Markdown code fences and surrounding prose around a JSON object.
fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => &trimmed[start..=end],
        _ => trimmed,
    }
}

fn validate_position(position: Option<Number>) -> Result<Option<u32>, String> {
    let number = match position {
        Some(number) => number,
        None => return Ok(None),
    };

    let value = if let Some(v) = number.as_u64() {
        v
    } else {
        match number.as_f64() {
            Some(f) if f.fract() == 0.0 && f >= 1.0 => f as u64,
            _ => return Err(format!("position {} is not a positive integer", number)),
        }
    };

    if value == 0 || value > u64::from(u32::MAX) {
        return Err(format!("position {} is out of range", value));
    }
    Ok(Some(value as u32))
}

/// Parse and validate the detection model's output.
pub fn parse_detection(raw: &str) -> Result<Detection, String> {
    let parsed: RawDetection =
        serde_json::from_str(extract_json(raw)).map_err(|e| e.to_string())?;
    let position = validate_position(parsed.position)?;

    Ok(Detection {
        mentioned: parsed.is_visible,
        position: if parsed.is_visible { position } else { None },
        source: DetectionSource::Parsed,
    })
}

/// Substring heuristic used when structured detection is unusable.
pub fn fallback_detection(brand: &str, answer: &str) -> Detection {
    Detection {
        mentioned: answer.to_lowercase().contains(&brand.to_lowercase()),
        position: None,
        source: DetectionSource::Fallback,
    }
}

/// Structured detection with the substring fallback on parse failure.
pub fn detect(raw: &str, brand: &str, answer: &str) -> Detection {
    match parse_detection(raw) {
        Ok(detection) => detection,
        Err(e) => {
            warn!(
                "Unusable detection output ({}), falling back to substring match for {}",
                e, brand
            );
            fallback_detection(brand, answer)
        }
    }
}
