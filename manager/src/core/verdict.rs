//! Verdict values and their wire rendering.
//!
//! A verdict is rendered into two byte strings: the diagnostic part (stderr)
//! and the result part (stdout). Rendering is pure so the exact bytes can be
//! checked without a process; `io::emitter` only writes them.

/// Control byte that prefixes a structured verdict body.
pub const STRUCTURED_MARKER: u8 = 0x03;
/// Result-sink sentinel telling the orchestrator to read the diagnostic sink.
pub const STRUCTURED_SENTINEL: &str = "-1";

/// Final outcome of a judged run.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// One score with a human-readable message.
    Scalar { score: f64, message: String },
    /// Ordered `(score, message)` pairs, e.g. one per subtask.
    Structured { entries: Vec<(f64, String)> },
}

impl Verdict {
    pub fn scalar(score: f64, message: impl Into<String>) -> Self {
        Verdict::Scalar {
            score,
            message: message.into(),
        }
    }

    pub fn structured<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (f64, S)>,
        S: Into<String>,
    {
        Verdict::Structured {
            entries: entries
                .into_iter()
                .map(|(score, message)| (score, message.into()))
                .collect(),
        }
    }

    /// Verdict used when the orchestrator refuses to continue.
    pub fn zero(message: impl Into<String>) -> Self {
        Verdict::scalar(0.0, message)
    }

    pub fn render(&self) -> RenderedVerdict {
        match self {
            Verdict::Scalar { score, message } => {
                let mut diagnostic = message.clone().into_bytes();
                diagnostic.push(b'\n');
                RenderedVerdict {
                    diagnostic,
                    result: format_score(*score).into_bytes(),
                }
            }
            Verdict::Structured { entries } => {
                let mut diagnostic = vec![STRUCTURED_MARKER];
                diagnostic.extend_from_slice(structured_body(entries).as_bytes());
                RenderedVerdict {
                    diagnostic,
                    result: STRUCTURED_SENTINEL.as_bytes().to_vec(),
                }
            }
        }
    }

    /// True if any score had to be clamped or replaced during rendering.
    pub fn has_out_of_range_score(&self) -> bool {
        let out = |score: f64| normalize_score(score) != score;
        match self {
            Verdict::Scalar { score, .. } => out(*score),
            Verdict::Structured { entries } => entries.iter().any(|(score, _)| out(*score)),
        }
    }
}

/// Bytes destined for the diagnostic and result sinks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedVerdict {
    pub diagnostic: Vec<u8>,
    pub result: Vec<u8>,
}

/// Clamp into `[0, 1]`; NaN becomes 0.
pub fn normalize_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Six-decimal fixed notation, as the orchestrator parses it.
pub fn format_score(score: f64) -> String {
    format!("{:.6}", normalize_score(score))
}

/// Escape one message for the structured body.
///
/// Double quotes pass through unchanged; consumers of the existing format
/// rely on it.
pub fn escape_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for c in message.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\0' => out.push_str("\\u0000"),
            '\u{3}' => out.push_str("\\u0003"),
            other => out.push(other),
        }
    }
    out
}

fn structured_body(entries: &[(f64, String)]) -> String {
    let scores: Vec<String> = entries.iter().map(|(score, _)| format_score(*score)).collect();
    let texts: Vec<String> = entries
        .iter()
        .map(|(_, message)| format!("\"{}\"", escape_message(message)))
        .collect();
    format!(
        "{{\"outcome\": [{}], \"text\": [{}]}}",
        scores.join(","),
        texts.join(",")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_renders_message_line_and_fixed_score() {
        let rendered = Verdict::scalar(0.73, "partial").render();
        assert_eq!(rendered.diagnostic, b"partial\n");
        assert_eq!(rendered.result, b"0.730000");
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(format_score(1.5), "1.000000");
        assert_eq!(format_score(-0.25), "0.000000");
        assert_eq!(format_score(f64::NAN), "0.000000");
        assert!(Verdict::scalar(2.0, "x").has_out_of_range_score());
        assert!(!Verdict::scalar(1.0, "x").has_out_of_range_score());
    }

    #[test]
    fn structured_frame_and_sentinel() {
        let rendered = Verdict::structured([(1.0, "ok"), (0.5, "half")]).render();
        assert_eq!(rendered.diagnostic[0], STRUCTURED_MARKER);
        assert_eq!(
            &rendered.diagnostic[1..],
            br#"{"outcome": [1.000000,0.500000], "text": ["ok","half"]}"#
        );
        assert_eq!(rendered.result, b"-1");
    }

    #[test]
    fn empty_structured_verdict() {
        let rendered = Verdict::Structured {
            entries: Vec::new(),
        }
        .render();
        assert_eq!(&rendered.diagnostic[1..], br#"{"outcome": [], "text": []}"#);
    }

    #[test]
    fn escaping_rules() {
        assert_eq!(escape_message("a\\b"), "a\\\\b");
        assert_eq!(escape_message("l1\nl2"), "l1\\nl2");
        assert_eq!(escape_message("say \"hi\""), "say \"hi\"");
        assert_eq!(escape_message("nul\0"), "nul\\u0000");
        assert_eq!(escape_message("etx\u{3}"), "etx\\u0003");
        assert_eq!(escape_message("tab\there é"), "tab\there é");
    }

    #[test]
    fn escaping_is_identity_on_safe_strings() {
        for safe in ["", "plain", "Wrong answer on query 17", "ümlaut ok"] {
            assert_eq!(escape_message(safe), safe);
            assert_eq!(escape_message(&escape_message(safe)), safe);
        }
    }
}
