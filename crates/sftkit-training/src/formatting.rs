//! Turning `chosen` conversations into instruction-formatted training text.

use crate::args::ChosenLayout;
use crate::error::{TrainingError, TrainingResult};
use serde_json::Value;

/// The two shapes a `chosen` column comes in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ChosenTurns<'a> {
    /// `[user_turn, assistant_turn]`
    FlatPair(&'a Value, &'a Value),
    /// `[[user_turn, assistant_turn], ...]`
    PairSequence(&'a [Value]),
}

impl<'a> ChosenTurns<'a> {
    /// Interpret `chosen` according to `layout`. Under `Auto`, exactly two
    /// elements are read as a flat pair unless both are themselves lists, and
    /// every other length as a sequence of pairs.
    pub fn classify(chosen: &'a [Value], layout: ChosenLayout) -> TrainingResult<Self> {
        match (layout, chosen) {
            (ChosenLayout::Auto, [user, assistant]) if !(user.is_array() && assistant.is_array()) => {
                Ok(Self::FlatPair(user, assistant))
            }
            (ChosenLayout::FlatPair, [user, assistant]) => Ok(Self::FlatPair(user, assistant)),
            (ChosenLayout::FlatPair, _) => Err(TrainingError::Format(format!(
                "flat_pair layout expects exactly 2 turns in 'chosen', found {}",
                chosen.len()
            ))),
            (ChosenLayout::Auto | ChosenLayout::PairSequence, _) => Ok(Self::PairSequence(chosen)),
        }
    }

    /// Render one string per conversational pair.
    pub fn render(&self) -> TrainingResult<Vec<String>> {
        match self {
            Self::FlatPair(user, assistant) => {
                let user = turn_content(user, "chosen[0]").map_err(flat_pair_hint)?;
                let assistant = turn_content(assistant, "chosen[1]").map_err(flat_pair_hint)?;
                Ok(vec![format_turn_pair(&user, &assistant)])
            }
            Self::PairSequence(pairs) => pairs
                .iter()
                .enumerate()
                .map(|(i, pair)| {
                    let user = pair
                        .get(0)
                        .ok_or_else(|| missing(&format!("chosen[{i}][0]")))
                        .and_then(|t| turn_content(t, &format!("chosen[{i}][0]")))?;
                    let assistant = pair
                        .get(1)
                        .ok_or_else(|| missing(&format!("chosen[{i}][1]")))
                        .and_then(|t| turn_content(t, &format!("chosen[{i}][1]")))?;
                    Ok(format_turn_pair(&user, &assistant))
                })
                .collect(),
        }
    }
}

#[must_use]
pub fn format_turn_pair(user: &str, assistant: &str) -> String {
    format!("### User: {user}\n\n### Assistant: {assistant}")
}

fn missing(path: &str) -> TrainingError {
    TrainingError::Format(format!("{path} is missing"))
}

fn flat_pair_hint(err: TrainingError) -> TrainingError {
    match err {
        TrainingError::Format(msg) => TrainingError::Format(format!(
            "{msg}; a 'chosen' list of exactly two elements is read as one user/assistant pair, \
             use chosen_layout=pair_sequence if it holds two pairs"
        )),
        other => other,
    }
}

/// The `content` of a turn. Strings are used verbatim, other values as JSON text.
fn turn_content(turn: &Value, path: &str) -> TrainingResult<String> {
    let content = turn
        .as_object()
        .ok_or_else(|| TrainingError::Format(format!("{path} is not a turn object")))?
        .get("content")
        .ok_or_else(|| TrainingError::Format(format!("{path} has no 'content' field")))?;

    Ok(match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Format one dataset row.
pub fn format_example(example: &Value, layout: ChosenLayout) -> TrainingResult<Vec<String>> {
    let chosen = example
        .get("chosen")
        .ok_or_else(|| TrainingError::Format("example has no 'chosen' field".to_string()))?
        .as_array()
        .ok_or_else(|| TrainingError::Format("'chosen' is not a list".to_string()))?;

    ChosenTurns::classify(chosen, layout)?.render()
}

/// Format every row of a split, concatenating the strings of all rows.
pub fn format_rows(rows: &[Value], layout: ChosenLayout) -> TrainingResult<Vec<String>> {
    let mut texts = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let formatted = format_example(row, layout).map_err(|e| match e {
            TrainingError::Format(msg) => TrainingError::Format(format!("row {idx}: {msg}")),
            other => other,
        })?;
        texts.extend(formatted);
    }
    Ok(texts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flat_pair_produces_one_string() {
        let example = json!({ "chosen": [{ "content": "Hi" }, { "content": "Hello!" }] });
        assert_eq!(
            format_example(&example, ChosenLayout::Auto).unwrap(),
            vec!["### User: Hi\n\n### Assistant: Hello!".to_string()]
        );
    }

    #[test]
    fn test_pair_sequence_produces_one_string_per_pair() {
        let example = json!({
            "chosen": [
                [{ "content": "A" }, { "content": "B" }],
                [{ "content": "C" }, { "content": "D" }],
                [{ "content": "E" }, { "content": "F" }]
            ]
        });
        assert_eq!(
            format_example(&example, ChosenLayout::Auto).unwrap(),
            vec![
                "### User: A\n\n### Assistant: B".to_string(),
                "### User: C\n\n### Assistant: D".to_string(),
                "### User: E\n\n### Assistant: F".to_string(),
            ]
        );
    }

    #[test]
    fn test_two_pairs_are_a_pair_sequence() {
        let example = json!({
            "chosen": [
                [{ "content": "A" }, { "content": "B" }],
                [{ "content": "C" }, { "content": "D" }]
            ]
        });
        let expected = vec![
            "### User: A\n\n### Assistant: B".to_string(),
            "### User: C\n\n### Assistant: D".to_string(),
        ];

        assert_eq!(format_example(&example, ChosenLayout::Auto).unwrap(), expected);
        assert_eq!(format_example(&example, ChosenLayout::PairSequence).unwrap(), expected);

        let err = format_example(&example, ChosenLayout::FlatPair).unwrap_err().to_string();
        assert!(err.contains("chosen[0] is not a turn object"), "{err}");
        assert!(err.contains("pair_sequence"), "{err}");
    }

    #[test]
    fn test_extra_turn_fields_are_ignored() {
        let example = json!({
            "chosen": [
                { "role": "user", "content": "What is 2+2?" },
                { "role": "assistant", "content": "4" }
            ],
            "rejected": []
        });
        assert_eq!(
            format_example(&example, ChosenLayout::FlatPair).unwrap(),
            vec!["### User: What is 2+2?\n\n### Assistant: 4".to_string()]
        );
    }

    #[test]
    fn test_flat_pair_layout_rejects_other_lengths() {
        let example = json!({ "chosen": [{ "content": "only" }] });
        assert!(format_example(&example, ChosenLayout::FlatPair).is_err());
    }

    #[test]
    fn test_malformed_shapes_fail() {
        assert!(format_example(&json!({ "prompt": "x" }), ChosenLayout::Auto).is_err());
        assert!(format_example(&json!({ "chosen": "x" }), ChosenLayout::Auto).is_err());

        let missing_content = json!({ "chosen": [{ "text": "Hi" }, { "content": "Hello" }] });
        let err = format_example(&missing_content, ChosenLayout::Auto).unwrap_err().to_string();
        assert!(err.contains("chosen[0] has no 'content' field"), "{err}");

        let short_pair = json!({ "chosen": [[{ "content": "A" }]] });
        let err = format_example(&short_pair, ChosenLayout::Auto).unwrap_err().to_string();
        assert!(err.contains("chosen[0][1] is missing"), "{err}");
    }

    #[test]
    fn test_empty_chosen_yields_nothing() {
        assert!(format_example(&json!({ "chosen": [] }), ChosenLayout::Auto).unwrap().is_empty());
    }

    #[test]
    fn test_format_rows_flattens_and_names_bad_row() {
        let rows = vec![
            json!({ "chosen": [{ "content": "Hi" }, { "content": "Hello!" }] }),
            json!({ "chosen": [[{ "content": "A" }, { "content": "B" }]] }),
        ];
        assert_eq!(format_rows(&rows, ChosenLayout::Auto).unwrap().len(), 2);

        let bad = vec![rows[0].clone(), json!({ "chosen": 3 })];
        let err = format_rows(&bad, ChosenLayout::Auto).unwrap_err().to_string();
        assert_eq!(err, "formatting error: row 1: 'chosen' is not a list");
        assert_eq!(err.matches("formatting error").count(), 1);
    }
}
