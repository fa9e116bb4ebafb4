//! Answer keys.
//!
//! Exchanged as an ordered list of strings, one per question: comma-joined,
//! uppercase, sorted option letters. An empty string means the question has
//! no scorable answer.

use thiserror::Error;

/// Answer-key parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("answer key entry {entry}: '{token}' is not a single option letter")]
    InvalidLetter { entry: usize, token: String },
}

/// Ordered correct-answer sets, one per question.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct AnswerKey {
    entries: Vec<Vec<String>>,
}

fn parse_entry(entry: usize, raw: &str) -> Result<Vec<String>, KeyError> {
    let mut letters = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let mut chars = token.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii_alphabetic() => letters.push(c.to_ascii_uppercase().to_string()),
            _ => {
                return Err(KeyError::InvalidLetter {
                    entry,
                    token: token.to_string(),
                })
            }
        }
    }
    letters.sort();
    letters.dedup();
    Ok(letters)
}

impl AnswerKey {
    /// Parse entries such as `"B"`, `"b, c"` or `""`.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, KeyError> {
        let entries = entries
            .iter()
            .enumerate()
            .map(|(i, e)| parse_entry(i, e.as_ref()))
            .collect::<Result<_, _>>()?;
        Ok(Self { entries })
    }

    /// Parse one entry per line. A trailing newline does not add an entry.
    pub fn from_lines(text: &str) -> Result<Self, KeyError> {
        let lines: Vec<&str> = text.lines().collect();
        Self::parse(lines.as_slice())
    }

    /// Number of questions covered by the key.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Accepted letters for the question at `index`, sorted.
    pub fn entry(&self, index: usize) -> Option<&[String]> {
        self.entries.get(index).map(Vec::as_slice)
    }

    /// Canonical string form of every entry.
    pub fn to_strings(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.join(",")).collect()
    }
}

impl TryFrom<Vec<String>> for AnswerKey {
    type Error = KeyError;

    fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
        Self::parse(value.as_slice())
    }
}

impl From<AnswerKey> for Vec<String> {
    fn from(key: AnswerKey) -> Self {
        key.to_strings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_normalized() {
        let key = AnswerKey::parse(&["b", " c , B ", ""]).expect("key");
        assert_eq!(key.to_strings(), vec!["B", "B,C", ""]);
        assert_eq!(key.entry(1), Some(&["B".to_string(), "C".to_string()][..]));
        assert_eq!(key.entry(2), Some(&[][..]));
        assert_eq!(key.entry(3), None);
    }

    #[test]
    fn rejects_non_letters() {
        let err = AnswerKey::parse(&["A", "AB"]).expect_err("bad token");
        assert_eq!(
            err,
            KeyError::InvalidLetter {
                entry: 1,
                token: "AB".into()
            }
        );
        assert!(AnswerKey::parse(&["1"]).is_err());
    }

    #[test]
    fn line_format_keeps_blank_entries() {
        let key = AnswerKey::from_lines("A\n\nC,D\n").expect("key");
        assert_eq!(key.len(), 3);
        assert_eq!(key.to_strings(), vec!["A", "", "C,D"]);
    }

    #[test]
    fn serializes_as_string_list() {
        let key: AnswerKey = serde_json::from_str(r#"["d,a","B"]"#).expect("json");
        assert_eq!(serde_json::to_string(&key).expect("json"), r#"["A,D","B"]"#);
        assert!(serde_json::from_str::<AnswerKey>(r#"["A?"]"#).is_err());
    }
}
