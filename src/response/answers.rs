use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Respondent attributes that together make up a location, most general first.
const LOCATION_PARTS: [&str; 3] = ["province", "city-or-municipality", "barangay"];

/// One respondent's answers for a single survey session.
///
/// Older stored responses may lack some maps, store an empty section as `[]`
/// or `null`, or use the historical names `question-choices` and
/// `personal-data`; all of these deserialize as empty or renamed maps.
///
/// Ratings keep the number exactly as written, so `8` never reads back as
/// `8.0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct Response {
  /// Question id to rating.
  #[serde(deserialize_with = "lenient_map")]
  pub question_ratings: BTreeMap<String, Number>,
  /// Question id to chosen option id.
  #[serde(alias = "question-choices", deserialize_with = "lenient_map")]
  pub option_choices: BTreeMap<String, String>,
  /// Comment id to rating; `None` records a skipped comment.
  #[serde(deserialize_with = "lenient_map")]
  pub comment_ratings: BTreeMap<String, Option<Number>>,
  /// Question id to free-text answer.
  #[serde(deserialize_with = "lenient_map")]
  pub comments: BTreeMap<String, String>,
  #[serde(alias = "personal-data", deserialize_with = "lenient_map")]
  pub respondent_data: Map<String, Value>,
}

/// A section map, where `null` and an empty array also mean "no entries".
fn lenient_map<'de, D, M>(deserializer: D) -> Result<M, D::Error>
where
  D: Deserializer<'de>,
  M: Default + DeserializeOwned,
{
  match Value::deserialize(deserializer)? {
    Value::Null => Ok(M::default()),
    Value::Array(items) if items.is_empty() => Ok(M::default()),
    map @ Value::Object(_) => serde_json::from_value(map).map_err(D::Error::custom),
    other => Err(D::Error::custom(format!("expected a map, found {}", other))),
  }
}

impl Response {
  /// Top-level keys a field path may start with.
  pub const SECTIONS: [&'static str; 5] = [
    "question-ratings",
    "option-choices",
    "comment-ratings",
    "comments",
    "respondent-data",
  ];

  /// Whether the comment already has a rating (including a skip).
  pub fn has_rated(&self, comment_id: &str) -> bool {
    self.comment_ratings.contains_key(comment_id)
  }

  /// Copy with display-only fields derived from raw respondent attributes.
  ///
  /// `location` is composed from province, city and barangay only when all
  /// three are present and non-empty; otherwise it is left out.
  pub fn with_derived_fields(mut self) -> Self {
    let parts: Option<Vec<&str>> = LOCATION_PARTS
      .iter()
      .map(|key| {
        self
          .respondent_data
          .get(*key)
          .and_then(Value::as_str)
          .map(str::trim)
          .filter(|part| !part.is_empty())
      })
      .collect();

    if let Some(location) = parts.map(|parts| parts.join(", ")) {
      self
        .respondent_data
        .insert("location".to_string(), Value::String(location));
    }
    self
  }
}
