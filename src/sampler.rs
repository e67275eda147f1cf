//! Weighted comment sampling.
//!
//! Comments are drawn without replacement with probability proportional to
//! the standard error of their current score, so respondents are asked about
//! the comments whose standing is least certain.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use crate::cache::{Resource, ResourceStore};
use crate::context::Context;
use crate::error::{Error, Result};
use crate::response::Response;

/// Number of comments selected when not configured.
pub const DEFAULT_SAMPLE_SIZE: usize = 8;

/// Name of the cached comment resource.
pub const COMMENTS_KEY: &str = "comments";

/// Prefix of the per-response selection resource.
pub const SELECTION_PREFIX: &str = "selected-";

/// Resource name holding the selection made for `response_key`.
pub fn selection_key(response_key: &str) -> String {
  format!("{}{}", SELECTION_PREFIX, response_key)
}

/// A comment as served by the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
  /// Taken from the key of the comments map.
  #[serde(skip)]
  pub id: String,
  #[serde(rename = "msg")]
  pub message: String,
  #[serde(default)]
  pub tag: Option<String>,
  #[serde(rename = "sem", default, deserialize_with = "deserialize_weight")]
  pub standard_error: f64,
  #[serde(rename = "pos", default)]
  pub position: [f64; 2],
  #[serde(rename = "qid", default, skip_serializing_if = "Option::is_none")]
  pub question_id: Option<i64>,
}

impl Comment {
  /// Sampling weight; anything that is not a positive finite number counts as zero.
  pub fn weight(&self) -> f64 {
    if self.standard_error.is_finite() && self.standard_error > 0.0 {
      self.standard_error
    } else {
      0.0
    }
  }
}

/// Comments that never received ratings have no standard error (`null`).
fn deserialize_weight<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// Decode a `{"<id>": {msg, sem, pos, tag, qid}}` map, in id order.
pub fn parse_comments(data: &Value) -> Result<Vec<Comment>> {
  let Some(map) = data.as_object() else {
    return Err(Error::InvalidResource {
      name: COMMENTS_KEY.to_string(),
      reason: "expected a map of comment id to comment".to_string(),
    });
  };

  map
    .iter()
    .map(|(id, entry)| -> Result<Comment> {
      let mut comment: Comment = serde_json::from_value(entry.clone())?;
      comment.id = id.clone();
      Ok(comment)
    })
    .collect()
}

fn encode_comments(comments: &[Comment]) -> Result<Value> {
  let mut map = Map::new();
  for comment in comments {
    map.insert(comment.id.clone(), serde_json::to_value(comment)?);
  }
  Ok(Value::Object(map))
}

/// Pick one index with probability proportional to each candidate's weight.
///
/// Builds the running sum `cumulative[0] = 0, cumulative[i] = w[0] + .. + w[i-1]`,
/// draws uniformly from `[0, total)` and returns the `i` with
/// `cumulative[i] <= draw < cumulative[i + 1]`. Zero-weight candidates own an
/// empty interval. When every weight is zero the pick is uniform.
pub fn pick_weighted<R: Rng + ?Sized>(candidates: &[Comment], rng: &mut R) -> Option<usize> {
  if candidates.is_empty() {
    return None;
  }

  let mut cumulative = Vec::with_capacity(candidates.len() + 1);
  cumulative.push(0.0);
  for comment in candidates {
    let last = cumulative[cumulative.len() - 1];
    cumulative.push(last + comment.weight());
  }

  let total = cumulative[candidates.len()];
  if !(total > 0.0 && total.is_finite()) {
    return Some(rng.gen_range(0..candidates.len()));
  }

  let draw = rng.gen_range(0.0..total);
  // First boundary strictly above the draw; cumulative[0] = 0 <= draw, so >= 1.
  let upper = cumulative.partition_point(|&bound| bound <= draw);
  Some((upper - 1).min(candidates.len() - 1))
}

/// Comments split into those to ask about and the rest.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
  pub selected: Vec<Comment>,
  pub remaining: Vec<Comment>,
}

/// Draw `min(sample_size, candidates.len())` distinct comments.
pub fn sample<R: Rng + ?Sized>(
  mut candidates: Vec<Comment>,
  sample_size: usize,
  rng: &mut R,
) -> Selection {
  let count = sample_size.min(candidates.len());
  let mut selected = Vec::with_capacity(count);

  while selected.len() < count {
    let Some(index) = pick_weighted(&candidates, rng) else {
      break;
    };
    selected.push(candidates.remove(index));
  }

  Selection {
    selected,
    remaining: candidates,
  }
}

/// Builds and remembers the comment selection for each response.
pub struct CommentSampler<S: ResourceStore> {
  ctx: Context<S>,
  sample_size: usize,
}

impl<S: ResourceStore> CommentSampler<S> {
  pub fn new(ctx: Context<S>, sample_size: usize) -> Self {
    Self { ctx, sample_size }
  }

  /// Selection for the response stored under `response_key`.
  ///
  /// The first call samples from the cached comments, leaving out those the
  /// response has already rated, and stores the result; later calls return
  /// the same selected set. Fails with `Error::NotFound` until comments have
  /// been fetched.
  pub fn selection_for<R: Rng + ?Sized>(
    &self,
    response_key: &str,
    response: &Response,
    rng: &mut R,
  ) -> Result<Selection> {
    let comments = parse_comments(&self.ctx.store().load(COMMENTS_KEY)?.data)?;
    let candidates: Vec<Comment> = comments
      .into_iter()
      .filter(|comment| !response.has_rated(&comment.id))
      .collect();

    let store = self.ctx.store();
    let key = selection_key(response_key);
    if let Some(stored) = store.load_optional(&key)? {
      let selected = parse_comments(&stored.data)?;
      let chosen: HashSet<&str> = selected.iter().map(|c| c.id.as_str()).collect();
      let remaining = candidates
        .into_iter()
        .filter(|comment| !chosen.contains(comment.id.as_str()))
        .collect();
      return Ok(Selection {
        selected,
        remaining,
      });
    }

    let selection = sample(candidates, self.sample_size, rng);
    store.put(Resource::new(key, encode_comments(&selection.selected)?))?;
    debug!(
      response = %response_key,
      selected = selection.selected.len(),
      "sampled comments"
    );
    Ok(selection)
  }
}
