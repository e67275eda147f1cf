//! Response lifecycle: `NONE -> ACTIVE -> COMPLETED -> PUSHED (deleted)`.
//!
//! Every response lives in the store under [`RESPONSE_PREFIX`] followed by its
//! creation time in milliseconds. The reserved [`CURRENT_KEY`] resource holds
//! the key of the active response, or `null` when there is none. Any response
//! key other than the active one is a completed response awaiting push.

mod answers;

pub use answers::Response;

use serde_json::{Map, Value};
use tracing::info;
use uuid::Uuid;

use crate::cache::{Resource, ResourceStore};
use crate::context::Context;
use crate::error::{Error, Result};

/// Prefix of every stored response key.
pub const RESPONSE_PREFIX: &str = "response-";

/// Reserved key holding the active response key.
pub const CURRENT_KEY: &str = "current";

/// An active response untouched for this long is treated as abandoned.
pub const DEFAULT_RESPONSE_LIFETIME_MS: i64 = 24 * 60 * 60 * 1000;

/// Respondent attribute holding the per-response identifier the server uses
/// to recognise a re-delivered response.
pub const RESPONDENT_ID_KEY: &str = "uuid";

/// Whether `key` names a stored response.
pub fn is_response_key(key: &str) -> bool {
  created_at(key).is_some()
}

/// Creation time encoded in a response key.
pub fn created_at(key: &str) -> Option<i64> {
  key.strip_prefix(RESPONSE_PREFIX)?.parse().ok()
}

/// Creates, edits, finalizes and retires responses.
pub struct Responses<S: ResourceStore> {
  ctx: Context<S>,
  lifetime: i64,
}

impl<S: ResourceStore> Responses<S> {
  pub fn new(ctx: Context<S>, lifetime_ms: i64) -> Self {
    Self {
      ctx,
      lifetime: lifetime_ms,
    }
  }

  /// Key of the active response, if any.
  pub fn active_key(&self) -> Result<Option<String>> {
    let Some(pointer) = self.ctx.store().load_optional(CURRENT_KEY)? else {
      return Ok(None);
    };
    Ok(
      pointer
        .data
        .as_str()
        .filter(|key| is_response_key(key))
        .map(String::from),
    )
  }

  /// Start a new response, completing the active one first.
  ///
  /// The response is seeded with a random respondent id. Returns the new
  /// response key.
  pub fn start(&self) -> Result<String> {
    if let Some(previous) = self.active_key()? {
      self.set_active_key(None)?;
      info!(key = %previous, "completed previous response on start");
    }

    let key = self.allocate_key()?;
    let mut response = Response::default();
    response.respondent_data.insert(
      RESPONDENT_ID_KEY.to_string(),
      Value::String(Uuid::new_v4().to_string()),
    );
    self
      .ctx
      .store()
      .put(Resource::new(key.clone(), serde_json::to_value(response)?))?;
    self.set_active_key(Some(&key))?;

    info!(key = %key, "started response");
    Ok(key)
  }

  /// Complete the active response if it has outlived the configured lifetime.
  ///
  /// Returns the key of the response that was retired. Answers are kept; the
  /// response joins the completed set and is pushed like any other.
  pub fn expire_abandoned(&self) -> Result<Option<String>> {
    let Some(key) = self.active_key()? else {
      return Ok(None);
    };
    let age = created_at(&key).map(|created| self.ctx.now() - created);
    if age.is_some_and(|age| age > self.lifetime) {
      self.set_active_key(None)?;
      info!(key = %key, "active response expired; marked completed");
      return Ok(Some(key));
    }
    Ok(None)
  }

  /// The active response, or `Error::NoActiveResponse`.
  pub fn get_active(&self) -> Result<Response> {
    let key = self.require_active()?;
    self.load(&key).map_err(|e| match e {
      Error::NotFound(_) => Error::NoActiveResponse,
      other => other,
    })
  }

  /// Active key and response together.
  pub fn active(&self) -> Result<(String, Response)> {
    let key = self.require_active()?;
    let response = self.get_active()?;
    Ok((key, response))
  }

  /// Finalize the active response. Returns its key.
  pub fn complete(&self) -> Result<String> {
    let key = self.require_active()?;
    self.set_active_key(None)?;
    info!(key = %key, "completed response");
    Ok(key)
  }

  /// Read a value from the active response.
  ///
  /// `Ok(None)` means the path is absent; a stored `null` (a skipped rating)
  /// comes back as `Some(Value::Null)`.
  pub fn get_field(&self, path: &[&str]) -> Result<Option<Value>> {
    check_path(path)?;
    let data = serde_json::to_value(self.get_active()?)?;
    Ok(get_path(&data, path).cloned())
  }

  /// Write a value into the active response, creating intermediate maps.
  ///
  /// The result must still be a well-formed response (e.g. ratings are
  /// numbers); otherwise nothing is stored and `Error::InvalidPath` is
  /// returned.
  pub fn set_field(&self, path: &[&str], value: Value) -> Result<()> {
    check_path(path)?;
    let key = self.require_active()?;
    let mut data = serde_json::to_value(self.get_active()?)?;

    set_path(&mut data, path, value)?;
    let response: Response =
      serde_json::from_value(data).map_err(|e| Error::invalid_path(path, e.to_string()))?;

    self
      .ctx
      .store()
      .put(Resource::new(key, serde_json::to_value(response)?))?;
    Ok(())
  }

  /// Remove a value from the active response.
  ///
  /// Maps below the section that are left empty are pruned; removing a whole
  /// section empties it. Returns `false` (and writes nothing) when the path
  /// was already absent.
  pub fn delete_field(&self, path: &[&str]) -> Result<bool> {
    check_path(path)?;
    let key = self.require_active()?;
    let mut data = serde_json::to_value(self.get_active()?)?;

    let (section, rest) = match path.split_first() {
      Some(split) => split,
      None => return Err(Error::invalid_path(path, "path is empty")),
    };
    let removed = if rest.is_empty() {
      data
        .as_object_mut()
        .and_then(|map| map.remove(*section))
        .is_some()
    } else {
      data
        .get_mut(*section)
        .and_then(|node| remove_path(node, rest))
        .is_some()
    };
    if !removed {
      return Ok(false);
    }

    let response: Response =
      serde_json::from_value(data).map_err(|e| Error::invalid_path(path, e.to_string()))?;
    self
      .ctx
      .store()
      .put(Resource::new(key, serde_json::to_value(response)?))?;
    Ok(true)
  }

  /// Record the respondent's interface language on the active response.
  ///
  /// Returns `false` when there is no active response to record it on.
  pub fn record_language(&self, language: &str) -> Result<bool> {
    match self.set_field(&["respondent-data", "language"], Value::from(language)) {
      Ok(()) => Ok(true),
      Err(Error::NoActiveResponse) => Ok(false),
      Err(e) => Err(e),
    }
  }

  /// Keys of completed responses, oldest first.
  pub fn completed_keys(&self) -> Result<Vec<String>> {
    let active = self.active_key()?;
    let mut keys: Vec<String> = self
      .ctx
      .store()
      .list_names()?
      .into_iter()
      .filter(|name| is_response_key(name) && Some(name) != active.as_ref())
      .collect();
    keys.sort_by_key(|key| created_at(key));
    Ok(keys)
  }

  /// Load any stored response by key.
  pub fn load(&self, key: &str) -> Result<Response> {
    let resource = self.ctx.store().load(key)?;
    Ok(serde_json::from_value(resource.data)?)
  }

  /// Delete a response and its comment selection after a confirmed push.
  pub fn remove(&self, key: &str) -> Result<()> {
    let store = self.ctx.store();
    store.delete(key)?;
    store.delete(&crate::sampler::selection_key(key))?;
    Ok(())
  }

  fn require_active(&self) -> Result<String> {
    self.active_key()?.ok_or(Error::NoActiveResponse)
  }

  fn set_active_key(&self, key: Option<&str>) -> Result<()> {
    let pointer = key.map(Value::from).unwrap_or(Value::Null);
    self.ctx.store().put(Resource::new(CURRENT_KEY, pointer))?;
    Ok(())
  }

  /// A fresh key from the current time, bumped past any key already in use.
  fn allocate_key(&self) -> Result<String> {
    let mut created = self.ctx.now();
    loop {
      let key = format!("{}{}", RESPONSE_PREFIX, created);
      if !self.ctx.store().exists(&key)? {
        return Ok(key);
      }
      created += 1;
    }
  }
}

fn check_path(path: &[&str]) -> Result<()> {
  let Some(section) = path.first() else {
    return Err(Error::invalid_path(path, "path is empty"));
  };
  if !Response::SECTIONS.contains(section) {
    return Err(Error::invalid_path(
      path,
      format!("unknown section {:?}", section),
    ));
  }
  Ok(())
}

fn get_path<'a>(data: &'a Value, path: &[&str]) -> Option<&'a Value> {
  path
    .iter()
    .try_fold(data, |node, key| node.as_object()?.get(*key))
}

fn set_path(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
  let Some((last, parents)) = path.split_last() else {
    return Err(Error::invalid_path(path, "path is empty"));
  };

  let mut node = data;
  for key in parents {
    let map = node
      .as_object_mut()
      .ok_or_else(|| Error::invalid_path(path, format!("{:?} is not a map", key)))?;
    node = map
      .entry(key.to_string())
      .or_insert_with(|| Value::Object(Map::new()));
  }

  let map = node
    .as_object_mut()
    .ok_or_else(|| Error::invalid_path(path, format!("cannot set {:?} on a non-map", last)))?;
  map.insert(last.to_string(), value);
  Ok(())
}

/// Remove `path` below `node`, pruning maps the removal leaves empty.
fn remove_path(node: &mut Value, path: &[&str]) -> Option<Value> {
  let (first, rest) = path.split_first()?;
  let map = node.as_object_mut()?;
  if rest.is_empty() {
    return map.remove(*first);
  }

  let child = map.get_mut(*first)?;
  let removed = remove_path(child, rest)?;
  if child.as_object().is_some_and(Map::is_empty) {
    map.remove(*first);
  }
  Some(removed)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::clock::ManualClock;
  use serde_json::json;
  use std::sync::Arc;

  const LIFETIME: i64 = 1_000;

  fn responses() -> (Responses<SqliteStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(500_000));
    let ctx = Context::in_memory(clock.clone()).unwrap();
    (Responses::new(ctx, LIFETIME), clock)
  }

  fn active_count(responses: &Responses<SqliteStore>) -> usize {
    let names = responses.ctx.store().list_names().unwrap();
    let total = names.iter().filter(|n| is_response_key(n)).count();
    total - responses.completed_keys().unwrap().len()
  }

  #[test]
  fn test_no_active_response_is_observable() {
    let (responses, _clock) = responses();
    assert!(responses.active_key().unwrap().is_none());
    assert!(matches!(
      responses.get_active(),
      Err(Error::NoActiveResponse)
    ));
    assert!(matches!(
      responses.set_field(&["question-ratings", "1"], json!(3)),
      Err(Error::NoActiveResponse)
    ));
    assert!(matches!(responses.complete(), Err(Error::NoActiveResponse)));
  }

  #[test]
  fn test_start_creates_empty_active_response() {
    let (responses, _clock) = responses();
    let key = responses.start().unwrap();

    assert_eq!(key, "response-500000");
    assert_eq!(responses.active_key().unwrap(), Some(key));

    let response = responses.get_active().unwrap();
    assert!(response.question_ratings.is_empty());
    assert!(response.comments.is_empty());
    assert_eq!(response.respondent_data.len(), 1);
    let id = response.respondent_data[RESPONDENT_ID_KEY].as_str().unwrap();
    assert!(Uuid::parse_str(id).is_ok());
    assert!(responses.completed_keys().unwrap().is_empty());
  }

  #[test]
  fn test_each_response_gets_its_own_respondent_id() {
    let (responses, _clock) = responses();
    let first = responses.start().unwrap();
    let second = responses.start().unwrap();

    let id = |key: &str| {
      responses.load(key).unwrap().respondent_data[RESPONDENT_ID_KEY].clone()
    };
    assert_ne!(id(&first), id(&second));
    assert_eq!(
      responses.get_field(&["respondent-data", RESPONDENT_ID_KEY]).unwrap(),
      Some(id(&second))
    );
  }

  #[test]
  fn test_repeated_start_leaves_exactly_one_active() {
    let (responses, clock) = responses();
    let mut started = Vec::new();
    for _ in 0..4 {
      started.push(responses.start().unwrap());
      clock.advance(7);
      assert_eq!(active_count(&responses), 1);
    }

    assert_eq!(responses.active_key().unwrap().as_ref(), started.last());
    assert_eq!(responses.completed_keys().unwrap(), started[..3].to_vec());
  }

  #[test]
  fn test_same_millisecond_starts_get_distinct_keys() {
    let (responses, _clock) = responses();
    let first = responses.start().unwrap();
    let second = responses.start().unwrap();
    assert_ne!(first, second);
    assert_eq!(second, "response-500001");
    assert_eq!(responses.completed_keys().unwrap(), vec![first]);
  }

  #[test]
  fn test_complete_unsets_active_and_keeps_answers() {
    let (responses, _clock) = responses();
    let key = responses.start().unwrap();
    responses
      .set_field(&["question-ratings", "1"], json!(8))
      .unwrap();

    assert_eq!(responses.complete().unwrap(), key);
    assert!(responses.active_key().unwrap().is_none());
    assert_eq!(responses.completed_keys().unwrap(), vec![key.clone()]);
    assert_eq!(
      responses.load(&key).unwrap().question_ratings.get("1"),
      Some(&serde_json::Number::from(8u64))
    );
  }

  #[test]
  fn test_completed_response_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");

    let key = {
      let ctx = Context::open(&path, "survey").unwrap();
      let responses = Responses::new(ctx, LIFETIME);
      responses.start().unwrap();
      responses
        .set_field(&["comments", "2"], json!("More boats"))
        .unwrap();
      responses.complete().unwrap()
    };

    let responses = Responses::new(Context::open(&path, "survey").unwrap(), LIFETIME);
    assert_eq!(responses.completed_keys().unwrap(), vec![key.clone()]);
    assert_eq!(
      responses.load(&key).unwrap().comments.get("2").map(String::as_str),
      Some("More boats")
    );
  }

  #[test]
  fn test_field_round_trip_and_absent_vs_null() {
    let (responses, _clock) = responses();
    responses.start().unwrap();

    responses
      .set_field(&["comment-ratings", "12"], Value::Null)
      .unwrap();
    responses
      .set_field(&["respondent-data", "household", "size"], json!(5))
      .unwrap();
    responses
      .set_field(&["option-choices", "4"], json!("b"))
      .unwrap();

    assert_eq!(
      responses.get_field(&["comment-ratings", "12"]).unwrap(),
      Some(Value::Null)
    );
    assert_eq!(responses.get_field(&["comment-ratings", "13"]).unwrap(), None);
    assert_eq!(
      responses
        .get_field(&["respondent-data", "household", "size"])
        .unwrap(),
      Some(json!(5))
    );
    assert_eq!(
      responses.get_field(&["respondent-data", "household"]).unwrap(),
      Some(json!({"size": 5}))
    );
    assert_eq!(
      responses.get_field(&["option-choices", "4"]).unwrap(),
      Some(json!("b"))
    );
    assert_eq!(
      responses.get_field(&["question-ratings"]).unwrap(),
      Some(json!({}))
    );
  }

  #[test]
  fn test_integer_rating_reads_back_unchanged() {
    let (responses, _clock) = responses();
    responses.start().unwrap();

    responses
      .set_field(&["question-ratings", "1"], json!(8))
      .unwrap();
    responses
      .set_field(&["question-ratings", "2"], json!(6.5))
      .unwrap();
    responses
      .set_field(&["comment-ratings", "4"], json!(3))
      .unwrap();

    assert_eq!(
      responses.get_field(&["question-ratings", "1"]).unwrap(),
      Some(json!(8))
    );
    assert_eq!(
      responses.get_field(&["question-ratings", "2"]).unwrap(),
      Some(json!(6.5))
    );
    assert_eq!(
      responses.get_field(&["comment-ratings", "4"]).unwrap(),
      Some(json!(3))
    );
  }

  #[test]
  fn test_load_legacy_response_shape() {
    let (responses, _clock) = responses();
    responses
      .ctx
      .store()
      .put(Resource::new(
        "response-5",
        json!({
          "question-ratings": [],
          "comments": [],
          "comment-ratings": [],
          "personal-data": {"uuid": "legacy-id"}
        }),
      ))
      .unwrap();

    let response = responses.load("response-5").unwrap();
    assert!(response.question_ratings.is_empty());
    assert!(response.comments.is_empty());
    assert!(response.comment_ratings.is_empty());
    assert_eq!(response.respondent_data[RESPONDENT_ID_KEY], json!("legacy-id"));
    assert_eq!(responses.completed_keys().unwrap(), vec!["response-5".to_string()]);
  }

  #[test]
  fn test_delete_field_prunes_empty_parents() {
    let (responses, _clock) = responses();
    responses.start().unwrap();
    responses
      .set_field(&["respondent-data", "address", "province"], json!("Test province"))
      .unwrap();
    responses
      .set_field(&["question-ratings", "1"], json!(4))
      .unwrap();

    assert!(responses
      .delete_field(&["respondent-data", "address", "province"])
      .unwrap());
    assert_eq!(
      responses.get_field(&["respondent-data", "address"]).unwrap(),
      None
    );
    assert!(responses
      .get_field(&["respondent-data", RESPONDENT_ID_KEY])
      .unwrap()
      .is_some());

    assert!(responses.delete_field(&["question-ratings", "1"]).unwrap());
    assert_eq!(
      responses.get_field(&["question-ratings"]).unwrap(),
      Some(json!({}))
    );
  }

  #[test]
  fn test_delete_field_absent_and_invalid_paths() {
    let (responses, _clock) = responses();
    assert!(matches!(
      responses.delete_field(&["comments", "1"]),
      Err(Error::NoActiveResponse)
    ));

    responses.start().unwrap();
    assert!(!responses.delete_field(&["comments", "1"]).unwrap());
    assert!(!responses.delete_field(&["comments", "1", "deeper"]).unwrap());
    assert!(matches!(
      responses.delete_field(&[]),
      Err(Error::InvalidPath { .. })
    ));
    assert!(matches!(
      responses.delete_field(&["favorite-color"]),
      Err(Error::InvalidPath { .. })
    ));

    responses
      .set_field(&["option-choices", "2"], json!("a"))
      .unwrap();
    assert!(responses.delete_field(&["option-choices"]).unwrap());
    assert_eq!(
      responses.get_field(&["option-choices"]).unwrap(),
      Some(json!({}))
    );
  }

  #[test]
  fn test_invalid_paths_rejected_without_writing() {
    let (responses, _clock) = responses();
    responses.start().unwrap();
    let before = responses.get_active().unwrap();

    assert!(matches!(
      responses.set_field(&[], json!(1)),
      Err(Error::InvalidPath { .. })
    ));
    assert!(matches!(
      responses.set_field(&["favorite-color"], json!("blue")),
      Err(Error::InvalidPath { .. })
    ));
    assert!(matches!(
      responses.set_field(&["question-ratings", "1"], json!("high")),
      Err(Error::InvalidPath { .. })
    ));
    assert!(matches!(
      responses.set_field(&["question-ratings", "1", "deeper"], json!(2)),
      Err(Error::InvalidPath { .. })
    ));
    assert_eq!(responses.get_active().unwrap(), before);
  }

  #[test]
  fn test_expired_active_response_is_completed_not_discarded() {
    let (responses, clock) = responses();
    let key = responses.start().unwrap();
    responses
      .set_field(&["question-ratings", "1"], json!(2))
      .unwrap();

    clock.advance(LIFETIME);
    assert_eq!(responses.expire_abandoned().unwrap(), None);

    clock.advance(1);
    assert_eq!(responses.expire_abandoned().unwrap(), Some(key.clone()));
    assert!(responses.active_key().unwrap().is_none());
    assert_eq!(responses.completed_keys().unwrap(), vec![key.clone()]);
    assert_eq!(
      responses.load(&key).unwrap().question_ratings.get("1"),
      Some(&serde_json::Number::from(2u64))
    );
  }

  #[test]
  fn test_record_language() {
    let (responses, _clock) = responses();
    assert!(!responses.record_language("tl").unwrap());

    responses.start().unwrap();
    assert!(responses.record_language("tl").unwrap());
    assert_eq!(
      responses.get_field(&["respondent-data", "language"]).unwrap(),
      Some(json!("tl"))
    );
  }

  #[test]
  fn test_pointer_to_foreign_value_means_no_active() {
    let (responses, _clock) = responses();
    responses
      .ctx
      .store()
      .put(Resource::new(CURRENT_KEY, json!("none")))
      .unwrap();
    assert!(responses.active_key().unwrap().is_none());
  }

  #[test]
  fn test_remove_deletes_response_and_selection() {
    let (responses, _clock) = responses();
    let key = responses.start().unwrap();
    let store = responses.ctx.store();
    store
      .put(Resource::new(crate::sampler::selection_key(&key), json!({})))
      .unwrap();
    responses.complete().unwrap();

    responses.remove(&key).unwrap();
    assert!(!store.exists(&key).unwrap());
    assert!(!store.exists(&crate::sampler::selection_key(&key)).unwrap());
  }
}
