//! Duplicate detection for catalog records and remote files.
//!
//! Two items are "the same logical book" when their [`CanonicalKey`]s match.
//! Within a group of equal keys, the item with the highest completeness
//! [`score`] is kept; on equal scores the one seen first wins, so the result
//! does not depend on hash order or sort stability.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

use crate::models::{BookRecord, Saga};

const KEY_DELIMITER: &str = "|";
const NAME_SEPARATOR: &str = " - ";

/// Number of optional fields counted by [`score`].
pub const MAX_SCORE: usize = 8;

static SAGA_RE: OnceLock<Regex> = OnceLock::new();

/// Normalized `title|author|saga name|saga number` identity of a book.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalKey(String);

impl CanonicalKey {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for CanonicalKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Builds the key from optional parts. Absent text is empty, an absent saga
/// number is 0. Case and surrounding whitespace do not matter; a `|` or `\`
/// inside a part is escaped with a backslash.
pub fn canonical_key(
  title: Option<&str>,
  author: Option<&str>,
  saga_name: Option<&str>,
  saga_number: Option<i64>,
) -> CanonicalKey {
  let parts = [
    normalize_part(title),
    normalize_part(author),
    normalize_part(saga_name),
    saga_number.unwrap_or(0).to_string(),
  ];
  CanonicalKey(parts.join(KEY_DELIMITER))
}

// `\` and `|` inside a part are escaped so distinct parts never join into
// the same key.
fn normalize_part(value: Option<&str>) -> String {
  value
    .unwrap_or("")
    .trim()
    .to_lowercase()
    .replace('\\', "\\\\")
    .replace('|', "\\|")
}

/// Book identity recovered from a `Title - Author - Saga #N.ext` file name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFileName {
  pub title: String,
  pub author: Option<String>,
  pub saga: Option<Saga>,
}

impl ParsedFileName {
  pub fn canonical_key(&self) -> CanonicalKey {
    let saga = self.saga.as_ref();
    canonical_key(
      Some(self.title.as_str()),
      self.author.as_deref(),
      saga.map(|value| value.name.as_str()),
      saga.and_then(|value| value.number),
    )
  }
}

/// Best-effort parse of a remote file name. Never fails: segments that are
/// missing or malformed are left empty.
pub fn parse_file_name(name: &str) -> ParsedFileName {
  let stem = strip_extension(name.trim());
  let mut segments = stem.splitn(3, NAME_SEPARATOR).map(str::trim);

  let title = segments.next().unwrap_or("").to_string();
  let author = segments
    .next()
    .filter(|value| !value.is_empty())
    .map(|value| value.to_string());
  let saga = segments.next().and_then(parse_saga);

  ParsedFileName { title, author, saga }
}

fn strip_extension(name: &str) -> &str {
  match name.rfind('.') {
    Some(pos) if pos > 0 => {
      let extension = &name[pos + 1..];
      let looks_like_extension = !extension.is_empty()
        && extension.len() <= 5
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
      if looks_like_extension {
        name[..pos].trim_end()
      } else {
        name
      }
    }
    _ => name,
  }
}

fn parse_saga(segment: &str) -> Option<Saga> {
  let re = SAGA_RE.get_or_init(|| {
    Regex::new(r"^(?P<name>.*?)\s*(?:#\s*(?P<number>\d+))?\s*$").expect("saga pattern is valid")
  });
  let captures = re.captures(segment)?;
  let name = captures
    .name("name")
    .map(|value| value.as_str().trim().to_string())
    .unwrap_or_default();
  let number = captures
    .name("number")
    .and_then(|value| value.as_str().parse::<i64>().ok());

  if name.is_empty() && number.is_none() {
    return None;
  }
  Some(Saga { name, number })
}

/// Counts the populated optional metadata fields of a record.
pub fn score(record: &BookRecord) -> usize {
  let text = |value: &Option<String>| {
    value
      .as_deref()
      .map(|inner| !inner.trim().is_empty())
      .unwrap_or(false)
  };
  let populated = [
    text(&record.cover_url),
    text(&record.description),
    text(&record.publisher),
    text(&record.published_date),
    record.page_count.is_some(),
    record
      .categories
      .as_ref()
      .map(|values| !values.is_empty())
      .unwrap_or(false),
    text(&record.language),
    text(&record.preview_link),
  ];
  populated.iter().filter(|flag| **flag).count()
}

/// Items sharing one key, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct Group<T> {
  pub key: CanonicalKey,
  pub items: Vec<T>,
}

/// Partitions `items` by key. Groups come out in order of each key's first
/// appearance.
pub fn group_by_key<T, K>(items: Vec<T>, key_fn: K) -> Vec<Group<T>>
where
  K: Fn(&T) -> CanonicalKey,
{
  let mut positions: HashMap<CanonicalKey, usize> = HashMap::new();
  let mut groups: Vec<Group<T>> = Vec::new();
  for item in items {
    let key = key_fn(&item);
    match positions.get(&key) {
      Some(&pos) => groups[pos].items.push(item),
      None => {
        positions.insert(key.clone(), groups.len());
        groups.push(Group {
          key,
          items: vec![item],
        });
      }
    }
  }
  groups
}

/// Index of the highest-scoring item; the earliest one on ties.
pub fn pick_representative<T, S>(items: &[T], score_fn: S) -> Option<usize>
where
  S: Fn(&T) -> usize,
{
  let mut best: Option<(usize, usize)> = None;
  for (index, item) in items.iter().enumerate() {
    let value = score_fn(item);
    match best {
      Some((_, best_value)) if value <= best_value => {}
      _ => best = Some((index, value)),
    }
  }
  best.map(|(index, _)| index)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Deduplicated<T> {
  /// One item per key, ordered by first appearance of the key.
  pub survivors: Vec<T>,
  pub removed: Vec<T>,
}

impl<T> Deduplicated<T> {
  pub fn removed_count(&self) -> usize {
    self.removed.len()
  }
}

pub fn deduplicate_by<T, K, S>(items: Vec<T>, key_fn: K, score_fn: S) -> Deduplicated<T>
where
  K: Fn(&T) -> CanonicalKey,
  S: Fn(&T) -> usize,
{
  let mut survivors = Vec::new();
  let mut removed = Vec::new();
  for group in group_by_key(items, key_fn) {
    let keep = pick_representative(&group.items, &score_fn).unwrap_or(0);
    for (index, item) in group.items.into_iter().enumerate() {
      if index == keep {
        survivors.push(item);
      } else {
        removed.push(item);
      }
    }
  }
  Deduplicated { survivors, removed }
}

/// Collapses catalog records that share a canonical key.
pub fn deduplicate(records: Vec<BookRecord>) -> Deduplicated<BookRecord> {
  deduplicate_by(records, BookRecord::canonical_key, score)
}

#[cfg(test)]
mod tests {
  use super::*;
  use proptest::prelude::*;
  use std::collections::HashSet;

  fn book(id: &str, title: &str, author: &str) -> BookRecord {
    let mut record = BookRecord::new(id);
    record.title = Some(title.to_string());
    record.author = Some(author.to_string());
    record
  }

  /// Sets the scored fields selected by the low eight bits of `mask`.
  fn with_fields(mut record: BookRecord, mask: u8) -> BookRecord {
    if mask & 1 != 0 {
      record.cover_url = Some("https://covers.example/1.jpg".to_string());
    }
    if mask & 2 != 0 {
      record.description = Some("A desert planet.".to_string());
    }
    if mask & 4 != 0 {
      record.publisher = Some("Chilton".to_string());
    }
    if mask & 8 != 0 {
      record.published_date = Some("1965".to_string());
    }
    if mask & 16 != 0 {
      record.page_count = Some(412);
    }
    if mask & 32 != 0 {
      record.categories = Some(vec!["Fiction".to_string()]);
    }
    if mask & 64 != 0 {
      record.language = Some("en".to_string());
    }
    if mask & 128 != 0 {
      record.preview_link = Some("https://books.example/dune".to_string());
    }
    record
  }

  #[test]
  fn key_ignores_case_and_whitespace() {
    assert_eq!(
      canonical_key(Some("Dune"), Some(" Author "), None, None),
      canonical_key(Some("dune"), Some("author"), None, None)
    );
    assert_eq!(
      canonical_key(None, None, None, None).as_str(),
      "|||0"
    );
  }

  #[test]
  fn delimiter_inside_a_part_does_not_merge_books() {
    let left = canonical_key(Some("a|b"), Some("c"), None, None);
    let right = canonical_key(Some("a"), Some("b|c"), None, None);
    assert_ne!(left, right);
    assert_eq!(left.as_str(), "a\\|b|c||0");
    assert_ne!(
      canonical_key(Some("a\\"), Some("b"), None, None),
      canonical_key(Some("a"), Some("\\|b"), None, None)
    );
  }

  #[test]
  fn parses_full_file_name() {
    let parsed = parse_file_name("Dune - Frank Herbert - Dune Saga #1.epub");
    assert_eq!(parsed.title, "Dune");
    assert_eq!(parsed.author.as_deref(), Some("Frank Herbert"));
    assert_eq!(parsed.canonical_key().as_str(), "dune|frank herbert|dune saga|1");
  }

  #[test]
  fn parses_bare_title() {
    let parsed = parse_file_name("Unknown.epub");
    assert_eq!(parsed.title, "Unknown");
    assert_eq!(parsed.author, None);
    assert_eq!(parsed.saga, None);
    assert_eq!(parsed.canonical_key().as_str(), "unknown|||0");
  }

  #[test]
  fn saga_without_number_defaults_to_zero() {
    let parsed = parse_file_name("Emma - Jane Austen - Standalones.pdf");
    assert_eq!(
      parsed.saga,
      Some(Saga {
        name: "Standalones".to_string(),
        number: None
      })
    );
    assert_eq!(parsed.canonical_key().as_str(), "emma|jane austen|standalones|0");
  }

  #[test]
  fn malformed_names_degrade() {
    assert_eq!(parse_file_name("").canonical_key().as_str(), "|||0");
    assert_eq!(parse_file_name(".epub").title, ".epub");
    assert_eq!(parse_file_name("Dr. No - Ian Fleming").title, "Dr. No");
    let only_number = parse_file_name("Dune - Frank Herbert - #3.epub");
    assert_eq!(only_number.canonical_key().as_str(), "dune|frank herbert||3");
    let huge = parse_file_name("X - Y - Z #99999999999999999999999.epub");
    assert_eq!(huge.canonical_key().as_str(), "x|y|z|0");
  }

  #[test]
  fn extra_separators_stay_in_saga_segment() {
    let parsed = parse_file_name("A - B - C - D #2.epub");
    assert_eq!(parsed.canonical_key().as_str(), "a|b|c - d|2");
  }

  #[test]
  fn score_counts_each_field() {
    assert_eq!(score(&BookRecord::new("a")), 0);
    assert_eq!(score(&with_fields(BookRecord::new("a"), 0xff)), MAX_SCORE);

    let mut blank = BookRecord::new("b");
    blank.description = Some("   ".to_string());
    blank.categories = Some(vec![]);
    assert_eq!(score(&blank), 0);
  }

  #[test]
  fn tie_keeps_first_record() {
    let records = vec![book("a", "Dune", "Frank Herbert"), book("b", "dune", "frank herbert")];
    let result = deduplicate(records);
    assert_eq!(result.survivors.len(), 1);
    assert_eq!(result.survivors[0].id, "a");
    assert_eq!(result.removed_count(), 1);
  }

  #[test]
  fn most_complete_record_survives() {
    let records = vec![
      book("1", "Emma", "Jane Austen"),
      with_fields(book("2", "Dune", "Frank Herbert"), 0b0000_0111),
      book("3", "Persuasion", "Jane Austen"),
      with_fields(book("4", " DUNE ", "Frank Herbert"), 0b0001_1111),
      book("5", "Neuromancer", "William Gibson"),
    ];
    let result = deduplicate(records);
    let ids: Vec<&str> = result.survivors.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["1", "4", "3", "5"]);
    assert_eq!(result.removed_count(), 1);
    assert_eq!(result.removed[0].id, "2");
  }

  #[test]
  fn groups_keep_input_order() {
    let groups = group_by_key(
      vec![
        book("a", "X", "Y"),
        book("b", "Z", "Y"),
        book("c", "x", "y"),
      ],
      BookRecord::canonical_key,
    );
    assert_eq!(groups.len(), 2);
    let first: Vec<&str> = groups[0].items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(first, vec!["a", "c"]);
    assert_eq!(groups[1].key.as_str(), "z|y||0");
  }

  #[test]
  fn pick_on_empty_group_is_none() {
    let empty: Vec<BookRecord> = vec![];
    assert_eq!(pick_representative(&empty, score), None);
  }

  fn arb_record() -> impl Strategy<Value = BookRecord> {
    (
      prop::sample::select(vec!["Dune", " dune", "DUNE ", "Emma", "emma"]),
      prop::sample::select(vec!["Frank Herbert", "frank herbert ", "Jane Austen"]),
      prop::option::of((
        prop::sample::select(vec!["Saga", " saga"]),
        prop::option::of(0i64..3),
      )),
      any::<u8>(),
    )
      .prop_map(|(title, author, saga, mask)| {
        let mut record = with_fields(book("", title, author), mask);
        record.saga = saga.map(|(name, number)| Saga {
          name: name.to_string(),
          number,
        });
        record
      })
  }

  fn arb_catalog() -> impl Strategy<Value = Vec<BookRecord>> {
    prop::collection::vec(arb_record(), 0..16).prop_map(|mut records| {
      for (index, record) in records.iter_mut().enumerate() {
        record.id = format!("r{}", index);
      }
      records
    })
  }

  proptest! {
    #[test]
    fn key_is_case_insensitive(text in "[ ]{0,2}[a-zA-Z]{1,10}[ ]{0,2}", number in prop::option::of(0i64..50)) {
      let upper = text.to_uppercase();
      let lower = text.trim().to_lowercase();
      prop_assert_eq!(
        canonical_key(Some(upper.as_str()), Some(text.as_str()), Some(upper.as_str()), number),
        canonical_key(Some(lower.as_str()), Some(lower.as_str()), Some(lower.as_str()), number)
      );
    }

    #[test]
    fn adding_an_absent_field_adds_one(mask in any::<u8>(), bit in 0u32..8) {
      let flag = 1u8 << bit;
      prop_assume!(mask & flag == 0);
      let before = score(&with_fields(BookRecord::new("a"), mask));
      let after = score(&with_fields(BookRecord::new("a"), mask | flag));
      prop_assert_eq!(after, before + 1);
    }

    #[test]
    fn deduplicate_is_idempotent(records in arb_catalog()) {
      let once = deduplicate(records);
      let twice = deduplicate(once.survivors.clone());
      prop_assert_eq!(twice.removed_count(), 0);
      prop_assert_eq!(twice.survivors, once.survivors);
    }

    #[test]
    fn deduplicate_keeps_every_key_once(records in arb_catalog()) {
      let keys_before: HashSet<CanonicalKey> = records.iter().map(BookRecord::canonical_key).collect();
      let total = records.len();
      let result = deduplicate(records);

      prop_assert!(result.survivors.len() <= total);
      prop_assert_eq!(result.survivors.len() + result.removed_count(), total);

      let keys_after: Vec<CanonicalKey> = result.survivors.iter().map(BookRecord::canonical_key).collect();
      let unique_after: HashSet<CanonicalKey> = keys_after.iter().cloned().collect();
      prop_assert_eq!(keys_after.len(), unique_after.len());
      prop_assert_eq!(unique_after, keys_before);
    }
  }
}
