//! Keyset (cursor) pagination.
//!
//! A page is addressed by the `(sort value, id)` pair of the last row the
//! caller saw. Rows are ordered by the sort field and then by id, which makes
//! the order total even when sort values repeat, and the next page starts
//! strictly after that pair. Cursors are opaque base64url strings of the form
//! `field|kind|value|id`.
//!
//! [`paginate`] implements the engine over in-memory collections; the
//! PostgreSQL backend builds the equivalent query from a [`KeysetQuery`].

use std::cmp::Ordering;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;

/// Type of a sortable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKind {
    Text,
    Integer,
    Timestamp,
    Uuid,
}

impl SortKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Text => "s",
            Self::Integer => "i",
            Self::Timestamp => "t",
            Self::Uuid => "u",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "s" => Some(Self::Text),
            "i" => Some(Self::Integer),
            "t" => Some(Self::Timestamp),
            "u" => Some(Self::Uuid),
            _ => None,
        }
    }
}

/// A typed value of a sortable field.
///
/// Values of the same kind compare naturally. Timestamps keep nanosecond
/// precision through the cursor.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum SortValue {
    Text(String),
    Integer(i64),
    Timestamp(OffsetDateTime),
    Uuid(Uuid),
}

impl SortValue {
    /// Returns the kind of this value.
    #[must_use]
    pub fn kind(&self) -> SortKind {
        match self {
            Self::Text(_) => SortKind::Text,
            Self::Integer(_) => SortKind::Integer,
            Self::Timestamp(_) => SortKind::Timestamp,
            Self::Uuid(_) => SortKind::Uuid,
        }
    }

    fn encode(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Timestamp(ts) => ts.unix_timestamp_nanos().to_string(),
            Self::Uuid(u) => u.to_string(),
        }
    }

    fn decode(kind: SortKind, raw: &str) -> Option<Self> {
        match kind {
            SortKind::Text => Some(Self::Text(raw.to_string())),
            SortKind::Integer => raw.parse().ok().map(Self::Integer),
            SortKind::Timestamp => {
                let nanos: i128 = raw.parse().ok()?;
                OffsetDateTime::from_unix_timestamp_nanos(nanos)
                    .ok()
                    .map(Self::Timestamp)
            }
            SortKind::Uuid => Uuid::parse_str(raw).ok().map(Self::Uuid),
        }
    }
}

/// An entity that can be paged by keyset.
pub trait Keyset {
    /// Unique id used as the tie-break.
    fn keyset_id(&self) -> Uuid;

    /// Returns the kind of a sortable field, or `None` if `field` is not
    /// registered as sortable for this entity.
    fn sort_kind(field: &str) -> Option<SortKind>;

    /// Returns the value of a sortable field.
    ///
    /// Must return `Some` for every field [`Keyset::sort_kind`] accepts.
    fn sort_value(&self, field: &str) -> Option<SortValue>;
}

/// A decoded position: the last row of the previous page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub field: String,
    pub value: SortValue,
    pub id: Uuid,
}

impl Cursor {
    /// Builds the cursor pointing after `item`.
    fn after<T: Keyset>(item: &T, field: &str) -> AuthResult<Self> {
        let value = item.sort_value(field).ok_or_else(|| {
            AuthError::internal(format!("sortable field '{field}' has no value"))
        })?;
        Ok(Self {
            field: field.to_string(),
            value,
            id: item.keyset_id(),
        })
    }

    /// Encodes the cursor into its opaque wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let data = format!(
            "{}|{}|{}|{}",
            self.field,
            self.value.kind().tag(),
            self.value.encode(),
            self.id
        );
        URL_SAFE_NO_PAD.encode(data.as_bytes())
    }

    /// Decodes an opaque cursor.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::InvalidCursor` if the string is not a cursor.
    pub fn decode(raw: &str) -> AuthResult<Self> {
        let invalid = || AuthError::invalid_cursor("cursor is malformed");

        let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|_| invalid())?;
        let data = String::from_utf8(bytes).map_err(|_| invalid())?;

        // Text values may contain '|', so peel the id off the right
        let (field, rest) = data.split_once('|').ok_or_else(invalid)?;
        let (tag, rest) = rest.split_once('|').ok_or_else(invalid)?;
        let (value, id) = rest.rsplit_once('|').ok_or_else(invalid)?;

        let kind = SortKind::from_tag(tag).ok_or_else(invalid)?;
        let value = SortValue::decode(kind, value).ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;

        Ok(Self {
            field: field.to_string(),
            value,
            id,
        })
    }
}

/// A page request as received from a caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRequest {
    /// Sortable field to order by.
    pub order_by: String,
    /// Sort direction.
    pub ascending: bool,
    /// Number of items per page.
    pub page_size: usize,
    /// Opaque cursor from the previous page.
    pub cursor: Option<String>,
}

impl PageRequest {
    /// Creates an ascending request for the first page.
    #[must_use]
    pub fn new(order_by: impl Into<String>, page_size: usize) -> Self {
        Self {
            order_by: order_by.into(),
            ascending: true,
            page_size,
            cursor: None,
        }
    }

    /// Orders descending.
    #[must_use]
    pub fn descending(mut self) -> Self {
        self.ascending = false;
        self
    }

    /// Continues after the given cursor.
    #[must_use]
    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Validates the request against an entity's sortable fields.
    ///
    /// # Errors
    ///
    /// - `AuthError::InvalidArgument` if `order_by` is not sortable for `T` or
    ///   the page size is outside `1..=max_page_size`
    /// - `AuthError::InvalidCursor` if the cursor is malformed or was issued
    ///   for a different field
    pub fn validate<T: Keyset>(&self, max_page_size: usize) -> AuthResult<KeysetQuery> {
        let kind = T::sort_kind(&self.order_by).ok_or_else(|| {
            AuthError::invalid_argument(format!("'{}' is not a sortable field", self.order_by))
        })?;

        if self.page_size == 0 || self.page_size > max_page_size {
            return Err(AuthError::invalid_argument(format!(
                "page size must be between 1 and {max_page_size}"
            )));
        }

        let after = match &self.cursor {
            Some(raw) => {
                let cursor = Cursor::decode(raw)?;
                if cursor.field != self.order_by || cursor.value.kind() != kind {
                    return Err(AuthError::invalid_cursor(
                        "cursor does not belong to this ordering",
                    ));
                }
                Some(cursor)
            }
            None => None,
        };

        Ok(KeysetQuery {
            order_by: self.order_by.clone(),
            kind,
            ascending: self.ascending,
            page_size: self.page_size,
            after,
        })
    }
}

/// A validated keyset query.
#[derive(Debug, Clone)]
pub struct KeysetQuery {
    pub order_by: String,
    pub kind: SortKind,
    pub ascending: bool,
    pub page_size: usize,
    pub after: Option<Cursor>,
}

impl KeysetQuery {
    /// Number of rows to fetch: one more than the page size, to detect a
    /// following page.
    #[must_use]
    pub fn fetch_limit(&self) -> usize {
        self.page_size + 1
    }

    /// Trims an over-fetched batch to the page size and derives the cursor.
    ///
    /// `rows` must be in query order and hold at most [`Self::fetch_limit`]
    /// items.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Internal` if a row lacks its sort value.
    pub fn finish<T: Keyset>(&self, mut rows: Vec<T>) -> AuthResult<Page<T>> {
        let next_cursor = if rows.len() > self.page_size {
            rows.truncate(self.page_size);
            match rows.last() {
                Some(last) => Some(Cursor::after(last, &self.order_by)?.encode()),
                None => None,
            }
        } else {
            None
        };

        Ok(Page {
            items: rows,
            next_cursor,
        })
    }

    fn order<T: Keyset>(&self, a: &T, b: &T) -> Ordering {
        let ord = a
            .sort_value(&self.order_by)
            .cmp(&b.sort_value(&self.order_by))
            .then_with(|| a.keyset_id().cmp(&b.keyset_id()));
        if self.ascending { ord } else { ord.reverse() }
    }

    fn is_past_cursor<T: Keyset>(&self, item: &T) -> bool {
        let Some(cursor) = &self.after else {
            return true;
        };
        let Some(value) = item.sort_value(&self.order_by) else {
            return false;
        };
        let ord = (&value, item.keyset_id()).cmp(&(&cursor.value, cursor.id));
        if self.ascending {
            ord == Ordering::Greater
        } else {
            ord == Ordering::Less
        }
    }
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` on the last page.
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    /// Applies a projection to every item.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}

/// Pages an in-memory collection.
///
/// Filters with `predicate`, orders by the requested field and id, skips
/// everything up to and including the cursor position and projects the
/// returned rows.
///
/// # Errors
///
/// See [`PageRequest::validate`].
pub fn paginate<T, P>(
    items: impl IntoIterator<Item = T>,
    predicate: impl Fn(&T) -> bool,
    request: &PageRequest,
    max_page_size: usize,
    projection: impl FnMut(T) -> P,
) -> AuthResult<Page<P>>
where
    T: Keyset,
{
    let query = request.validate::<T>(max_page_size)?;
    Ok(page_query(items, predicate, &query)?.map(projection))
}

/// Pages an in-memory collection with an already validated query.
///
/// # Errors
///
/// Returns `AuthError::Internal` if a row lacks its sort value.
pub fn page_query<T: Keyset>(
    items: impl IntoIterator<Item = T>,
    predicate: impl Fn(&T) -> bool,
    query: &KeysetQuery,
) -> AuthResult<Page<T>> {
    let mut rows: Vec<T> = items
        .into_iter()
        .filter(|item| predicate(item) && query.is_past_cursor(item))
        .collect();
    rows.sort_by(|a, b| query.order(a, b));
    rows.truncate(query.fetch_limit());

    query.finish(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Item {
        id: Uuid,
        name: String,
        rank: i64,
        created_at: OffsetDateTime,
    }

    impl Keyset for Item {
        fn keyset_id(&self) -> Uuid {
            self.id
        }

        fn sort_kind(field: &str) -> Option<SortKind> {
            match field {
                "name" => Some(SortKind::Text),
                "rank" => Some(SortKind::Integer),
                "created_at" => Some(SortKind::Timestamp),
                _ => None,
            }
        }

        fn sort_value(&self, field: &str) -> Option<SortValue> {
            match field {
                "name" => Some(SortValue::Text(self.name.clone())),
                "rank" => Some(SortValue::Integer(self.rank)),
                "created_at" => Some(SortValue::Timestamp(self.created_at)),
                _ => None,
            }
        }
    }

    fn dataset(len: usize) -> Vec<Item> {
        let base = OffsetDateTime::now_utc();
        (0..len)
            .map(|i| Item {
                id: Uuid::new_v4(),
                name: format!("item|{:02}", i),
                // Duplicate ranks exercise the id tie-break
                rank: (i % 4) as i64,
                created_at: base + Duration::seconds(i as i64),
            })
            .collect()
    }

    fn collect_all(data: &[Item], request: PageRequest) -> (Vec<Item>, usize) {
        let mut seen = Vec::new();
        let mut pages = 0;
        let mut cursor = None;
        loop {
            let page = paginate(
                data.iter().cloned(),
                |_| true,
                &request.clone().after(cursor),
                100,
                |i| i,
            )
            .unwrap();
            pages += 1;
            seen.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        (seen, pages)
    }

    #[test]
    fn test_pages_concatenate_to_full_scan() {
        let data = dataset(23);
        for field in ["name", "rank", "created_at"] {
            for ascending in [true, false] {
                let mut request = PageRequest::new(field, 5);
                if !ascending {
                    request = request.descending();
                }

                let full = paginate(
                    data.iter().cloned(),
                    |_| true,
                    &PageRequest {
                        page_size: 100,
                        ..request.clone()
                    },
                    100,
                    |i| i,
                )
                .unwrap();
                assert!(full.next_cursor.is_none());

                let (paged, pages) = collect_all(&data, request);
                assert_eq!(pages, 5, "field {field}");
                assert_eq!(paged, full.items, "field {field} ascending {ascending}");
            }
        }
    }

    #[test]
    fn test_created_at_descending_25_by_10() {
        let data = dataset(25);
        let mut expected = data.clone();
        expected.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let request = PageRequest::new("created_at", 10).descending();

        let first = paginate(data.iter().cloned(), |_| true, &request, 100, |i| i).unwrap();
        assert_eq!(first.items, expected[0..10]);
        assert!(first.next_cursor.is_some());

        let second = paginate(
            data.iter().cloned(),
            |_| true,
            &request.clone().after(first.next_cursor),
            100,
            |i| i,
        )
        .unwrap();
        assert_eq!(second.items, expected[10..20]);
        assert!(second.next_cursor.is_some());

        let third = paginate(
            data.iter().cloned(),
            |_| true,
            &request.clone().after(second.next_cursor),
            100,
            |i| i,
        )
        .unwrap();
        assert_eq!(third.items, expected[20..25]);
        assert!(third.next_cursor.is_none());
    }

    #[test]
    fn test_exact_multiple_has_no_empty_trailing_page() {
        let data = dataset(10);
        let (seen, pages) = collect_all(&data, PageRequest::new("rank", 5));
        assert_eq!(seen.len(), 10);
        assert_eq!(pages, 2);
    }

    #[test]
    fn test_predicate_and_projection() {
        let data = dataset(12);
        let page = paginate(
            data.iter().cloned(),
            |i| i.rank == 0,
            &PageRequest::new("created_at", 10),
            100,
            |i| i.name,
        )
        .unwrap();
        assert_eq!(page.items, vec!["item|00", "item|04", "item|08"]);
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_unknown_field_is_invalid_argument() {
        let err = paginate(
            dataset(3),
            |_| true,
            &PageRequest::new("secret", 10),
            100,
            |i| i,
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::InvalidArgument { .. }));
    }

    #[test]
    fn test_page_size_bounds() {
        for size in [0, 101] {
            let err = paginate(
                dataset(3),
                |_| true,
                &PageRequest::new("name", size),
                100,
                |i| i,
            )
            .unwrap_err();
            assert!(matches!(err, AuthError::InvalidArgument { .. }));
        }
    }

    #[test]
    fn test_garbage_cursor_is_invalid_cursor() {
        for raw in ["%%%", "bm9waXBlcw", ""] {
            let err = paginate(
                dataset(3),
                |_| true,
                &PageRequest::new("name", 10).after(Some(raw.to_string())),
                100,
                |i| i,
            )
            .unwrap_err();
            assert!(matches!(err, AuthError::InvalidCursor { .. }), "{raw}");
        }
    }

    #[test]
    fn test_cursor_for_other_field_is_rejected() {
        let data = dataset(6);
        let page = paginate(
            data.iter().cloned(),
            |_| true,
            &PageRequest::new("name", 2),
            100,
            |i| i,
        )
        .unwrap();

        let err = paginate(
            data.iter().cloned(),
            |_| true,
            &PageRequest::new("rank", 2).after(page.next_cursor),
            100,
            |i| i,
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCursor { .. }));
    }

    #[test]
    fn test_cursor_preserves_text_with_separator() {
        let cursor = Cursor {
            field: "name".to_string(),
            value: SortValue::Text("a|b|c".to_string()),
            id: Uuid::new_v4(),
        };
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }

    #[test]
    fn test_cursor_preserves_timestamp_precision() {
        let cursor = Cursor {
            field: "created_at".to_string(),
            value: SortValue::Timestamp(OffsetDateTime::now_utc()),
            id: Uuid::new_v4(),
        };
        assert_eq!(Cursor::decode(&cursor.encode()).unwrap(), cursor);
    }
}
