use percent_encoding::utf8_percent_encode;
use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 12;
pub const FILTER_ALL: &str = "all";

/// Every endpoint of the catalogue API, queries and mutations alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Endpoint {
    GetBooks,
    GetBook,
    GetBorrowSummary,
    AddBook,
    UpdateBook,
    DeleteBook,
    BorrowBook,
}

impl Endpoint {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetBooks => "getBooks",
            Self::GetBook => "getBook",
            Self::GetBorrowSummary => "getBorrowSummary",
            Self::AddBook => "addBook",
            Self::UpdateBook => "updateBook",
            Self::DeleteBook => "deleteBook",
            Self::BorrowBook => "borrowBook",
        }
    }

    pub fn is_query(&self) -> bool {
        matches!(self, Self::GetBooks | Self::GetBook | Self::GetBorrowSummary)
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Sorted argument tuple. Ordering of the input pairs never matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryArgs(BTreeMap<String, String>);

impl QueryArgs {
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn parsed<T: FromStr>(&self, name: &str) -> Option<T> {
        self.get(name).and_then(|v| v.trim().parse().ok())
    }

    fn trimmed(&self, name: &str) -> String {
        self.get(name).map(|v| v.trim().to_string()).unwrap_or_default()
    }
}

/// Identifies one cached result: the endpoint plus its normalized arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    endpoint: Endpoint,
    args:     QueryArgs,
}

impl CacheKey {
    /// Builds a key out of raw arguments, filling the endpoint defaults in and dropping anything the endpoint doesn't
    /// understand. Two argument sets producing the same request produce the same key.
    pub fn new<K, V>(endpoint: Endpoint, raw: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let raw = QueryArgs::from_pairs(raw);
        let args = match endpoint {
            Endpoint::GetBooks => BookListArgs::from_args(&raw).to_args(),
            Endpoint::GetBorrowSummary => BorrowSummaryArgs::from_args(&raw).to_args(),
            Endpoint::GetBook | Endpoint::UpdateBook | Endpoint::DeleteBook => {
                QueryArgs::from_pairs([("id", raw.trimmed("id"))])
            }
            _ => raw,
        };
        Self { endpoint, args }
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    pub fn args(&self) -> &QueryArgs {
        &self.args
    }

    /// The book id of a detail key.
    pub fn book_id(&self) -> Option<&str> {
        match self.endpoint {
            Endpoint::GetBook => self.args.get("id"),
            _ => None,
        }
    }
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.endpoint)?;
        let mut first = true;
        for (k, v) in self.args.pairs() {
            if !first {
                f.write_str("&")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        f.write_str(")")
    }
}

/// Arguments of the paginated book listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BookListArgs {
    pub page:   u32,
    pub limit:  u32,
    pub search: String,
    pub filter: String,
}

impl Default for BookListArgs {
    fn default() -> Self {
        Self {
            page:   DEFAULT_PAGE,
            limit:  DEFAULT_LIMIT,
            search: String::new(),
            filter: FILTER_ALL.to_string(),
        }
    }
}

impl BookListArgs {
    pub fn from_args(args: &QueryArgs) -> Self {
        let filter = args.trimmed("filter");
        Self {
            page:   args.parsed("page").filter(|p| *p > 0).unwrap_or(DEFAULT_PAGE),
            limit:  args.parsed("limit").filter(|l| *l > 0).unwrap_or(DEFAULT_LIMIT),
            search: args.trimmed("search"),
            filter: if filter.is_empty() { FILTER_ALL.to_string() } else { filter },
        }
    }

    pub fn to_args(&self) -> QueryArgs {
        QueryArgs::from_pairs([
            ("page", self.page.to_string()),
            ("limit", self.limit.to_string()),
            ("search", self.search.trim().to_string()),
            ("filter", self.filter.clone()),
        ])
    }

    pub fn with_page(&self, page: u32) -> Self {
        Self { page, ..self.clone() }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(Endpoint::GetBooks, self.to_args().pairs())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummarySort {
    Title,
    Quantity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Arguments of the borrow summary aggregate. The quantity filter is one of `all`, `high`, `medium`, `low`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BorrowSummaryArgs {
    pub sort_by: SummarySort,
    pub order:   SortOrder,
    pub filter:  String,
    pub search:  String,
}

impl Default for BorrowSummaryArgs {
    fn default() -> Self {
        Self {
            sort_by: SummarySort::Quantity,
            order:   SortOrder::Desc,
            filter:  FILTER_ALL.to_string(),
            search:  String::new(),
        }
    }
}

impl BorrowSummaryArgs {
    pub fn from_args(args: &QueryArgs) -> Self {
        let sort_by = match args.get("sortBy").map(str::trim) {
            Some("title") => SummarySort::Title,
            _ => SummarySort::Quantity,
        };
        let order = match args.get("sort").or(args.get("sortOrder")).map(str::trim) {
            Some(o) if o.starts_with("asc") => SortOrder::Asc,
            _ => SortOrder::Desc,
        };
        let filter = match args.trimmed("filter").as_str() {
            f @ ("high" | "medium" | "low") => f.to_string(),
            _ => FILTER_ALL.to_string(),
        };
        Self {
            sort_by,
            order,
            filter,
            search: args.trimmed("search"),
        }
    }

    pub fn to_args(&self) -> QueryArgs {
        QueryArgs::from_pairs([
            (
                "sortBy",
                match self.sort_by {
                    SummarySort::Title => "title",
                    SummarySort::Quantity => "quantity",
                },
            ),
            (
                "sort",
                match self.order {
                    SortOrder::Asc => "asc",
                    SortOrder::Desc => "desc",
                },
            ),
            ("filter", self.filter.as_str()),
            ("search", self.search.trim()),
        ])
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(Endpoint::GetBorrowSummary, self.to_args().pairs())
    }
}

pub fn book_key(id: &str) -> CacheKey {
    CacheKey::new(Endpoint::GetBook, [("id", id)])
}

// Unreserved characters (RFC 3986) go as is, everything else is escaped.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Path of a single book resource. The id is normalized the way [`book_key`] does it, then escaped, so that the
/// request and the key always agree on which book is meant.
pub fn book_path(id: &str) -> String {
    format!("/books/{}", utf8_percent_encode(id.trim(), PATH_SEGMENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_order_does_not_matter() {
        let a = CacheKey::new(Endpoint::GetBooks, [("page", "2"), ("limit", "12"), ("search", "dune")]);
        let b = CacheKey::new(Endpoint::GetBooks, [("search", "dune"), ("page", "2"), ("limit", "12")]);
        assert_eq!(a, b);
    }

    #[test]
    fn defaults_and_spellings_collapse() {
        let explicit = CacheKey::new(
            Endpoint::GetBooks,
            [("page", "1"), ("limit", "12"), ("search", ""), ("filter", "all")],
        );
        let implied = CacheKey::new(Endpoint::GetBooks, [("filter", ""), ("search", "  ")]);
        assert_eq!(explicit, implied);
        assert_eq!(explicit, BookListArgs::default().key());

        let asc = BorrowSummaryArgs::from_args(&QueryArgs::from_pairs([("sort", "ascending")]));
        assert_eq!(asc.order, SortOrder::Asc);
        assert_eq!(
            asc.key(),
            CacheKey::new(Endpoint::GetBorrowSummary, [("sort", "asc"), ("sortBy", "quantity")])
        );
    }

    #[test]
    fn distinct_semantics_never_collide() {
        let page1 = BookListArgs::default().key();
        let page2 = BookListArgs::default().with_page(2).key();
        let detail = book_key("1");
        assert_ne!(page1, page2);
        assert_ne!(page1.endpoint(), detail.endpoint());
        assert_eq!(detail.book_id(), Some("1"));
        assert_eq!(page1.to_string(), "getBooks(filter=all&limit=12&page=1&search=)");
    }

    #[test]
    fn book_paths_follow_the_key() {
        assert_eq!(book_path(" a "), "/books/a");
        assert_eq!(book_path("a b/c?d"), "/books/a%20b%2Fc%3Fd");
        assert_eq!(book_path("65f1-x_y.z~"), "/books/65f1-x_y.z~");
        assert_eq!(book_key(" a ").book_id(), Some("a"));
    }
}
