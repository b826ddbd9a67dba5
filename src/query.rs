use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::ApiError;
use crate::error::CacheError;
use crate::error::Result;
use crate::key::book_key;
use crate::key::book_path;
use crate::key::BookListArgs;
use crate::key::BorrowSummaryArgs;
use crate::key::CacheKey;
use crate::key::Endpoint;
use crate::key::DEFAULT_LIMIT;
use crate::key::DEFAULT_PAGE;
use crate::traits::ApiRequest;
use crate::traits::Method;
use crate::types::BookId;
use crate::types::Envelope;
use crate::types::Payload;

/// A read endpoint together with its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    Books(BookListArgs),
    Book(BookId),
    BorrowSummary(BorrowSummaryArgs),
}

impl Query {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Self::Books(_) => Endpoint::GetBooks,
            Self::Book(_) => Endpoint::GetBook,
            Self::BorrowSummary(_) => Endpoint::GetBorrowSummary,
        }
    }

    pub fn key(&self) -> CacheKey {
        match self {
            Self::Books(args) => args.key(),
            Self::Book(id) => book_key(id),
            Self::BorrowSummary(args) => args.key(),
        }
    }

    /// Rebuilds a query from its cache key. Only query endpoints have one.
    pub fn from_key(key: &CacheKey) -> Option<Self> {
        Some(match key.endpoint() {
            Endpoint::GetBooks => Self::Books(BookListArgs::from_args(key.args())),
            Endpoint::GetBook => Self::Book(key.book_id()?.to_string()),
            Endpoint::GetBorrowSummary => Self::BorrowSummary(BorrowSummaryArgs::from_args(key.args())),
            _ => return None,
        })
    }

    pub fn request(&self) -> ApiRequest {
        let key = self.key();
        match self {
            Self::Books(_) => ApiRequest::new(Endpoint::GetBooks, Method::Get, "/books").with_query(key.args().pairs()),
            Self::Book(id) => ApiRequest::new(Endpoint::GetBook, Method::Get, book_path(id)),
            Self::BorrowSummary(_) => {
                let page = DEFAULT_PAGE.to_string();
                let limit = DEFAULT_LIMIT.to_string();
                ApiRequest::new(Endpoint::GetBorrowSummary, Method::Get, "/borrow")
                    .with_query([("page", page.as_str()), ("limit", limit.as_str())])
                    .with_query(key.args().pairs())
            }
        }
    }

    pub fn decode(&self, body: Value) -> Result<Payload> {
        let endpoint = self.endpoint();
        Ok(match self {
            Self::Books(_) => Payload::Books(require_data(endpoint, body)?),
            Self::Book(_) => Payload::Book(require_data(endpoint, body)?),
            Self::BorrowSummary(_) => Payload::BorrowSummary(require_data(endpoint, body)?),
        })
    }
}

/// Unwraps the `{ success, message, data }` envelope. A `success: false` body is an API error even under a 2xx
/// status.
pub(crate) fn open_envelope<T: DeserializeOwned>(endpoint: Endpoint, body: Value) -> Result<Envelope<T>> {
    let envelope: Envelope<T> = serde_json::from_value(body).map_err(|err| CacheError::Decode {
        endpoint: endpoint.name(),
        message:  err.to_string(),
    })?;

    if !envelope.success {
        return Err(ApiError {
            status:  None,
            message: Some(envelope.message).filter(|m| !m.is_empty()),
            code:    None,
        }
        .into());
    }

    Ok(envelope)
}

pub(crate) fn require_data<T: DeserializeOwned>(endpoint: Endpoint, body: Value) -> Result<T> {
    open_envelope(endpoint, body)?.data.ok_or_else(|| CacheError::Decode {
        endpoint: endpoint.name(),
        message:  "response carries no data".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn list_request_uses_normalized_arguments() {
        let query = Query::Books(BookListArgs {
            search: " dune ".into(),
            ..Default::default()
        });
        assert_eq!(
            query.request().to_string(),
            "GET /books?filter=all&limit=12&page=1&search=dune"
        );
        assert_eq!(Query::from_key(&query.key()).map(|q| q.key()), Some(query.key()));
    }

    #[test]
    fn detail_request_and_key_name_the_same_book() {
        let padded = Query::Book(" a ".into());
        assert_eq!(padded.key(), book_key("a"));
        assert_eq!(padded.request().to_string(), "GET /books/a");

        let odd = Query::Book("x/y z".into());
        assert_eq!(odd.request().to_string(), "GET /books/x%2Fy%20z");
    }

    #[test]
    fn failed_envelope_is_an_api_error() {
        let query = Query::Book("x".into());
        let err = query
            .decode(json!({ "success": false, "message": "Book not found" }))
            .unwrap_err();
        assert_eq!(err.user_message(), "Book not found");
    }

    #[test]
    fn missing_data_is_a_decode_error() {
        let query = Query::Book("x".into());
        assert!(matches!(
            query.decode(json!({ "success": true, "message": "ok" })),
            Err(CacheError::Decode { .. })
        ));
    }
}
