use chrono::DateTime;
use chrono::Utc;
use garde::Validate;
use serde::Deserialize;
use serde::Serialize;

use crate::validation;

/// Server-assigned opaque identity of a book.
pub type BookId = String;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(rename = "_id")]
    pub id:             BookId,
    pub title:          String,
    pub author:         String,
    pub genre:          String,
    pub isbn:           u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description:    Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher:      Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_year: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language:       Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages:          Option<u32>,
    pub copies:         u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price:          Option<String>,
    pub available:      bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image:          Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating:         Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub review_count:   Option<u32>,
}

impl Book {
    /// Sets the number of copies and keeps `available` in line with it.
    pub fn set_copies(&mut self, copies: u32) {
        self.copies = copies;
        self.available = copies > 0;
    }

    /// Takes `quantity` copies off the shelf. The count never drops below zero; an exhausted book is no longer
    /// available.
    pub fn take_copies(&mut self, quantity: u32) {
        self.copies = self.copies.saturating_sub(quantity);
        if self.copies == 0 {
            self.available = false;
        }
    }
}

/// Pagination metadata of a book listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page:        u32,
    pub limit:       u32,
    pub total_items: u64,
    pub total_pages: u32,
    #[serde(default)]
    pub prev_page:   Option<u32>,
    #[serde(default)]
    pub next_page:   Option<u32>,
}

impl PageInfo {
    /// Derives the page counters. `next_page` is set iff `page * limit < total_items`.
    pub fn new(page: u32, limit: u32, total_items: u64) -> Self {
        let page = page.max(1);
        let total_pages = if limit == 0 {
            0
        }
        else {
            total_items.div_ceil(limit as u64) as u32
        };
        let next_page = if (page as u64) * (limit as u64) < total_items {
            Some(page + 1)
        }
        else {
            None
        };

        Self {
            page,
            limit,
            total_items,
            total_pages,
            prev_page: (page > 1).then(|| page - 1),
            next_page,
        }
    }

    pub fn has_more(&self) -> bool {
        self.next_page.is_some()
    }
}

/// One page (or an accumulation of pages) of the book listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookPage {
    pub books:      Vec<Book>,
    pub pagination: PageInfo,
}

impl BookPage {
    pub fn position_of(&self, id: &str) -> Option<usize> {
        self.books.iter().position(|b| b.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.position_of(id).is_some()
    }
}

/// Body of `POST /books`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    #[garde(length(chars, min = 1, max = 200))]
    pub title:          String,
    #[garde(length(chars, min = 1, max = 100))]
    pub author:         String,
    #[garde(length(min = 1))]
    pub genre:          String,
    #[garde(range(min = 1))]
    pub isbn:           u64,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description:    Option<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher:      Option<String>,
    #[garde(custom(validation::published_year))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_year: Option<u32>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language:       Option<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages:          Option<u32>,
    #[garde(skip)]
    pub copies:         u32,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price:          Option<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available:      Option<bool>,
    #[garde(pattern(r"^https?:[/|.\w\s-]*\.(?:jpg|gif|png|jpeg)$"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image:          Option<String>,
}

impl NewBook {
    /// Materializes the book under the given identity. Availability follows the copy count unless the form explicitly
    /// withdrew the book.
    pub fn to_book(&self, id: impl Into<BookId>) -> Book {
        Book {
            id:             id.into(),
            title:          self.title.clone(),
            author:         self.author.clone(),
            genre:          self.genre.clone(),
            isbn:           self.isbn,
            description:    self.description.clone(),
            publisher:      self.publisher.clone(),
            published_year: self.published_year,
            language:       self.language.clone(),
            pages:          self.pages,
            copies:         self.copies,
            price:          self.price.clone(),
            available:      self.copies > 0 && self.available.unwrap_or(true),
            image:          self.image.clone(),
            rating:         None,
            review_count:   None,
        }
    }
}

/// Body of `PUT /books/:id`. Only the provided fields are changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookPatch {
    #[garde(length(chars, min = 1, max = 200))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title:          Option<String>,
    #[garde(length(chars, min = 1, max = 100))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author:         Option<String>,
    #[garde(length(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre:          Option<String>,
    #[garde(range(min = 1))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub isbn:           Option<u64>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description:    Option<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publisher:      Option<String>,
    #[garde(custom(validation::published_year))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_year: Option<u32>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language:       Option<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages:          Option<u32>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copies:         Option<u32>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price:          Option<String>,
    #[garde(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available:      Option<bool>,
    #[garde(pattern(r"^https?:[/|.\w\s-]*\.(?:jpg|gif|png|jpeg)$"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image:          Option<String>,
}

impl BookPatch {
    /// Merges the provided fields into `book`. A book without copies is never left available.
    pub fn apply_to(&self, book: &mut Book) {
        macro_rules! merge {
            ($($field:ident),+ $(,)?) => {
                $( if let Some(ref v) = self.$field { book.$field = v.clone(); } )+
            };
        }
        macro_rules! merge_opt {
            ($($field:ident),+ $(,)?) => {
                $( if self.$field.is_some() { book.$field = self.$field.clone(); } )+
            };
        }

        merge!(title, author, genre, isbn);
        merge_opt!(description, publisher, published_year, language, pages, price, image);

        if let Some(copies) = self.copies {
            book.set_copies(copies);
        }
        if let Some(available) = self.available {
            book.available = available;
        }
        if book.copies == 0 {
            book.available = false;
        }
    }
}

/// Body of `POST /borrow`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BorrowRequest {
    #[garde(length(min = 1))]
    pub book:     BookId,
    #[garde(range(min = 1))]
    pub quantity: u32,
    #[garde(custom(validation::in_future))]
    pub due_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Isbn {
    Number(u64),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowedBook {
    pub title: String,
    #[serde(default)]
    pub image: Option<String>,
    pub isbn:  Isbn,
}

/// A row of the borrow summary aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BorrowSummary {
    pub book:           BorrowedBook,
    pub total_quantity: u64,
}

/// The `{ success, message, data }` wrapper every endpoint responds with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct Envelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data:    Option<T>,
}

fn default_success() -> bool {
    true
}

/// Cached result of a query. The variant is determined by the endpoint that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Books(BookPage),
    Book(Book),
    BorrowSummary(Vec<BorrowSummary>),
    Ack { message: String },
}

impl Payload {
    pub fn as_books(&self) -> Option<&BookPage> {
        match self {
            Self::Books(page) => Some(page),
            _ => None,
        }
    }

    pub fn as_book(&self) -> Option<&Book> {
        match self {
            Self::Book(book) => Some(book),
            _ => None,
        }
    }

    /// Whether the payload holds the book with the given id, either as a list element or as the single book.
    pub fn holds_book(&self, id: &str) -> bool {
        match self {
            Self::Books(page) => page.contains(id),
            Self::Book(book) => book.id == id,
            _ => false,
        }
    }
}
