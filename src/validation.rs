//! Form-level checks run before a mutation is allowed anywhere near the network.

use chrono::DateTime;
use chrono::Datelike;
use chrono::Utc;
use garde::Validate;
use std::fmt::Display;

/// A single rejected field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field:   String,
    pub message: String,
}

/// All field rejections of one submission, in the order the validator reported them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldError>);

impl ValidationErrors {
    pub fn fields(&self) -> &[FieldError] {
        &self.0
    }

    pub fn for_field(&self, field: &str) -> Option<&str> {
        self.0.iter().find(|e| e.field == field).map(|e| e.message.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for ValidationErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for err in &self.0 {
            if !first {
                f.write_str("; ")?;
            }
            first = false;
            write!(f, "{}: {}", err.field, err.message)?;
        }
        Ok(())
    }
}

impl From<garde::Report> for ValidationErrors {
    fn from(report: garde::Report) -> Self {
        Self(
            report
                .iter()
                .map(|(path, error)| FieldError {
                    field:   path.to_string(),
                    message: error.message().to_string(),
                })
                .collect(),
        )
    }
}

/// Runs the derived rules of a form.
pub fn check<T>(form: &T) -> Result<(), ValidationErrors>
where
    T: Validate<Context = ()>,
{
    form.validate().map_err(ValidationErrors::from)
}

pub(crate) fn published_year(value: &Option<u32>, _ctx: &()) -> garde::Result {
    match value {
        Some(year) if *year < 1000 || *year as i32 > Utc::now().year() => {
            Err(garde::Error::new("please enter a valid published year"))
        }
        _ => Ok(()),
    }
}

pub(crate) fn in_future(value: &DateTime<Utc>, _ctx: &()) -> garde::Result {
    if *value <= Utc::now() {
        return Err(garde::Error::new("due date must be in the future"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BorrowRequest;
    use crate::types::NewBook;
    use chrono::Duration;

    fn form() -> NewBook {
        NewBook {
            title:          "Dune".into(),
            author:         "Frank Herbert".into(),
            genre:          "SCIENCE".into(),
            isbn:           9780441013593,
            description:    None,
            publisher:      None,
            published_year: Some(1965),
            language:       None,
            pages:          None,
            copies:         3,
            price:          None,
            available:      None,
            image:          Some("https://example.com/dune.jpg".into()),
        }
    }

    #[test]
    fn accepts_a_complete_form() {
        assert!(check(&form()).is_ok());
    }

    #[test]
    fn reports_every_bad_field() {
        let mut bad = form();
        bad.title = String::new();
        bad.published_year = Some(999);
        bad.image = Some("ftp://example.com/dune.bmp".into());

        let errors = check(&bad).unwrap_err();
        assert_eq!(errors.fields().len(), 3);
        assert!(errors.for_field("title").is_some());
        assert_eq!(errors.for_field("published_year"), Some("please enter a valid published year"));
        assert!(errors.for_field("image").is_some());
    }

    #[test]
    fn borrow_needs_quantity_and_future_due_date() {
        let req = BorrowRequest {
            book:     "a".into(),
            quantity: 0,
            due_date: Utc::now() - Duration::days(1),
        };
        let errors = check(&req).unwrap_err();
        assert!(errors.for_field("quantity").is_some());
        assert_eq!(errors.for_field("due_date"), Some("due date must be in the future"));
    }
}
