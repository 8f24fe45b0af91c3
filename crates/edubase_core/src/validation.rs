//! crates/edubase_core/src/validation.rs
//!
//! Checks a download request before any browser resource is touched.

use serde::{Deserialize, Serialize};

use crate::domain::{BookId, Credentials};

/// A download request as it arrives from a client. Missing fields decode to
/// their zero value and are then rejected by [`validate_download_request`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadRequest {
    pub email: String,
    pub password: String,
    pub book_id: i64,
    pub start_page: i64,
    /// `-1` means all pages.
    pub max_pages: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("email is required")]
    EmailRequired,
    #[error("password is required")]
    PasswordRequired,
    #[error("book_id must be a positive integer")]
    InvalidBookId,
    #[error("start_page must be a positive integer")]
    InvalidStartPage,
    #[error("max_pages must be -1 (all pages) or a positive integer")]
    InvalidMaxPages,
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub credentials: Credentials,
    pub book_id: BookId,
    pub start_page: u32,
    /// `None` means all pages.
    pub max_pages: Option<u32>,
}

/// Checks the fields in a fixed order and reports the first violation.
pub fn validate_download_request(req: &DownloadRequest) -> Result<ValidatedRequest, ValidationError> {
    if req.email.trim().is_empty() {
        return Err(ValidationError::EmailRequired);
    }
    if req.password.is_empty() {
        return Err(ValidationError::PasswordRequired);
    }
    let book_id = BookId::new(req.book_id).ok_or(ValidationError::InvalidBookId)?;
    let start_page = positive_u32(req.start_page).ok_or(ValidationError::InvalidStartPage)?;
    let max_pages = match req.max_pages {
        -1 => None,
        n => Some(positive_u32(n).ok_or(ValidationError::InvalidMaxPages)?),
    };

    Ok(ValidatedRequest {
        credentials: Credentials::new(req.email.trim(), req.password.clone()),
        book_id,
        start_page,
        max_pages,
    })
}

/// `max_pages` as given on the command line, where `-1` means all pages.
pub fn parse_max_pages(value: i64) -> Result<Option<u32>, ValidationError> {
    match value {
        -1 => Ok(None),
        n => positive_u32(n).map(Some).ok_or(ValidationError::InvalidMaxPages),
    }
}

fn positive_u32(value: i64) -> Option<u32> {
    u32::try_from(value).ok().filter(|v| *v > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> DownloadRequest {
        DownloadRequest {
            email: "reader@example.com".into(),
            password: "secret".into(),
            book_id: 58216,
            start_page: 1,
            max_pages: -1,
        }
    }

    #[test]
    fn accepts_a_complete_request() {
        let ok = validate_download_request(&valid()).unwrap();
        assert_eq!(ok.book_id.get(), 58216);
        assert_eq!(ok.start_page, 1);
        assert_eq!(ok.max_pages, None);

        let limited = validate_download_request(&DownloadRequest { max_pages: 10, ..valid() }).unwrap();
        assert_eq!(limited.max_pages, Some(10));
    }

    #[test]
    fn reports_the_matching_message() {
        let cases = [
            (DownloadRequest { email: String::new(), ..valid() }, "email is required"),
            (DownloadRequest { password: String::new(), ..valid() }, "password is required"),
            (DownloadRequest { book_id: 0, ..valid() }, "book_id must be a positive integer"),
            (DownloadRequest { book_id: -3, ..valid() }, "book_id must be a positive integer"),
            (DownloadRequest { start_page: 0, ..valid() }, "start_page must be a positive integer"),
            (DownloadRequest { start_page: -5, ..valid() }, "start_page must be a positive integer"),
            (DownloadRequest { max_pages: 0, ..valid() }, "max_pages must be -1 (all pages) or a positive integer"),
            (DownloadRequest { max_pages: -2, ..valid() }, "max_pages must be -1 (all pages) or a positive integer"),
        ];
        for (req, message) in cases {
            let err = validate_download_request(&req).unwrap_err();
            assert_eq!(err.to_string(), message, "{req:?}");
        }
    }

    #[test]
    fn checks_fields_in_order() {
        let err = validate_download_request(&DownloadRequest::default()).unwrap_err();
        assert_eq!(err, ValidationError::EmailRequired);

        let err = validate_download_request(&DownloadRequest {
            book_id: 0,
            max_pages: 0,
            ..valid()
        })
        .unwrap_err();
        assert_eq!(err, ValidationError::InvalidBookId);
    }

    #[test]
    fn missing_fields_decode_to_zero_values() {
        let req: DownloadRequest = serde_json::from_str(r#"{"email":"a@b.c","password":"x"}"#).unwrap();
        assert_eq!(req.book_id, 0);
        assert_eq!(
            validate_download_request(&req).unwrap_err(),
            ValidationError::InvalidBookId
        );
    }
}
