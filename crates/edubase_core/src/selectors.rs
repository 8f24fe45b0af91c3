//! crates/edubase_core/src/selectors.rs
//!
//! CSS selectors and URLs of the reading platform's web app.

use crate::domain::BookId;

pub const LOGIN_EMAIL_INPUT: &str = "input[name='login']";
pub const LOGIN_PASSWORD_INPUT: &str = "input[name='password']";
pub const LOGIN_SUBMIT_BUTTON: &str = "button[type='submit']";

/// The user icon in the navbar; only rendered for a signed-in account.
pub const ACCOUNT_MARKER: &str = "#main-navbar > nav > ul.header-controls-nav.d-flex.mr-4 > li:nth-child(5) > div > div.btn.lookup-dropdown.lookup-dropdown_no-space-between.border-0.w-auto.pl-0 > i.svg-icon-user.users-profile-icon.svg-icon-primary__border.mr-2";

/// Library entries; the first `li` is the "add book" tile.
pub const LIBRARY_ITEMS: &str = "#libraryItems > li:not(:first-child)";
pub const LIBRARY_ITEM_ID_ATTRIBUTE: &str = "data-last-available-version";
pub const LIBRARY_ITEM_TITLE: &str = ".lu-library-item-title";

pub const PAGINATION_INDICATOR: &str = "#pagination > div > span";
pub const NEXT_PAGE_BUTTON: &str = "[data-action='next-page']";
pub const PAGE_CONTENT: &str = ".lu-page-svg-container";

/// Collects the de-duplicated text of the rendered page's SVG, nothing from the chrome.
pub const PAGE_TEXT_SCRIPT: &str = r#"(() => {
    const container = document.querySelector('.lu-page-svg-container svg, .lu-page svg');
    if (!container) {
        return '';
    }
    const seen = new Set();
    const parts = [];
    container.querySelectorAll('text, tspan').forEach((el) => {
        const content = (el.textContent || '').trim();
        if (content && !seen.has(content)) {
            seen.add(content);
            parts.push(content);
        }
    });
    return parts.join(' ');
})()"#;

pub fn login_url(base_url: &str) -> String {
    format!("{}/#promo?popup=login", base_url)
}

pub fn book_url(base_url: &str, book_id: BookId, page: u32) -> String {
    format!("{}/#doc/{}/{}", base_url, book_id, page)
}

/// Whether the browser is still on the login prompt.
pub fn is_login_location(url: &str) -> bool {
    url.contains("popup=login") || url.contains("#promo")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_the_hash_router() {
        let id = BookId::new(58216).unwrap();
        assert_eq!(
            book_url("https://app.edubase.ch", id, 3),
            "https://app.edubase.ch/#doc/58216/3"
        );
        assert!(is_login_location(&login_url("https://app.edubase.ch")));
        assert!(!is_login_location("https://app.edubase.ch/#library"));
    }
}
