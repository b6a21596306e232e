use super::RawResponse;
use crate::error::{Error, Result};

/// Check a raw response before its bytes go anywhere else
///
/// In order: a status outside 2xx is [`Error::Fetch`], an empty body is
/// [`Error::EmptyResponse`], a body above `ceiling` is [`Error::SizeExceeded`],
/// and an HTML page served where a file was expected is
/// [`Error::DisguisedErrorPage`].
pub fn validate_response(response: &RawResponse, url: &str, ceiling: u64) -> Result<()> {
    if !(200..300).contains(&response.status) {
        return Err(Error::Fetch {
            status: response.status,
            url: url.to_string(),
        });
    }
    if response.bytes.is_empty() {
        return Err(Error::EmptyResponse);
    }
    let actual = response.bytes.len() as u64;
    if actual > ceiling {
        return Err(Error::SizeExceeded {
            limit: ceiling,
            actual,
        });
    }
    if looks_like_error_page(&response.content_type, &response.bytes) {
        return Err(Error::DisguisedErrorPage);
    }
    Ok(())
}

/// Declared type is HTML or missing and the body has an `<html` root tag
fn looks_like_error_page(content_type: &str, body: &[u8]) -> bool {
    let html_or_unknown =
        content_type.trim().is_empty() || content_type.to_ascii_lowercase().contains("text/html");
    html_or_unknown
        && body
            .windows(5)
            .any(|w| w == b"<html" || w == b"<HTML")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16, body: &[u8], content_type: &str) -> RawResponse {
        RawResponse {
            status,
            bytes: body.to_vec(),
            content_type: content_type.to_string(),
        }
    }

    #[test]
    fn accepts_ordinary_payload() {
        assert!(validate_response(&response(200, b"\x89PNG", "image/png"), "u", 100).is_ok());
    }

    #[test]
    fn non_success_status_is_fetch_error() {
        match validate_response(&response(404, b"nope", "text/plain"), "https://x/a", 100) {
            Err(Error::Fetch { status, url }) => {
                assert_eq!(status, 404);
                assert_eq!(url, "https://x/a");
            }
            other => panic!("expected Fetch, got {other:?}"),
        }
        assert!(matches!(
            validate_response(&response(302, b"x", ""), "u", 100),
            Err(Error::Fetch { status: 302, .. })
        ));
    }

    #[test]
    fn empty_body_is_rejected() {
        assert!(matches!(
            validate_response(&response(200, b"", "image/png"), "u", 100),
            Err(Error::EmptyResponse)
        ));
    }

    #[test]
    fn html_error_page_is_detected_only_for_html_or_unknown_types() {
        let page = b"<!DOCTYPE html><html><body>Not found</body></html>";
        assert!(matches!(
            validate_response(&response(200, page, "text/html; charset=utf-8"), "u", 1000),
            Err(Error::DisguisedErrorPage)
        ));
        assert!(matches!(
            validate_response(&response(200, b"<HTML>", ""), "u", 1000),
            Err(Error::DisguisedErrorPage)
        ));
        // A real HTML file with a declared non-HTML type passes through.
        assert!(validate_response(&response(200, page, "application/octet-stream"), "u", 1000).is_ok());
        // HTML type without a root tag is not an error page.
        assert!(validate_response(&response(200, b"plain", "text/html"), "u", 1000).is_ok());
    }

    #[test]
    fn ceiling_is_inclusive() {
        assert!(validate_response(&response(200, &[1; 10], "image/png"), "u", 10).is_ok());
        assert!(matches!(
            validate_response(&response(200, &[1; 11], "image/png"), "u", 10),
            Err(Error::SizeExceeded {
                limit: 10,
                actual: 11
            })
        ));
    }
}
