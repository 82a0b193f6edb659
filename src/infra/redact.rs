//! Connection-string masking for log output.

use url::Url;

const MASK: &str = "****";

/// Replace the password component of a connection URL with `****`.
///
/// Strings that do not parse as URLs are returned with everything between the scheme
/// separator and the last `@` masked, so a malformed DSN still never leaks credentials.
pub fn mask_connection_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                // set_password only fails for cannot-be-a-base URLs, which carry no password.
                let _ = url.set_password(Some(MASK));
            }
            url.to_string()
        }
        Err(_) => match (raw.find("://"), raw.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end + 3 => {
                format!("{}{MASK}{}", &raw[..scheme_end + 3], &raw[at..])
            }
            _ => raw.to_string(),
        },
    }
}
