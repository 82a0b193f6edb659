use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// Current UTC time as RFC 3339, the format stored in `created_at`/`updated_at` columns.
pub fn now_rfc3339() -> String {
    format_rfc3339(OffsetDateTime::now_utc())
}

pub fn format_rfc3339(at: OffsetDateTime) -> String {
    at.format(&Rfc3339)
        .unwrap_or_else(|_| at.unix_timestamp().to_string())
}
