use std::time::{SystemTime, UNIX_EPOCH};

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::OssError;

/// RFC 1123 date in GMT, the form the `Date` header and V2 signing expect.
pub const GMT_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

fn real_time() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_secs())
        .unwrap_or_default()
}

/// Seconds since the unix epoch.
#[cfg(not(test))]
pub fn current_time() -> u64 {
    real_time()
}

#[cfg(test)]
pub use mocked_time::*;

pub fn now_utc() -> Result<OffsetDateTime, OssError> {
    OffsetDateTime::from_unix_timestamp(current_time() as i64)
        .map_err(|e| OssError::Config(format!("system clock out of range: {}", e)))
}

pub fn gmt_date(at: OffsetDateTime) -> Result<String, OssError> {
    Ok(at.format(GMT_DATE)?)
}

pub fn gmt_now() -> Result<String, OssError> {
    gmt_date(now_utc()?)
}
