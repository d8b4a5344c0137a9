use chrono::{DateTime, Utc};

use crate::services::youtube_api::{Thumbnail, Thumbnails};

pub const PRIVATE_VIDEO_TITLE: &str = "Private video";
pub const PRIVATE_VIDEO_DESCRIPTION: &str = "This video is private.";
pub const THUMBNAIL_SEPARATOR: &str = "+";

/// Parse an RFC 3339 timestamp as sent by the YouTube API.
pub fn parse_published_at(date_str: Option<&str>) -> Option<DateTime<Utc>> {
    let date_str = date_str?.trim();
    if date_str.is_empty() {
        return None;
    }

    DateTime::parse_from_rfc3339(date_str)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn thumbnail_url(thumbnail: Option<&Thumbnail>) -> Option<&str> {
    thumbnail.and_then(|t| t.url.as_deref())
}

/// Joins default, medium, high and maxres URLs with `+`. Missing sizes become
/// empty strings; a missing maxres falls back to high.
pub fn compose_thumbnail(thumbnails: Option<&Thumbnails>) -> String {
    let Some(t) = thumbnails else {
        return ["", "", "", ""].join(THUMBNAIL_SEPARATOR);
    };

    let high = thumbnail_url(t.high.as_ref());
    let maxres = thumbnail_url(t.maxres.as_ref()).or(high);

    [
        thumbnail_url(t.default.as_ref()).unwrap_or(""),
        thumbnail_url(t.medium.as_ref()).unwrap_or(""),
        high.unwrap_or(""),
        maxres.unwrap_or(""),
    ]
    .join(THUMBNAIL_SEPARATOR)
}

pub fn is_private(title: Option<&str>, description: Option<&str>) -> bool {
    title == Some(PRIVATE_VIDEO_TITLE) || description == Some(PRIVATE_VIDEO_DESCRIPTION)
}

pub fn is_blank(value: Option<&str>) -> bool {
    value.map_or(true, |v| v.trim().is_empty())
}

pub fn normalize_description(description: Option<&str>) -> Option<String> {
    if is_blank(description) {
        None
    } else {
        description.map(str::to_string)
    }
}
