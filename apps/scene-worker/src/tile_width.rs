use std::collections::HashMap;

use parking_lot::RwLock;
use percent_encoding::percent_decode_str;
use tracing::debug;
use url::Url;

/// Image id -> tile width hint harvested from `tile-width` response headers.
///
/// Entries are never evicted; the table grows with the number of distinct images seen in a
/// session.
#[derive(Debug, Default)]
pub struct TileWidthTable {
    widths: RwLock<HashMap<String, String>>,
}

impl TileWidthTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `header_value` for the image addressed by `response_url`. Returns the image id
    /// the value was stored under, or `None` when the URL carries no usable id.
    pub fn record_tile_width(&self, response_url: &Url, header_value: &str) -> Option<String> {
        let image_id = image_id_from_url(response_url)?;
        debug!(image_id = %image_id, tile_width = header_value, "recorded tile width");
        self.widths
            .write()
            .insert(image_id.clone(), header_value.to_string());
        Some(image_id)
    }

    pub fn lookup(&self, image_id: &str) -> Option<String> {
        self.widths.read().get(image_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.widths.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.widths.read().is_empty()
    }
}

/// Image ids are the final path segment of image fetch URLs (`.../images/{imageId}`),
/// percent-decoded so they match the `imageId` carried in `setImage` payloads.
pub fn image_id_from_url(url: &Url) -> Option<String> {
    let segment = url
        .path_segments()?
        .filter(|segment| !segment.is_empty())
        .last()?;
    let id = percent_decode_str(segment)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    Some(id)
}
