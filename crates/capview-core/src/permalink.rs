//! Shareable viewer links carrying the target URL in `?url=`.

use url::Url;

use crate::error::{CapviewError, Result};

pub const NO_URL_LOADED: &str = "No FHIR URL is currently loaded";

/// `<viewer_base>?url=<encoded target>`. Any existing query or fragment on
/// the viewer base is dropped.
pub fn build_permalink(viewer_base: &str, target: &str) -> Result<String> {
    let target = target.trim();
    if target.is_empty() {
        return Err(CapviewError::invalid_request(NO_URL_LOADED));
    }
    let mut link = Url::parse(viewer_base.trim())?;
    link.set_fragment(None);
    link.set_query(Some(&format!("url={}", urlencoding::encode(target))));
    Ok(link.to_string())
}

/// The decoded `url` query parameter of a viewer link, if any.
pub fn target_from_permalink(link: &str) -> Option<String> {
    let parsed = Url::parse(link.trim()).ok()?;
    parsed
        .query_pairs()
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
