use crate::{ReblobError, Result};

use super::SUPPORTED_FEATURES;
use super::messages::HeaderBlock;

/// Fails on the first required feature outside [`SUPPORTED_FEATURES`].
///
/// Optional features are never checked; they are carried through as-is.
pub fn validate_required_features(header: &HeaderBlock) -> Result<()> {
    match header
        .required_features
        .iter()
        .find(|feature| !SUPPORTED_FEATURES.contains(&feature.as_str()))
    {
        Some(feature) => Err(ReblobError::UnsupportedFeature(feature.clone())),
        None => Ok(()),
    }
}
