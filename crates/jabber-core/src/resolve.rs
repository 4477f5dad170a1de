//! Disambiguation of fuzzy recipient matches

use crate::error::ResolveError;
use crate::types::DirectoryMatch;

/// Pick the single contact a fuzzy query matched
///
/// Several matches are an error carrying every candidate, even when one
/// scores higher than the rest.
pub fn pick_unique(query: &str, mut matches: Vec<DirectoryMatch>) -> Result<String, ResolveError> {
    match matches.len() {
        0 => Err(ResolveError::NoMatch(query.to_string())),
        1 => Ok(matches.remove(0).address),
        _ => Err(ResolveError::Ambiguous {
            query: query.to_string(),
            candidates: matches,
        }),
    }
}
