//! Route resolution: match a logical request path against the route
//! descriptors currently registered, capturing `:var` path variables.
//!
//! When several registered entries are eligible for the same path (replica
//! instances of one service), one is picked uniformly at random so load
//! spreads across them.

use meshfw_types::{MatchResult, RouteEntry};
use rand::Rng;
use std::collections::HashMap;

use crate::error::ResolveError;

/// Match `requested_path` against `candidates` and pick one eligible entry.
///
/// Candidates are the entries fetched fresh from the registry for this
/// resolution; entries typed as anything other than a handler never match.
pub fn match_route(
    requested_path: &str,
    candidates: Vec<RouteEntry>,
) -> Result<MatchResult, ResolveError> {
    let mut eligible: Vec<MatchResult> = Vec::new();

    for route in candidates {
        if !route.is_handler() {
            continue;
        }
        if let Some(match_variables) = match_templates(requested_path, &route.path) {
            eligible.push(MatchResult { route, match_variables });
        }
    }

    if eligible.is_empty() {
        return Err(ResolveError::EndpointNotFound(requested_path.to_string()));
    }
    if eligible.len() == 1 {
        return Ok(eligible.remove(0));
    }

    let index = rand::thread_rng().gen_range(0..eligible.len());
    Ok(eligible.swap_remove(index))
}

/// Try every template of one candidate; first hit wins.
///
/// Rules, in order:
/// 1. A template string equal to the requested path matches immediately,
///    independent of segment counts.
/// 2. A single-segment request with no literal-equal template never matches
///    (keeps a bare name from matching multi-segment templates).
/// 3. Segment-wise comparison: counts must be equal, `:var` segments bind
///    variables, everything else must match literally.
fn match_templates(requested_path: &str, templates: &[String]) -> Option<HashMap<String, String>> {
    let requested: Vec<&str> = requested_path.split('/').collect();

    for template in templates {
        if template == requested_path {
            return Some(HashMap::new());
        }
        if requested.len() == 1 {
            continue;
        }

        let segments: Vec<&str> = template.split('/').collect();
        if segments.len() != requested.len() {
            continue;
        }

        let mut variables = HashMap::new();
        let mut matched = true;
        for (segment, value) in segments.iter().zip(&requested) {
            if let Some(name) = segment.strip_prefix(':') {
                variables.insert(name.to_string(), (*value).to_string());
            } else if segment != value {
                matched = false;
                break;
            }
        }
        if matched {
            return Some(variables);
        }
    }

    None
}
