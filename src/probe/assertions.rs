//! The assertion grammar applied to probe responses.
//!
//! Two forms are recognized: `status==<N>` and `body_contains:<substring>`.
//! All recognized assertions must pass. Unrecognized expressions are skipped
//! so that definitions written against a newer grammar keep working here.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assertion {
    StatusEquals(u16),
    BodyContains(String),
}

pub fn parse(expr: &str) -> Option<Assertion> {
    if let Some(rest) = expr.strip_prefix("status==") {
        return rest.trim().parse::<u16>().ok().map(Assertion::StatusEquals);
    }
    if let Some(needle) = expr.strip_prefix("body_contains:") {
        return Some(Assertion::BodyContains(needle.to_string()));
    }
    None
}

/// Evaluates every recognized assertion against the response; order does not
/// matter. An empty (or entirely unrecognized) list passes.
pub fn evaluate(assertions: &[String], status_code: Option<u16>, body: Option<&str>) -> bool {
    assertions
        .iter()
        .filter_map(|expr| parse(expr))
        .all(|assertion| match assertion {
            Assertion::StatusEquals(expected) => status_code == Some(expected),
            Assertion::BodyContains(needle) => {
                body.map(|b| b.contains(&needle)).unwrap_or(false)
            }
        })
}
