//! # Caller Extraction
//!
//! Authentication happens upstream. The gateway forwards the verified
//! identity as headers and every handler takes an [`AuthCaller`]:
//!
//! | Header             | Required | Value                                   |
//! |--------------------|----------|-----------------------------------------|
//! | `x-caller-id`      | yes      | user id (integer)                       |
//! | `x-caller-role`    | yes      | `admin`, `cashier`, `inventory_manager` |
//! | `x-caller-branch`  | no       | branch id the user is bound to          |
//!
//! Missing or malformed headers are rejected with `401 UNAUTHORIZED`.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use crate::error::ApiError;
use tally_core::{Caller, Role};

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const CALLER_ROLE_HEADER: &str = "x-caller-role";
pub const CALLER_BRANCH_HEADER: &str = "x-caller-branch";

/// The authenticated caller of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthCaller(pub Caller);

impl<S> FromRequestParts<S> for AuthCaller
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        caller_from_headers(&parts.headers).map(AuthCaller)
    }
}

fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let user_id = header_str(headers, CALLER_ID_HEADER)?
        .ok_or_else(|| ApiError::unauthorized(format!("Missing {CALLER_ID_HEADER} header")))?
        .parse::<i64>()
        .map_err(|_| ApiError::unauthorized(format!("{CALLER_ID_HEADER} must be an integer")))?;

    let role = header_str(headers, CALLER_ROLE_HEADER)?
        .ok_or_else(|| ApiError::unauthorized(format!("Missing {CALLER_ROLE_HEADER} header")))?
        .parse::<Role>()
        .map_err(|e| ApiError::unauthorized(e.to_string()))?;

    let branch_id = header_str(headers, CALLER_BRANCH_HEADER)?
        .map(|raw| {
            raw.parse::<i64>().map_err(|_| {
                ApiError::unauthorized(format!("{CALLER_BRANCH_HEADER} must be an integer"))
            })
        })
        .transpose()?;

    Ok(Caller::new(user_id, role, branch_id))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, ApiError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|s| Some(s.trim()))
            .map_err(|_| ApiError::unauthorized(format!("{name} is not valid text"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_branch_bound_cashier() {
        let caller = caller_from_headers(&headers(&[
            (CALLER_ID_HEADER, "9"),
            (CALLER_ROLE_HEADER, "cashier"),
            (CALLER_BRANCH_HEADER, "1"),
        ]))
        .unwrap();
        assert_eq!(caller, Caller::new(9, Role::Cashier, Some(1)));
    }

    #[test]
    fn test_branch_header_is_optional() {
        let caller = caller_from_headers(&headers(&[
            (CALLER_ID_HEADER, "1"),
            (CALLER_ROLE_HEADER, "admin"),
        ]))
        .unwrap();
        assert_eq!(caller.branch_id, None);
    }

    #[test]
    fn test_rejections_are_unauthorized() {
        for pairs in [
            vec![(CALLER_ROLE_HEADER, "admin")],
            vec![(CALLER_ID_HEADER, "1")],
            vec![(CALLER_ID_HEADER, "one"), (CALLER_ROLE_HEADER, "admin")],
            vec![(CALLER_ID_HEADER, "1"), (CALLER_ROLE_HEADER, "owner")],
            vec![
                (CALLER_ID_HEADER, "1"),
                (CALLER_ROLE_HEADER, "admin"),
                (CALLER_BRANCH_HEADER, "north"),
            ],
        ] {
            let err = caller_from_headers(&headers(&pairs)).unwrap_err();
            assert_eq!(err.code, ErrorCode::Unauthorized);
        }
    }
}
