//! `Path<T>` extractor (§4.6): binds the k-th captured `:name` path segment,
//! decoded and parsed via `T::from_str`. Repeated `Path<T>` parameters in a
//! handler's signature consume captures left to right, tracked by
//! [`super::PathCursor`].

use super::{FromRequest, PathCursor, RouteParams};
use crate::{error::Error, http::request::Request, pipeline::BoxFuture, services::ServiceProvider};
use std::str::FromStr;

/// Binds one positionally-captured path segment, converted to `T` (§3
/// "Path parameter").
pub struct Path<T>(pub T);

impl<'a, T> FromRequest<'a> for Path<T>
where
    T: FromStr + Send + 'a,
    T::Err: std::fmt::Display,
{
    fn from_request(
        req: &'a Request,
        _services: &'a ServiceProvider,
        cursor: &mut PathCursor,
    ) -> BoxFuture<'a, Result<Self, Error>> {
        let index = cursor.next;
        cursor.next += 1;

        Box::pin(async move {
            let params = req
                .get::<RouteParams>()
                .ok_or_else(|| Error::Internal("route match missing from request".into()))?;

            let raw = params
                .segments
                .get(index)
                .ok_or_else(|| Error::Binding(format!("no path segment at position {index}")))?;

            raw.parse::<T>()
                .map(Path)
                .map_err(|e| Error::Binding(format!("invalid path parameter {raw:?}: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::response::Response,
        limits::{ReqLimits, RespLimits},
    };
    use std::collections::HashMap;

    fn request_with_captures(captures: Vec<String>) -> Request {
        let limits = ReqLimits::default();
        let mut req = Request::new(&limits);
        req.insert(RouteParams {
            segments: captures,
            named: HashMap::new(),
        });
        req
    }

    #[tokio::test]
    async fn binds_and_parses_single_segment() {
        let req = request_with_captures(vec!["42".into()]);
        let services = ServiceProvider::new();
        let mut cursor = PathCursor::default();

        let Path(id) = <Path<u32> as FromRequest>::from_request(&req, &services, &mut cursor)
            .await
            .unwrap();
        assert_eq!(id, 42);
    }

    #[tokio::test]
    async fn invalid_parse_is_a_binding_error() {
        let req = request_with_captures(vec!["abc".into()]);
        let services = ServiceProvider::new();
        let mut cursor = PathCursor::default();

        let err = <Path<u32> as FromRequest>::from_request(&req, &services, &mut cursor)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Binding(_)));
    }

    #[tokio::test]
    async fn repeated_path_params_consume_left_to_right() {
        let req = request_with_captures(vec!["7".into(), "9".into()]);
        let services = ServiceProvider::new();
        let mut cursor = PathCursor::default();

        let Path(first) = <Path<u32> as FromRequest>::from_request(&req, &services, &mut cursor)
            .await
            .unwrap();
        let Path(second) = <Path<u32> as FromRequest>::from_request(&req, &services, &mut cursor)
            .await
            .unwrap();
        assert_eq!((first, second), (7, 9));
        let _ = Response::new(&RespLimits::default());
    }
}
