//! `Query<T>` extractor (§4.6): deserializes the request's query string into
//! `T`, matching field names to query parameter names the same way
//! `serde_urlencoded` binds a `GET` form. Raw query bytes are percent-decoded
//! here, at bind time, not by the codec (§3).

use super::{FromRequest, PathCursor};
use crate::{error::Error, http::request::Request, pipeline::BoxFuture, services::ServiceProvider};
use serde::de::DeserializeOwned;

/// Binds the query string, projected onto `T`'s fields by name (§3 "Query
/// parameter"). Conversion failure raises a 400 with a descriptive message.
pub struct Query<T>(pub T);

impl<'a, T> FromRequest<'a> for Query<T>
where
    T: DeserializeOwned + Send + 'a,
{
    fn from_request(
        req: &'a Request,
        _services: &'a ServiceProvider,
        _cursor: &mut PathCursor,
    ) -> BoxFuture<'a, Result<Self, Error>> {
        Box::pin(async move {
            let decoded: Vec<(String, String)> = req
                .url()
                .query_pairs()
                .map(|(k, v)| (decode(k), decode(v)))
                .collect();

            serde_urlencoded::from_bytes::<T>(&encode(&decoded))
                .map(Query)
                .map_err(|e| Error::Binding(format!("invalid query string: {e}")))
        })
    }
}

fn decode(raw: &[u8]) -> String {
    String::from_utf8_lossy(&crate::http::types::percent_decode(raw)).into_owned()
}

/// Re-encodes already-decoded pairs so `serde_urlencoded`, which expects
/// `application/x-www-form-urlencoded` bytes, can parse them a second time
/// into `T` without re-implementing its field-name projection.
fn encode(pairs: &[(String, String)]) -> Vec<u8> {
    serde_urlencoded::to_string(pairs)
        .unwrap_or_default()
        .into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{http::request::Parser, limits::ReqLimits};

    #[derive(serde::Deserialize, PartialEq, Debug)]
    struct Search {
        q: String,
        page: u32,
    }

    #[tokio::test]
    async fn binds_matching_fields_by_name() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, "GET /search?q=rust&page=2 HTTP/1.1\r\n\r\n");
        let req = parser.parse(&limits).unwrap().request;
        let services = ServiceProvider::new();
        let mut cursor = PathCursor::default();

        let Query(search) = <Query<Search> as FromRequest>::from_request(&req, &services, &mut cursor)
            .await
            .unwrap();
        assert_eq!(
            search,
            Search {
                q: "rust".into(),
                page: 2
            }
        );
    }

    #[tokio::test]
    async fn decodes_percent_escapes_before_binding() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Name {
            name: String,
        }
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, "GET /u?name=john%20doe HTTP/1.1\r\n\r\n");
        let req = parser.parse(&limits).unwrap().request;
        let services = ServiceProvider::new();
        let mut cursor = PathCursor::default();

        let Query(name) = <Query<Name> as FromRequest>::from_request(&req, &services, &mut cursor)
            .await
            .unwrap();
        assert_eq!(name.name, "john doe");
    }

    #[tokio::test]
    async fn missing_required_field_is_a_binding_error() {
        #[derive(serde::Deserialize)]
        struct Required {
            #[allow(dead_code)]
            id: u32,
        }
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, "GET /x HTTP/1.1\r\n\r\n");
        let req = parser.parse(&limits).unwrap().request;
        let services = ServiceProvider::new();
        let mut cursor = PathCursor::default();

        let err = <Query<Required> as FromRequest>::from_request(&req, &services, &mut cursor)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Binding(_)));
    }
}
