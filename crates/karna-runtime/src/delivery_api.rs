//! [`DeliveryApi`] – the remote delivery-tracking service.
//!
//! Two calls are needed to report a verified hand-over:
//!
//! | Step | Request | Success |
//! |---|---|---|
//! | owner lookup | `GET {base}/api/owner/deliveries/{deliveryId}` | `200` with `{"ownerId": …}` |
//! | verification | `POST {base}/api/owner/deliveries/{deliveryId}/verify-otp` body `{"otp", "ownerId"}` | `200` |
//!
//! Any other status is returned as [`KarnaError::Api`]; connection failures
//! as [`KarnaError::Transport`].

use async_trait::async_trait;
use karna_types::{DeliveryId, KarnaError, Otp};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[async_trait]
pub trait DeliveryApi: Send + Sync {
    /// Resolve the owner of `delivery_id`.
    async fn owner_id(&self, delivery_id: &DeliveryId) -> Result<String, KarnaError>;

    /// Report that `otp` was entered correctly for `delivery_id`.
    async fn verify_otp(
        &self,
        delivery_id: &DeliveryId,
        otp: &Otp,
        owner_id: &str,
    ) -> Result<(), KarnaError>;
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeliveryRecord {
    #[serde(default)]
    owner_id: Option<serde_json::Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyOtpBody<'a> {
    otp: &'a str,
    owner_id: &'a str,
}

/// HTTP/JSON client for the delivery backend.
#[derive(Debug, Clone)]
pub struct HttpDeliveryApi {
    base_url: Url,
    client: reqwest::Client,
}

impl HttpDeliveryApi {
    /// # Errors
    ///
    /// Returns [`KarnaError::Config`] if `base_url` is not an absolute
    /// `http(s)` URL.
    pub fn new(base_url: &str) -> Result<Self, KarnaError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| KarnaError::Config(format!("api_base_url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(KarnaError::Config(format!(
                "api_base_url '{base_url}' cannot carry a path"
            )));
        }
        Ok(Self {
            base_url,
            client: reqwest::Client::new(),
        })
    }

    /// `{base}/api/owner/deliveries/{id}[/{suffix}]`, with the id encoded as
    /// a single path segment.
    fn delivery_url(&self, delivery_id: &DeliveryId, suffix: Option<&str>) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "owner", "deliveries", delivery_id.as_str()]);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        url
    }
}

fn transport(step: &str, e: reqwest::Error) -> KarnaError {
    KarnaError::Transport(format!("{step}: {e}"))
}

async fn api_error(response: reqwest::Response) -> KarnaError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    KarnaError::Api { status, body }
}

#[async_trait]
impl DeliveryApi for HttpDeliveryApi {
    async fn owner_id(&self, delivery_id: &DeliveryId) -> Result<String, KarnaError> {
        let url = self.delivery_url(delivery_id, None);
        debug!(%url, "looking up delivery owner");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport("owner lookup", e))?;
        if response.status() != StatusCode::OK {
            return Err(api_error(response).await);
        }

        let record: DeliveryRecord = response
            .json()
            .await
            .map_err(|e| KarnaError::BadResponse(format!("owner lookup: {e}")))?;
        match record.owner_id {
            Some(serde_json::Value::String(id)) if !id.is_empty() => Ok(id),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            _ => Err(KarnaError::BadResponse(format!(
                "delivery {delivery_id} has no ownerId"
            ))),
        }
    }

    async fn verify_otp(
        &self,
        delivery_id: &DeliveryId,
        otp: &Otp,
        owner_id: &str,
    ) -> Result<(), KarnaError> {
        let url = self.delivery_url(delivery_id, Some("verify-otp"));
        debug!(%url, "reporting verified credential");
        let response = self
            .client
            .post(url)
            .json(&VerifyOtpBody {
                otp: otp.as_str(),
                owner_id,
            })
            .send()
            .await
            .map_err(|e| transport("verify-otp", e))?;
        if response.status() != StatusCode::OK {
            return Err(api_error(response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn urls_encode_delivery_id_as_one_segment() {
        let api = HttpDeliveryApi::new("http://backend.local:5000/").unwrap();
        let id = DeliveryId::new("D1");
        assert_eq!(
            api.delivery_url(&id, None).as_str(),
            "http://backend.local:5000/api/owner/deliveries/D1"
        );
        assert_eq!(
            api.delivery_url(&id, Some("verify-otp")).as_str(),
            "http://backend.local:5000/api/owner/deliveries/D1/verify-otp"
        );
        let odd = DeliveryId::new("a/b");
        assert_eq!(
            api.delivery_url(&odd, None).as_str(),
            "http://backend.local:5000/api/owner/deliveries/a%2Fb"
        );
    }

    #[test]
    fn rejects_relative_base_url() {
        assert!(matches!(
            HttpDeliveryApi::new("not a url"),
            Err(KarnaError::Config(_))
        ));
    }

    #[tokio::test]
    async fn owner_lookup_reads_owner_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/owner/deliveries/D1"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ownerId": "O-17", "status": "en_route"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpDeliveryApi::new(&server.uri()).unwrap();
        assert_eq!(api.owner_id(&DeliveryId::new("D1")).await.unwrap(), "O-17");
    }

    #[tokio::test]
    async fn numeric_owner_id_is_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/owner/deliveries/D1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ownerId": 42})))
            .mount(&server)
            .await;

        let api = HttpDeliveryApi::new(&server.uri()).unwrap();
        assert_eq!(api.owner_id(&DeliveryId::new("D1")).await.unwrap(), "42");
    }

    #[tokio::test]
    async fn owner_lookup_non_200_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/owner/deliveries/D9"))
            .respond_with(ResponseTemplate::new(404).set_body_string("no such delivery"))
            .mount(&server)
            .await;

        let api = HttpDeliveryApi::new(&server.uri()).unwrap();
        let err = api.owner_id(&DeliveryId::new("D9")).await.unwrap_err();
        assert_eq!(
            err,
            KarnaError::Api {
                status: 404,
                body: "no such delivery".to_string()
            }
        );
    }

    #[tokio::test]
    async fn missing_owner_id_is_bad_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/owner/deliveries/D1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "x"})))
            .mount(&server)
            .await;

        let api = HttpDeliveryApi::new(&server.uri()).unwrap();
        assert!(matches!(
            api.owner_id(&DeliveryId::new("D1")).await,
            Err(KarnaError::BadResponse(_))
        ));
    }

    #[tokio::test]
    async fn verify_posts_otp_and_owner() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/owner/deliveries/D1/verify-otp"))
            .and(body_json(json!({"otp": "4321", "ownerId": "O-17"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = HttpDeliveryApi::new(&server.uri()).unwrap();
        api.verify_otp(&DeliveryId::new("D1"), &Otp::new("4321"), "O-17")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn verify_non_200_is_api_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/owner/deliveries/D1/verify-otp"))
            .respond_with(ResponseTemplate::new(400).set_body_string("otp expired"))
            .mount(&server)
            .await;

        let api = HttpDeliveryApi::new(&server.uri()).unwrap();
        let err = api
            .verify_otp(&DeliveryId::new("D1"), &Otp::new("4321"), "O-17")
            .await
            .unwrap_err();
        assert!(matches!(err, KarnaError::Api { status: 400, .. }));
    }

    #[tokio::test]
    async fn unreachable_backend_is_transport_error() {
        // Port 1 on localhost refuses connections.
        let api = HttpDeliveryApi::new("http://127.0.0.1:1").unwrap();
        assert!(matches!(
            api.owner_id(&DeliveryId::new("D1")).await,
            Err(KarnaError::Transport(_))
        ));
    }
}
