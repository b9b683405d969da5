//! Remote source adapters.
//!
//! Two network-backed kinds: a generic out-of-process HTTP source speaking
//! a small query/health contract, and a REST geocoder. Both degrade to
//! empty/low-confidence answers on any transport or decode failure; the
//! caller's deadline bounds every request.

use log::debug;
use reqwest::Client;
use serde::Deserialize;

use crate::models::Location;

/// Out-of-process HTTP source.
///
/// Contract: `GET {endpoint}/health` answers 200 when alive;
/// `GET {endpoint}/query?ip=<ip>` answers the normalized fields plus an
/// optional confidence.
pub struct RemoteHttpSource {
    pub name: String,
    pub assoc_key: String,
    pub endpoint: String,
    pub weight: f64,
    pub client: Client,
}

#[derive(Debug, Deserialize)]
struct RemoteAnswer {
    #[serde(default)]
    country: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    province: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    isp: String,
    #[serde(default)]
    confidence: f64,
}

impl RemoteHttpSource {
    pub async fn heartbeat(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .get(format!("{}/health", self.endpoint))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("health probe answered {}", response.status());
        }
        Ok(())
    }

    pub async fn query(&self, ip: &str) -> (Location, f64) {
        let request = self
            .client
            .get(format!("{}/query", self.endpoint))
            .query(&[("ip", ip)]);
        let response = match request.send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                debug!("remote_source_status name={} status={}", self.name, r.status());
                return (Location::default(), 0.0);
            }
            Err(e) => {
                debug!("remote_source_error name={} err={e}", self.name);
                return (Location::default(), 0.0);
            }
        };
        let answer: RemoteAnswer = match response.json().await {
            Ok(a) => a,
            Err(e) => {
                debug!("remote_source_decode_error name={} err={e}", self.name);
                return (Location::default(), 0.0);
            }
        };
        let confidence = if answer.confidence <= 0.0 {
            0.5
        } else {
            answer.confidence
        };
        (
            Location {
                country: answer.country,
                region: answer.region,
                province: answer.province,
                city: answer.city,
                isp: answer.isp,
            },
            confidence,
        )
    }
}

/// REST geocoder source.
///
/// The upstream answers `status`, `province`, and `city`; a successful
/// answer is domestic by contract, so country and region are pinned.
pub struct GeocoderSource {
    pub key: String,
    pub endpoint: String,
    pub weight: f64,
    pub client: Client,
}

#[derive(Debug, Deserialize)]
struct GeocoderAnswer {
    #[serde(default)]
    status: String,
    #[serde(default)]
    province: String,
    #[serde(default)]
    city: String,
}

impl GeocoderSource {
    pub async fn query(&self, ip: &str) -> (Location, f64) {
        if self.key.is_empty() {
            return (Location::default(), 0.0);
        }
        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("key", self.key.as_str()), ("ip", ip)]);
        let answer: GeocoderAnswer = match request.send().await {
            Ok(r) => match r.json().await {
                Ok(a) => a,
                Err(e) => {
                    debug!("geocoder_decode_error err={e}");
                    return (Location::default(), 0.2);
                }
            },
            Err(e) => {
                debug!("geocoder_error err={e}");
                return (Location::default(), 0.2);
            }
        };
        if answer.status != "1" {
            debug!("geocoder_rejected status={}", answer.status);
            return (Location::default(), 0.2);
        }
        (
            Location {
                country: "中国".to_string(),
                region: "中国".to_string(),
                province: answer.province,
                city: answer.city,
                isp: String::new(),
            },
            0.8,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REMOTE_SOURCE_TIMEOUT;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> Client {
        Client::builder()
            .timeout(REMOTE_SOURCE_TIMEOUT)
            .build()
            .expect("client")
    }

    fn remote(endpoint: String) -> RemoteHttpSource {
        RemoteHttpSource {
            name: "ext".into(),
            assoc_key: "ext".into(),
            endpoint,
            weight: 5.0,
            client: client(),
        }
    }

    #[tokio::test]
    async fn test_remote_query_decodes_answer() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .and(query_param("ip", "1.2.3.4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "country": "中国", "region": "华东", "province": "江苏",
                "city": "南京", "isp": "电信", "confidence": 0.85
            })))
            .mount(&server)
            .await;

        let (loc, conf) = remote(server.uri()).query("1.2.3.4").await;
        assert_eq!(loc.city, "南京");
        assert_eq!(conf, 0.85);
    }

    #[tokio::test]
    async fn test_remote_query_defaults_missing_confidence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "country": "中国"
            })))
            .mount(&server)
            .await;

        let (_, conf) = remote(server.uri()).query("1.2.3.4").await;
        assert_eq!(conf, 0.5);
    }

    #[tokio::test]
    async fn test_remote_query_degrades_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/query"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (loc, conf) = remote(server.uri()).query("1.2.3.4").await;
        assert!(loc.is_empty());
        assert_eq!(conf, 0.0);
    }

    #[tokio::test]
    async fn test_remote_heartbeat_reflects_health_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        assert!(remote(server.uri()).heartbeat().await.is_ok());

        let down = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&down)
            .await;
        assert!(remote(down.uri()).heartbeat().await.is_err());
    }

    #[tokio::test]
    async fn test_geocoder_success_pins_country() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/ip"))
            .and(query_param("ip", "1.2.3.4"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "1", "province": "江苏", "city": "南京"
            })))
            .mount(&server)
            .await;

        let source = GeocoderSource {
            key: "k".into(),
            endpoint: format!("{}/v3/ip", server.uri()),
            weight: 8.0,
            client: client(),
        };
        let (loc, conf) = source.query("1.2.3.4").await;
        assert_eq!(loc.country, "中国");
        assert_eq!(loc.region, "中国");
        assert_eq!(loc.province, "江苏");
        assert_eq!(loc.city, "南京");
        assert_eq!(conf, 0.8);
    }

    #[tokio::test]
    async fn test_geocoder_failure_is_low_confidence() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/ip"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "0", "info": "DAILY_QUERY_OVER_LIMIT"
            })))
            .mount(&server)
            .await;

        let source = GeocoderSource {
            key: "k".into(),
            endpoint: format!("{}/v3/ip", server.uri()),
            weight: 8.0,
            client: client(),
        };
        let (loc, conf) = source.query("1.2.3.4").await;
        assert!(loc.is_empty());
        assert_eq!(conf, 0.2);
    }

    #[tokio::test]
    async fn test_geocoder_without_key_is_inert() {
        let source = GeocoderSource {
            key: String::new(),
            endpoint: "http://127.0.0.1:1/v3/ip".into(),
            weight: 8.0,
            client: client(),
        };
        let (loc, conf) = source.query("1.2.3.4").await;
        assert!(loc.is_empty());
        assert_eq!(conf, 0.0);
    }
}
