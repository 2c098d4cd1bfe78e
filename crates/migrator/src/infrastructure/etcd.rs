//! etcd v3 client speaking the JSON gRPC gateway.
//!
//! Only the handful of KV calls the migration needs are implemented. Keys and
//! values travel base64-encoded, as the gateway requires.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use error_stack::Report;
use error_stack::ResultExt;
use reqwest::header::AUTHORIZATION;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::kv::KvStore;
use crate::config::StoreSettings;
use crate::domain::errors::StoreError;

#[derive(Serialize)]
struct RangeRequest {
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    range_end: Option<String>,
}

#[derive(Deserialize, Default)]
struct RangeResponse {
    // The gateway omits empty repeated fields.
    #[serde(default)]
    kvs: Vec<KeyValue>,
}

#[derive(Deserialize)]
struct KeyValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Serialize)]
struct PutRequest {
    key: String,
    value: String,
}

#[derive(Serialize)]
struct DeleteRangeRequest {
    key: String,
}

#[derive(Serialize)]
struct TxnRequest {
    compare: Vec<Compare>,
    success: Vec<RequestOp>,
}

#[derive(Serialize)]
struct Compare {
    key: String,
    target: &'static str,
    result: &'static str,
    create_revision: i64,
}

#[derive(Serialize)]
struct RequestOp {
    request_put: PutRequest,
}

#[derive(Deserialize)]
struct TxnResponse {
    #[serde(default)]
    succeeded: bool,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Serialize)]
struct AuthRequest<'a> {
    name: &'a str,
    password: &'a str,
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

/// The smallest key greater than every key starting with `prefix`.
fn prefix_range_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xff {
            end.push(last + 1);
            return end;
        }
    }
    // Every byte was 0xff: range to the end of the keyspace.
    vec![0]
}

fn encode(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, Report<StoreError>> {
    STANDARD.decode(value).change_context_lazy(|| StoreError::Decode {
        key: field.to_string(),
        message: "invalid base64 from gateway".to_string(),
    })
}

/// [`KvStore`] over one or more etcd endpoints.
pub struct EtcdGatewayClient {
    http: reqwest::Client,
    endpoints: Vec<String>,
    token: Option<String>,
}

impl EtcdGatewayClient {
    /// Build a client and, when credentials are configured, obtain an auth token.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Transport`] if the HTTP client cannot be built or no endpoint answers
    /// - [`StoreError::Authentication`] if the credentials are rejected
    pub async fn connect(settings: &StoreSettings) -> Result<Self, Report<StoreError>> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| {
                Report::new(StoreError::Transport {
                    endpoint: settings.endpoints.join(","),
                    message: format!("failed to build HTTP client: {e}"),
                })
            })?;

        let mut client = Self {
            http,
            endpoints: settings
                .endpoints
                .iter()
                .map(|endpoint| endpoint.trim_end_matches('/').to_string())
                .collect(),
            token: None,
        };

        if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
            client.token = Some(client.authenticate(username, password).await?);
            info!(endpoints = ?client.endpoints, username = %username, "authenticated to etcd");
        }

        Ok(client)
    }

    async fn authenticate(&self, name: &str, password: &str) -> Result<String, Report<StoreError>> {
        let response: AuthResponse = self
            .post("/v3/auth/authenticate", &AuthRequest { name, password })
            .await
            .change_context_lazy(|| StoreError::Authentication {
                message: format!("user {name} was not authenticated"),
            })?;
        Ok(response.token)
    }

    /// Send a request to the first endpoint that answers.
    async fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, Report<StoreError>>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut last_error = None;
        for endpoint in &self.endpoints {
            match self.post_to(endpoint, path, body).await {
                Ok(response) => return Ok(response),
                Err(report) if matches!(report.current_context(), StoreError::Transport { .. }) => {
                    warn!(endpoint = %endpoint, "etcd endpoint unreachable, trying next: {report:?}");
                    last_error = Some(report);
                }
                Err(report) => return Err(report),
            }
        }

        Err(last_error.unwrap_or_else(|| {
            Report::new(StoreError::Transport {
                endpoint: String::new(),
                message: "no endpoints configured".to_string(),
            })
        }))
    }

    async fn post_to<Req, Resp>(
        &self,
        endpoint: &str,
        path: &str,
        body: &Req,
    ) -> Result<Resp, Report<StoreError>>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let url = format!("{endpoint}{path}");
        let mut request = self.http.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.header(AUTHORIZATION, token.as_str());
        }

        let response = request.send().await.map_err(|e| {
            Report::new(StoreError::Transport {
                endpoint: endpoint.to_string(),
                message: e.to_string(),
            })
        })?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Report::new(StoreError::Status {
                status: status.as_u16(),
                message,
            })
            .attach_printable(format!("POST {url}")));
        }

        response.json::<Resp>().await.map_err(|e| {
            Report::new(StoreError::Decode {
                key: path.to_string(),
                message: e.to_string(),
            })
        })
    }

    async fn range(
        &self,
        key: &str,
        range_end: Option<Vec<u8>>,
    ) -> Result<Vec<(String, Vec<u8>)>, Report<StoreError>> {
        let request = RangeRequest {
            key: encode(key.as_bytes()),
            range_end: range_end.as_deref().map(encode),
        };
        let response: RangeResponse = self.post("/v3/kv/range", &request).await?;

        response
            .kvs
            .into_iter()
            .map(|kv| -> Result<_, Report<StoreError>> {
                let raw_key = decode(key, &kv.key)?;
                let key = String::from_utf8(raw_key).map_err(|e| {
                    Report::new(StoreError::Decode {
                        key: key.to_string(),
                        message: format!("non UTF-8 key: {e}"),
                    })
                })?;
                let value = decode(&key, &kv.value)?;
                Ok((key, value))
            })
            .collect()
    }
}

#[async_trait]
impl KvStore for EtcdGatewayClient {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, Report<StoreError>> {
        let mut entries = self.range(key, None).await?;
        Ok(entries.pop().map(|(_, value)| value))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, Report<StoreError>> {
        let entries = self
            .range(prefix, Some(prefix_range_end(prefix.as_bytes())))
            .await?;
        debug!(prefix, entries = entries.len(), "etcd prefix read");
        Ok(entries)
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), Report<StoreError>> {
        let request = PutRequest {
            key: encode(key.as_bytes()),
            value: encode(&value),
        };
        let _: Empty = self.post("/v3/kv/put", &request).await?;
        Ok(())
    }

    async fn put_if_absent(&self, key: &str, value: Vec<u8>) -> Result<bool, Report<StoreError>> {
        let request = TxnRequest {
            compare: vec![Compare {
                key: encode(key.as_bytes()),
                target: "CREATE",
                result: "EQUAL",
                create_revision: 0,
            }],
            success: vec![RequestOp {
                request_put: PutRequest {
                    key: encode(key.as_bytes()),
                    value: encode(&value),
                },
            }],
        };
        let response: TxnResponse = self.post("/v3/kv/txn", &request).await?;
        Ok(response.succeeded)
    }

    async fn delete(&self, key: &str) -> Result<(), Report<StoreError>> {
        let request = DeleteRangeRequest {
            key: encode(key.as_bytes()),
        };
        let _: Empty = self.post("/v3/kv/deleterange", &request).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use similar_asserts::assert_eq;
    use test_log::test;
    use wiremock::matchers::body_partial_json;
    use wiremock::matchers::header;
    use wiremock::matchers::method;
    use wiremock::matchers::path;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    fn settings(endpoints: Vec<String>) -> StoreSettings {
        StoreSettings {
            endpoints,
            prefix: "/eru".to_string(),
            username: None,
            password: None,
            timeout_secs: 2,
        }
    }

    async fn client_for(server: &MockServer) -> EtcdGatewayClient {
        EtcdGatewayClient::connect(&settings(vec![server.uri()]))
            .await
            .expect("client should build")
    }

    #[test]
    fn range_end_increments_last_byte() {
        assert_eq!(prefix_range_end(b"/pod/"), b"/pod0".to_vec());
        assert_eq!(prefix_range_end(b"a\xff"), b"b".to_vec());
        assert_eq!(prefix_range_end(b"\xff\xff"), vec![0]);
    }

    #[test(tokio::test)]
    async fn get_decodes_value() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/range"))
            .and(body_partial_json(json!({ "key": encode(b"/eru/pod/info/prod") })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "header": { "revision": "7" },
                "kvs": [{
                    "key": encode(b"/eru/pod/info/prod"),
                    "value": encode(br#"{"name":"prod"}"#),
                    "create_revision": "3"
                }],
                "count": "1"
            })))
            .mount(&server)
            .await;
        let client = client_for(&server).await;

        let value = client.get("/eru/pod/info/prod").await.expect("get should succeed");

        assert_eq!(value, Some(br#"{"name":"prod"}"#.to_vec()));
    }

    #[test(tokio::test)]
    async fn get_missing_key_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/range"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "header": { "revision": "7" }
            })))
            .mount(&server)
            .await;
        let client = client_for(&server).await;

        let value = client.get("/eru/pod/info/absent").await.expect("get should succeed");

        assert_eq!(value, None);
    }

    #[test(tokio::test)]
    async fn prefix_read_sends_range_end() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/range"))
            .and(body_partial_json(json!({
                "key": encode(b"/eru/pod/"),
                "range_end": encode(b"/eru/pod0"),
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "kvs": [
                    { "key": encode(b"/eru/pod/a"), "value": encode(b"1") },
                    { "key": encode(b"/eru/pod/b"), "value": encode(b"2") }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let client = client_for(&server).await;

        let entries = client.get_prefix("/eru/pod/").await.expect("range should succeed");

        assert_eq!(
            entries,
            vec![
                ("/eru/pod/a".to_string(), b"1".to_vec()),
                ("/eru/pod/b".to_string(), b"2".to_vec()),
            ]
        );
    }

    #[test(tokio::test)]
    async fn put_if_absent_reports_txn_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/txn"))
            .and(body_partial_json(json!({
                "compare": [{ "key": encode(b"/eru/pod/info/new"), "target": "CREATE" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "succeeded": true })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/txn"))
            .and(body_partial_json(json!({
                "compare": [{ "key": encode(b"/eru/pod/info/old"), "target": "CREATE" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        let client = client_for(&server).await;

        assert!(client
            .put_if_absent("/eru/pod/info/new", b"{}".to_vec())
            .await
            .expect("txn should succeed"));
        assert!(!client
            .put_if_absent("/eru/pod/info/old", b"{}".to_vec())
            .await
            .expect("txn should succeed"));
    }

    #[test(tokio::test)]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/put"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "error": "etcdserver: request timed out",
                "code": 14
            })))
            .mount(&server)
            .await;
        let client = client_for(&server).await;

        let err = client
            .put("/eru/node/n1", b"{}".to_vec())
            .await
            .expect_err("put should fail");

        assert!(matches!(
            err.current_context(),
            StoreError::Status { status: 500, .. }
        ));
    }

    #[test(tokio::test)]
    async fn unreachable_endpoint_falls_over_to_next() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/deleterange"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "deleted": "1" })))
            .expect(1)
            .mount(&server)
            .await;
        let mut config = settings(vec!["http://127.0.0.1:1".to_string(), server.uri()]);
        config.timeout_secs = 1;
        let client = EtcdGatewayClient::connect(&config)
            .await
            .expect("client should build");

        client.delete("/eru/node/n1").await.expect("delete should succeed");
    }

    #[test(tokio::test)]
    async fn authenticated_client_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/authenticate"))
            .and(body_partial_json(json!({ "name": "root", "password": "secret" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "tok.123" })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v3/kv/range"))
            .and(header("authorization", "tok.123"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        let mut config = settings(vec![server.uri()]);
        config.username = Some("root".to_string());
        config.password = Some("secret".to_string());

        let client = EtcdGatewayClient::connect(&config)
            .await
            .expect("client should authenticate");
        let value = client.get("/eru/pod/info/prod").await.expect("get should succeed");

        assert_eq!(value, None);
    }

    #[test(tokio::test)]
    async fn rejected_credentials_fail_connect() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/auth/authenticate"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "etcdserver: authentication failed, invalid user ID or password",
                "code": 3
            })))
            .mount(&server)
            .await;
        let mut config = settings(vec![server.uri()]);
        config.username = Some("root".to_string());
        config.password = Some("wrong".to_string());

        let err = EtcdGatewayClient::connect(&config)
            .await
            .err()
            .expect("connect should fail");

        assert!(matches!(
            err.current_context(),
            StoreError::Authentication { .. }
        ));
    }

    #[test]
    fn timeout_comes_from_settings() {
        assert_eq!(settings(vec![]).timeout(), Duration::from_secs(2));
    }
}
