use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use super::model::BridgeLight;
use super::model::StatePayload;
use super::BridgeError;
use crate::config::BridgeConfig;

/// Trait for lighting bridge operations
///
/// This trait allows for mocking the bridge for testing purposes
#[async_trait]
pub trait BridgeClient: Send + Sync {
    /// Check that the bridge is reachable and the user is whitelisted
    async fn connect(&self) -> Result<(), BridgeError>;

    /// Fetch every light known to the bridge
    async fn get_lights(&self) -> Result<Vec<BridgeLight>, BridgeError>;

    /// Send a state command to a single light
    async fn set_light_state(&self, id: &str, payload: &StatePayload) -> Result<(), BridgeError>;
}

/// Error entry of a bridge response, e.g.
/// `[{"error": {"type": 1, "address": "/", "description": "unauthorized user"}}]`
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "type")]
    kind: u32,
    address: String,
    description: String,
}

impl From<ApiError> for BridgeError {
    fn from(error: ApiError) -> Self {
        BridgeError::Api {
            kind: error.kind,
            address: error.address,
            description: error.description,
        }
    }
}

/// Every error entry of a bridge response
fn api_errors(body: &Value) -> Vec<ApiError> {
    body.as_array()
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("error"))
        .filter_map(|error| serde_json::from_value::<ApiError>(error.clone()).ok())
        .collect()
}

/// Pull the first error out of a bridge response, if any
fn api_error(body: &Value) -> Option<BridgeError> {
    api_errors(body).into_iter().next().map(BridgeError::from)
}

/// Check the reply to a state command
///
/// The bridge answers per attribute. A rejected `on` fails the command, as
/// does a reply without any success; other rejected attributes (e.g. `ct` on
/// a light without color temperature) are only logged.
fn check_state_reply(id: &str, body: &Value) -> Result<(), BridgeError> {
    let succeeded = body
        .as_array()
        .is_some_and(|entries| entries.iter().any(|entry| entry.get("success").is_some()));

    for error in api_errors(body) {
        if !succeeded || error.address.ends_with("/on") {
            return Err(error.into());
        }
        warn!(
            "Light {} rejected {}: {}",
            id, error.address, error.description
        );
    }

    Ok(())
}

/// Hue bridge client speaking the v1 REST API over plain HTTP
pub struct HueClient {
    http: reqwest::Client,
    base_url: String,
}

impl HueClient {
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_base_url(
            http,
            format!("http://{}/api/{}", config.host, config.user),
        ))
    }

    /// Build a client against an explicit API root (`http://host/api/<user>`)
    pub fn with_base_url(http: reqwest::Client, base_url: String) -> Self {
        Self { http, base_url }
    }

    async fn get(&self, path: &str) -> Result<Value, BridgeError> {
        let body: Value = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match api_error(&body) {
            Some(e) => Err(e),
            None => Ok(body),
        }
    }
}

#[async_trait]
impl BridgeClient for HueClient {
    async fn connect(&self) -> Result<(), BridgeError> {
        self.get("/config").await?;
        Ok(())
    }

    async fn get_lights(&self) -> Result<Vec<BridgeLight>, BridgeError> {
        let body = self.get("/lights").await?;
        let lights: HashMap<String, BridgeLight> = serde_json::from_value(body)?;

        let mut lights: Vec<BridgeLight> = lights
            .into_iter()
            .map(|(id, mut light)| {
                light.id = id;
                light
            })
            .collect();

        // Bridge ids are numeric strings; keep their natural order
        lights.sort_by(|a, b| {
            (a.id.len(), a.id.as_str()).cmp(&(b.id.len(), b.id.as_str()))
        });

        Ok(lights)
    }

    async fn set_light_state(&self, id: &str, payload: &StatePayload) -> Result<(), BridgeError> {
        let body: Value = self
            .http
            .put(format!("{}/lights/{}/state", self.base_url, id))
            .json(payload)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        check_state_reply(id, &body)
    }
}

/// Mock bridge client for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockBridgeClient {
    pub lights: std::sync::Mutex<Vec<BridgeLight>>,
    pub commands: std::sync::Mutex<Vec<(String, StatePayload)>>,
    pub connects: std::sync::atomic::AtomicUsize,
    pub fail_connect: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
#[async_trait]
impl BridgeClient for MockBridgeClient {
    async fn connect(&self) -> Result<(), BridgeError> {
        use std::sync::atomic::Ordering;

        self.connects.fetch_add(1, Ordering::SeqCst);
        // Give concurrent callers a chance to pile up behind the connect
        tokio::task::yield_now().await;

        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(BridgeError::Api {
                kind: 1,
                address: "/".to_string(),
                description: "unauthorized user".to_string(),
            });
        }
        Ok(())
    }

    async fn get_lights(&self) -> Result<Vec<BridgeLight>, BridgeError> {
        Ok(self.lights.lock().unwrap().clone())
    }

    async fn set_light_state(&self, id: &str, payload: &StatePayload) -> Result<(), BridgeError> {
        self.commands
            .lock()
            .unwrap()
            .push((id.to_string(), payload.clone()));

        // Apply the command so subsequent reads observe it
        let mut lights = self.lights.lock().unwrap();
        if let Some(light) = lights.iter_mut().find(|l| l.id == id) {
            if let Some(on) = payload.on {
                light.state.on = on;
            }
            if let Some(bri) = payload.params.bri {
                light.state.bri = Some(bri);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
impl MockBridgeClient {
    /// Create a mock bridge with the given lights
    pub fn with_lights(lights: Vec<BridgeLight>) -> Self {
        Self {
            lights: std::sync::Mutex::new(lights),
            ..Default::default()
        }
    }

    /// Number of state commands sent so far
    pub fn command_count(&self) -> usize {
        self.commands.lock().unwrap().len()
    }
}

#[cfg(test)]
pub fn test_light(id: &str, name: &str, light_type: &str, on: bool) -> BridgeLight {
    use super::model::BridgeLightState;

    BridgeLight {
        id: id.to_string(),
        name: name.to_string(),
        light_type: light_type.to_string(),
        state: BridgeLightState {
            on,
            bri: Some(200),
            hue: Some(10000),
            sat: Some(150),
            effect: Some("none".to_string()),
            ct: Some(350),
            reachable: Some(true),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use axum::extract::Path;
    use axum::extract::State;
    use axum::routing::get;
    use axum::routing::put;
    use axum::Json;
    use axum::Router;
    use serde_json::json;

    use super::*;
    use crate::bridge::LightKind;

    type Commands = Arc<Mutex<Vec<(String, Value)>>>;

    /// Serve `router` on an ephemeral port, returning the API root for `testuser`
    async fn fake_bridge(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{}/api/testuser", addr)
    }

    fn bridge_router(commands: Commands) -> Router {
        Router::new()
            .route(
                "/api/testuser/config",
                get(|| async { Json(json!({"name": "Philips hue", "apiversion": "1.50.0"})) }),
            )
            .route(
                "/api/testuser/lights",
                get(|| async {
                    Json(json!({
                        "10": {
                            "name": "B",
                            "type": "Dimmable light",
                            "state": {"on": false, "alert": "none", "reachable": true}
                        },
                        "2": {
                            "name": "A",
                            "type": "Extended color light",
                            "modelid": "LCT015",
                            "state": {
                                "on": true,
                                "bri": 254,
                                "hue": 8418,
                                "sat": 140,
                                "effect": "none",
                                "xy": [0.4573, 0.41],
                                "ct": 366,
                                "alert": "select",
                                "colormode": "ct",
                                "mode": "homeautomation",
                                "reachable": true
                            }
                        }
                    }))
                }),
            )
            .route(
                "/api/testuser/lights/:id/state",
                put(
                    |State(commands): State<Commands>,
                     Path(id): Path<String>,
                     Json(body): Json<Value>| async move {
                        commands.lock().unwrap().push((id.clone(), body));
                        if id == "99" {
                            Json(json!([{"error": {
                                "type": 3,
                                "address": "/lights/99/state",
                                "description": "resource, /lights/99/state, not available"
                            }}]))
                        } else {
                            Json(json!([{"success": {(format!("/lights/{}/state/on", id)): true}}]))
                        }
                    },
                ),
            )
            .with_state(commands)
    }

    #[tokio::test]
    async fn test_hue_client_against_bridge() {
        let commands = Commands::default();
        let base_url = fake_bridge(bridge_router(commands.clone())).await;
        let client = HueClient::with_base_url(reqwest::Client::new(), base_url);

        client.connect().await.unwrap();

        let lights = client.get_lights().await.unwrap();
        assert_eq!(lights.len(), 2);

        // Ids come from the map keys, in numeric order
        assert_eq!(lights[0].id, "2");
        assert_eq!(lights[0].name, "A");
        assert_eq!(lights[0].kind(), LightKind::ExtendedColor);
        assert_eq!(lights[0].state.ct, Some(366));
        assert_eq!(lights[1].id, "10");
        assert_eq!(lights[1].kind(), LightKind::Dimmable);
        assert_eq!(lights[1].to_light().brightness, 100);

        client
            .set_light_state("2", &StatePayload::brightness(127))
            .await
            .unwrap();

        let err = client
            .set_light_state("99", &StatePayload::brightness(127))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Api { kind: 3, .. }));

        let commands = commands.lock().unwrap().clone();
        assert_eq!(commands[0], ("2".to_string(), json!({"bri": 127})));
        assert_eq!(commands.len(), 2);
    }

    #[tokio::test]
    async fn test_hue_client_unauthorized_user() {
        let router = Router::new().route(
            "/api/testuser/config",
            get(|| async {
                Json(json!([{"error": {
                    "type": 1,
                    "address": "/",
                    "description": "unauthorized user"
                }}]))
            }),
        );
        let base_url = fake_bridge(router).await;
        let client = HueClient::with_base_url(reqwest::Client::new(), base_url);

        let err = client.connect().await.unwrap_err();
        assert_eq!(err.to_string(), "Bridge error 1 at /: unauthorized user");
    }

    #[test]
    fn test_rejected_attribute_is_not_fatal() {
        let body = json!([
            {"success": {"/lights/3/state/on": true}},
            {"error": {"type": 6, "address": "/lights/3/state/ct", "description": "parameter, ct, not available"}}
        ]);
        assert!(check_state_reply("3", &body).is_ok());
    }

    #[test]
    fn test_rejected_on_is_fatal() {
        let body = json!([
            {"success": {"/lights/3/state/bri": 254}},
            {"error": {"type": 201, "address": "/lights/3/state/on", "description": "parameter, on, is not modifiable"}}
        ]);
        assert!(matches!(
            check_state_reply("3", &body),
            Err(BridgeError::Api { kind: 201, .. })
        ));
    }

    #[test]
    fn test_reply_without_success_is_fatal() {
        let body = json!([
            {"error": {"type": 201, "address": "/lights/3/state/bri", "description": "parameter, bri, is not modifiable. Device is set to off."}}
        ]);
        assert!(check_state_reply("3", &body).is_err());
    }

    #[test]
    fn test_api_error_extracted() {
        let body = serde_json::json!([
            {"error": {"type": 1, "address": "/lights", "description": "unauthorized user"}}
        ]);

        match api_error(&body) {
            Some(BridgeError::Api { kind, address, description }) => {
                assert_eq!(kind, 1);
                assert_eq!(address, "/lights");
                assert_eq!(description, "unauthorized user");
            }
            other => panic!("expected api error, got {:?}", other),
        }
    }

    #[test]
    fn test_success_response_is_not_an_error() {
        let body = serde_json::json!([{"success": {"/lights/1/state/on": true}}]);
        assert!(api_error(&body).is_none());

        let body = serde_json::json!({"1": {"name": "Desk"}});
        assert!(api_error(&body).is_none());
    }

    #[tokio::test]
    async fn test_mock_applies_commands() {
        let client = MockBridgeClient::with_lights(vec![test_light("1", "Desk", "Dimmable light", false)]);

        client
            .set_light_state("1", &StatePayload::brightness(42))
            .await
            .unwrap();
        client
            .set_light_state("1", &StatePayload::on_off(true, Default::default()))
            .await
            .unwrap();

        let lights = client.get_lights().await.unwrap();
        assert!(lights[0].state.on);
        assert_eq!(lights[0].state.bri, Some(42));
        assert_eq!(client.command_count(), 2);
    }
}
