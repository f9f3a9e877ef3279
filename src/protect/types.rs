use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// NVR device snapshot returned after authentication.
///
/// Only the device lists are typed; every other field is carried through
/// untouched so `/api/bootstrap` can return the full document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Bootstrap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cameras: Option<Vec<Camera>>,
    #[serde(default)]
    pub lights: Vec<Value>,
    #[serde(default)]
    pub sensors: Vec<Value>,
    #[serde(default)]
    pub chimes: Vec<Value>,
    #[serde(default)]
    pub viewers: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Bootstrap {
    /// Cameras from the top-level list, falling back to the legacy
    /// `nvr.cameras` location used by older controllers.
    pub fn cameras(&self) -> Vec<Camera> {
        if let Some(cameras) = &self.cameras {
            return cameras.clone();
        }

        self.extra
            .get("nvr")
            .and_then(|nvr| nvr.get("cameras"))
            .and_then(|cameras| serde_json::from_value(cameras.clone()).ok())
            .unwrap_or_default()
    }

    /// Find a camera by id, MAC or UUID
    pub fn find_camera(&self, camera_id: &str) -> Option<Camera> {
        self.cameras().into_iter().find(|c| c.matches(camera_id))
    }

    pub fn is_empty(&self) -> bool {
        self.cameras().is_empty()
            && self.lights.is_empty()
            && self.sensors.is_empty()
            && self.chimes.is_empty()
            && self.viewers.is_empty()
    }
}

/// Camera entry of the bootstrap
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Camera {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_connected: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Camera {
    /// Stable identifier: id, then MAC, then UUID
    pub fn identifier(&self) -> Option<&str> {
        [&self.id, &self.mac, &self.uuid]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.is_empty())
    }

    pub fn label(&self) -> &str {
        [&self.name, &self.display_name, &self.kind]
            .into_iter()
            .filter_map(|v| v.as_deref())
            .find(|v| !v.is_empty())
            .unwrap_or("Camera")
    }

    pub fn is_online(&self) -> bool {
        self.is_connected
            .unwrap_or_else(|| self.state.as_deref() == Some("CONNECTED"))
    }

    pub fn matches(&self, camera_id: &str) -> bool {
        [&self.id, &self.mac, &self.uuid]
            .into_iter()
            .any(|v| v.as_deref() == Some(camera_id))
    }
}

/// Camera entry returned by `/api/cameras`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CameraSummary {
    pub id: String,
    pub name: String,
    pub is_online: bool,
}

impl CameraSummary {
    pub fn from_camera(camera: &Camera) -> Option<Self> {
        Some(Self {
            id: camera.identifier()?.to_string(),
            name: camera.label().to_string(),
            is_online: camera.is_online(),
        })
    }
}
