use async_trait::async_trait;

/// Which device permissions an attempt needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaRequest {
    pub microphone: bool,
    pub camera: bool,
}

/// Result of a permission prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionGrant {
    pub microphone: bool,
    pub camera: bool,
}

impl PermissionGrant {
    pub const ALL: Self = Self {
        microphone: true,
        camera: true,
    };

    /// Names of requested permissions that were not granted.
    pub fn denied(&self, request: MediaRequest) -> Vec<&'static str> {
        let mut denied = Vec::new();
        if request.microphone && !self.microphone {
            denied.push("microphone");
        }
        if request.camera && !self.camera {
            denied.push("camera");
        }
        denied
    }
}

/// Platform permission prompt.
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    async fn request(&self, request: MediaRequest) -> PermissionGrant;
}

/// Desktop and test platforms have no runtime prompt.
pub struct GrantAll;

#[async_trait]
impl PermissionProvider for GrantAll {
    async fn request(&self, _request: MediaRequest) -> PermissionGrant {
        PermissionGrant::ALL
    }
}
