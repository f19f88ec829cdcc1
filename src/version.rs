//! Build and version info endpoint.

use axum::response::Json as JsonResponse;
use serde::Serialize;

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    name: &'static str,
    version: &'static str,
    build_time: &'static str,
    build_env: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            name: crate::build::PROJECT_NAME,
            version: crate::build::PKG_VERSION,
            build_time: crate::build::BUILD_TIME,
            build_env: format!(
                "{},{}",
                crate::build::RUST_VERSION,
                crate::build::RUST_CHANNEL
            ),
        }
    }
}

pub async fn get_version_info() -> JsonResponse<VersionInfo> {
    JsonResponse(VersionInfo::current())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_package_version() {
        let JsonResponse(info) = get_version_info().await;
        assert_eq!(info.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(info.name, env!("CARGO_PKG_NAME"));
    }
}
