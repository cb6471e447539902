//! Manifest inspection for app binaries
//!
//! The orchestrator only needs the package name, version and launchable
//! activity of an APK. The production inspector reads them from
//! `aapt dump badging`.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use super::descriptor::AppDescriptor;

/// App inspection errors
#[derive(Debug, thiserror::Error)]
pub enum InspectError {
    #[error("aapt not found at {0}")]
    ToolNotFound(PathBuf),
    #[error("aapt failed for {path}: {stderr}")]
    CommandFailed { path: PathBuf, stderr: String },
    #[error("No package name in manifest of {0}")]
    MissingPackage(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Derives an [`AppDescriptor`] from an app binary on disk
#[async_trait]
pub trait AppInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<AppDescriptor, InspectError>;
}

/// Inspector backed by the Android SDK `aapt` tool
#[derive(Debug, Clone)]
pub struct AaptInspector {
    aapt_path: PathBuf,
}

impl AaptInspector {
    pub fn new(aapt_path: impl Into<PathBuf>) -> Self {
        Self {
            aapt_path: aapt_path.into(),
        }
    }

    /// Locate aapt inside an SDK's newest build-tools directory
    pub fn from_sdk(sdk_path: &Path) -> Option<Self> {
        let build_tools = sdk_path.join("build-tools");
        let mut versions: Vec<PathBuf> = std::fs::read_dir(&build_tools)
            .ok()?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .collect();
        versions.sort();

        let exe = if cfg!(windows) { "aapt.exe" } else { "aapt" };
        versions
            .into_iter()
            .rev()
            .map(|dir| dir.join(exe))
            .find(|candidate| candidate.exists())
            .map(Self::new)
    }
}

#[async_trait]
impl AppInspector for AaptInspector {
    async fn inspect(&self, path: &Path) -> Result<AppDescriptor, InspectError> {
        tracing::debug!(path = %path.display(), "Inspecting app binary");

        let output = Command::new(&self.aapt_path)
            .args(["dump", "badging"])
            .arg(path)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => InspectError::ToolNotFound(self.aapt_path.clone()),
                _ => InspectError::Io(e),
            })?;

        if !output.status.success() {
            return Err(InspectError::CommandFailed {
                path: path.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let badging = String::from_utf8_lossy(&output.stdout);
        parse_badging(&badging, path)
    }
}

/// Parse the output of `aapt dump badging`
pub fn parse_badging(badging: &str, path: &Path) -> Result<AppDescriptor, InspectError> {
    static PACKAGE_RE: OnceLock<Regex> = OnceLock::new();
    static VERSION_RE: OnceLock<Regex> = OnceLock::new();
    static ACTIVITY_RE: OnceLock<Regex> = OnceLock::new();

    let package_re = PACKAGE_RE
        .get_or_init(|| Regex::new(r"^package: .*?name='([^']+)'").expect("Invalid regex pattern"));
    let version_re = VERSION_RE
        .get_or_init(|| Regex::new(r"versionName='([^']*)'").expect("Invalid regex pattern"));
    let activity_re = ACTIVITY_RE.get_or_init(|| {
        Regex::new(r"^launchable-activity: .*?name='([^']+)'").expect("Invalid regex pattern")
    });

    let package_line = badging
        .lines()
        .find(|line| line.starts_with("package:"))
        .ok_or_else(|| InspectError::MissingPackage(path.to_path_buf()))?;

    let base_package = package_re
        .captures(package_line)
        .map(|c| c[1].to_string())
        .ok_or_else(|| InspectError::MissingPackage(path.to_path_buf()))?;

    // Apps without a versionName are still catalogued under an empty version
    let version = version_re
        .captures(package_line)
        .map(|c| c[1].to_string())
        .unwrap_or_default();

    let main_activity = badging
        .lines()
        .find_map(|line| activity_re.captures(line).map(|c| c[1].to_string()));

    Ok(AppDescriptor {
        base_package,
        version,
        source_path: path.to_path_buf(),
        main_activity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BADGING: &str = "\
package: name='io.selendroid.testapp' versionCode='3' versionName='0.17.0' platformBuildVersionName=''
sdkVersion:'10'
targetSdkVersion:'19'
uses-permission: name='android.permission.INTERNET'
application-label:'selendroid-test-app'
launchable-activity: name='io.selendroid.testapp.HomeScreenActivity'  label='' icon=''
";

    #[test]
    fn test_parse_badging() {
        let app = parse_badging(BADGING, Path::new("/apps/testapp.apk")).unwrap();

        assert_eq!(app.base_package, "io.selendroid.testapp");
        assert_eq!(app.version, "0.17.0");
        assert_eq!(
            app.main_activity.as_deref(),
            Some("io.selendroid.testapp.HomeScreenActivity")
        );
        assert_eq!(app.key().as_str(), "io.selendroid.testapp:0.17.0");
    }

    #[test]
    fn test_parse_badging_without_activity() {
        let badging = "package: name='com.example.lib' versionCode='1' versionName='1.0'\n";
        let app = parse_badging(badging, Path::new("/apps/lib.apk")).unwrap();

        assert_eq!(app.base_package, "com.example.lib");
        assert!(app.main_activity.is_none());
    }

    #[test]
    fn test_parse_badging_missing_package() {
        let result = parse_badging("sdkVersion:'10'\n", Path::new("/apps/broken.apk"));
        assert!(matches!(result, Err(InspectError::MissingPackage(_))));
    }
}
