//! Wifi client configuration.
//!
//! The desired network lives in a shell-sourceable file:
//!
//! ```text
//! WIFI_SSID='My Network'
//! WIFI_PSK=hunter2
//! ```
//!
//! After every change the mode-switch executable is run; it reads the file
//! and flips the radio between client and hotspot mode. No file means
//! hotspot.

use std::borrow::Cow;
use std::io;
use std::path::Path;
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::SystemError;

const SSID_KEY: &str = "WIFI_SSID=";
const PSK_KEY: &str = "WIFI_PSK=";

/// Body of `POST /wifi`.
#[derive(Debug, Clone, Deserialize)]
pub struct WifiRequest {
    pub ssid: String,
    /// Omitted or `null` for open networks.
    #[serde(default)]
    pub psk: Option<String>,
}

/// Response of `GET /wifi`. The PSK itself is never returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WifiStatus {
    pub configured: bool,
    pub ssid: Option<String>,
    pub psk_set: bool,
    pub connected: bool,
}

/// Parsed content of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiConf {
    pub ssid: Option<String>,
    pub psk: Option<String>,
}

/// Render the config file, quoting each value for `sh`.
pub fn render_conf(ssid: &str, psk: Option<&str>) -> String {
    let ssid_q = shell_escape::unix::escape(Cow::Borrowed(ssid));
    let psk_q = shell_escape::unix::escape(Cow::Borrowed(psk.unwrap_or("")));
    format!("{SSID_KEY}{ssid_q}\n{PSK_KEY}{psk_q}\n")
}

/// Parse the config file. Surrounding quotes are stripped, escapes are not
/// interpreted.
pub fn parse_conf(content: &str) -> WifiConf {
    let mut conf = WifiConf::default();
    for line in content.lines() {
        if let Some(value) = line.strip_prefix(SSID_KEY) {
            conf.ssid = Some(unquote(value));
        } else if let Some(value) = line.strip_prefix(PSK_KEY) {
            conf.psk = Some(unquote(value));
        }
    }
    conf
}

fn unquote(value: &str) -> String {
    value
        .trim()
        .trim_matches('"')
        .trim_matches('\'')
        .to_string()
}

/// Write the config file, creating its directory if needed.
pub async fn write_conf(path: &Path, ssid: &str, psk: Option<&str>) -> Result<(), SystemError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SystemError::io(format!("create {}", parent.display()), e))?;
    }
    tokio::fs::write(path, render_conf(ssid, psk))
        .await
        .map_err(|e| SystemError::io(format!("write {}", path.display()), e))?;
    info!(ssid, psk_set = psk.is_some_and(|p| !p.is_empty()), "Wifi config written");
    Ok(())
}

/// Remove the config file. A missing file is not an error.
pub async fn clear_conf(path: &Path) -> Result<(), SystemError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            info!("Wifi config cleared");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SystemError::io(format!("remove {}", path.display()), e)),
    }
}

/// Read the config file, `None` if it doesn't exist.
pub async fn read_conf(path: &Path) -> Result<Option<WifiConf>, SystemError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(parse_conf(&content))),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(SystemError::io(format!("read {}", path.display()), e)),
    }
}

/// Run the mode-switch executable and wait for it.
pub async fn run_switch(cmd: &str) -> Result<(), SystemError> {
    debug!(cmd, "Running wifi mode switch");
    let status = Command::new(cmd)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| SystemError::io(format!("spawn {cmd}"), e))?;
    if status.success() {
        Ok(())
    } else {
        Err(SystemError::CommandFailed {
            command: cmd.to_string(),
            status: status.to_string(),
        })
    }
}

/// SSID the radio is currently associated with, via `iwgetid -r`.
pub async fn current_ssid() -> Option<String> {
    let output = match Command::new("iwgetid")
        .arg("-r")
        .stdin(Stdio::null())
        .output()
        .await
    {
        Ok(output) => output,
        Err(e) => {
            debug!("iwgetid unavailable: {e}");
            return None;
        }
    };
    if !output.status.success() {
        return None;
    }
    let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!ssid.is_empty()).then_some(ssid)
}

/// Full status for `GET /wifi`.
pub async fn status(path: &Path) -> Result<WifiStatus, SystemError> {
    let Some(conf) = read_conf(path).await? else {
        return Ok(WifiStatus::default());
    };
    Ok(WifiStatus {
        configured: true,
        psk_set: conf.psk.as_deref().is_some_and(|p| !p.is_empty()),
        ssid: conf.ssid,
        connected: current_ssid().await.is_some(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_quotes_for_shell() {
        assert_eq!(render_conf("HomeNet", Some("secret")), "WIFI_SSID=HomeNet\nWIFI_PSK=secret\n");
        assert_eq!(render_conf("My Net", None), "WIFI_SSID='My Net'\nWIFI_PSK=''\n");
        assert_eq!(
            render_conf("it's", Some("a;b")),
            "WIFI_SSID='it'\\''s'\nWIFI_PSK='a;b'\n"
        );
    }

    #[test]
    fn test_parse_strips_quotes() {
        let conf = parse_conf("WIFI_SSID='My Net'\nWIFI_PSK=\"pw\"\nOTHER=1\n");
        assert_eq!(conf.ssid.as_deref(), Some("My Net"));
        assert_eq!(conf.psk.as_deref(), Some("pw"));

        let conf = parse_conf("WIFI_SSID=Plain\n");
        assert_eq!(conf.ssid.as_deref(), Some("Plain"));
        assert_eq!(conf.psk, None);
    }

    #[test]
    fn test_parse_empty_psk() {
        let conf = parse_conf(&render_conf("Open", None));
        assert_eq!(conf.ssid.as_deref(), Some("Open"));
        assert_eq!(conf.psk.as_deref(), Some(""));
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let v = serde_json::to_value(WifiStatus::default()).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"configured": false, "ssid": null, "pskSet": false, "connected": false})
        );
    }

    #[tokio::test]
    async fn test_write_read_clear() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("wifi.conf");

        assert_eq!(read_conf(&path).await.unwrap(), None);
        assert_eq!(status(&path).await.unwrap(), WifiStatus::default());

        write_conf(&path, "Lab WiFi", Some("pw")).await.unwrap();
        let conf = read_conf(&path).await.unwrap().unwrap();
        assert_eq!(conf.ssid.as_deref(), Some("Lab WiFi"));
        assert_eq!(conf.psk.as_deref(), Some("pw"));

        clear_conf(&path).await.unwrap();
        assert!(!path.exists());
        // Clearing twice is fine.
        clear_conf(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_switch_reports_failure() {
        assert!(run_switch("true").await.is_ok());
        assert!(matches!(
            run_switch("false").await,
            Err(SystemError::CommandFailed { .. })
        ));
        assert!(matches!(
            run_switch("/nonexistent/robot-api-switch").await,
            Err(SystemError::Io { .. })
        ));
    }
}
