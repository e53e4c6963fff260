use std::path::Path;

use chrono::{DateTime, FixedOffset, Local, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const CLIENT_DATETIME_HEADER: &str = "x-client-datetime";
pub const CLIENT_TIMEZONE_HEADER: &str = "x-client-timezone";
pub const CLIENT_UTC_OFFSET_HEADER: &str = "x-client-utc-offset";
pub const CLIENT_LOCALE_HEADER: &str = "x-client-locale";

/// Client-side metadata attached to every outgoing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext {
    pub device_id: Option<String>,
    pub datetime: Option<String>,
    pub timezone: Option<String>,
    /// Local time minus UTC, in minutes (e.g. -180 for America/Sao_Paulo)
    pub utc_offset_minutes: Option<i32>,
    pub locale: Option<String>,
}

impl ClientContext {
    /// Capture the current time context of this host.
    pub fn capture(device_id: Option<String>) -> Self {
        let now = Local::now();
        Self::at(
            now.fixed_offset(),
            device_id,
            detect_timezone(),
            detect_locale(),
        )
    }

    pub fn at(
        now: DateTime<FixedOffset>,
        device_id: Option<String>,
        timezone: Option<String>,
        locale: Option<String>,
    ) -> Self {
        Self {
            device_id,
            datetime: Some(
                now.with_timezone(&Utc)
                    .to_rfc3339_opts(SecondsFormat::Millis, true),
            ),
            timezone,
            utc_offset_minutes: Some(now.offset().local_minus_utc() / 60),
            locale,
        }
    }

    /// Write the context as headers; unrepresentable values are skipped.
    pub fn apply(&self, headers: &mut HeaderMap) {
        let offset = self.utc_offset_minutes.map(|m| m.to_string());
        let pairs = [
            (DEVICE_ID_HEADER, self.device_id.as_deref()),
            (CLIENT_DATETIME_HEADER, self.datetime.as_deref()),
            (CLIENT_TIMEZONE_HEADER, self.timezone.as_deref()),
            (CLIENT_UTC_OFFSET_HEADER, offset.as_deref()),
            (CLIENT_LOCALE_HEADER, self.locale.as_deref()),
        ];
        for (name, value) in pairs {
            let Some(value) = value else { continue };
            match HeaderValue::from_str(value) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(name), value);
                }
                Err(_) => debug!(header = name, "Skipping header with invalid value"),
            }
        }
    }
}

/// IANA zone name from `TZ`, `/etc/timezone`, or the `/etc/localtime` link.
pub fn detect_timezone() -> Option<String> {
    if let Ok(tz) = std::env::var("TZ") {
        if let Some(name) = iana_name(tz.trim_start_matches(':')) {
            return Some(name);
        }
    }
    if let Ok(contents) = std::fs::read_to_string("/etc/timezone") {
        if let Some(name) = iana_name(contents.trim()) {
            return Some(name);
        }
    }
    std::fs::read_link("/etc/localtime")
        .ok()
        .and_then(|target| zone_from_zoneinfo_path(&target))
}

fn iana_name(candidate: &str) -> Option<String> {
    if candidate.is_empty() || candidate.starts_with('/') {
        return zone_from_zoneinfo_path(Path::new(candidate));
    }
    if candidate == "UTC" || candidate.contains('/') {
        Some(candidate.to_string())
    } else {
        None
    }
}

/// `/usr/share/zoneinfo/America/Sao_Paulo` -> `America/Sao_Paulo`
pub fn zone_from_zoneinfo_path(path: &Path) -> Option<String> {
    let path = path.to_str()?;
    let (_, zone) = path.split_once("zoneinfo/")?;
    let zone = zone.trim_start_matches("posix/").trim_start_matches("right/");
    (!zone.is_empty()).then(|| zone.to_string())
}

/// BCP-47 tag from the POSIX locale environment.
pub fn detect_locale() -> Option<String> {
    ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|value| !value.is_empty())
        .and_then(|value| normalize_locale(&value))
}

/// `pt_BR.UTF-8` -> `pt-BR`; `C` and `POSIX` carry no locale.
pub fn normalize_locale(posix: &str) -> Option<String> {
    let base = posix.split(['.', '@']).next().unwrap_or_default();
    if base.is_empty() || base == "C" || base == "POSIX" {
        return None;
    }
    Some(base.replace('_', "-"))
}
