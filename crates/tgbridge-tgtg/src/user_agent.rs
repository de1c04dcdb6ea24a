//! User-agent strings in the format the mobile app sends:
//! `TGTG/<app version> Dalvik/2.1.0 (<android device>)`.

use rand::seq::IndexedRandom;

/// Used when the store listing cannot be read at startup.
pub const FALLBACK_APP_VERSION: &str = "24.11.0";

const DEVICES: &[&str] = &[
    "Linux; U; Android 13; Pixel 7 Build/TQ3A.230901.001",
    "Linux; U; Android 12; SM-G991B Build/SP1A.210812.016",
    "Linux; U; Android 14; Pixel 8 Pro Build/UD1A.230803.041",
    "Linux; U; Android 11; Redmi Note 9 Pro Build/RKQ1.200826.002",
    "Linux; U; Android 13; SM-A536B Build/TP1A.220624.014",
    "Linux; U; Android 12; ONEPLUS A6013 Build/SKQ1.211113.001",
];

/// A fresh user agent for `app_version` on a randomly chosen device.
#[must_use]
pub fn build_user_agent(app_version: &str) -> String {
    let device = DEVICES.choose(&mut rand::rng()).copied().unwrap_or(DEVICES[0]);
    format!("TGTG/{app_version} Dalvik/2.1.0 ({device})")
}

/// Replaces the leading `TGTG/<version>` component and keeps everything after it.
#[must_use]
pub fn with_app_version(user_agent: &str, app_version: &str) -> String {
    match user_agent.split_once(' ') {
        Some((_, rest)) => format!("TGTG/{app_version} {rest}"),
        None => build_user_agent(app_version),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_agent_starts_with_version() {
        let ua = build_user_agent("24.3.1");
        assert!(ua.starts_with("TGTG/24.3.1 Dalvik/2.1.0 ("), "got {ua}");
        assert!(ua.ends_with(')'));
    }

    #[test]
    fn version_swap_keeps_device_part() {
        let ua = "TGTG/22.11.2 Dalvik/2.1.0 (Linux; U; Android 12; Pixel 6 Build/SD1A)";
        assert_eq!(
            with_app_version(ua, "24.3.1"),
            "TGTG/24.3.1 Dalvik/2.1.0 (Linux; U; Android 12; Pixel 6 Build/SD1A)"
        );
    }

    #[test]
    fn version_swap_on_malformed_agent_builds_a_new_one() {
        let ua = with_app_version("garbage", "24.3.1");
        assert!(ua.starts_with("TGTG/24.3.1 Dalvik/2.1.0 ("));
    }
}
