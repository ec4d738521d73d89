//! Scan result ordering and channel selection.

use super::AccessPoint;

/// Non-overlapping 2.4 GHz channels a hub may operate on.
pub const CHANNEL_GROUPS: [u8; 3] = [1, 6, 11];

/// Nearest non-overlapping channel for `channel`.
pub fn channel_group(channel: u8) -> u8 {
    match channel {
        0..=3 => 1,
        4..=8 => 6,
        _ => 11,
    }
}

/// Interference weight of a network heard at `rssi` dBm.
pub fn proximity_weight(rssi: i8) -> f32 {
    if rssi < -80 {
        0.25
    } else if rssi < -65 {
        0.5
    } else {
        1.0
    }
}

/// Least congested of [`CHANNEL_GROUPS`], lowest channel on ties.
pub fn best_channel(visible: &[AccessPoint]) -> u8 {
    let mut load = [0.0f32; CHANNEL_GROUPS.len()];
    for ap in visible {
        let group = channel_group(ap.channel);
        if let Some(index) = CHANNEL_GROUPS.iter().position(|&c| c == group) {
            load[index] += proximity_weight(ap.rssi);
        }
    }

    let mut best = 0;
    for index in 1..load.len() {
        if load[index] < load[best] {
            best = index;
        }
    }
    CHANNEL_GROUPS[best]
}

/// True if `ssid` contains every token (case-insensitive).
pub fn matches_filter(ssid: &str, filter: &[&str]) -> bool {
    let ssid = ssid.to_lowercase();
    filter.iter().all(|token| ssid.contains(&token.to_lowercase()))
}

/// Outcome of one scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Strongest first; only filter matches when a filter was given.
    pub access_points: Vec<AccessPoint>,
    /// Computed over every visible network, filtered or not.
    pub recommended_channel: u8,
}

impl ScanReport {
    pub fn new(mut visible: Vec<AccessPoint>, filter: Option<&[&str]>) -> Self {
        let recommended_channel = best_channel(&visible);
        visible.sort_by(|a, b| b.rssi.cmp(&a.rssi));
        if let Some(filter) = filter {
            visible.retain(|ap| !ap.hidden && matches_filter(&ap.ssid, filter));
        }
        Self {
            access_points: visible,
            recommended_channel,
        }
    }

    pub fn strongest(&self) -> Option<&AccessPoint> {
        self.access_points.first()
    }

    pub fn find(&self, ssid: &str) -> Option<&AccessPoint> {
        self.access_points.iter().find(|ap| ap.ssid == ssid)
    }
}

#[cfg(test)]
pub(crate) fn ap(ssid: &str, channel: u8, rssi: i8) -> AccessPoint {
    AccessPoint {
        ssid: ssid.to_string(),
        bssid: [0x24, 0x0a, 0xc4, 0, 0, channel],
        channel,
        rssi,
        security: super::Security::Open,
        hidden: ssid.is_empty(),
    }
}
