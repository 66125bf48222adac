//! Dashboard state

use chrono::{DateTime, Utc};
use devpulse_core::{Snapshot, SnapshotSummary};

/// Current view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Charts,
    Snapshots,
}

/// A device seen in the snapshot listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub id: i64,
    pub name: String,
}

/// Footer message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub message: String,
    pub is_error: bool,
}

/// A chart series as `(seconds since oldest point, value)`
pub type Series = Vec<(f64, f64)>;

/// Dashboard application state
pub struct App {
    /// Current view
    pub view: View,

    /// Known devices, ordered by id
    pub devices: Vec<DeviceEntry>,

    /// Index into `devices`
    pub selected: usize,

    /// Snapshots of the selected device (newest first)
    pub history: Vec<Snapshot>,

    /// Scroll position in the snapshot table
    pub scroll: usize,

    /// Restart prompt buffer while the prompt is open
    pub input: Option<String>,

    /// Last status or error message
    pub status: Option<StatusLine>,

    /// Time of the last successful refresh
    pub last_refresh: Option<DateTime<Utc>>,

    /// Maximum snapshots to fetch per refresh
    pub history_limit: u32,
}

impl App {
    pub fn new(history_limit: u32) -> Self {
        Self {
            view: View::Charts,
            devices: Vec::new(),
            selected: 0,
            history: Vec::new(),
            scroll: 0,
            input: None,
            status: None,
            last_refresh: None,
            history_limit,
        }
    }

    pub fn set_view(&mut self, view: View) {
        self.view = view;
        self.scroll = 0;
    }

    pub fn scroll_up(&mut self) {
        self.scroll = self.scroll.saturating_sub(1);
    }

    pub fn scroll_down(&mut self) {
        if self.scroll + 1 < self.history.len() {
            self.scroll += 1;
        }
    }

    /// Rebuild the device list from summaries, keeping the current selection
    pub fn set_devices(&mut self, summaries: &[SnapshotSummary]) {
        let current = self.selected_device().map(|d| d.id);

        let mut devices: Vec<DeviceEntry> = Vec::new();
        for summary in summaries {
            if !devices.iter().any(|d| d.id == summary.device_id) {
                devices.push(DeviceEntry {
                    id: summary.device_id,
                    name: summary.device_name.clone(),
                });
            }
        }
        devices.sort_by_key(|d| d.id);

        self.selected = current
            .and_then(|id| devices.iter().position(|d| d.id == id))
            .unwrap_or(0);
        self.devices = devices;
    }

    pub fn selected_device(&self) -> Option<&DeviceEntry> {
        self.devices.get(self.selected)
    }

    pub fn select_next(&mut self) {
        if !self.devices.is_empty() {
            self.selected = (self.selected + 1) % self.devices.len();
            self.on_device_changed();
        }
    }

    pub fn select_previous(&mut self) {
        if !self.devices.is_empty() {
            self.selected = (self.selected + self.devices.len() - 1) % self.devices.len();
            self.on_device_changed();
        }
    }

    fn on_device_changed(&mut self) {
        self.history.clear();
        self.scroll = 0;
    }

    /// Replace the history after a refresh
    pub fn set_history(&mut self, history: Vec<Snapshot>) {
        self.history = history;
        self.scroll = self.scroll.min(self.history.len().saturating_sub(1));
        self.last_refresh = Some(Utc::now());
        if self.status.as_ref().is_some_and(|s| s.is_error) {
            self.status = None;
        }
    }

    /// Most recent snapshot of the selected device
    pub fn latest(&self) -> Option<&Snapshot> {
        self.history.first()
    }

    pub fn ram_series(&self) -> Series {
        self.series(|s| s.system_metrics().map(|m| m.ram_usage_percent))
    }

    pub fn thread_series(&self) -> Series {
        self.series(|s| s.system_metrics().map(|m| m.thread_count as f64))
    }

    pub fn bitcoin_series(&self) -> Series {
        self.series(|s| s.crypto_metrics().and_then(|m| m.bitcoin_price_usd))
    }

    pub fn ethereum_series(&self) -> Series {
        self.series(|s| s.crypto_metrics().and_then(|m| m.ethereum_price_usd))
    }

    /// Points oldest first; snapshots without the value are skipped
    fn series<F>(&self, value: F) -> Series
    where
        F: Fn(&Snapshot) -> Option<f64>,
    {
        let Some(oldest) = self.history.last().map(|s| s.timestamp()) else {
            return Vec::new();
        };

        self.history
            .iter()
            .rev()
            .filter_map(|s| {
                let offset = (s.timestamp() - oldest).num_milliseconds() as f64 / 1000.0;
                value(s).map(|v| (offset, v))
            })
            .collect()
    }

    /// Open the restart prompt for the selected device
    pub fn begin_restart_prompt(&mut self) {
        if self.selected_device().is_some() {
            self.input = Some(String::new());
        } else {
            self.set_error("No device selected");
        }
    }

    pub fn cancel_prompt(&mut self) {
        self.input = None;
    }

    pub fn push_input(&mut self, c: char) {
        if let Some(input) = self.input.as_mut() {
            input.push(c);
        }
    }

    pub fn pop_input(&mut self) {
        if let Some(input) = self.input.as_mut() {
            input.pop();
        }
    }

    /// Close the prompt and return `(device_id, app_name)` if both are set
    pub fn take_restart_request(&mut self) -> Option<(i64, String)> {
        let input = self.input.take()?;
        let app_name = input.trim();
        if app_name.is_empty() {
            return None;
        }
        self.selected_device()
            .map(|device| (device.id, app_name.to_string()))
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status = Some(StatusLine {
            message: message.into(),
            is_error: false,
        });
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        self.status = Some(StatusLine {
            message: message.into(),
            is_error: true,
        });
    }
}

/// Axis bounds with a little headroom; flat or empty series get a unit range
pub fn value_bounds(series: &[(f64, f64)]) -> [f64; 2] {
    let (min, max) = series
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &(_, y)| {
            (lo.min(y), hi.max(y))
        });

    if !min.is_finite() || !max.is_finite() {
        return [0.0, 1.0];
    }
    if (max - min).abs() < f64::EPSILON {
        return [min - 1.0, max + 1.0];
    }
    let pad = (max - min) * 0.1;
    [min - pad, max + pad]
}

/// Time axis bounds for a series
pub fn time_bounds(series: &[(f64, f64)]) -> [f64; 2] {
    match series.last() {
        Some(&(x, _)) if x > 0.0 => [0.0, x],
        _ => [0.0, 1.0],
    }
}
