use serde::Serialize;

/// A single alt-tab fires both the visibility and the blur source in quick
/// succession; anything inside this window after a recorded violation is the
/// same physical event.
pub const SIGNAL_DEBOUNCE_MS: i64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    TabSwitch,
    WindowBlur,
}

impl SignalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SignalKind::TabSwitch => "tab_switch",
            SignalKind::WindowBlur => "window_blur",
        }
    }

    pub fn parse(s: &str) -> Option<SignalKind> {
        match s {
            "tab_switch" => Some(SignalKind::TabSwitch),
            "window_blur" => Some(SignalKind::WindowBlur),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub kind: String,
    pub at_ms: i64,
    pub count: u32,
}

/// Shared counter over both away-signal sources. Owned by the active session;
/// the session controller decides when signals are forwarded at all.
#[derive(Debug, Default)]
pub struct IntegrityMonitor {
    violations: Vec<Violation>,
    last_recorded_ms: Option<i64>,
}

impl IntegrityMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded violation, or None when the signal fell inside
    /// the debounce window of the previous one.
    pub fn observe(&mut self, kind: SignalKind, at_ms: i64) -> Option<&Violation> {
        if let Some(last) = self.last_recorded_ms {
            if at_ms - last < SIGNAL_DEBOUNCE_MS {
                return None;
            }
        }

        self.last_recorded_ms = Some(at_ms);
        let count = self.violations.len() as u32 + 1;
        self.violations.push(Violation {
            kind: kind.as_str().to_string(),
            at_ms,
            count,
        });
        self.violations.last()
    }

    pub fn count(&self) -> usize {
        self.violations.len()
    }

    pub fn violations(&self) -> &[Violation] {
        &self.violations
    }
}
