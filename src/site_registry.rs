/// Severity attached to a log site. Higher values are more verbose; a site
/// is recordable when its level is at or below the runtime's current level.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Silent = 0,
    Error = 1,
    Warning = 2,
    Notice = 3,
    Debug = 4,
}

pub const NUM_LOG_LEVELS: u8 = 5;

impl LogLevel {
    /// Clamps an arbitrary numeric level into the valid range.
    pub fn from_raw(raw: i32) -> LogLevel {
        match raw.clamp(0, (NUM_LOG_LEVELS - 1) as i32) {
            0 => LogLevel::Silent,
            1 => LogLevel::Error,
            2 => LogLevel::Warning,
            3 => LogLevel::Notice,
            _ => LogLevel::Debug,
        }
    }
}

/// Static descriptor of a log invocation site. Registered once per site;
/// records in the staging buffers reference it by the id returned from
/// registration, and the compression thread emits it into the output stream
/// as a dictionary entry before any such record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiteInfo {
    pub severity: LogLevel,
    pub file: &'static str,
    pub line: u32,
    pub format: &'static str,
}

/// Process-wide append-only table of log sites plus the cursor tracking how
/// many have been persisted into the current output file. Appends take the
/// registration mutex owned by the caller (`Mutex<SiteRegistry>`); the
/// compression thread snapshots under the same mutex and otherwise works
/// from its own shadow copy.
#[derive(Default)]
pub struct SiteRegistry {
    pub(crate) sites: Vec<SiteInfo>,
    /// Lowest site id not yet encoded into the dictionary stream. Reset to
    /// zero when the output file is rotated so the dictionary is re-emitted.
    pub(crate) next_to_persist: usize,
}

impl SiteRegistry {
    pub fn register(&mut self, info: SiteInfo) -> u32 {
        let id = self.sites.len() as u32;
        self.sites.push(info);
        id
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }

    /// True when sites exist that the consumer has not yet persisted.
    pub fn has_pending(&self) -> bool {
        self.next_to_persist < self.sites.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_clamping() {
        assert_eq!(LogLevel::from_raw(-5), LogLevel::Silent);
        assert_eq!(LogLevel::from_raw(2), LogLevel::Warning);
        assert_eq!(LogLevel::from_raw(99), LogLevel::Debug);
    }

    #[test]
    fn test_sequential_ids() {
        let mut registry = SiteRegistry::default();
        let a = registry.register(SiteInfo {
            severity: LogLevel::Notice,
            file: "a.rs",
            line: 1,
            format: "first {}",
        });
        let b = registry.register(SiteInfo {
            severity: LogLevel::Error,
            file: "b.rs",
            line: 2,
            format: "second {}",
        });
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert!(registry.has_pending());
    }
}
