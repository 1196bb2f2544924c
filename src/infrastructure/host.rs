//! Hardware abstraction for the slots a palma peripheral attaches to.

use crate::domain::models::NpadId;
use crate::domain::settings::PalmaSettings;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Controller backend that backs palma connection handles
pub trait PeripheralHost: Send + Sync {
    /// Whether the device behind `npad` can take a palma peripheral
    fn is_palma_capable(&self, npad: NpadId) -> bool;

    fn set_connectable(&self, connectable: bool);

    fn is_connectable(&self) -> bool;
}

/// Host backed by configuration rather than real controllers
#[derive(Debug, Default)]
pub struct EmulatedHost {
    capable: HashSet<NpadId>,
    connectable: AtomicBool,
}

impl EmulatedHost {
    pub fn new(capable: impl IntoIterator<Item = NpadId>) -> Self {
        Self {
            capable: capable.into_iter().collect(),
            connectable: AtomicBool::new(false),
        }
    }

    pub fn from_settings(settings: &PalmaSettings) -> Self {
        let capable = settings
            .palma_capable_npads
            .iter()
            .filter_map(|&raw| {
                let id = NpadId::from_raw(raw);
                if id.is_none() {
                    warn!("Ignoring unknown npad id {:#X} in settings", raw);
                }
                id
            })
            .collect::<Vec<_>>();
        let host = Self::new(capable);
        host.set_connectable(settings.all_connectable_on_start);
        host
    }
}

impl PeripheralHost for EmulatedHost {
    fn is_palma_capable(&self, npad: NpadId) -> bool {
        self.capable.contains(&npad)
    }

    fn set_connectable(&self, connectable: bool) {
        debug!("Host connectable flag set to {}", connectable);
        self.connectable.store(connectable, Ordering::SeqCst);
    }

    fn is_connectable(&self) -> bool {
        self.connectable.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_skips_unknown_ids() {
        let settings = PalmaSettings {
            palma_capable_npads: vec![0, 0x20, 0x99],
            all_connectable_on_start: true,
            ..Default::default()
        };
        let host = EmulatedHost::from_settings(&settings);

        assert!(host.is_palma_capable(NpadId::Player1));
        assert!(host.is_palma_capable(NpadId::Handheld));
        assert!(!host.is_palma_capable(NpadId::Player2));
        assert!(host.is_connectable());
    }
}
