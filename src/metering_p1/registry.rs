use super::P1Error;
use std::collections::HashMap;

/// How readings of one reference are turned into emissions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowMode {
    /// Every reading is published
    Immediate,
    /// The last N readings are averaged
    Average(u32),
    /// Only every Mth reading is published, unchanged
    Count(u32),
}

impl WindowMode {
    pub fn size(&self) -> u32 {
        match self {
            WindowMode::Immediate => 1,
            WindowMode::Average(n) | WindowMode::Count(n) => *n,
        }
    }
}

/// Static configuration of one reference, resolved when the config is loaded
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceConfig {
    pub value_field: usize,
    pub publish: bool,
    pub topic_suffix: Option<String>,
    pub window: WindowMode,
}

/// Mutable per reference state. `remaining` stays within `1..=window`.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowState {
    pub accumulated: f64,
    /* true while only integers went into `accumulated` */
    pub integral: bool,
    pub remaining: u32,
}

impl WindowState {
    pub fn new(window: WindowMode) -> Self {
        Self {
            accumulated: 0.0,
            integral: true,
            remaining: window.size(),
        }
    }

    pub fn reset(&mut self, window: WindowMode) {
        *self = WindowState::new(window);
    }
}

#[derive(Debug, Clone)]
pub struct ReferenceEntry {
    pub config: ReferenceConfig,
    pub state: WindowState,
}

#[derive(Debug)]
pub struct ReferenceRegistry {
    entries: HashMap<String, ReferenceEntry>,
}

impl ReferenceRegistry {
    pub fn new(configs: HashMap<String, ReferenceConfig>) -> Self {
        let entries = configs
            .into_iter()
            .map(|(reference, config)| {
                let state = WindowState::new(config.window);
                (reference, ReferenceEntry { config, state })
            })
            .collect();
        Self { entries }
    }

    /// Unknown references use field 1
    pub fn value_field(&self, reference: &str) -> usize {
        self.entries.get(reference).map(|e| e.config.value_field).unwrap_or(1)
    }

    pub fn publish_config(&self, reference: &str) -> Result<&ReferenceConfig, P1Error> {
        self.entries
            .get(reference)
            .map(|e| &e.config)
            .ok_or_else(|| P1Error::NotConfigured(reference.to_string()))
    }

    pub fn state(&self, reference: &str) -> Option<&WindowState> {
        self.entries.get(reference).map(|e| &e.state)
    }

    pub fn entry_mut(&mut self, reference: &str) -> Result<&mut ReferenceEntry, P1Error> {
        self.entries
            .get_mut(reference)
            .ok_or_else(|| P1Error::NotConfigured(reference.to_string()))
    }

    pub fn references(&self) -> impl Iterator<Item = (&String, &ReferenceConfig)> {
        self.entries.iter().map(|(r, e)| (r, &e.config))
    }
}
