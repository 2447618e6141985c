//! Engine configuration

/// Requests validated against the host generation before execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GenerationCheck {
    /// Every request after the handshake is checked
    ///
    /// Bind-host is checked against the target host. List-hosts and out-of-order requests
    /// must match the generation of every attached host.
    #[default]
    Initialized,
    /// Bind-host requests are checked against the generation of the target host
    BindHost,
    /// Only requests of connected sessions are checked
    Connected,
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Config {
    pub generation_check: GenerationCheck,
    /// Number of simultaneously outstanding transactions to a single node, [1; 64]
    ///
    /// Values out of range are clamped.
    pub labels_per_node: u8,
}

impl Config {
    pub const MAX_LABELS_PER_NODE: u8 = 64;

    pub(crate) fn label_capacity(&self) -> u32 {
        self.labels_per_node.clamp(1, Self::MAX_LABELS_PER_NODE).into()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            generation_check: GenerationCheck::default(),
            labels_per_node: Self::MAX_LABELS_PER_NODE,
        }
    }
}
