use derive_more::Display;

/// The target used by all probe events.
pub const TARGET: &str = "bridge_probe";

/// The Kind of the Probe.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// When the Lifecycle of the bridge changes, like starting or shutting
    /// down.
    #[display(fmt = "lifecycle")]
    Lifecycle,
    /// Bridge sync state against the source ledger.
    #[display(fmt = "sync")]
    Sync,
    /// Mirroring a deposit on the destination ledger.
    #[display(fmt = "mirror_tx")]
    MirrorTx,
}
