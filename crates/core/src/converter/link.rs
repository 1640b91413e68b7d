//! One-shot dynamic link between the decoder and the encoder.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::engine::{Pad, PadDiscoveredFn, PadLinker, StageKind};

/// What happened when a pad was offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    /// This pad is now the encoder's input.
    Linked,
    /// An earlier pad already won; nothing was done.
    AlreadyLinked,
    /// Linking was attempted and refused.
    Failed,
}

/// Links the first discovered decoder pad to `target`.
///
/// Later discoveries are ignored. A refused link releases the latch so the
/// next pad gets a chance.
#[derive(Debug)]
pub struct DynamicLink {
    target: StageKind,
    linked: AtomicBool,
}

impl DynamicLink {
    pub fn new(target: StageKind) -> Self {
        Self {
            target,
            linked: AtomicBool::new(false),
        }
    }

    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Acquire)
    }

    pub fn on_pad_discovered(&self, linker: &mut dyn PadLinker, pad: &Pad) -> LinkOutcome {
        if self
            .linked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::trace!(pad = %pad.name, "Encoder input already linked, ignoring pad");
            return LinkOutcome::AlreadyLinked;
        }

        match linker.link_pad(pad, self.target) {
            Ok(()) => {
                tracing::debug!(pad = %pad.name, caps = %pad.caps, "Linked decoder pad");
                LinkOutcome::Linked
            }
            Err(e) => {
                self.linked.store(false, Ordering::Release);
                tracing::warn!(pad = %pad.name, error = %e, "Could not link decoder pad");
                LinkOutcome::Failed
            }
        }
    }

    /// Wraps the link in a callback the graph can own.
    pub fn into_handler(self: Arc<Self>) -> PadDiscoveredFn {
        Box::new(move |linker, pad| {
            self.on_pad_discovered(linker, pad);
        })
    }
}
