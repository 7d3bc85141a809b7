//! Side effects postponed to the next tick.

use crate::host::EngineContext;
use crate::overlay::OverlayHandle;
use crate::types::ViewerId;
use parking_lot::Mutex;

pub enum DeferredAction {
    /// Restore the viewer's true world view of an overlay already dropped
    /// from the registry.
    RemoveViewer {
        overlay: OverlayHandle,
        viewer: ViewerId,
    },
}

impl DeferredAction {
    pub fn apply(self, ctx: &EngineContext) {
        match self {
            DeferredAction::RemoveViewer { overlay, viewer } => {
                overlay.remove_viewer(ctx, &viewer);
            }
        }
    }
}

#[derive(Default)]
pub struct DeferredQueue {
    pending: Mutex<Vec<DeferredAction>>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, action: DeferredAction) {
        self.pending.lock().push(action);
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }

    /// Takes every queued action; actions pushed while these run wait for
    /// the next drain.
    pub fn drain(&self) -> Vec<DeferredAction> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Drains and applies in insertion order. Returns how many ran.
    pub fn run(&self, ctx: &EngineContext) -> usize {
        let actions = self.drain();
        let count = actions.len();
        for action in actions {
            action.apply(ctx);
        }
        count
    }
}
