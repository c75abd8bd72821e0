//! Channel object slots bound to a render session

use super::{positions_for, SpeakerPosition, MAX_SLOTS};
use crate::backend::{BackendResult, RenderObject, RenderSession};
use crate::format::ChannelMask;
use tracing::{debug, trace};

/// Per-cycle object buffers, indexed by slot
pub type SlotBuffers<'a> = [Option<&'a mut [f32]>; MAX_SLOTS];

/// Render objects bound in slot order
#[derive(Default)]
pub struct ChannelSlots {
    objects: Vec<Box<dyn RenderObject>>,
}

impl ChannelSlots {
    /// Activate one object per position of `mask`, in slot order
    ///
    /// Binding is all-or-nothing: on the first failed activation every object
    /// activated so far is released and the error is returned.
    pub fn bind(session: &mut dyn RenderSession, mask: ChannelMask) -> BackendResult<Self> {
        let positions = positions_for(mask);
        let mut objects: Vec<Box<dyn RenderObject>> = Vec::with_capacity(positions.len());

        for position in positions {
            match session.activate_object(position) {
                Ok(object) => objects.push(object),
                Err(err) => {
                    debug!(
                        position = position.label(),
                        activated = objects.len(),
                        "object activation failed, releasing partial binding"
                    );
                    drop(objects);
                    return Err(err);
                }
            }
        }

        Ok(ChannelSlots { objects })
    }

    /// Release every bound object
    pub fn release(&mut self) {
        self.objects.clear();
    }

    /// Number of bound slots
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True when no slot is bound
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Bound positions in slot order
    pub fn positions(&self) -> Vec<SpeakerPosition> {
        self.objects.iter().map(|object| object.position()).collect()
    }

    /// Acquire the write buffer of every slot for the current bracket
    ///
    /// A slot whose buffer cannot be acquired is left as `None` and skipped for
    /// this cycle. Returns the buffers and the number of skipped slots.
    pub fn acquire(&mut self) -> (SlotBuffers<'_>, usize) {
        let mut buffers: SlotBuffers<'_> = Default::default();
        let mut skipped = 0;

        for (slot, object) in self.objects.iter_mut().enumerate() {
            match object.buffer() {
                Ok(buffer) => buffers[slot] = Some(buffer),
                Err(err) => {
                    trace!(slot, error = %err, "object buffer unavailable this cycle");
                    skipped += 1;
                }
            }
        }

        (buffers, skipped)
    }
}

impl std::fmt::Debug for ChannelSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSlots")
            .field("positions", &self.positions())
            .finish()
    }
}
