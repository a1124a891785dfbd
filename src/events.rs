//! Events the engine reports to the application.

use crate::context::DragContext;

/// A drag-and-drop event, queued by the engine and drained with
/// [`crate::engine::Dnd::poll_event`].
///
/// Every event carries the [`DragContext`] it concerns; source-side and
/// destination-side events are distinguished by
/// [`DragContext::is_source`].
#[derive(Debug, Clone)]
pub enum DndEvent {
    /// A drag entered one of our registered drop sites.
    Enter {
        /// The drag this event belongs to.
        context: DragContext,
        /// Server timestamp of the message.
        time: u32,
    },
    /// A drag left our drop site, or was aborted.
    Leave {
        /// The drag this event belongs to.
        context: DragContext,
        /// Server timestamp of the message.
        time: u32,
    },
    /// The pointer moved over our drop site.
    Motion {
        /// The drag this event belongs to.
        context: DragContext,
        /// Server timestamp of the motion.
        time: u32,
        /// Pointer x in root coordinates.
        x_root: i16,
        /// Pointer y in root coordinates.
        y_root: i16,
    },
    /// The destination answered (or the engine resolved locally) whether the
    /// current position would accept the drop.
    Status {
        /// The drag this event belongs to.
        context: DragContext,
        /// Server timestamp.
        time: u32,
        /// `true` when the engine generated this status itself (destination
        /// change, unreachable peer) rather than decoding a peer's reply.
        synthetic: bool,
    },
    /// The source dropped on our drop site.
    DropStart {
        /// The drag this event belongs to.
        context: DragContext,
        /// Server timestamp of the drop.
        time: u32,
        /// Pointer x in root coordinates.
        x_root: i16,
        /// Pointer y in root coordinates.
        y_root: i16,
    },
    /// The destination finished processing our drop; the drag is over and
    /// [`DragContext::drop_succeeded`] is final.
    DropFinished {
        /// The drag this event belongs to.
        context: DragContext,
        /// Server timestamp.
        time: u32,
    },
}
