//! Per-drag state shared between the engine and the application.

use std::sync::{Arc, Mutex, MutexGuard};

use x11rb::protocol::xproto::{Atom, Window};

use crate::action::DndAction;
use crate::detect::Protocol;

/// Where a source-side drag stands in the request/reply cycle.
///
/// Both XDND and Motif allow only one outstanding position message per
/// destination; the `MotionWait` and `ActionWait` states suppress further
/// sends until the destination's status reply arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragStatus {
    /// No reply outstanding; motion may be sent.
    Drag,
    /// A position/motion message was sent; waiting for the status reply.
    MotionWait,
    /// The offered action set changed while waiting; waiting for the reply
    /// to an operation-changed message.
    ActionWait,
    /// The drop was sent; waiting for the destination to finish.
    Drop,
}

#[derive(Debug)]
pub(crate) struct ContextInner {
    /// Whether this context drives the source side of the drag.
    pub is_source: bool,
    /// The window the drag started from (source side) or the source peer's
    /// window (destination side).
    pub source_window: Window,
    /// The window messages are sent to, after proxy resolution.
    pub dest_window: Option<Window>,
    /// The window the drop site actually belongs to, before proxy
    /// resolution.
    pub drop_window: Option<Window>,
    /// The raw window id the last hit-test returned, memoized so an
    /// unchanged pointer target skips re-detection.
    pub dest_memo: Option<Window>,
    /// Protocol spoken with the current destination.
    pub protocol: Protocol,
    /// XDND protocol version negotiated with the current destination.
    pub version: u32,
    /// The targets offered by the source.
    pub targets: Vec<Atom>,
    /// The action the source currently suggests.
    pub suggested_action: DndAction,
    /// All actions the source offers.
    pub actions: DndAction,
    /// The action the destination chose, empty while rejecting.
    pub action: DndAction,
    /// `action` as of the previous status, for change detection.
    pub old_action: DndAction,
    /// `actions` as of the last published action list.
    pub old_actions: DndAction,
    /// Source side: whether `XdndTypeList` was published on the source
    /// window.
    pub xdnd_targets_set: bool,
    /// Source side: whether the published `XdndActionList` still matches
    /// `actions`.
    pub xdnd_actions_set: bool,
    /// Destination side: whether the source published an `XdndActionList`.
    pub xdnd_have_actions: bool,
    /// Source side: set when `XdndFinished` reported failure.
    pub drop_failed: bool,
    /// Request/reply cycle state (source side).
    pub status: DragStatus,
    /// Last root x sent or received.
    pub last_x: i16,
    /// Last root y sent or received.
    pub last_y: i16,
    /// Timestamp the drag started at.
    pub start_time: u32,
    /// Motif: the per-drag selection atom naming the initiator info.
    pub motif_selection: Atom,
    /// The screen the drag runs on.
    pub screen: usize,
}

impl ContextInner {
    pub(crate) fn new(is_source: bool, source_window: Window, screen: usize) -> ContextInner {
        ContextInner {
            is_source,
            source_window,
            dest_window: None,
            drop_window: None,
            dest_memo: None,
            protocol: Protocol::None,
            version: 0,
            targets: Vec::new(),
            suggested_action: DndAction::empty(),
            actions: DndAction::empty(),
            action: DndAction::empty(),
            old_action: DndAction::empty(),
            old_actions: DndAction::empty(),
            xdnd_targets_set: false,
            xdnd_actions_set: false,
            xdnd_have_actions: false,
            drop_failed: false,
            status: DragStatus::Drag,
            last_x: 0,
            last_y: 0,
            start_time: 0,
            motif_selection: 0,
            screen,
        }
    }
}

/// Handle to one drag operation.
///
/// Cheap to clone; the engine and the application share the same state.
#[derive(Debug, Clone)]
pub struct DragContext {
    pub(crate) inner: Arc<Mutex<ContextInner>>,
}

impl PartialEq for DragContext {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for DragContext {}

impl DragContext {
    pub(crate) fn new(is_source: bool, source_window: Window, screen: usize) -> DragContext {
        DragContext {
            inner: Arc::new(Mutex::new(ContextInner::new(is_source, source_window, screen))),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ContextInner> {
        // The engine is the only writer and never calls back into itself
        // while holding the lock, so poisoning cannot occur in practice.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether this context drives the source side of the drag.
    pub fn is_source(&self) -> bool {
        self.lock().is_source
    }

    /// The source window of the drag.
    pub fn source_window(&self) -> Window {
        self.lock().source_window
    }

    /// The destination window currently targeted, if any.
    pub fn dest_window(&self) -> Option<Window> {
        self.lock().dest_window
    }

    /// Protocol spoken with the current destination.
    pub fn protocol(&self) -> Protocol {
        self.lock().protocol
    }

    /// The targets the source offers.
    pub fn targets(&self) -> Vec<Atom> {
        self.lock().targets.clone()
    }

    /// The action the source currently suggests.
    pub fn suggested_action(&self) -> DndAction {
        self.lock().suggested_action
    }

    /// All actions the source offers.
    pub fn actions(&self) -> DndAction {
        self.lock().actions
    }

    /// The action the destination chose; empty while it rejects the drop.
    pub fn action(&self) -> DndAction {
        self.lock().action
    }

    /// Source side: whether the destination reported the drop as received.
    /// Final once [`crate::events::DndEvent::DropFinished`] was delivered.
    pub fn drop_succeeded(&self) -> bool {
        !self.lock().drop_failed
    }

    /// The selection the destination must convert to fetch the data:
    /// `XdndSelection`, or the per-drag Motif selection.
    pub fn selection(&self, atoms: &crate::atoms::Atoms) -> Atom {
        let inner = self.lock();
        match inner.protocol {
            Protocol::Motif => inner.motif_selection,
            _ => atoms.XdndSelection,
        }
    }

    /// Last root-relative pointer position seen by this drag.
    pub fn position(&self) -> (i16, i16) {
        let inner = self.lock();
        (inner.last_x, inner.last_y)
    }
}
