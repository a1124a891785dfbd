//! The drag-and-drop negotiation engine.
//!
//! [`Dnd`] owns all protocol state for one connection: the source-side
//! drag contexts, the single destination-side context (neither XDND nor
//! Motif can interleave two incoming drags), the per-screen window caches
//! and the process-wide Motif bookkeeping. The application feeds X events
//! in through [`Dnd::handle_event`], drives its own drags with
//! [`Dnd::motion`]/[`Dnd::drop`]/[`Dnd::abort`], answers incoming drags
//! with [`Dnd::status`]/[`Dnd::drop_reply`]/[`Dnd::drop_finished`], and
//! drains the resulting [`DndEvent`]s from [`Dnd::poll_event`].
//!
//! Messages addressed to a window of this process never touch the wire:
//! they are fed straight back through the same handlers, so a drag between
//! two windows of one client behaves identically to a foreign drag minus
//! the round-trips.

use std::collections::{HashMap, HashSet, VecDeque};

use tracing::{debug, trace, warn};
use x11rb::protocol::xproto::{Atom, AtomEnum, ClientMessageEvent, EventMask, PropertyNotifyEvent, Window};
use x11rb::protocol::Event;

use crate::action::DndAction;
use crate::cache::WindowCache;
use crate::context::{DragContext, DragStatus};
use crate::detect::{detect_protocol, xdnd_check_dest, Protocol};
use crate::events::DndEvent;
use crate::motif;
use crate::windowing::{DndError, Rect, Windowing};
use crate::xdnd::{self, XDND_MIN_VERSION, XDND_VERSION};

/// Drag-and-drop engine for one X connection.
#[derive(Debug)]
pub struct Dnd<W: Windowing> {
    w: W,
    /// Drop sites registered by this process.
    registered: HashSet<Window>,
    /// Live source-side contexts.
    contexts: Vec<DragContext>,
    /// The one incoming drag, if any.
    current_dest_drag: Option<DragContext>,
    caches: HashMap<usize, WindowCache>,
    motif_drag_window: Option<Window>,
    motif_target_lists: Option<Vec<Vec<Atom>>>,
    events: VecDeque<DndEvent>,
}

impl<W: Windowing> Dnd<W> {
    /// Creates an engine over the given windowing layer.
    pub fn new(w: W) -> Dnd<W> {
        Dnd {
            w,
            registered: HashSet::new(),
            contexts: Vec::new(),
            current_dest_drag: None,
            caches: HashMap::new(),
            motif_drag_window: None,
            motif_target_lists: None,
            events: VecDeque::new(),
        }
    }

    /// The windowing layer this engine runs on.
    pub fn windowing(&self) -> &W {
        &self.w
    }

    /// The next queued drag-and-drop event, if any.
    pub fn poll_event(&mut self) -> Option<DndEvent> {
        self.events.pop_front()
    }

    /// Marks a window of this process as a drop site, advertising both
    /// XDND and the dynamic Motif protocol on it.
    pub fn register_window(&mut self, window: Window) -> Result<(), DndError> {
        if !self.registered.insert(window) {
            return Ok(());
        }
        let atoms = self.w.atoms();
        self.w.set_property8(
            window,
            atoms._MOTIF_DRAG_RECEIVER_INFO,
            atoms._MOTIF_DRAG_RECEIVER_INFO,
            &motif::encode_receiver_info(),
        )?;
        self.w
            .set_property32(window, atoms.XdndAware, AtomEnum::ATOM.into(), &[XDND_VERSION])?;
        Ok(())
    }

    fn is_local(&self, window: Window) -> bool {
        self.registered.contains(&window)
            || self.contexts.iter().any(|c| c.lock().source_window == window)
    }

    fn is_root(&self, window: Window) -> bool {
        (0..self.w.screen_count()).any(|screen| self.w.root_window(screen) == window)
    }

    fn find_source_context(&self, source: Window, dest: Option<Window>) -> Option<DragContext> {
        self.contexts
            .iter()
            .find(|c| {
                let inner = c.lock();
                inner.source_window == source
                    && dest.map_or(true, |d| inner.dest_window == Some(d))
            })
            .cloned()
    }

    fn current_dest_context(&self, source: Window, dest: Window) -> Option<DragContext> {
        let context = self.current_dest_drag.as_ref()?;
        let inner = context.lock();
        (inner.source_window == source && inner.dest_window == Some(dest))
            .then(|| context.clone())
    }

    /* ---------------------------- Source side ---------------------------- */

    /// Starts a drag from `source_window` offering `targets`.
    pub fn begin(&mut self, source_window: Window, targets: Vec<Atom>) -> DragContext {
        let context = DragContext::new(true, source_window, 0);
        context.lock().targets = targets;
        self.contexts.push(context.clone());
        context
    }

    /// Finds the destination window and protocol under the pointer.
    ///
    /// `drag_window` is the source's drag icon, which must be ignored by
    /// the hit test. The result is fed into [`Dnd::motion`]; the last
    /// hit-tested window is memoized so an unchanged target costs nothing.
    pub fn find_window(
        &mut self,
        context: &DragContext,
        drag_window: Option<Window>,
        screen: usize,
        x_root: i16,
        y_root: i16,
    ) -> Result<(Option<Window>, Protocol), DndError> {
        if !self.caches.contains_key(&screen) {
            let toplevels: Vec<Window> = self.registered.iter().copied().collect();
            let cache = WindowCache::new(&self.w, screen, &toplevels)?;
            self.caches.insert(screen, cache);
        }

        let Dnd { w, caches, registered, .. } = self;
        let root = w.root_window(screen);
        let dest = match caches.get_mut(&screen) {
            Some(cache) => cache.window_at(&*w, drag_window.unwrap_or(x11rb::NONE), x_root, y_root)?,
            None => root,
        };

        let mut inner = context.lock();
        if inner.dest_memo != Some(dest) {
            inner.dest_memo = Some(dest);
            inner.screen = screen;
            let (recipient, protocol, version) =
                detect_protocol(&*w, dest, root, |win| registered.contains(&win))?;
            inner.version = version;
            if protocol == Protocol::None {
                Ok((None, Protocol::None))
            } else {
                Ok((Some(recipient), protocol))
            }
        } else {
            Ok((inner.dest_window, inner.protocol))
        }
    }

    /// Updates the drag for a pointer move or an action change.
    ///
    /// Returns `true` while a status reply is still outstanding for the
    /// current destination, meaning the motion was absorbed and the caller
    /// should wait for the [`DndEvent::Status`] before moving on.
    #[allow(clippy::too_many_arguments)]
    pub fn motion(
        &mut self,
        context: &DragContext,
        dest_window: Option<Window>,
        protocol: Protocol,
        x_root: i16,
        y_root: i16,
        suggested_action: DndAction,
        possible_actions: DndAction,
        time: u32,
    ) -> Result<bool, DndError> {
        {
            let mut inner = context.lock();
            inner.old_actions = inner.actions;
            inner.actions = possible_actions;
            if inner.old_actions != possible_actions {
                inner.xdnd_actions_set = false;
            }
        }

        if protocol == Protocol::Xdnd {
            // A caller may pass a destination it obtained elsewhere, without
            // the version negotiation find_window() performs. Probe late.
            if context.lock().version == 0 {
                if let Some(dest) = dest_window {
                    if let Some((_, version)) = xdnd_check_dest(&self.w, dest)? {
                        context.lock().version = version;
                    }
                }
            }

            if !context.lock().xdnd_actions_set {
                if let Some(dest) = dest_window {
                    if !self.registered.contains(&dest) {
                        self.xdnd_publish_actions(context)?;
                    } else if context.lock().dest_window == Some(dest) {
                        let source = context.lock().source_window;
                        if let Some(dest_context) = self.current_dest_context(source, dest) {
                            let actions = context.lock().actions;
                            let mut di = dest_context.lock();
                            di.actions = actions;
                            di.xdnd_have_actions = true;
                        }
                    }
                }
            }
        }

        let dest_changed = context.lock().dest_window != dest_window;
        if dest_changed {
            self.do_leave(context, time)?;
            {
                let mut inner = context.lock();
                inner.status = DragStatus::Drag;
                match dest_window {
                    Some(dest) => {
                        inner.dest_window = Some(dest);
                        inner.drop_window = inner.dest_memo;
                        inner.protocol = protocol;
                        inner.old_action = suggested_action;
                        inner.suggested_action = suggested_action;
                        inner.old_actions = possible_actions;
                    }
                    None => {
                        inner.dest_window = None;
                        inner.drop_window = None;
                        inner.action = DndAction::empty();
                    }
                }
            }
            if dest_window.is_some() {
                match protocol {
                    Protocol::Motif => self.motif_send_enter(context, time)?,
                    Protocol::Xdnd => self.xdnd_send_enter(context, time)?,
                    Protocol::Rootwin | Protocol::None => {}
                }
            }
            // Tell the caller the destination changed before any reply
            // can arrive.
            self.events.push_back(DndEvent::Status { context: context.clone(), time, synthetic: true });
        } else {
            let mut inner = context.lock();
            inner.old_action = inner.suggested_action;
            inner.suggested_action = suggested_action;
        }

        {
            let mut inner = context.lock();
            inner.last_x = x_root;
            inner.last_y = y_root;
        }

        let (has_dest, status, protocol) = {
            let inner = context.lock();
            (inner.dest_window.is_some(), inner.status, inner.protocol)
        };
        if has_dest {
            if status != DragStatus::Drag {
                return Ok(true);
            }
            match protocol {
                Protocol::Motif => self.motif_send_motion(context, x_root, y_root, time)?,
                Protocol::Xdnd => self.xdnd_send_motion(context, x_root, y_root, time)?,
                Protocol::Rootwin => {
                    let atoms = *self.w.atoms();
                    {
                        let mut inner = context.lock();
                        // Desktops accept either spelling of the root drop
                        // target.
                        if inner.targets.contains(&atoms.XRootwindowDrop)
                            || inner.targets.contains(&atoms.XRootwinDrop)
                        {
                            inner.action = inner.suggested_action;
                        } else {
                            inner.action = DndAction::empty();
                        }
                    }
                    self.events.push_back(DndEvent::Status {
                        context: context.clone(),
                        time,
                        synthetic: false,
                    });
                }
                Protocol::None => warn!("drag motion without a destination protocol"),
            }
        }

        Ok(false)
    }

    /// Drops on the current destination.
    pub fn drop(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        let (has_dest, protocol) = {
            let inner = context.lock();
            (inner.dest_window.is_some(), inner.protocol)
        };
        if !has_dest {
            return Ok(());
        }
        match protocol {
            Protocol::Motif => {
                self.motif_send_leave(context, time)?;
                self.motif_send_drop(context, time)?;
                context.lock().status = DragStatus::Drop;
            }
            Protocol::Xdnd => {
                self.xdnd_send_drop(context, time)?;
                context.lock().status = DragStatus::Drop;
            }
            Protocol::Rootwin => warn!("root window drops are delivered locally, not sent"),
            Protocol::None => warn!("drop without a destination protocol"),
        }
        Ok(())
    }

    /// Aborts a drag without dropping. Safe to call more than once.
    pub fn abort(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        self.do_leave(context, time)?;
        self.conclude(context)
    }

    fn do_leave(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        let (has_dest, protocol) = {
            let inner = context.lock();
            (inner.dest_window.is_some(), inner.protocol)
        };
        if has_dest {
            match protocol {
                Protocol::Motif => self.motif_send_leave(context, time)?,
                Protocol::Xdnd => self.xdnd_send_leave(context, time)?,
                Protocol::Rootwin | Protocol::None => {}
            }
            let mut inner = context.lock();
            inner.dest_window = None;
            inner.drop_window = None;
        }
        Ok(())
    }

    /// Forgets a finished source context; drops the window caches once no
    /// drag remains.
    fn conclude(&mut self, context: &DragContext) -> Result<(), DndError> {
        let (source, targets_set, actions_set) = {
            let inner = context.lock();
            (inner.source_window, inner.xdnd_targets_set, inner.xdnd_actions_set)
        };
        let atoms = *self.w.atoms();
        if targets_set {
            self.w.delete_property(source, atoms.XdndTypeList)?;
        }
        if actions_set {
            self.w.delete_property(source, atoms.XdndActionList)?;
        }
        self.contexts.retain(|c| c != context);
        if self.contexts.is_empty() {
            for cache in self.caches.values() {
                cache.shutdown(&self.w)?;
            }
            self.caches.clear();
        }
        Ok(())
    }

    /* ------------------------- Destination side -------------------------- */

    /// Answers the source's last position: `action` is what a drop here
    /// would do, or empty to reject.
    pub fn status(&mut self, context: &DragContext, action: DndAction, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let protocol = {
            let mut inner = context.lock();
            inner.action = action;
            inner.protocol
        };

        match protocol {
            Protocol::Motif => {
                let (source, data) = {
                    let inner = context.lock();
                    let reason = if inner.status == DragStatus::ActionWait {
                        motif::OPERATION_CHANGED | motif::REPLY_FLAG
                    } else if (action != DndAction::empty()) != (inner.old_action != DndAction::empty()) {
                        if action != DndAction::empty() {
                            motif::DROP_SITE_ENTER | motif::REPLY_FLAG
                        } else {
                            motif::DROP_SITE_LEAVE | motif::REPLY_FLAG
                        }
                    } else {
                        motif::DRAG_MOTION | motif::REPLY_FLAG
                    };

                    let mut flags = if action == DndAction::MOVE {
                        motif::OP_MOVE
                    } else if action == DndAction::COPY {
                        motif::OP_COPY
                    } else if action == DndAction::LINK {
                        motif::OP_LINK
                    } else {
                        motif::OP_NOOP
                    };
                    flags |= if action != DndAction::empty() {
                        motif::DROP_SITE_VALID << 4
                    } else {
                        motif::NO_DROP_SITE << 4
                    };

                    let mut builder = motif::Builder::new(reason).short(1, flags).long(1, time);
                    let need_coords = matches!(
                        reason & 0x7f,
                        motif::DROP_SITE_ENTER | motif::DRAG_MOTION
                    );
                    if need_coords {
                        builder = builder
                            .short(4, inner.last_x as u16)
                            .short(5, inner.last_y as u16);
                    }
                    (inner.source_window, builder.finish())
                };
                let event =
                    ClientMessageEvent::new(8, source, atoms._MOTIF_DRAG_AND_DROP_MESSAGE, data);
                self.send_to(context, source, event, time)?;
            }
            Protocol::Xdnd => {
                let (source, data) = {
                    let inner = context.lock();
                    let status = xdnd::Status {
                        dest: inner.dest_window.unwrap_or(x11rb::NONE),
                        accept: action != DndAction::empty(),
                        action: action.to_atom(&atoms),
                    };
                    (inner.source_window, status.encode())
                };
                let event = ClientMessageEvent::new(32, source, atoms.XdndStatus, data);
                self.send_to(context, source, event, time)?;
            }
            Protocol::Rootwin | Protocol::None => {}
        }

        {
            let mut inner = context.lock();
            inner.old_action = action;
            // The wait that picked the reply reason is answered now.
            if inner.status != DragStatus::Drop {
                inner.status = DragStatus::Drag;
            }
        }
        Ok(())
    }

    /// Accepts or rejects a Motif drop. XDND has no equivalent message;
    /// the answer there is the final [`Dnd::drop_finished`].
    pub fn drop_reply(&mut self, context: &DragContext, accepted: bool, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        if context.lock().protocol != Protocol::Motif {
            return Ok(());
        }
        let (source, data) = {
            let inner = context.lock();
            let flags = if accepted {
                motif::OP_COPY
                    | (motif::DROP_SITE_VALID << 4)
                    | (motif::OP_NOOP << 8)
                    | (motif::COMPLETION_DROP << 12)
            } else {
                motif::OP_NOOP
                    | (motif::NO_DROP_SITE << 4)
                    | (motif::OP_NOOP << 8)
                    | (motif::COMPLETION_DROP_CANCEL << 12)
            };
            let data = motif::Builder::new(motif::DROP_START | motif::REPLY_FLAG)
                .short(1, flags)
                .short(2, inner.last_x as u16)
                .short(3, inner.last_y as u16)
                .finish();
            (inner.source_window, data)
        };
        let event = ClientMessageEvent::new(8, source, atoms._MOTIF_DRAG_AND_DROP_MESSAGE, data);
        self.send_to(context, source, event, time)
    }

    /// Ends an incoming drop, reporting to the source whether the data
    /// transfer succeeded.
    pub fn drop_finished(&mut self, context: &DragContext, success: bool, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        if context.lock().protocol != Protocol::Xdnd {
            return Ok(());
        }
        let (source, data) = {
            let inner = context.lock();
            let finished = xdnd::Finished {
                dest: inner.dest_window.unwrap_or(x11rb::NONE),
                success,
                action: inner.action.to_atom(&atoms),
            };
            (inner.source_window, finished.encode())
        };
        let event = ClientMessageEvent::new(32, source, atoms.XdndFinished, data);
        self.send_to(context, source, event, time)
    }

    /* ----------------------------- Delivery ------------------------------ */

    fn send_to(
        &mut self,
        context: &DragContext,
        dest: Window,
        event: ClientMessageEvent,
        time: u32,
    ) -> Result<(), DndError> {
        // Format-32 (XDND) messages to our own windows skip the server.
        if event.format == 32 && self.is_local(dest) {
            trace!(dest, "dispatching message locally");
            return self.client_message(&event);
        }

        let mask = if self.is_root(dest) {
            EventMask::BUTTON_PRESS
        } else {
            EventMask::NO_EVENT
        };
        if let Err(err) = self.w.send_client_message(dest, mask, event) {
            // The peer is gone; unwind to "no destination" instead of
            // waiting for a reply that cannot come.
            warn!(%err, "dropping unreachable destination");
            {
                let mut inner = context.lock();
                inner.dest_window = None;
                inner.drop_window = None;
                inner.action = DndAction::empty();
                inner.status = DragStatus::Drag;
            }
            self.events.push_back(DndEvent::Status { context: context.clone(), time, synthetic: true });
        }
        Ok(())
    }

    /* --------------------------- XDND senders ---------------------------- */

    fn xdnd_publish_actions(&mut self, context: &DragContext) -> Result<(), DndError> {
        let (source, actions) = {
            let inner = context.lock();
            (inner.source_window, inner.actions)
        };
        let atoms = self.w.atoms();
        self.w.set_property32(
            source,
            atoms.XdndActionList,
            AtomEnum::ATOM.into(),
            &actions.to_atom_list(atoms),
        )?;
        context.lock().xdnd_actions_set = true;
        Ok(())
    }

    fn xdnd_send_enter(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let (dest, target, data) = {
            let mut inner = context.lock();
            let Some(dest) = inner.dest_window else {
                return Ok(());
            };
            let mut enter = xdnd::Enter {
                source: inner.source_window,
                version: inner.version,
                more_targets: false,
                targets: [x11rb::NONE; 3],
            };
            if inner.targets.len() > 3 {
                if !inner.xdnd_targets_set {
                    let targets = inner.targets.clone();
                    self.w.set_property32(
                        inner.source_window,
                        atoms.XdndTypeList,
                        AtomEnum::ATOM.into(),
                        &targets,
                    )?;
                    inner.xdnd_targets_set = true;
                }
                enter.more_targets = true;
            } else {
                for (slot, &target) in enter.targets.iter_mut().zip(&inner.targets) {
                    *slot = target;
                }
            }
            (dest, inner.drop_window.unwrap_or(dest), enter.encode())
        };
        debug!(dest, "sending XDND enter");
        let event = ClientMessageEvent::new(32, target, atoms.XdndEnter, data);
        self.send_to(context, dest, event, time)
    }

    fn xdnd_send_leave(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let (dest, target, data) = {
            let inner = context.lock();
            let Some(dest) = inner.dest_window else {
                return Ok(());
            };
            (dest, inner.drop_window.unwrap_or(dest), xdnd::encode_leave(inner.source_window))
        };
        let event = ClientMessageEvent::new(32, target, atoms.XdndLeave, data);
        self.send_to(context, dest, event, time)
    }

    fn xdnd_send_motion(
        &mut self,
        context: &DragContext,
        x_root: i16,
        y_root: i16,
        time: u32,
    ) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let (dest, target, data) = {
            let mut inner = context.lock();
            let Some(dest) = inner.dest_window else {
                return Ok(());
            };
            let position = xdnd::Position {
                source: inner.source_window,
                x_root,
                y_root,
                time,
                action: inner.suggested_action.to_atom(&atoms),
            };
            inner.status = DragStatus::MotionWait;
            (dest, inner.drop_window.unwrap_or(dest), position.encode())
        };
        let event = ClientMessageEvent::new(32, target, atoms.XdndPosition, data);
        self.send_to(context, dest, event, time)
    }

    fn xdnd_send_drop(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let (dest, target, data) = {
            let inner = context.lock();
            let Some(dest) = inner.dest_window else {
                return Ok(());
            };
            (dest, inner.drop_window.unwrap_or(dest), xdnd::encode_drop(inner.source_window, time))
        };
        let event = ClientMessageEvent::new(32, target, atoms.XdndDrop, data);
        self.send_to(context, dest, event, time)
    }

    /* --------------------------- Motif senders --------------------------- */

    fn motif_send_enter(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        // Motif needs properties on the root window of screen 0, which an
        // untrusted client cannot touch.
        if !self.w.trusted() {
            return Ok(());
        }
        if context.lock().motif_selection == x11rb::NONE {
            self.motif_set_targets(context)?;
        }
        let atoms = *self.w.atoms();
        let (dest, data) = {
            let inner = context.lock();
            let Some(dest) = inner.dest_window else {
                return Ok(());
            };
            let data = motif::Builder::new(motif::TOP_LEVEL_ENTER)
                .short(1, 0)
                .long(1, time)
                .long(2, inner.source_window)
                .long(3, inner.motif_selection)
                .finish();
            (dest, data)
        };
        debug!(dest, "sending Motif top-level enter");
        let event = ClientMessageEvent::new(8, dest, atoms._MOTIF_DRAG_AND_DROP_MESSAGE, data);
        self.send_to(context, dest, event, time)
    }

    fn motif_send_leave(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let Some(dest) = context.lock().dest_window else {
            return Ok(());
        };
        let data = motif::Builder::new(motif::TOP_LEVEL_LEAVE)
            .short(1, 0)
            .long(1, time)
            .finish();
        let event = ClientMessageEvent::new(8, dest, atoms._MOTIF_DRAG_AND_DROP_MESSAGE, data);
        self.send_to(context, dest, event, time)
    }

    fn motif_send_motion(
        &mut self,
        context: &DragContext,
        x_root: i16,
        y_root: i16,
        time: u32,
    ) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let (dest, data) = {
            let mut inner = context.lock();
            let Some(dest) = inner.dest_window else {
                return Ok(());
            };
            let flags = motif::drag_flags(inner.suggested_action, inner.actions);
            let changed = inner.suggested_action != inner.old_action
                || inner.actions != inner.old_actions;
            let builder = if changed {
                motif::Builder::new(motif::OPERATION_CHANGED)
            } else {
                inner.status = DragStatus::MotionWait;
                motif::Builder::new(motif::DRAG_MOTION)
                    .short(4, x_root as u16)
                    .short(5, y_root as u16)
            };
            (dest, builder.short(1, flags).long(1, time).finish())
        };
        let event = ClientMessageEvent::new(8, dest, atoms._MOTIF_DRAG_AND_DROP_MESSAGE, data);
        self.send_to(context, dest, event, time)
    }

    fn motif_send_drop(&mut self, context: &DragContext, time: u32) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        let (dest, data) = {
            let inner = context.lock();
            let Some(dest) = inner.dest_window else {
                return Ok(());
            };
            let data = motif::Builder::new(motif::DROP_START)
                .short(1, motif::drag_flags(inner.suggested_action, inner.actions))
                .long(1, time)
                .short(4, inner.last_x as u16)
                .short(5, inner.last_y as u16)
                .long(3, inner.motif_selection)
                .long(4, inner.source_window)
                .finish();
            (dest, data)
        };
        let event = ClientMessageEvent::new(8, dest, atoms._MOTIF_DRAG_AND_DROP_MESSAGE, data);
        self.send_to(context, dest, event, time)
    }

    /* ---------------------- Motif shared drag state ----------------------- */

    fn motif_lookup_drag_window(&mut self) -> Result<Option<Window>, DndError> {
        if let Some(window) = self.motif_drag_window {
            return Ok(Some(window));
        }
        let atoms = self.w.atoms();
        let root = self.w.root_window(0);
        let found = self
            .w
            .get_property32(root, atoms._MOTIF_DRAG_WINDOW, AtomEnum::WINDOW.into())?
            .and_then(|v| v.first().copied());
        if let Some(window) = found {
            // Watch it so a rewritten target table invalidates our copy.
            self.w.select_property_events(window)?;
            self.motif_drag_window = Some(window);
        }
        Ok(found)
    }

    fn motif_ensure_drag_window(&mut self) -> Result<Window, DndError> {
        if let Some(window) = self.motif_lookup_drag_window()? {
            return Ok(window);
        }
        let window = self.w.create_persistent_window()?;
        debug!(window, "created Motif drag window");
        self.w.select_property_events(window)?;
        self.motif_drag_window = Some(window);
        Ok(window)
    }

    fn motif_read_target_table(&mut self) -> Result<(), DndError> {
        self.motif_target_lists = None;
        if let Some(drag_window) = self.motif_lookup_drag_window()? {
            self.motif_target_lists = read_target_table(&self.w, drag_window)?;
            if self.motif_target_lists.is_none() {
                warn!("malformed Motif target table");
            }
        }
        Ok(())
    }

    /// Finds or appends `sorted` in the shared target table, returning its
    /// index. The table is rewritten whole under a server grab so two
    /// clients cannot interleave their updates.
    fn motif_add_to_target_table(&mut self, sorted: &[Atom]) -> Result<u16, DndError> {
        if let Some(lists) = &self.motif_target_lists {
            if let Some(index) = motif::table_index(lists, sorted) {
                return Ok(index as u16);
            }
        }

        // The drag window must exist before the grab: creating it opens a
        // second connection, which would deadlock against our own grab.
        let drag_window = self.motif_ensure_drag_window()?;

        self.w.grab_server()?;
        let (lists, index) = {
            let w = scopeguard::guard(&self.w, |w| {
                let _ = w.ungrab_server();
            });
            // Re-read inside the grab; another client may have appended.
            let mut lists = read_target_table(*w, drag_window)?.unwrap_or_default();
            match motif::table_index(&lists, sorted) {
                Some(index) => (lists, index),
                None => {
                    lists.push(sorted.to_vec());
                    let atoms = w.atoms();
                    w.set_property8(
                        drag_window,
                        atoms._MOTIF_DRAG_TARGETS,
                        atoms._MOTIF_DRAG_TARGETS,
                        &motif::encode_target_table(&lists),
                    )?;
                    let index = lists.len() - 1;
                    (lists, index)
                }
            }
        };
        self.motif_target_lists = Some(lists);
        Ok(index as u16)
    }

    fn motif_set_targets(&mut self, context: &DragContext) -> Result<(), DndError> {
        let sorted = motif::sort_targets(&context.lock().targets);
        let index = self.motif_add_to_target_table(&sorted)?;

        // Claim the first per-drag selection name without an owner.
        let mut selection = x11rb::NONE;
        let mut i = 0;
        while selection == x11rb::NONE {
            let atom = self.w.intern_atom(&format!("_DND_SELECTION_{}", i))?;
            if self.w.selection_owner(atom)?.is_none() {
                selection = atom;
            }
            i += 1;
        }

        let source = context.lock().source_window;
        let atoms = self.w.atoms();
        self.w.set_property8(
            source,
            selection,
            atoms._MOTIF_DRAG_INITIATOR_INFO,
            &motif::encode_initiator_info(index, selection),
        )?;
        context.lock().motif_selection = selection;
        Ok(())
    }

    /* --------------------------- Event intake ---------------------------- */

    /// Feeds one X event through the engine. Structure events keep the
    /// window caches current; client messages drive the protocol.
    pub fn handle_event(&mut self, event: &Event) -> Result<(), DndError> {
        match event {
            Event::ClientMessage(msg) => self.client_message(msg),
            Event::PropertyNotify(e) => self.property_notify(e),
            Event::CreateNotify(e) => {
                let rect = Rect { x: e.x, y: e.y, width: e.width, height: e.height };
                for cache in self.caches.values_mut() {
                    if cache.root() == e.parent {
                        cache.create(e.window, rect);
                    }
                }
                Ok(())
            }
            Event::DestroyNotify(e) => {
                for cache in self.caches.values_mut() {
                    if cache.root() == e.event {
                        cache.destroy(e.window);
                    }
                }
                Ok(())
            }
            Event::MapNotify(e) => {
                for cache in self.caches.values_mut() {
                    if cache.root() == e.event {
                        cache.map(e.window);
                    }
                }
                Ok(())
            }
            Event::UnmapNotify(e) => {
                for cache in self.caches.values_mut() {
                    if cache.root() == e.event {
                        cache.unmap(e.window);
                    }
                }
                Ok(())
            }
            Event::ConfigureNotify(e) => {
                let rect = Rect { x: e.x, y: e.y, width: e.width, height: e.height };
                let above = (e.above_sibling != x11rb::NONE).then_some(e.above_sibling);
                for cache in self.caches.values_mut() {
                    if cache.root() == e.event {
                        cache.configure(e.window, rect, above);
                    }
                }
                Ok(())
            }
            Event::ShapeNotify(e) => {
                for cache in self.caches.values_mut() {
                    cache.shape_changed(e.affected_window);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn property_notify(&mut self, event: &PropertyNotifyEvent) -> Result<(), DndError> {
        let atoms = *self.w.atoms();

        if event.atom == atoms.XdndActionList {
            let context = self.current_dest_drag.as_ref().and_then(|c| {
                let inner = c.lock();
                (inner.protocol == Protocol::Xdnd && inner.source_window == event.window)
                    .then(|| c.clone())
            });
            if let Some(context) = context {
                self.xdnd_read_actions(&context)?;
            }
        }

        if event.atom == atoms._MOTIF_DRAG_TARGETS
            && self.motif_drag_window == Some(event.window)
            && self.motif_target_lists.is_some()
        {
            self.motif_read_target_table()?;
        }

        Ok(())
    }

    fn client_message(&mut self, msg: &ClientMessageEvent) -> Result<(), DndError> {
        let atoms = *self.w.atoms();
        if msg.type_ == atoms._MOTIF_DRAG_AND_DROP_MESSAGE {
            return self.motif_message(msg);
        }
        if msg.format != 32 {
            return Ok(());
        }
        let data = msg.data.as_data32();
        match msg.type_ {
            t if t == atoms.XdndEnter => self.xdnd_enter(msg.window, &data),
            t if t == atoms.XdndPosition => self.xdnd_position(msg.window, &data),
            t if t == atoms.XdndLeave => self.xdnd_leave(msg.window, &data),
            t if t == atoms.XdndDrop => self.xdnd_drop(msg.window, &data),
            t if t == atoms.XdndStatus => self.xdnd_status(msg.window, &data),
            t if t == atoms.XdndFinished => self.xdnd_finished(msg.window, &data),
            _ => Ok(()),
        }
    }

    /* ------------------------ XDND event handlers ------------------------- */

    fn xdnd_enter(&mut self, dest: Window, data: &[u32; 5]) -> Result<(), DndError> {
        if !self.registered.contains(&dest) {
            return Ok(());
        }
        let enter = xdnd::Enter::decode(data);
        if enter.version < XDND_MIN_VERSION {
            debug!(version = enter.version, "ignoring pre-XDND-3 enter");
            return Ok(());
        }
        debug!(source = enter.source, version = enter.version, "XDND enter");

        self.current_dest_drag = None;

        let atoms = *self.w.atoms();
        let targets = if enter.more_targets {
            match self
                .w
                .get_property32(enter.source, atoms.XdndTypeList, AtomEnum::ATOM.into())?
            {
                Some(targets) => targets,
                // Source raced away; drop the enter.
                None => return Ok(()),
            }
        } else {
            enter.targets.iter().copied().filter(|&t| t != x11rb::NONE).collect()
        };

        let context = DragContext::new(false, enter.source, 0);
        {
            let mut inner = context.lock();
            inner.protocol = Protocol::Xdnd;
            inner.version = enter.version;
            inner.dest_window = Some(dest);
            inner.targets = targets;
        }

        // XDND has no message for a changed action list, so watch the
        // source's property while the drag lasts.
        if self.find_source_context(enter.source, Some(dest)).is_none() {
            self.w.select_property_events(enter.source)?;
        }
        self.xdnd_read_actions(&context)?;

        self.current_dest_drag = Some(context.clone());
        self.events.push_back(DndEvent::Enter { context, time: x11rb::CURRENT_TIME });
        Ok(())
    }

    fn xdnd_read_actions(&mut self, context: &DragContext) -> Result<(), DndError> {
        let (source, dest) = {
            let inner = context.lock();
            (inner.source_window, inner.dest_window)
        };

        if let Some(source_context) = self.find_source_context(source, dest) {
            // Local drag: share the source context's set directly.
            let actions = source_context.lock().actions;
            let mut inner = context.lock();
            inner.actions = actions;
            inner.xdnd_have_actions = true;
            return Ok(());
        }

        let atoms = self.w.atoms();
        let list = self
            .w
            .get_property32(source, atoms.XdndActionList, AtomEnum::ATOM.into())?;
        let mut inner = context.lock();
        match list {
            Some(list) => {
                inner.actions = list
                    .iter()
                    .fold(DndAction::empty(), |acc, &atom| acc | DndAction::from_atom(atom, atoms));
                inner.xdnd_have_actions = true;
            }
            None => inner.xdnd_have_actions = false,
        }
        Ok(())
    }

    fn xdnd_position(&mut self, dest: Window, data: &[u32; 5]) -> Result<(), DndError> {
        let position = xdnd::Position::decode(data);
        let Some(context) = self.current_xdnd_dest(dest, position.source) else {
            return Ok(());
        };
        let atoms = self.w.atoms();
        {
            let mut inner = context.lock();
            inner.suggested_action = DndAction::from_atom(position.action, atoms);
            if !inner.xdnd_have_actions {
                inner.actions = inner.suggested_action;
            }
            inner.last_x = position.x_root;
            inner.last_y = position.y_root;
        }
        self.events.push_back(DndEvent::Motion {
            context,
            time: position.time,
            x_root: position.x_root,
            y_root: position.y_root,
        });
        Ok(())
    }

    fn xdnd_leave(&mut self, dest: Window, data: &[u32; 5]) -> Result<(), DndError> {
        let source = data[0];
        if let Some(context) = self.current_xdnd_dest(dest, source) {
            self.current_dest_drag = None;
            self.events.push_back(DndEvent::Leave { context, time: x11rb::CURRENT_TIME });
        }
        Ok(())
    }

    fn xdnd_drop(&mut self, dest: Window, data: &[u32; 5]) -> Result<(), DndError> {
        let source = data[0];
        let time = data[2];
        if let Some(context) = self.current_xdnd_dest(dest, source) {
            let (x_root, y_root) = {
                let inner = context.lock();
                (inner.last_x, inner.last_y)
            };
            self.events.push_back(DndEvent::DropStart { context, time, x_root, y_root });
        }
        Ok(())
    }

    fn current_xdnd_dest(&self, dest: Window, source: Window) -> Option<DragContext> {
        let context = self.current_dest_drag.as_ref()?;
        let inner = context.lock();
        (inner.protocol == Protocol::Xdnd
            && inner.source_window == source
            && inner.dest_window == Some(dest))
        .then(|| context.clone())
    }

    fn xdnd_status(&mut self, window: Window, data: &[u32; 5]) -> Result<(), DndError> {
        let status = xdnd::Status::decode(data);
        let Some(context) = self.find_source_context(window, Some(status.dest)) else {
            return Ok(());
        };
        let atoms = self.w.atoms();
        {
            let mut inner = context.lock();
            if inner.status == DragStatus::MotionWait {
                inner.status = DragStatus::Drag;
            }
            let mut action = status.action;
            if (action != x11rb::NONE) != status.accept {
                warn!("status reply with mismatched accept flag and action");
                action = x11rb::NONE;
            }
            inner.action = DndAction::from_atom(action, atoms);
        }
        self.events.push_back(DndEvent::Status {
            context,
            time: x11rb::CURRENT_TIME,
            synthetic: false,
        });
        Ok(())
    }

    fn xdnd_finished(&mut self, window: Window, data: &[u32; 5]) -> Result<(), DndError> {
        let finished = xdnd::Finished::decode(data);
        let Some(context) = self.find_source_context(window, Some(finished.dest)) else {
            return Ok(());
        };
        {
            let mut inner = context.lock();
            if inner.version >= 5 {
                inner.drop_failed = !finished.success;
            }
        }
        self.events.push_back(DndEvent::DropFinished {
            context: context.clone(),
            time: x11rb::CURRENT_TIME,
        });
        self.conclude(&context)
    }

    /* ------------------------ Motif event handlers ------------------------ */

    fn motif_message(&mut self, msg: &ClientMessageEvent) -> Result<(), DndError> {
        if msg.format != 8 {
            return Ok(());
        }
        let data = msg.data.as_data8();
        let Some((message, is_reply)) = motif::decode(&data) else {
            return Ok(());
        };

        match message {
            motif::Message::TopLevelEnter { time, source, selection, .. } => {
                if !self.registered.contains(&msg.window) {
                    return Ok(());
                }
                debug!(source, "Motif top-level enter");
                if let Some(context) =
                    self.motif_new_dest_context(msg.window, time, source, selection)?
                {
                    self.current_dest_drag = Some(context.clone());
                    self.events.push_back(DndEvent::Enter { context, time });
                }
            }
            motif::Message::TopLevelLeave { time, .. } => {
                if let Some(context) = self.current_motif_dest(time) {
                    self.current_dest_drag = None;
                    self.events.push_back(DndEvent::Leave { context, time });
                }
            }
            motif::Message::DragMotion { flags, time, x_root, y_root } => {
                if is_reply {
                    self.motif_source_status(msg.window, flags, time);
                } else if let Some(context) = self.current_motif_dest(time) {
                    {
                        let mut inner = context.lock();
                        let (suggested, possible) = motif::translate_flags(flags);
                        inner.suggested_action = suggested;
                        inner.actions = possible;
                        inner.last_x = x_root;
                        inner.last_y = y_root;
                        inner.status = DragStatus::MotionWait;
                    }
                    self.events.push_back(DndEvent::Motion { context, time, x_root, y_root });
                }
            }
            motif::Message::DropSiteEnter { flags, time } => {
                self.motif_source_status(msg.window, flags, time);
            }
            motif::Message::DropSiteLeave { time, .. } => {
                // No flags on the wire for a site leave; synthesize "no
                // drop site, no operation".
                self.motif_source_status(msg.window, motif::NO_DROP_SITE << 8, time);
            }
            motif::Message::OperationChanged { flags, time } => {
                if is_reply {
                    self.motif_source_status(msg.window, flags, time);
                } else if let Some(context) = self.current_motif_dest(time) {
                    let (x_root, y_root) = {
                        let mut inner = context.lock();
                        let (suggested, possible) = motif::translate_flags(flags);
                        inner.suggested_action = suggested;
                        inner.actions = possible;
                        inner.status = DragStatus::ActionWait;
                        (inner.last_x, inner.last_y)
                    };
                    self.events.push_back(DndEvent::Motion { context, time, x_root, y_root });
                }
            }
            motif::Message::DropStart { flags, time, x_root, y_root, selection, source } => {
                if is_reply || !self.registered.contains(&msg.window) {
                    return Ok(());
                }
                debug!(source, "Motif drop start");
                if let Some(context) =
                    self.motif_new_dest_context(msg.window, time, source, selection)?
                {
                    {
                        let mut inner = context.lock();
                        let (suggested, possible) = motif::translate_flags(flags);
                        inner.suggested_action = suggested;
                        inner.actions = possible;
                        inner.last_x = x_root;
                        inner.last_y = y_root;
                    }
                    self.current_dest_drag = Some(context.clone());
                    self.events.push_back(DndEvent::DropStart { context, time, x_root, y_root });
                }
            }
        }
        Ok(())
    }

    fn current_motif_dest(&self, time: u32) -> Option<DragContext> {
        let context = self.current_dest_drag.as_ref()?;
        let inner = context.lock();
        (inner.protocol == Protocol::Motif && time >= inner.start_time)
            .then(|| context.clone())
    }

    fn motif_source_status(&mut self, window: Window, flags: u16, time: u32) {
        let Some(context) = self.find_source_context(window, None) else {
            return;
        };
        {
            let mut inner = context.lock();
            if inner.status == DragStatus::MotionWait || inner.status == DragStatus::ActionWait {
                inner.status = DragStatus::Drag;
            }
            inner.action = if (flags & 0x00f0) >> 4 == motif::DROP_SITE_VALID {
                match flags & 0x000f {
                    motif::OP_MOVE => DndAction::MOVE,
                    motif::OP_COPY => DndAction::COPY,
                    motif::OP_LINK => DndAction::LINK,
                    _ => DndAction::empty(),
                }
            } else {
                DndAction::empty()
            };
        }
        self.events.push_back(DndEvent::Status { context, time, synthetic: false });
    }

    /// Builds a destination context for an incoming Motif drag, resolving
    /// the source's initiator info and the shared target table.
    fn motif_new_dest_context(
        &mut self,
        dest: Window,
        time: u32,
        source: Window,
        selection_property: Atom,
    ) -> Result<Option<DragContext>, DndError> {
        if let Some(current) = &self.current_dest_drag {
            if time >= current.lock().start_time {
                self.current_dest_drag = None;
            } else {
                return Ok(None);
            }
        }

        let atoms = *self.w.atoms();
        let info = self
            .w
            .get_property8(source, selection_property, atoms._MOTIF_DRAG_INITIATOR_INFO)?
            .and_then(|bytes| motif::parse_initiator_info(&bytes));
        let Some((index, selection)) = info else {
            warn!(source, "unreadable Motif initiator info");
            return Ok(None);
        };

        self.motif_read_target_table()?;
        let targets = self
            .motif_target_lists
            .as_ref()
            .and_then(|lists| lists.get(index as usize))
            .cloned();
        let Some(targets) = targets else {
            warn!(index, "Motif target index not in the shared table");
            return Ok(None);
        };

        let context = DragContext::new(false, source, 0);
        {
            let mut inner = context.lock();
            inner.protocol = Protocol::Motif;
            inner.dest_window = Some(dest);
            inner.targets = targets;
            inner.start_time = time;
            inner.motif_selection = selection;
        }
        Ok(Some(context))
    }
}

fn read_target_table<W: Windowing>(
    w: &W,
    drag_window: Window,
) -> Result<Option<Vec<Vec<Atom>>>, DndError> {
    let atoms = w.atoms();
    let Some(bytes) =
        w.get_property8(drag_window, atoms._MOTIF_DRAG_TARGETS, atoms._MOTIF_DRAG_TARGETS)?
    else {
        return Ok(None);
    };
    Ok(motif::parse_target_table(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockWindowing;
    use crate::windowing::{ChildInfo, ChildQuery};
    use x11rb::protocol::xproto::Property;

    const ROOT: Window = 0x15a;
    const SOURCE: Window = 0x500;
    const DEST: Window = 0x100;
    const FOREIGN_SOURCE: Window = 0x900;

    fn toplevel(window: Window) -> ChildInfo {
        ChildInfo {
            window,
            x: 0,
            y: 0,
            width: 100,
            height: 100,
            mapped: true,
            input_output: true,
            has_wm_state: false,
        }
    }

    /// One mapped top-level at (0,0)-(100,100) that is itself the client
    /// window.
    fn single_toplevel(mock: &MockWindowing, window: Window) {
        mock.set_tree(ROOT, ChildQuery { has_wm_state: false, children: vec![toplevel(window)] });
        mock.set_tree(window, ChildQuery { has_wm_state: true, children: vec![] });
    }

    fn xdnd_aware(mock: &MockWindowing, window: Window, version: u32) {
        let atoms = *mock.atoms();
        mock.put_property32(window, atoms.XdndAware, AtomEnum::ATOM.into(), vec![version]);
    }

    fn motif_receiver(mock: &MockWindowing, window: Window) {
        let atoms = *mock.atoms();
        mock.put_property8(
            window,
            atoms._MOTIF_DRAG_RECEIVER_INFO,
            atoms._MOTIF_DRAG_RECEIVER_INFO,
            motif::encode_receiver_info().to_vec(),
        );
    }

    fn client_message(event: ClientMessageEvent) -> Event {
        Event::ClientMessage(event)
    }

    fn xdnd_message(type_: Atom, window: Window, data: [u32; 5]) -> Event {
        client_message(ClientMessageEvent::new(32, window, type_, data))
    }

    fn motif_message(mock: &MockWindowing, window: Window, data: [u8; 20]) -> Event {
        let atoms = *mock.atoms();
        client_message(ClientMessageEvent::new(
            8,
            window,
            atoms._MOTIF_DRAG_AND_DROP_MESSAGE,
            data,
        ))
    }

    fn property_notify(window: Window, atom: Atom) -> Event {
        Event::PropertyNotify(PropertyNotifyEvent {
            response_type: 0,
            sequence: 0,
            window,
            atom,
            time: 0,
            state: Property::NEW_VALUE,
        })
    }

    /// Runs a drag up to the first motion over an XDND destination.
    fn drag_to_xdnd_dest(dnd: &mut Dnd<MockWindowing>) -> DragContext {
        let context = dnd.begin(SOURCE, vec![1, 2]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        assert_eq!((dest, protocol), (Some(DEST), Protocol::Xdnd));
        let moved = dnd
            .motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();
        assert!(!moved);
        context
    }

    #[test]
    fn motion_to_a_new_destination_sends_enter_and_position() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        xdnd_aware(&mock, DEST, 5);

        let mut dnd = Dnd::new(mock.clone());
        let context = drag_to_xdnd_dest(&mut dnd);

        let sent = mock.sent();
        assert_eq!(sent.len(), 2);

        assert_eq!(sent[0].type_, atoms.XdndEnter);
        assert_eq!(sent[0].window, DEST);
        let enter = xdnd::Enter::decode(&sent[0].data.as_data32());
        assert_eq!(enter.source, SOURCE);
        assert_eq!(enter.version, 5);
        assert!(!enter.more_targets);
        assert_eq!(enter.targets, [1, 2, 0]);

        assert_eq!(sent[1].type_, atoms.XdndPosition);
        let position = xdnd::Position::decode(&sent[1].data.as_data32());
        assert_eq!((position.x_root, position.y_root), (10, 10));
        assert_eq!(position.action, atoms.XdndActionCopy);

        // The action list was published for the foreign destination.
        assert_eq!(
            mock.property32(SOURCE, atoms.XdndActionList),
            Some(vec![atoms.XdndActionCopy])
        );

        // The destination change is announced before any reply can arrive.
        assert!(matches!(
            dnd.poll_event(),
            Some(DndEvent::Status { synthetic: true, .. })
        ));
        assert_eq!(context.dest_window(), Some(DEST));
    }

    #[test]
    fn many_targets_go_through_the_type_list_property() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        xdnd_aware(&mock, DEST, 5);

        let mut dnd = Dnd::new(mock.clone());
        let context = dnd.begin(SOURCE, vec![1, 2, 3, 4]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        dnd.motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();

        let enter = xdnd::Enter::decode(&mock.sent()[0].data.as_data32());
        assert!(enter.more_targets);
        assert_eq!(mock.property32(SOURCE, atoms.XdndTypeList), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn motion_is_suppressed_until_the_status_reply() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        xdnd_aware(&mock, DEST, 5);

        let mut dnd = Dnd::new(mock.clone());
        let context = drag_to_xdnd_dest(&mut dnd);
        mock.take_sent();

        // Still waiting for XdndStatus; the motion is absorbed.
        let moved = dnd
            .motion(&context, Some(DEST), Protocol::Xdnd, 20, 20, DndAction::COPY, DndAction::COPY, 2)
            .unwrap();
        assert!(moved);
        assert!(mock.sent().is_empty());

        let status = xdnd::Status { dest: DEST, accept: true, action: atoms.XdndActionCopy };
        dnd.handle_event(&xdnd_message(atoms.XdndStatus, SOURCE, status.encode()))
            .unwrap();
        assert_eq!(context.action(), DndAction::COPY);
        dnd.poll_event(); // synthetic status from the destination change
        assert!(matches!(
            dnd.poll_event(),
            Some(DndEvent::Status { synthetic: false, .. })
        ));

        // Unblocked: the next motion goes out.
        let moved = dnd
            .motion(&context, Some(DEST), Protocol::Xdnd, 30, 30, DndAction::COPY, DndAction::COPY, 3)
            .unwrap();
        assert!(!moved);
        assert_eq!(mock.sent().len(), 1);
    }

    #[test]
    fn mismatched_status_reply_counts_as_rejection() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        xdnd_aware(&mock, DEST, 5);

        let mut dnd = Dnd::new(mock.clone());
        let context = drag_to_xdnd_dest(&mut dnd);

        // accept=0 but a non-zero action atom: the flag wins.
        let data = [DEST, 0, 0, 0, atoms.XdndActionCopy];
        dnd.handle_event(&xdnd_message(atoms.XdndStatus, SOURCE, data)).unwrap();
        assert_eq!(context.action(), DndAction::empty());
    }

    #[test]
    fn undeliverable_messages_unwind_the_destination() {
        let mock = MockWindowing::new(ROOT);
        single_toplevel(&mock, DEST);
        xdnd_aware(&mock, DEST, 5);
        mock.fail_send(DEST);

        let mut dnd = Dnd::new(mock.clone());
        let context = dnd.begin(SOURCE, vec![1]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        let moved = dnd
            .motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();
        assert!(!moved);

        assert_eq!(context.dest_window(), None);
        assert_eq!(context.action(), DndAction::empty());
        assert!(mock.sent().is_empty());
        // One synthetic status for the destination change, one for the
        // unwind.
        assert!(matches!(
            dnd.poll_event(),
            Some(DndEvent::Status { synthetic: true, .. })
        ));
        assert!(matches!(
            dnd.poll_event(),
            Some(DndEvent::Status { synthetic: true, .. })
        ));
    }

    #[test]
    fn abort_leaves_and_is_idempotent() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        xdnd_aware(&mock, DEST, 5);

        let mut dnd = Dnd::new(mock.clone());
        let context = drag_to_xdnd_dest(&mut dnd);
        assert!(mock.substructure_selected(ROOT));
        mock.take_sent();

        dnd.abort(&context, 4).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].type_, atoms.XdndLeave);
        // The last drag ended; the caches were torn down.
        assert!(!mock.substructure_selected(ROOT));

        dnd.abort(&context, 5).unwrap();
        assert!(mock.sent().is_empty());
    }

    #[test]
    fn finished_reply_reports_a_failed_drop() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        xdnd_aware(&mock, DEST, 5);

        let mut dnd = Dnd::new(mock.clone());
        let context = drag_to_xdnd_dest(&mut dnd);
        let status = xdnd::Status { dest: DEST, accept: true, action: atoms.XdndActionCopy };
        dnd.handle_event(&xdnd_message(atoms.XdndStatus, SOURCE, status.encode()))
            .unwrap();
        mock.take_sent();

        dnd.drop(&context, 42).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].type_, atoms.XdndDrop);
        assert_eq!(sent[0].data.as_data32()[2], 42);

        let data = [DEST, 0, 0, 0, 0];
        dnd.handle_event(&xdnd_message(atoms.XdndFinished, SOURCE, data)).unwrap();
        // The published action list does not outlive the drag.
        assert_eq!(mock.property32(SOURCE, atoms.XdndActionList), None);
        while let Some(event) = dnd.poll_event() {
            if let DndEvent::DropFinished { context: finished, .. } = event {
                assert!(!finished.drop_succeeded());
                return;
            }
        }
        panic!("no DropFinished event");
    }

    #[test]
    fn root_window_accepts_only_the_rootdrop_target() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        mock.set_tree(ROOT, ChildQuery::default());

        let mut dnd = Dnd::new(mock.clone());
        let context = dnd.begin(SOURCE, vec![atoms.XRootwindowDrop]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        assert_eq!((dest, protocol), (Some(ROOT), Protocol::Rootwin));

        dnd.motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();
        // Nothing goes on the wire; the answer is immediate.
        assert!(mock.sent().is_empty());
        dnd.poll_event(); // synthetic
        assert!(matches!(
            dnd.poll_event(),
            Some(DndEvent::Status { synthetic: false, .. })
        ));
        assert_eq!(context.action(), DndAction::COPY);

        let other = dnd.begin(SOURCE, vec![1]);
        let (dest, protocol) = dnd.find_window(&other, None, 0, 10, 10).unwrap();
        dnd.motion(&other, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 2)
            .unwrap();
        assert_eq!(other.action(), DndAction::empty());
    }

    #[test]
    fn local_drags_never_touch_the_wire() {
        let mock = MockWindowing::new(ROOT);
        single_toplevel(&mock, DEST);

        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        let context = dnd.begin(SOURCE, vec![1, 2]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        assert_eq!((dest, protocol), (Some(DEST), Protocol::Xdnd));
        dnd.motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();

        assert!(mock.sent().is_empty());
        let Some(DndEvent::Enter { context: dest_context, .. }) = dnd.poll_event() else {
            panic!("expected the local enter");
        };
        assert_eq!(dest_context.targets(), vec![1, 2]);
        // The source's actions were shared directly, not via a property.
        assert_eq!(dest_context.actions(), DndAction::COPY);
        assert!(!mock.property_selected(SOURCE));
        assert!(matches!(
            dnd.poll_event(),
            Some(DndEvent::Status { synthetic: true, .. })
        ));
        assert!(matches!(dnd.poll_event(), Some(DndEvent::Motion { .. })));

        // The destination's answer also short-circuits.
        dnd.status(&dest_context, DndAction::COPY, 2).unwrap();
        assert!(mock.sent().is_empty());
        assert!(matches!(
            dnd.poll_event(),
            Some(DndEvent::Status { synthetic: false, .. })
        ));
        assert_eq!(context.action(), DndAction::COPY);
    }

    #[test]
    fn incoming_xdnd_drag_full_cycle() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        let enter = xdnd::Enter {
            source: FOREIGN_SOURCE,
            version: 5,
            more_targets: false,
            targets: [7, 8, 0],
        };
        dnd.handle_event(&xdnd_message(atoms.XdndEnter, DEST, enter.encode()))
            .unwrap();
        let Some(DndEvent::Enter { context, .. }) = dnd.poll_event() else {
            panic!("expected an enter event");
        };
        assert_eq!(context.targets(), vec![7, 8]);
        assert_eq!(context.source_window(), FOREIGN_SOURCE);
        assert!(mock.property_selected(FOREIGN_SOURCE));

        let position = xdnd::Position {
            source: FOREIGN_SOURCE,
            x_root: 50,
            y_root: 60,
            time: 123,
            action: atoms.XdndActionMove,
        };
        dnd.handle_event(&xdnd_message(atoms.XdndPosition, DEST, position.encode()))
            .unwrap();
        let Some(DndEvent::Motion { x_root, y_root, time, .. }) = dnd.poll_event() else {
            panic!("expected a motion event");
        };
        assert_eq!((x_root, y_root, time), (50, 60, 123));
        assert_eq!(context.suggested_action(), DndAction::MOVE);
        // No published action list: the suggestion is all we know.
        assert_eq!(context.actions(), DndAction::MOVE);

        dnd.status(&context, DndAction::MOVE, 123).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].window, FOREIGN_SOURCE);
        let status = xdnd::Status::decode(&sent[0].data.as_data32());
        assert_eq!(status.dest, DEST);
        assert!(status.accept);
        assert_eq!(status.action, atoms.XdndActionMove);

        let data = [FOREIGN_SOURCE, 0, 321, 0, 0];
        dnd.handle_event(&xdnd_message(atoms.XdndDrop, DEST, data)).unwrap();
        let Some(DndEvent::DropStart { x_root, y_root, time, .. }) = dnd.poll_event() else {
            panic!("expected a drop start");
        };
        assert_eq!((x_root, y_root, time), (50, 60, 321));

        dnd.drop_finished(&context, true, 321).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        let finished = xdnd::Finished::decode(&sent[0].data.as_data32());
        assert!(finished.success);
        assert_eq!(finished.action, atoms.XdndActionMove);
    }

    #[test]
    fn xdnd_leave_ends_the_incoming_drag() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        let enter = xdnd::Enter {
            source: FOREIGN_SOURCE,
            version: 5,
            more_targets: false,
            targets: [7, 0, 0],
        };
        dnd.handle_event(&xdnd_message(atoms.XdndEnter, DEST, enter.encode()))
            .unwrap();
        dnd.poll_event();

        dnd.handle_event(&xdnd_message(atoms.XdndLeave, DEST, [FOREIGN_SOURCE, 0, 0, 0, 0]))
            .unwrap();
        assert!(matches!(dnd.poll_event(), Some(DndEvent::Leave { .. })));

        // Positions after the leave are stale and ignored.
        let position = xdnd::Position {
            source: FOREIGN_SOURCE,
            x_root: 1,
            y_root: 1,
            time: 124,
            action: atoms.XdndActionCopy,
        };
        dnd.handle_event(&xdnd_message(atoms.XdndPosition, DEST, position.encode()))
            .unwrap();
        assert!(dnd.poll_event().is_none());
    }

    #[test]
    fn old_xdnd_versions_are_refused() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        let enter = xdnd::Enter {
            source: FOREIGN_SOURCE,
            version: 2,
            more_targets: false,
            targets: [7, 0, 0],
        };
        dnd.handle_event(&xdnd_message(atoms.XdndEnter, DEST, enter.encode()))
            .unwrap();
        assert!(dnd.poll_event().is_none());
    }

    #[test]
    fn action_list_changes_are_tracked_through_property_events() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        mock.put_property32(
            FOREIGN_SOURCE,
            atoms.XdndActionList,
            AtomEnum::ATOM.into(),
            vec![atoms.XdndActionCopy, atoms.XdndActionMove],
        );
        let enter = xdnd::Enter {
            source: FOREIGN_SOURCE,
            version: 5,
            more_targets: false,
            targets: [7, 0, 0],
        };
        dnd.handle_event(&xdnd_message(atoms.XdndEnter, DEST, enter.encode()))
            .unwrap();
        let Some(DndEvent::Enter { context, .. }) = dnd.poll_event() else {
            panic!("expected an enter event");
        };
        assert_eq!(context.actions(), DndAction::COPY | DndAction::MOVE);

        mock.put_property32(
            FOREIGN_SOURCE,
            atoms.XdndActionList,
            AtomEnum::ATOM.into(),
            vec![atoms.XdndActionLink],
        );
        dnd.handle_event(&property_notify(FOREIGN_SOURCE, atoms.XdndActionList)).unwrap();
        assert_eq!(context.actions(), DndAction::LINK);
    }

    #[test]
    fn motif_destination_gets_enter_and_motion() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        motif_receiver(&mock, DEST);

        let mut dnd = Dnd::new(mock.clone());
        let context = dnd.begin(SOURCE, vec![0x30, 0x10, 0x20]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        assert_eq!((dest, protocol), (Some(DEST), Protocol::Motif));

        dnd.motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 5)
            .unwrap();

        // The shared drag window and target table were set up, under a
        // balanced server grab.
        let drag_window = mock.property32(ROOT, atoms._MOTIF_DRAG_WINDOW).unwrap()[0];
        let table = mock.property8(drag_window, atoms._MOTIF_DRAG_TARGETS).unwrap();
        assert_eq!(motif::parse_target_table(&table), Some(vec![vec![0x10, 0x20, 0x30]]));
        assert_eq!(mock.grabs(), (1, true));

        // Initiator info hangs off the source under the claimed selection.
        let selection = context.selection(&atoms);
        let info = mock.property8(SOURCE, selection).unwrap();
        assert_eq!(motif::parse_initiator_info(&info), Some((0, selection)));

        let sent = mock.take_sent();
        assert_eq!(sent.len(), 2);
        let (enter, is_reply) = motif::decode(&sent[0].data.as_data8()).unwrap();
        assert!(!is_reply);
        assert_eq!(
            enter,
            motif::Message::TopLevelEnter { flags: 0, time: 5, source: SOURCE, selection }
        );
        let (motion, _) = motif::decode(&sent[1].data.as_data8()).unwrap();
        assert!(matches!(
            motion,
            motif::Message::DragMotion { x_root: 10, y_root: 10, .. }
        ));

        // Waiting for the receiver's reply now.
        let moved = dnd
            .motion(&context, Some(DEST), Protocol::Motif, 11, 11, DndAction::COPY, DndAction::COPY, 6)
            .unwrap();
        assert!(moved);

        // The reply unblocks and carries the accepted action.
        let reply = motif::Builder::new(motif::DRAG_MOTION | motif::REPLY_FLAG)
            .short(1, motif::OP_COPY | (motif::DROP_SITE_VALID << 4))
            .long(1, 6)
            .finish();
        dnd.handle_event(&motif_message(&mock, SOURCE, reply)).unwrap();
        assert_eq!(context.action(), DndAction::COPY);
        let moved = dnd
            .motion(&context, Some(DEST), Protocol::Motif, 12, 12, DndAction::COPY, DndAction::COPY, 7)
            .unwrap();
        assert!(!moved);
    }

    #[test]
    fn motif_action_change_sends_operation_changed() {
        let mock = MockWindowing::new(ROOT);
        single_toplevel(&mock, DEST);
        motif_receiver(&mock, DEST);

        let mut dnd = Dnd::new(mock.clone());
        let context = dnd.begin(SOURCE, vec![0x10]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        dnd.motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();
        let reply = motif::Builder::new(motif::DRAG_MOTION | motif::REPLY_FLAG)
            .short(1, motif::OP_COPY | (motif::DROP_SITE_VALID << 4))
            .long(1, 1)
            .finish();
        dnd.handle_event(&motif_message(&mock, SOURCE, reply)).unwrap();
        mock.take_sent();

        // Same destination, different action: an operation change, not a
        // motion.
        dnd.motion(&context, Some(DEST), Protocol::Motif, 11, 11, DndAction::MOVE, DndAction::MOVE, 2)
            .unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        let (message, is_reply) = motif::decode(&sent[0].data.as_data8()).unwrap();
        assert!(!is_reply);
        assert!(matches!(message, motif::Message::OperationChanged { .. }));
    }

    #[test]
    fn motif_drop_sends_leave_then_drop_start() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        motif_receiver(&mock, DEST);

        let mut dnd = Dnd::new(mock.clone());
        let context = dnd.begin(SOURCE, vec![0x10]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        dnd.motion(&context, dest, protocol, 33, 44, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();
        let selection = context.selection(&atoms);
        mock.take_sent();

        dnd.drop(&context, 9).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 2);
        let (leave, _) = motif::decode(&sent[0].data.as_data8()).unwrap();
        assert!(matches!(leave, motif::Message::TopLevelLeave { .. }));
        let (drop_start, is_reply) = motif::decode(&sent[1].data.as_data8()).unwrap();
        assert!(!is_reply);
        assert_eq!(
            drop_start,
            motif::Message::DropStart {
                flags: motif::drag_flags(DndAction::COPY, DndAction::COPY),
                time: 9,
                x_root: 33,
                y_root: 44,
                selection,
                source: SOURCE,
            }
        );
    }

    #[test]
    fn motif_target_table_entries_are_shared() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        single_toplevel(&mock, DEST);
        motif_receiver(&mock, DEST);
        // Another client already published a table with one entry.
        let drag_window = 0x700;
        mock.put_property32(ROOT, atoms._MOTIF_DRAG_WINDOW, AtomEnum::WINDOW.into(), vec![drag_window]);
        mock.put_property8(
            drag_window,
            atoms._MOTIF_DRAG_TARGETS,
            atoms._MOTIF_DRAG_TARGETS,
            motif::encode_target_table(&[vec![0x10, 0x20]]),
        );

        let mut dnd = Dnd::new(mock.clone());
        // Same target set in a different order: reuses entry 0.
        let context = dnd.begin(SOURCE, vec![0x20, 0x10]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        dnd.motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();
        let info = mock.property8(SOURCE, context.selection(&atoms)).unwrap();
        assert_eq!(motif::parse_initiator_info(&info).unwrap().0, 0);
        let table = mock.property8(drag_window, atoms._MOTIF_DRAG_TARGETS).unwrap();
        assert_eq!(motif::parse_target_table(&table).unwrap().len(), 1);

        // A new target set appends entry 1.
        let other = dnd.begin(0x501, vec![0x40]);
        let (dest, protocol) = dnd.find_window(&other, None, 0, 10, 10).unwrap();
        dnd.motion(&other, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 2)
            .unwrap();
        let info = mock.property8(0x501, other.selection(&atoms)).unwrap();
        assert_eq!(motif::parse_initiator_info(&info).unwrap().0, 1);
        let table = mock.property8(drag_window, atoms._MOTIF_DRAG_TARGETS).unwrap();
        assert_eq!(
            motif::parse_target_table(&table),
            Some(vec![vec![0x10, 0x20], vec![0x40]])
        );
        assert!(mock.grabs().1);
    }

    #[test]
    fn incoming_motif_drag_enter_motion_leave() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        let drag_window = 0x700;
        mock.put_property32(ROOT, atoms._MOTIF_DRAG_WINDOW, AtomEnum::WINDOW.into(), vec![drag_window]);
        mock.put_property8(
            drag_window,
            atoms._MOTIF_DRAG_TARGETS,
            atoms._MOTIF_DRAG_TARGETS,
            motif::encode_target_table(&[vec![0x10, 0x20]]),
        );
        let selection = 0x888;
        mock.put_property8(
            FOREIGN_SOURCE,
            selection,
            atoms._MOTIF_DRAG_INITIATOR_INFO,
            motif::encode_initiator_info(0, selection).to_vec(),
        );

        let enter = motif::Builder::new(motif::TOP_LEVEL_ENTER)
            .short(1, 0)
            .long(1, 100)
            .long(2, FOREIGN_SOURCE)
            .long(3, selection)
            .finish();
        dnd.handle_event(&motif_message(&mock, DEST, enter)).unwrap();
        let Some(DndEvent::Enter { context, time }) = dnd.poll_event() else {
            panic!("expected an enter event");
        };
        assert_eq!(time, 100);
        assert_eq!(context.targets(), vec![0x10, 0x20]);
        assert_eq!(context.selection(&atoms), selection);

        let motion = motif::Builder::new(motif::DRAG_MOTION)
            .short(1, motif::OP_COPY | ((motif::OP_COPY | motif::OP_MOVE) << 4))
            .long(1, 101)
            .short(4, 40)
            .short(5, 50)
            .finish();
        dnd.handle_event(&motif_message(&mock, DEST, motion)).unwrap();
        let Some(DndEvent::Motion { x_root, y_root, .. }) = dnd.poll_event() else {
            panic!("expected a motion event");
        };
        assert_eq!((x_root, y_root), (40, 50));
        assert_eq!(context.suggested_action(), DndAction::COPY);
        assert_eq!(context.actions(), DndAction::COPY | DndAction::MOVE);

        // An answer older than the drag start would be ignored; this one
        // matches.
        let leave = motif::Builder::new(motif::TOP_LEVEL_LEAVE).short(1, 0).long(1, 102).finish();
        dnd.handle_event(&motif_message(&mock, DEST, leave)).unwrap();
        assert!(matches!(dnd.poll_event(), Some(DndEvent::Leave { .. })));

        // The drag is gone; further motion is discarded.
        dnd.handle_event(&motif_message(&mock, DEST, motion)).unwrap();
        assert!(dnd.poll_event().is_none());
    }

    #[test]
    fn incoming_motif_operation_change_is_answered_in_kind() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        let drag_window = 0x700;
        mock.put_property32(ROOT, atoms._MOTIF_DRAG_WINDOW, AtomEnum::WINDOW.into(), vec![drag_window]);
        mock.put_property8(
            drag_window,
            atoms._MOTIF_DRAG_TARGETS,
            atoms._MOTIF_DRAG_TARGETS,
            motif::encode_target_table(&[vec![0x10, 0x20]]),
        );
        let selection = 0x888;
        mock.put_property8(
            FOREIGN_SOURCE,
            selection,
            atoms._MOTIF_DRAG_INITIATOR_INFO,
            motif::encode_initiator_info(0, selection).to_vec(),
        );

        let enter = motif::Builder::new(motif::TOP_LEVEL_ENTER)
            .short(1, 0)
            .long(1, 100)
            .long(2, FOREIGN_SOURCE)
            .long(3, selection)
            .finish();
        dnd.handle_event(&motif_message(&mock, DEST, enter)).unwrap();
        let Some(DndEvent::Enter { context, .. }) = dnd.poll_event() else {
            panic!("expected an enter event");
        };

        // The source switched operations mid-drag.
        let change = motif::Builder::new(motif::OPERATION_CHANGED)
            .short(1, motif::OP_MOVE | ((motif::OP_MOVE | motif::OP_COPY) << 4))
            .long(1, 101)
            .finish();
        dnd.handle_event(&motif_message(&mock, DEST, change)).unwrap();
        assert!(matches!(dnd.poll_event(), Some(DndEvent::Motion { .. })));
        assert_eq!(context.suggested_action(), DndAction::MOVE);
        assert_eq!(context.actions(), DndAction::MOVE | DndAction::COPY);

        // The answer to an operation change is an operation-changed reply,
        // not a motion reply.
        dnd.status(&context, DndAction::MOVE, 101).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].window, FOREIGN_SOURCE);
        let (reply, is_reply) = motif::decode(&sent[0].data.as_data8()).unwrap();
        assert!(is_reply);
        let motif::Message::OperationChanged { flags, .. } = reply else {
            panic!("expected an operation-changed reply");
        };
        assert_eq!(flags & 0x000f, motif::OP_MOVE);
        assert_eq!((flags & 0x00f0) >> 4, motif::DROP_SITE_VALID);

        // Answered; a later status is an ordinary motion reply again.
        dnd.status(&context, DndAction::MOVE, 102).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        let (reply, is_reply) = motif::decode(&sent[0].data.as_data8()).unwrap();
        assert!(is_reply);
        assert!(matches!(reply, motif::Message::DragMotion { .. }));
    }

    #[test]
    fn incoming_motif_drop_start_and_reply() {
        let mock = MockWindowing::new(ROOT);
        let atoms = *mock.atoms();
        let mut dnd = Dnd::new(mock.clone());
        dnd.register_window(DEST).unwrap();

        let drag_window = 0x700;
        mock.put_property32(ROOT, atoms._MOTIF_DRAG_WINDOW, AtomEnum::WINDOW.into(), vec![drag_window]);
        mock.put_property8(
            drag_window,
            atoms._MOTIF_DRAG_TARGETS,
            atoms._MOTIF_DRAG_TARGETS,
            motif::encode_target_table(&[vec![0x10, 0x20]]),
        );
        let selection = 0x888;
        mock.put_property8(
            FOREIGN_SOURCE,
            selection,
            atoms._MOTIF_DRAG_INITIATOR_INFO,
            motif::encode_initiator_info(0, selection).to_vec(),
        );

        let drop_start = motif::Builder::new(motif::DROP_START)
            .short(1, motif::OP_COPY | ((motif::OP_COPY | motif::OP_MOVE) << 4))
            .long(1, 200)
            .short(4, 70)
            .short(5, 80)
            .long(3, selection)
            .long(4, FOREIGN_SOURCE)
            .finish();
        dnd.handle_event(&motif_message(&mock, DEST, drop_start)).unwrap();
        let Some(DndEvent::DropStart { context, x_root, y_root, time }) = dnd.poll_event() else {
            panic!("expected a drop start");
        };
        assert_eq!((x_root, y_root, time), (70, 80, 200));
        assert_eq!(context.targets(), vec![0x10, 0x20]);
        assert_eq!(context.suggested_action(), DndAction::COPY);

        dnd.drop_reply(&context, true, 200).unwrap();
        let sent = mock.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].window, FOREIGN_SOURCE);
        let (reply, is_reply) = motif::decode(&sent[0].data.as_data8()).unwrap();
        assert!(is_reply);
        let motif::Message::DropStart { flags, .. } = reply else {
            panic!("expected a drop start reply");
        };
        assert_eq!(flags & 0x000f, motif::OP_COPY);
        assert_eq!((flags & 0x00f0) >> 4, motif::DROP_SITE_VALID);
    }

    #[test]
    fn motif_status_replies_update_the_source() {
        let mock = MockWindowing::new(ROOT);
        single_toplevel(&mock, DEST);
        motif_receiver(&mock, DEST);

        let mut dnd = Dnd::new(mock.clone());
        let context = dnd.begin(SOURCE, vec![0x10]);
        let (dest, protocol) = dnd.find_window(&context, None, 0, 10, 10).unwrap();
        dnd.motion(&context, dest, protocol, 10, 10, DndAction::COPY, DndAction::COPY, 1)
            .unwrap();

        // Site leave: no drop possible here.
        let leave = motif::Builder::new(motif::DROP_SITE_LEAVE | motif::REPLY_FLAG)
            .short(1, 0)
            .long(1, 2)
            .finish();
        dnd.handle_event(&motif_message(&mock, SOURCE, leave)).unwrap();
        assert_eq!(context.action(), DndAction::empty());

        // Site enter with a valid move.
        let enter = motif::Builder::new(motif::DROP_SITE_ENTER | motif::REPLY_FLAG)
            .short(1, motif::OP_MOVE | (motif::DROP_SITE_VALID << 4))
            .long(1, 3)
            .finish();
        dnd.handle_event(&motif_message(&mock, SOURCE, enter)).unwrap();
        assert_eq!(context.action(), DndAction::MOVE);
    }
}
