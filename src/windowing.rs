//! The seam between the protocol engine and the windowing system.
//!
//! Everything the drag-and-drop engine needs from X11 goes through the
//! [`Windowing`] trait: property access, client-message delivery, window tree
//! queries and server grabs. The production implementation lives in
//! [`crate::x11`]; tests drive the engine through a recording mock instead of
//! a live display.

use thiserror::Error;
use x11rb::errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError};
use x11rb::protocol::xproto::{Atom, ClientMessageEvent, EventMask, Window};

use crate::atoms::Atoms;

/// A fatal windowing-system error.
///
/// Transient races (a peer window destroyed while we query it) are *not*
/// errors: property reads return `Ok(None)` for them. Only a broken
/// connection or an unexpected protocol failure surfaces here.
#[derive(Debug, Error)]
pub enum DndError {
    /// The connection to the X server failed.
    #[error("connection to the X server failed: {0}")]
    Connection(#[from] ConnectionError),
    /// A display connection could not be opened.
    #[error("could not open a display connection: {0}")]
    Connect(#[from] ConnectError),
    /// An X request failed in a way that is not a destroyed-window race.
    #[error("X request failed: {0}")]
    X11(#[from] ReplyError),
}

impl From<ReplyOrIdError> for DndError {
    fn from(err: ReplyOrIdError) -> Self {
        match err {
            ReplyOrIdError::ConnectionError(err) => DndError::Connection(err),
            ReplyOrIdError::X11Error(err) => DndError::X11(ReplyError::X11Error(err)),
            ReplyOrIdError::IdsExhausted => {
                DndError::Connection(ConnectionError::UnknownError)
            }
        }
    }
}

/// A client message could not be delivered, meaning the peer is gone.
///
/// The engine reacts by unwinding the affected drag context to "no
/// destination" instead of waiting for a reply that will never come.
#[derive(Debug, Error)]
#[error("could not deliver client message to window {0:#x}")]
pub struct SendError(pub Window);

/// An axis-aligned rectangle in window-relative coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    /// Left edge.
    pub x: i16,
    /// Top edge.
    pub y: i16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
}

impl Rect {
    /// Whether the point lies inside the rectangle.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= i32::from(self.x)
            && x < i32::from(self.x) + i32::from(self.width)
            && y >= i32::from(self.y)
            && y < i32::from(self.y) + i32::from(self.height)
    }

    fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (i32::from(self.x) + i32::from(self.width))
            .min(i32::from(other.x) + i32::from(other.width));
        let y2 = (i32::from(self.y) + i32::from(self.height))
            .min(i32::from(other.y) + i32::from(other.height));
        if i32::from(x1) < x2 && i32::from(y1) < y2 {
            Some(Rect {
                x: x1,
                y: y1,
                width: (x2 - i32::from(x1)) as u16,
                height: (y2 - i32::from(y1)) as u16,
            })
        } else {
            None
        }
    }
}

/// A clip region: the union of a set of rectangles.
///
/// Used for the X shape extension's bounding and input shapes during
/// hit-testing of irregularly shaped windows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Region(Vec<Rect>);

impl Region {
    /// Builds a region from rectangles.
    pub fn new(rects: impl Into<Vec<Rect>>) -> Region {
        Region(rects.into())
    }

    /// Whether the point lies inside any rectangle of the region.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        self.0.iter().any(|r| r.contains(x, y))
    }

    /// Intersects two regions pairwise.
    pub fn intersect(&self, other: &Region) -> Region {
        let mut rects = Vec::new();
        for a in &self.0 {
            for b in &other.0 {
                if let Some(r) = a.intersect(b) {
                    rects.push(r);
                }
            }
        }
        Region(rects)
    }
}

/// Geometry and state of one child window, as returned by [`Windowing::child_info`].
#[derive(Debug, Clone, Copy)]
pub struct ChildInfo {
    /// The child window id.
    pub window: Window,
    /// X position relative to the parent.
    pub x: i16,
    /// Y position relative to the parent.
    pub y: i16,
    /// Width in pixels.
    pub width: u16,
    /// Height in pixels.
    pub height: u16,
    /// Whether the window is viewable.
    pub mapped: bool,
    /// Whether the window is input-output (as opposed to input-only).
    pub input_output: bool,
    /// Whether the window carries a `WM_STATE` property, marking it as a
    /// window-manager-managed client window.
    pub has_wm_state: bool,
}

/// Result of a window tree query.
#[derive(Debug, Clone, Default)]
pub struct ChildQuery {
    /// Whether the queried window itself carries `WM_STATE` (only filled in
    /// when requested).
    pub has_wm_state: bool,
    /// The children in bottom-to-top stacking order.
    pub children: Vec<ChildInfo>,
}

/// The windowing layer the drag-and-drop engine runs against.
///
/// All query methods are error-trapped: a window destroyed concurrently with
/// the query yields `Ok(None)` rather than an error.
pub trait Windowing {
    /// The interned protocol atoms for this connection.
    fn atoms(&self) -> &Atoms;

    /// Number of screens on the display.
    fn screen_count(&self) -> usize;

    /// The root window of a screen.
    fn root_window(&self, screen: usize) -> Window;

    /// Whether this client may query windows belonging to other clients.
    ///
    /// Untrusted clients (e.g. under X11 security extension restrictions)
    /// cannot enumerate foreign windows and fall back to hit-testing only
    /// their own top-levels.
    fn trusted(&self) -> bool;

    /// Delivers a client message to `dest`, flushing the connection.
    ///
    /// `event_mask` is normally empty; drops on the root window are sent
    /// with `BUTTON_PRESS` so desktop applications listening there see
    /// them.
    fn send_client_message(
        &self,
        dest: Window,
        event_mask: EventMask,
        event: ClientMessageEvent,
    ) -> Result<(), SendError>;

    /// Reads a format-32 property. `Ok(None)` if absent, of the wrong
    /// format, or the window is gone.
    fn get_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u32>>, DndError>;

    /// Reads a format-8 property. `Ok(None)` if absent, of the wrong format,
    /// or the window is gone.
    fn get_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u8>>, DndError>;

    /// Replaces a format-32 property.
    fn set_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<(), DndError>;

    /// Replaces a format-8 property.
    fn set_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<(), DndError>;

    /// Deletes a property.
    fn delete_property(&self, window: Window, property: Atom) -> Result<(), DndError>;

    /// The current owner of a selection, if any.
    fn selection_owner(&self, selection: Atom) -> Result<Option<Window>, DndError>;

    /// Interns an atom by name.
    fn intern_atom(&self, name: &str) -> Result<Atom, DndError>;

    /// Root-relative geometry of a window, `Ok(None)` if it is gone.
    fn geometry(&self, window: Window) -> Result<Option<Rect>, DndError>;

    /// Queries the children of `window` (bottom-to-top), optionally checking
    /// `window` itself for `WM_STATE`. `Ok(None)` if the window is gone.
    fn child_info(
        &self,
        window: Window,
        query_wm_state: bool,
    ) -> Result<Option<ChildQuery>, DndError>;

    /// Adds `SubstructureNotify` to the event mask of a root window.
    fn select_substructure(&self, root: Window) -> Result<(), DndError>;

    /// Removes `SubstructureNotify` from the event mask of a root window.
    fn unselect_substructure(&self, root: Window) -> Result<(), DndError>;

    /// Subscribes to shape-change notifications for a window.
    fn select_shape_events(&self, window: Window) -> Result<(), DndError>;

    /// Subscribes to property-change notifications for a window.
    fn select_property_events(&self, window: Window) -> Result<(), DndError>;

    /// The effective clip region of a window (bounding shape intersected
    /// with input shape), window-relative. `Ok(None)` means the window is
    /// unshaped and its whole bounding box accepts input.
    fn shape_region(&self, window: Window) -> Result<Option<Region>, DndError>;

    /// Grabs the X server. Paired with [`Windowing::ungrab_server`], usually
    /// through a scope guard.
    fn grab_server(&self) -> Result<(), DndError>;

    /// Releases a server grab.
    fn ungrab_server(&self) -> Result<(), DndError>;

    /// Creates the persistent, close-down-surviving window that anchors the
    /// process-shared Motif drag state on the display.
    fn create_persistent_window(&self) -> Result<Window, DndError>;
}
