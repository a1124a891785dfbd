//! Live X11 implementation of [`Windowing`], plus calloop integration.
//!
//! All queries that touch windows of other clients use unchecked replies:
//! a window destroyed mid-query is an everyday race during a drag, not an
//! error, and surfaces as `Ok(None)`.

use std::sync::Arc;
use std::thread::{spawn, JoinHandle};

use calloop::channel::{sync_channel, Channel, ChannelError, Event as ChannelEvent, SyncSender};
use calloop::{EventSource, Poll, PostAction, Readiness, Token, TokenFactory};
use tracing::{debug, warn};
use x11rb::connection::Connection as _;
use x11rb::protocol::shape::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{
    Atom, AtomEnum, ChangeWindowAttributesAux, ClientMessageEvent, CloseDown, ConnectionExt as _,
    CreateWindowAux, EventMask, MapState, PropMode, Window, WindowClass, CLIENT_MESSAGE_EVENT,
};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;
use x11rb::wrapper::ConnectionExt as _;

use crate::atoms::Atoms;
use crate::windowing::{ChildInfo, ChildQuery, DndError, Rect, Region, SendError, Windowing};

/// [`Windowing`] over an x11rb [`RustConnection`].
#[derive(Debug)]
pub struct X11Backend {
    connection: Arc<RustConnection>,
    atoms: Atoms,
    roots: Vec<Window>,
    trusted: bool,
}

impl X11Backend {
    /// Wraps an existing connection, interning the protocol atoms.
    pub fn new(connection: Arc<RustConnection>) -> Result<X11Backend, DndError> {
        let atoms = Atoms::new(&*connection)?.reply()?;
        let roots = connection.setup().roots.iter().map(|screen| screen.root).collect();
        Ok(X11Backend { connection, atoms, roots, trusted: true })
    }

    /// Marks the client as untrusted (running under X11 security extension
    /// restrictions), limiting hit-testing to its own windows.
    pub fn untrusted(mut self) -> X11Backend {
        self.trusted = false;
        self
    }

    /// The underlying connection.
    pub fn connection(&self) -> &Arc<RustConnection> {
        &self.connection
    }

    fn merge_event_mask(&self, window: Window, mask: EventMask, add: bool) -> Result<(), DndError> {
        let Some(attrs) = self.connection.get_window_attributes(window)?.reply_unchecked()? else {
            return Ok(());
        };
        let current = attrs.your_event_mask;
        let new = if add {
            current | mask
        } else {
            EventMask::from(u32::from(current) & !u32::from(mask))
        };
        if new != current {
            self.connection
                .change_window_attributes(window, &ChangeWindowAttributesAux::new().event_mask(new))?;
            self.connection.flush()?;
        }
        Ok(())
    }
}

fn to_region(reply: shape::GetRectanglesReply) -> Region {
    Region::new(
        reply
            .rectangles
            .iter()
            .map(|r| Rect { x: r.x, y: r.y, width: r.width, height: r.height })
            .collect::<Vec<_>>(),
    )
}

impl Windowing for X11Backend {
    fn atoms(&self) -> &Atoms {
        &self.atoms
    }

    fn screen_count(&self) -> usize {
        self.roots.len()
    }

    fn root_window(&self, screen: usize) -> Window {
        self.roots[screen]
    }

    fn trusted(&self) -> bool {
        self.trusted
    }

    fn send_client_message(
        &self,
        dest: Window,
        event_mask: EventMask,
        event: ClientMessageEvent,
    ) -> Result<(), SendError> {
        let sent = self
            .connection
            .send_event(false, dest, event_mask, event)
            .and_then(|cookie| {
                self.connection.flush()?;
                Ok(cookie)
            });
        match sent {
            // The round trip turns a BadWindow on a vanished peer into an
            // immediate delivery failure.
            Ok(cookie) => cookie.check().map_err(|_| SendError(dest)),
            Err(_) => Err(SendError(dest)),
        }
    }

    fn get_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u32>>, DndError> {
        let Some(reply) = self
            .connection
            .get_property(false, window, property, type_, 0, u32::MAX)?
            .reply_unchecked()?
        else {
            return Ok(None);
        };
        if reply.format != 32 || reply.type_ != type_ {
            return Ok(None);
        }
        Ok(reply.value32().map(|values| values.collect()))
    }

    fn get_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u8>>, DndError> {
        let Some(reply) = self
            .connection
            .get_property(false, window, property, type_, 0, u32::MAX)?
            .reply_unchecked()?
        else {
            return Ok(None);
        };
        if reply.format != 8 || reply.type_ != type_ {
            return Ok(None);
        }
        Ok(Some(reply.value))
    }

    fn set_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<(), DndError> {
        self.connection
            .change_property32(PropMode::REPLACE, window, property, type_, data)?;
        self.connection.flush()?;
        Ok(())
    }

    fn set_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<(), DndError> {
        self.connection
            .change_property8(PropMode::REPLACE, window, property, type_, data)?;
        self.connection.flush()?;
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), DndError> {
        self.connection.delete_property(window, property)?;
        self.connection.flush()?;
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Option<Window>, DndError> {
        let reply = self.connection.get_selection_owner(selection)?.reply()?;
        Ok((reply.owner != x11rb::NONE).then_some(reply.owner))
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, DndError> {
        Ok(self.connection.intern_atom(false, name.as_bytes())?.reply()?.atom)
    }

    fn geometry(&self, window: Window) -> Result<Option<Rect>, DndError> {
        let Some(geometry) = self.connection.get_geometry(window)?.reply_unchecked()? else {
            return Ok(None);
        };
        let Some(coords) = self
            .connection
            .translate_coordinates(window, geometry.root, 0, 0)?
            .reply_unchecked()?
        else {
            return Ok(None);
        };
        Ok(Some(Rect {
            x: coords.dst_x,
            y: coords.dst_y,
            width: geometry.width,
            height: geometry.height,
        }))
    }

    fn child_info(
        &self,
        window: Window,
        query_wm_state: bool,
    ) -> Result<Option<ChildQuery>, DndError> {
        let Some(tree) = self.connection.query_tree(window)?.reply_unchecked()? else {
            return Ok(None);
        };

        let mut query = ChildQuery::default();
        if query_wm_state {
            query.has_wm_state = self
                .connection
                .get_property(false, window, self.atoms.WM_STATE, AtomEnum::ANY, 0, 0)?
                .reply_unchecked()?
                .is_some_and(|reply| reply.type_ != x11rb::NONE);
        }

        // Pipeline one batch of requests per child, then collect.
        let mut cookies = Vec::with_capacity(tree.children.len());
        for &child in &tree.children {
            cookies.push((
                child,
                self.connection.get_window_attributes(child)?,
                self.connection.get_geometry(child)?,
                self.connection
                    .get_property(false, child, self.atoms.WM_STATE, AtomEnum::ANY, 0, 0)?,
            ));
        }
        for (child, attrs, geometry, wm_state) in cookies {
            let (Some(attrs), Some(geometry), Some(wm_state)) = (
                attrs.reply_unchecked()?,
                geometry.reply_unchecked()?,
                wm_state.reply_unchecked()?,
            ) else {
                // The child vanished while we queried it.
                continue;
            };
            query.children.push(ChildInfo {
                window: child,
                x: geometry.x,
                y: geometry.y,
                width: geometry.width,
                height: geometry.height,
                mapped: attrs.map_state == MapState::VIEWABLE,
                input_output: attrs.class != WindowClass::INPUT_ONLY,
                has_wm_state: wm_state.type_ != x11rb::NONE,
            });
        }

        Ok(Some(query))
    }

    fn select_substructure(&self, root: Window) -> Result<(), DndError> {
        self.merge_event_mask(root, EventMask::SUBSTRUCTURE_NOTIFY, true)
    }

    fn unselect_substructure(&self, root: Window) -> Result<(), DndError> {
        self.merge_event_mask(root, EventMask::SUBSTRUCTURE_NOTIFY, false)
    }

    fn select_shape_events(&self, window: Window) -> Result<(), DndError> {
        self.connection.shape_select_input(window, true)?;
        self.connection.flush()?;
        Ok(())
    }

    fn select_property_events(&self, window: Window) -> Result<(), DndError> {
        self.merge_event_mask(window, EventMask::PROPERTY_CHANGE, true)
    }

    fn shape_region(&self, window: Window) -> Result<Option<Region>, DndError> {
        let bounding = self
            .connection
            .shape_get_rectangles(window, shape::SK::BOUNDING)?
            .reply_unchecked()?;
        let input = self
            .connection
            .shape_get_rectangles(window, shape::SK::INPUT)?
            .reply_unchecked()?;
        Ok(match (bounding, input) {
            (Some(bounding), Some(input)) => Some(to_region(bounding).intersect(&to_region(input))),
            (Some(bounding), None) => Some(to_region(bounding)),
            (None, Some(input)) => Some(to_region(input)),
            (None, None) => None,
        })
    }

    fn grab_server(&self) -> Result<(), DndError> {
        self.connection.grab_server()?;
        self.connection.flush()?;
        Ok(())
    }

    fn ungrab_server(&self) -> Result<(), DndError> {
        self.connection.ungrab_server()?;
        self.connection.flush()?;
        Ok(())
    }

    fn create_persistent_window(&self) -> Result<Window, DndError> {
        // The window anchors display-wide state, so it must outlive this
        // client: it is created on a throwaway connection whose resources
        // are retained permanently.
        let (persist, _) = RustConnection::connect(None)?;
        persist.set_close_down_mode(CloseDown::RETAIN_PERMANENT)?;
        persist.grab_server()?;

        // Another client may have won the race before our grab.
        let root = self.roots[0];
        let existing = persist
            .get_property(
                false,
                root,
                self.atoms._MOTIF_DRAG_WINDOW,
                AtomEnum::WINDOW,
                0,
                1,
            )?
            .reply_unchecked()?
            .and_then(|reply| reply.value32().and_then(|mut v| v.next()));

        let window = match existing {
            Some(window) => window,
            None => {
                let window = persist.generate_id()?;
                persist.create_window(
                    0,
                    window,
                    root,
                    -100,
                    -100,
                    10,
                    10,
                    0,
                    WindowClass::INPUT_ONLY,
                    0,
                    &CreateWindowAux::new()
                        .override_redirect(1)
                        .event_mask(EventMask::PROPERTY_CHANGE),
                )?;
                persist.change_property32(
                    PropMode::REPLACE,
                    root,
                    self.atoms._MOTIF_DRAG_WINDOW,
                    AtomEnum::WINDOW,
                    &[window],
                )?;
                debug!(window, "published the shared Motif drag window");
                window
            }
        };

        persist.ungrab_server()?;
        persist.flush()?;
        Ok(window)
    }
}

/// Integration of an x11rb X11 connection with calloop.
///
/// This is a thin wrapper around `Channel`. It works by spawning an extra
/// thread that reads events from the X11 connection and sends them across
/// the channel; readability of the underlying socket alone cannot signal
/// events that x11rb already buffered internally.
#[derive(Debug)]
pub struct X11Source {
    connection: Arc<RustConnection>,
    channel: Option<Channel<Event>>,
    event_thread: Option<JoinHandle<()>>,
    close_window: Window,
    close_type: Atom,
}

impl X11Source {
    /// Create a new X11 source.
    ///
    /// The returned instance will use `SendEvent` to cause a
    /// `ClientMessageEvent` to be sent to the given window with the given
    /// type. The expectation is that this is a window that was created by
    /// us. Thus, the event reading thread will wake up, notice the closed
    /// channel, and exit.
    pub fn new(connection: Arc<RustConnection>, close_window: Window, close_type: Atom) -> X11Source {
        let (sender, channel) = sync_channel(5);
        let conn = Arc::clone(&connection);
        let event_thread = Some(spawn(move || {
            run_event_thread(conn, sender);
        }));

        X11Source {
            connection,
            channel: Some(channel),
            event_thread,
            close_window,
            close_type,
        }
    }
}

impl Drop for X11Source {
    fn drop(&mut self) {
        // Signal the worker thread to exit by dropping the read end of the
        // channel.
        self.channel.take();

        // Send an event to wake up the worker so that it actually exits.
        let event = ClientMessageEvent {
            response_type: CLIENT_MESSAGE_EVENT,
            format: 8,
            sequence: 0,
            window: self.close_window,
            type_: self.close_type,
            data: [0; 20].into(),
        };
        let _ = self
            .connection
            .send_event(false, self.close_window, EventMask::NO_EVENT, event);
        let _ = self.connection.flush();

        // Wait for the worker thread to exit.
        if let Some(handle) = self.event_thread.take() {
            let _ = handle.join();
        }
    }
}

impl EventSource for X11Source {
    type Event = Event;
    type Metadata = ();
    type Ret = ();
    type Error = ChannelError;

    fn process_events<C>(
        &mut self,
        readiness: Readiness,
        token: Token,
        mut callback: C,
    ) -> Result<PostAction, ChannelError>
    where
        C: FnMut(Self::Event, &mut Self::Metadata) -> Self::Ret,
    {
        if let Some(channel) = &mut self.channel {
            channel.process_events(readiness, token, move |event, meta| match event {
                ChannelEvent::Closed => warn!("X11 event thread exited"),
                ChannelEvent::Msg(event) => callback(event, meta),
            })
        } else {
            Ok(PostAction::Remove)
        }
    }

    fn register(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        if let Some(channel) = &mut self.channel {
            channel.register(poll, factory)?;
        }
        Ok(())
    }

    fn reregister(&mut self, poll: &mut Poll, factory: &mut TokenFactory) -> calloop::Result<()> {
        if let Some(channel) = &mut self.channel {
            channel.reregister(poll, factory)?;
        }
        Ok(())
    }

    fn unregister(&mut self, poll: &mut Poll) -> calloop::Result<()> {
        if let Some(channel) = &mut self.channel {
            channel.unregister(poll)?;
        }
        Ok(())
    }
}

/// Reads X11 events from the connection and forwards them on the channel.
///
/// This runs in an extra thread since sending an X11 request or waiting
/// for a reply can both read events from the underlying socket, which are
/// then buffered inside the `RustConnection`. Readability of the socket is
/// therefore not enough to guarantee we do not miss wakeups; only
/// `wait_for_event` is.
fn run_event_thread(connection: Arc<RustConnection>, sender: SyncSender<Event>) {
    loop {
        let event = match connection.wait_for_event() {
            Ok(event) => event,
            Err(err) => {
                // Connection errors are most likely permanent.
                warn!(%err, "X11 event thread exiting on connection error");
                break;
            }
        };
        if sender.send(event).is_err() {
            // The other end of the channel was dropped in X11Source::drop.
            break;
        }
    }
}
