//! In-memory [`Windowing`] implementation for tests.
//!
//! Records every client message the engine sends and serves properties,
//! window trees and shapes from hash maps, so protocol behavior can be
//! tested without a display.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use x11rb::protocol::xproto::{Atom, AtomEnum, ClientMessageEvent, EventMask, Window};

use crate::atoms::Atoms;
use crate::windowing::{ChildQuery, DndError, Rect, Region, SendError, Windowing};

/// Routes engine logs to the test output, filtered by `RUST_LOG`.
///
/// Repeat calls are fine; only the first subscriber wins.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Atoms with fixed test values, one distinct atom per entry.
pub fn test_atoms() -> Atoms {
    Atoms {
        XdndEnter: 100,
        XdndPosition: 101,
        XdndStatus: 102,
        XdndLeave: 103,
        XdndDrop: 104,
        XdndFinished: 105,
        XdndAware: 106,
        XdndProxy: 107,
        XdndTypeList: 108,
        XdndActionList: 109,
        XdndSelection: 110,
        XdndActionCopy: 111,
        XdndActionMove: 112,
        XdndActionLink: 113,
        XdndActionAsk: 114,
        XdndActionPrivate: 115,
        _MOTIF_DRAG_AND_DROP_MESSAGE: 116,
        _MOTIF_DRAG_WINDOW: 117,
        _MOTIF_DRAG_TARGETS: 118,
        _MOTIF_DRAG_RECEIVER_INFO: 119,
        _MOTIF_DRAG_INITIATOR_INFO: 120,
        ENLIGHTENMENT_DESKTOP: 121,
        WM_STATE: 122,
        XRootwindowDrop: 123,
        XRootwinDrop: 124,
    }
}

#[derive(Debug, Clone)]
enum PropValue {
    Words(Vec<u32>),
    Bytes(Vec<u8>),
}

#[derive(Debug, Default)]
struct MockState {
    properties: HashMap<(Window, Atom), (Atom, PropValue)>,
    sent: Vec<ClientMessageEvent>,
    fail_sends: HashSet<Window>,
    trees: HashMap<Window, ChildQuery>,
    geometries: HashMap<Window, Rect>,
    shapes: HashMap<Window, Region>,
    selection_owners: HashMap<Atom, Window>,
    interned: HashMap<String, Atom>,
    next_atom: Atom,
    shape_selected: HashSet<Window>,
    property_selected: HashSet<Window>,
    substructure_selected: HashSet<Window>,
    grab_depth: i32,
    grab_count: u32,
    next_window: Window,
}

/// Fake windowing system; cloning shares the underlying state.
#[derive(Debug, Clone)]
pub struct MockWindowing {
    atoms: Atoms,
    roots: Vec<Window>,
    trusted: bool,
    state: Rc<RefCell<MockState>>,
}

impl MockWindowing {
    /// One screen with the given root window.
    pub fn new(root: Window) -> MockWindowing {
        init_logging();
        MockWindowing {
            atoms: test_atoms(),
            roots: vec![root],
            trusted: true,
            state: Rc::new(RefCell::new(MockState {
                next_atom: 0x800,
                next_window: 0x70_0000,
                ..MockState::default()
            })),
        }
    }

    /// Marks the client untrusted.
    pub fn untrusted(mut self) -> MockWindowing {
        self.trusted = false;
        self
    }

    pub fn put_property32(&self, window: Window, property: Atom, type_: Atom, data: Vec<u32>) {
        self.state
            .borrow_mut()
            .properties
            .insert((window, property), (type_, PropValue::Words(data)));
    }

    pub fn put_property8(&self, window: Window, property: Atom, type_: Atom, data: Vec<u8>) {
        self.state
            .borrow_mut()
            .properties
            .insert((window, property), (type_, PropValue::Bytes(data)));
    }

    pub fn property32(&self, window: Window, property: Atom) -> Option<Vec<u32>> {
        match self.state.borrow().properties.get(&(window, property)) {
            Some((_, PropValue::Words(data))) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn property8(&self, window: Window, property: Atom) -> Option<Vec<u8>> {
        match self.state.borrow().properties.get(&(window, property)) {
            Some((_, PropValue::Bytes(data))) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn set_tree(&self, window: Window, query: ChildQuery) {
        self.state.borrow_mut().trees.insert(window, query);
    }

    pub fn set_geometry(&self, window: Window, rect: Rect) {
        self.state.borrow_mut().geometries.insert(window, rect);
    }

    pub fn set_shape(&self, window: Window, region: Region) {
        self.state.borrow_mut().shapes.insert(window, region);
    }

    pub fn set_selection_owner(&self, selection: Atom, owner: Window) {
        self.state.borrow_mut().selection_owners.insert(selection, owner);
    }

    /// Makes every send to `window` fail, as if the window were destroyed.
    pub fn fail_send(&self, window: Window) {
        self.state.borrow_mut().fail_sends.insert(window);
    }

    /// All client messages sent so far, in order.
    pub fn sent(&self) -> Vec<ClientMessageEvent> {
        self.state.borrow().sent.clone()
    }

    /// Drains the sent-message log.
    pub fn take_sent(&self) -> Vec<ClientMessageEvent> {
        std::mem::take(&mut self.state.borrow_mut().sent)
    }

    pub fn shape_selected(&self, window: Window) -> bool {
        self.state.borrow().shape_selected.contains(&window)
    }

    pub fn property_selected(&self, window: Window) -> bool {
        self.state.borrow().property_selected.contains(&window)
    }

    pub fn substructure_selected(&self, window: Window) -> bool {
        self.state.borrow().substructure_selected.contains(&window)
    }

    /// How often the server was grabbed, and whether every grab was
    /// released.
    pub fn grabs(&self) -> (u32, bool) {
        let state = self.state.borrow();
        (state.grab_count, state.grab_depth == 0)
    }
}

impl Windowing for MockWindowing {
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
        _event_mask: EventMask,
        event: ClientMessageEvent,
    ) -> Result<(), SendError> {
        let mut state = self.state.borrow_mut();
        if state.fail_sends.contains(&dest) {
            return Err(SendError(dest));
        }
        state.sent.push(event);
        Ok(())
    }

    fn get_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u32>>, DndError> {
        Ok(match self.state.borrow().properties.get(&(window, property)) {
            Some((t, PropValue::Words(data))) if *t == type_ => Some(data.clone()),
            _ => None,
        })
    }

    fn get_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
    ) -> Result<Option<Vec<u8>>, DndError> {
        Ok(match self.state.borrow().properties.get(&(window, property)) {
            Some((t, PropValue::Bytes(data))) if *t == type_ => Some(data.clone()),
            _ => None,
        })
    }

    fn set_property32(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u32],
    ) -> Result<(), DndError> {
        self.put_property32(window, property, type_, data.to_vec());
        Ok(())
    }

    fn set_property8(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        data: &[u8],
    ) -> Result<(), DndError> {
        self.put_property8(window, property, type_, data.to_vec());
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), DndError> {
        self.state.borrow_mut().properties.remove(&(window, property));
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Option<Window>, DndError> {
        Ok(self.state.borrow().selection_owners.get(&selection).copied())
    }

    fn intern_atom(&self, name: &str) -> Result<Atom, DndError> {
        let mut state = self.state.borrow_mut();
        if let Some(&atom) = state.interned.get(name) {
            return Ok(atom);
        }
        let atom = state.next_atom;
        state.next_atom += 1;
        state.interned.insert(name.to_owned(), atom);
        Ok(atom)
    }

    fn geometry(&self, window: Window) -> Result<Option<Rect>, DndError> {
        Ok(self.state.borrow().geometries.get(&window).copied())
    }

    fn child_info(
        &self,
        window: Window,
        query_wm_state: bool,
    ) -> Result<Option<ChildQuery>, DndError> {
        let state = self.state.borrow();
        let Some(query) = state.trees.get(&window) else {
            return Ok(None);
        };
        let mut query = query.clone();
        if !query_wm_state {
            query.has_wm_state = false;
        }
        Ok(Some(query))
    }

    fn select_substructure(&self, root: Window) -> Result<(), DndError> {
        self.state.borrow_mut().substructure_selected.insert(root);
        Ok(())
    }

    fn unselect_substructure(&self, root: Window) -> Result<(), DndError> {
        self.state.borrow_mut().substructure_selected.remove(&root);
        Ok(())
    }

    fn select_shape_events(&self, window: Window) -> Result<(), DndError> {
        self.state.borrow_mut().shape_selected.insert(window);
        Ok(())
    }

    fn select_property_events(&self, window: Window) -> Result<(), DndError> {
        self.state.borrow_mut().property_selected.insert(window);
        Ok(())
    }

    fn shape_region(&self, window: Window) -> Result<Option<Region>, DndError> {
        Ok(self.state.borrow().shapes.get(&window).cloned())
    }

    fn grab_server(&self) -> Result<(), DndError> {
        let mut state = self.state.borrow_mut();
        state.grab_depth += 1;
        state.grab_count += 1;
        Ok(())
    }

    fn ungrab_server(&self) -> Result<(), DndError> {
        self.state.borrow_mut().grab_depth -= 1;
        Ok(())
    }

    fn create_persistent_window(&self) -> Result<Window, DndError> {
        let root = self.roots[0];
        let window = {
            let mut state = self.state.borrow_mut();
            let window = state.next_window;
            state.next_window += 1;
            window
        };
        self.put_property32(
            root,
            self.atoms._MOTIF_DRAG_WINDOW,
            AtomEnum::WINDOW.into(),
            vec![window],
        );
        Ok(window)
    }
}
