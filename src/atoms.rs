//! Interned atoms for the XDND and Motif drag-and-drop protocols.

use x11rb::atom_manager;

atom_manager! {
    /// Cache of all protocol atoms used by the drag-and-drop engine.
    pub Atoms:

    AtomsCookie {
        // XDND client messages
        XdndEnter,
        XdndPosition,
        XdndStatus,
        XdndLeave,
        XdndDrop,
        XdndFinished,

        // XDND properties
        XdndAware,
        XdndProxy,
        XdndTypeList,
        XdndActionList,
        XdndSelection,

        // XDND actions
        XdndActionCopy,
        XdndActionMove,
        XdndActionLink,
        XdndActionAsk,
        XdndActionPrivate,

        // Motif DND
        _MOTIF_DRAG_AND_DROP_MESSAGE,
        _MOTIF_DRAG_WINDOW,
        _MOTIF_DRAG_TARGETS,
        _MOTIF_DRAG_RECEIVER_INFO,
        _MOTIF_DRAG_INITIATOR_INFO,

        // Root window detection and hit-testing
        ENLIGHTENMENT_DESKTOP,
        WM_STATE,

        // Targets accepted for drops on the desktop. XDND specifies
        // x-rootwindow-drop, but x-rootwin-drop is widespread legacy.
        XRootwindowDrop: b"application/x-rootwindow-drop",
        XRootwinDrop: b"application/x-rootwin-drop",
    }
}
