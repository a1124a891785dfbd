#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#![allow(clippy::upper_case_acronyms)]

//! # xdnd: X11 drag-and-drop negotiation
//!
//! This crate implements the negotiation side of drag and drop on X11:
//! finding the destination under the pointer during a drag, detecting
//! which protocol it speaks, and driving the message exchange of both the
//! [XDND protocol] and the dynamic Motif drag protocol, on the source and
//! on the destination side. Everything up to the actual data transfer is
//! covered; fetching the data itself is an ordinary selection conversion
//! against [`DragContext::selection`] and is left to the application.
//!
//! ## Structure of the crate
//!
//! - [`Dnd`] is the engine: it owns all drag state for one connection and
//!   exposes the operations a toolkit needs (`begin`, `find_window`,
//!   `motion`, `drop` on the source side; `status`, `drop_reply`,
//!   `drop_finished` on the destination side).
//! - [`Windowing`](windowing::Windowing) is the seam to the display
//!   server. The production implementation over an x11rb connection is
//!   [`X11Backend`]; tests drive the engine through an in-memory mock.
//! - [`X11Source`] adapts the connection to [`calloop`], so the engine
//!   can be driven from a callback-oriented event loop.
//!
//! ## The event flow
//!
//! The application feeds every X event into [`Dnd::handle_event`] and
//! drains [`DndEvent`]s from [`Dnd::poll_event`]. Client messages drive
//! the protocol state machines; `SubstructureNotify` and shape events
//! keep the per-screen window cache current so hit-testing during a drag
//! never round-trips to the server.
//!
//! Both protocols allow only one outstanding position per destination.
//! While a reply is pending, [`Dnd::motion`] absorbs further motion and
//! returns `true`; the matching [`DndEvent::Status`] unblocks the caller.
//!
//! ## Logging
//!
//! This crate uses [`tracing`] for its internal logging.
//!
//! [XDND protocol]: https://freedesktop.org/wiki/Specifications/XDND/

pub mod action;
pub mod atoms;
mod cache;
mod context;
mod detect;
mod engine;
mod events;
pub mod motif;
pub mod windowing;
pub mod x11;
pub mod xdnd;

#[cfg(test)]
pub(crate) mod mock;

pub use crate::action::DndAction;
pub use crate::atoms::Atoms;
pub use crate::context::{DragContext, DragStatus};
pub use crate::detect::Protocol;
pub use crate::engine::Dnd;
pub use crate::events::DndEvent;
pub use crate::windowing::{DndError, SendError, Windowing};
pub use crate::x11::{X11Backend, X11Source};
