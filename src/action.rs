//! Drag actions and their protocol encodings.

use bitflags::bitflags;
use smallvec::SmallVec;
use x11rb::protocol::xproto::{Atom, AtomEnum};

use crate::atoms::Atoms;
use crate::motif;

bitflags! {
    /// The operations a drag source offers, or a destination accepts.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DndAction: u32 {
        /// Copy the data to the destination.
        const COPY = 1 << 0;
        /// Move the data; the source deletes its copy afterwards.
        const MOVE = 1 << 1;
        /// Create a link to the data.
        const LINK = 1 << 2;
        /// Ask the user which action to take.
        const ASK = 1 << 3;
        /// An application-private action. Treated like a copy on the wire.
        const PRIVATE = 1 << 4;
    }
}

impl DndAction {
    /// Decodes an `XdndAction*` atom. Unknown atoms decode to the empty set.
    pub fn from_atom(atom: Atom, atoms: &Atoms) -> DndAction {
        match atom {
            x if x == atoms.XdndActionCopy => DndAction::COPY,
            x if x == atoms.XdndActionMove => DndAction::MOVE,
            x if x == atoms.XdndActionLink => DndAction::LINK,
            x if x == atoms.XdndActionAsk => DndAction::ASK,
            // XdndActionPrivate means "copy, and don't tell anyone".
            x if x == atoms.XdndActionPrivate => DndAction::COPY,
            _ => DndAction::empty(),
        }
    }

    /// Encodes a single action as its `XdndAction*` atom.
    ///
    /// Only exact single-action values map to an atom; the empty set (and
    /// any combination) encodes as `None`, matching how a rejecting
    /// `XdndStatus` carries no action.
    pub fn to_atom(self, atoms: &Atoms) -> Atom {
        if self == DndAction::COPY {
            atoms.XdndActionCopy
        } else if self == DndAction::MOVE {
            atoms.XdndActionMove
        } else if self == DndAction::LINK {
            atoms.XdndActionLink
        } else if self == DndAction::ASK {
            atoms.XdndActionAsk
        } else if self == DndAction::PRIVATE {
            atoms.XdndActionPrivate
        } else {
            AtomEnum::NONE.into()
        }
    }

    /// Every atom representing an action in this set, for `XdndActionList`.
    pub fn to_atom_list(self, atoms: &Atoms) -> SmallVec<[Atom; 5]> {
        [
            (DndAction::COPY, atoms.XdndActionCopy),
            (DndAction::MOVE, atoms.XdndActionMove),
            (DndAction::LINK, atoms.XdndActionLink),
            (DndAction::ASK, atoms.XdndActionAsk),
            (DndAction::PRIVATE, atoms.XdndActionPrivate),
        ]
        .iter()
        .filter(|(action, _)| self.contains(*action))
        .map(|&(_, atom)| atom)
        .collect()
    }

    /// Encodes the preferred action as a Motif operation code.
    pub fn to_motif_op(self) -> u16 {
        if self.contains(DndAction::MOVE) {
            motif::OP_MOVE
        } else if self.contains(DndAction::COPY) {
            motif::OP_COPY
        } else if self.contains(DndAction::LINK) {
            motif::OP_LINK
        } else {
            motif::OP_NOOP
        }
    }

    /// Decodes a Motif operation bit set.
    pub fn from_motif_ops(ops: u16) -> DndAction {
        let mut actions = DndAction::empty();
        if ops & motif::OP_MOVE != 0 {
            actions |= DndAction::MOVE;
        }
        if ops & motif::OP_COPY != 0 {
            actions |= DndAction::COPY;
        }
        if ops & motif::OP_LINK != 0 {
            actions |= DndAction::LINK;
        }
        actions
    }
}
