//! Wire codec for the Motif drag-and-drop protocol.
//!
//! Motif multiplexes everything over a single format-8 client message whose
//! 20 bytes are packed at byte granularity: byte 0 is a reason code (high
//! bit set on replies), byte 1 the sender's byte order, and the remaining
//! fields sit at fixed byte offsets in the *sender's* endianness. The
//! reader converts. Nothing here may rely on host struct layout; every
//! field is read and written through explicit offsets.
//!
//! The protocol also shares a process-wide table of target lists in a
//! window property (`_MOTIF_DRAG_TARGETS`), because messages only carry an
//! index into it. The table codec and its append-with-dedup logic live
//! here; the server-grab discipline around mutation lives in
//! [`crate::engine`].

use x11rb::protocol::xproto::{Atom, Window};

use crate::action::DndAction;

/// Message reason codes (low 7 bits of byte 0).
pub const TOP_LEVEL_ENTER: u8 = 0;
/// Pointer left the top-level window.
pub const TOP_LEVEL_LEAVE: u8 = 1;
/// Pointer motion within a top-level.
pub const DRAG_MOTION: u8 = 2;
/// Reply-only: pointer entered a drop site.
pub const DROP_SITE_ENTER: u8 = 3;
/// Reply-only: pointer left a drop site.
pub const DROP_SITE_LEAVE: u8 = 4;
/// The source dropped.
pub const DROP_START: u8 = 5;
/// Defined by Motif but never sent on the wire.
pub const DROP_FINISH: u8 = 6;
/// Defined by Motif but never sent on the wire.
pub const DRAG_DROP_FINISH: u8 = 7;
/// The set of offered operations changed mid-drag.
pub const OPERATION_CHANGED: u8 = 8;

/// High bit of the reason byte: message is a reply.
pub const REPLY_FLAG: u8 = 0x80;

/// Receiver protocol styles (`_MOTIF_DRAG_RECEIVER_INFO`).
pub const STYLE_PREFER_PREREGISTER: u8 = 2;
/// Receiver prefers the dynamic protocol but accepts preregister.
pub const STYLE_PREFER_DYNAMIC: u8 = 4;
/// Receiver speaks only the dynamic protocol.
pub const STYLE_DYNAMIC: u8 = 5;

/// Operation codes, a bit set in flag nibbles.
pub const OP_NOOP: u16 = 0;
/// Move the data.
pub const OP_MOVE: u16 = 0x01;
/// Copy the data.
pub const OP_COPY: u16 = 0x02;
/// Link to the data.
pub const OP_LINK: u16 = 0x04;

/// Drop-site status codes carried in status replies.
pub const NO_DROP_SITE: u16 = 1;
/// Pointer is over a valid drop site.
pub const DROP_SITE_VALID: u16 = 3;

/// Completion codes carried in drop replies.
pub const COMPLETION_DROP: u16 = 0;
/// The drop was cancelled.
pub const COMPLETION_DROP_CANCEL: u16 = 2;

/// The byte-order tag this process writes into outgoing messages.
pub fn local_byte_order() -> u8 {
    if cfg!(target_endian = "big") {
        b'B'
    } else {
        b'l'
    }
}

fn card16_to_host(x: u16, byte_order: u8) -> u16 {
    if byte_order == local_byte_order() {
        x
    } else {
        x.swap_bytes()
    }
}

fn card32_to_host(x: u32, byte_order: u8) -> u32 {
    if byte_order == local_byte_order() {
        x
    } else {
        x.swap_bytes()
    }
}

/// Read-side view of a packed 20-byte Motif message.
#[derive(Debug, Clone, Copy)]
pub struct Wire<'a> {
    data: &'a [u8; 20],
}

impl<'a> Wire<'a> {
    /// Wraps the raw client message bytes.
    pub fn new(data: &'a [u8; 20]) -> Wire<'a> {
        Wire { data }
    }

    /// The raw reason byte, reply flag included.
    pub fn reason(&self) -> u8 {
        self.data[0]
    }

    fn order(&self) -> u8 {
        self.data[1]
    }

    /// The 16-bit field at short index `i` (byte offset `2 * i`), converted
    /// from the sender's byte order.
    pub fn short(&self, i: usize) -> u16 {
        let raw = u16::from_ne_bytes([self.data[2 * i], self.data[2 * i + 1]]);
        card16_to_host(raw, self.order())
    }

    /// The 32-bit field at long index `i` (byte offset `4 * i`), converted
    /// from the sender's byte order.
    pub fn long(&self, i: usize) -> u32 {
        let raw = u32::from_ne_bytes([
            self.data[4 * i],
            self.data[4 * i + 1],
            self.data[4 * i + 2],
            self.data[4 * i + 3],
        ]);
        card32_to_host(raw, self.order())
    }
}

/// Write-side builder for a packed 20-byte Motif message, always in the
/// local byte order.
#[derive(Debug)]
pub struct Builder {
    data: [u8; 20],
}

impl Builder {
    /// Starts a message with the given reason byte.
    pub fn new(reason: u8) -> Builder {
        let mut data = [0u8; 20];
        data[0] = reason;
        data[1] = local_byte_order();
        Builder { data }
    }

    /// Writes the 16-bit field at short index `i`.
    pub fn short(mut self, i: usize, value: u16) -> Builder {
        self.data[2 * i..2 * i + 2].copy_from_slice(&value.to_ne_bytes());
        self
    }

    /// Writes the 32-bit field at long index `i`.
    pub fn long(mut self, i: usize, value: u32) -> Builder {
        self.data[4 * i..4 * i + 4].copy_from_slice(&value.to_ne_bytes());
        self
    }

    /// Returns the packed message.
    pub fn finish(self) -> [u8; 20] {
        self.data
    }
}

/// A decoded Motif drag message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// The drag entered a top-level window.
    TopLevelEnter {
        /// Flag nibbles (unused for this kind).
        flags: u16,
        /// Timestamp of the crossing.
        time: u32,
        /// The source window.
        source: Window,
        /// The property/selection atom under which the source published its
        /// initiator info.
        selection: Atom,
    },
    /// The drag left a top-level window.
    TopLevelLeave {
        /// Flag nibbles.
        flags: u16,
        /// Timestamp of the crossing.
        time: u32,
    },
    /// Pointer motion, or (as a reply) a motion acknowledgment.
    DragMotion {
        /// Operation and operations nibbles.
        flags: u16,
        /// Timestamp of the motion.
        time: u32,
        /// Pointer x in root coordinates.
        x_root: i16,
        /// Pointer y in root coordinates.
        y_root: i16,
    },
    /// Reply: the pointer entered a drop site.
    DropSiteEnter {
        /// Status nibbles.
        flags: u16,
        /// Timestamp.
        time: u32,
    },
    /// Reply: the pointer left a drop site.
    DropSiteLeave {
        /// Status nibbles.
        flags: u16,
        /// Timestamp.
        time: u32,
    },
    /// The source dropped.
    DropStart {
        /// Operation nibbles.
        flags: u16,
        /// Timestamp of the drop.
        time: u32,
        /// Pointer x in root coordinates.
        x_root: i16,
        /// Pointer y in root coordinates.
        y_root: i16,
        /// The initiator-info property atom.
        selection: Atom,
        /// The source window.
        source: Window,
    },
    /// The offered operation set changed.
    OperationChanged {
        /// Operation nibbles.
        flags: u16,
        /// Timestamp.
        time: u32,
    },
}

/// Decodes a Motif client message, returning the message and whether it is
/// a reply. Unknown and never-sent reason codes decode to `None`.
pub fn decode(data: &[u8; 20]) -> Option<(Message, bool)> {
    let wire = Wire::new(data);
    let reason = wire.reason();
    let is_reply = reason & REPLY_FLAG != 0;
    let flags = wire.short(1);
    let time = wire.long(1);

    let message = match reason & 0x7f {
        TOP_LEVEL_ENTER => Message::TopLevelEnter {
            flags,
            time,
            source: wire.long(2),
            selection: wire.long(3),
        },
        TOP_LEVEL_LEAVE => Message::TopLevelLeave { flags, time },
        DRAG_MOTION => Message::DragMotion {
            flags,
            time,
            x_root: wire.short(4) as i16,
            y_root: wire.short(5) as i16,
        },
        DROP_SITE_ENTER => Message::DropSiteEnter { flags, time },
        DROP_SITE_LEAVE => Message::DropSiteLeave { flags, time },
        DROP_START => Message::DropStart {
            flags,
            time,
            x_root: wire.short(4) as i16,
            y_root: wire.short(5) as i16,
            selection: wire.long(3),
            source: wire.long(4),
        },
        OPERATION_CHANGED => Message::OperationChanged { flags, time },
        _ => return None,
    };

    Some((message, is_reply))
}

/// Encodes the flags short of an outgoing motion/drop message: the
/// suggested operation in the low nibble, the set of possible operations
/// shifted into the second byte.
pub fn drag_flags(suggested: DndAction, possible: DndAction) -> u16 {
    let mut flags = suggested.to_motif_op();
    if possible.contains(DndAction::MOVE) {
        flags |= OP_MOVE << 8;
    }
    if possible.contains(DndAction::COPY) {
        flags |= OP_COPY << 8;
    }
    if possible.contains(DndAction::LINK) {
        flags |= OP_LINK << 8;
    }
    flags
}

/// Decodes the flags short of an incoming motion/drop message into
/// (suggested action, possible actions). An unrecognized operation code
/// suggests a copy.
pub fn translate_flags(flags: u16) -> (DndAction, DndAction) {
    let suggested = match flags & 0x000f {
        OP_MOVE => DndAction::MOVE,
        OP_LINK => DndAction::LINK,
        _ => DndAction::COPY,
    };
    let possible = DndAction::from_motif_ops((flags & 0x00f0) >> 4);
    (suggested, possible)
}

/// Parsed `_MOTIF_DRAG_RECEIVER_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiverInfo {
    /// Protocol version; only version 0 exists.
    pub version: u8,
    /// The receiver's protocol style.
    pub style: u8,
    /// A proxy window, or 0.
    pub proxy: Window,
}

/// Byte length of the receiver info struct.
pub const RECEIVER_INFO_SIZE: usize = 16;

/// Parses the 16-byte receiver info property. Any size mismatch means the
/// property is malformed and the window is not a Motif drop site.
pub fn parse_receiver_info(bytes: &[u8]) -> Option<ReceiverInfo> {
    if bytes.len() != RECEIVER_INFO_SIZE {
        return None;
    }
    let order = bytes[0];
    Some(ReceiverInfo {
        version: bytes[1],
        style: bytes[2],
        proxy: card32_to_host(u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), order),
    })
}

/// Encodes the receiver info this process publishes on registered drop
/// sites: version 0, dynamic style, no proxy.
pub fn encode_receiver_info() -> [u8; RECEIVER_INFO_SIZE] {
    let mut bytes = [0u8; RECEIVER_INFO_SIZE];
    bytes[0] = local_byte_order();
    bytes[1] = 0;
    bytes[2] = STYLE_DYNAMIC;
    // proxy_window and num_drop_sites stay zero
    bytes[12..16].copy_from_slice(&(RECEIVER_INFO_SIZE as u32).to_ne_bytes());
    bytes
}

/// Byte length of the initiator info struct.
pub const INITIATOR_INFO_SIZE: usize = 8;

/// Parses the 8-byte initiator info a source publishes under its per-drag
/// selection atom: (index into the shared target table, selection atom).
pub fn parse_initiator_info(bytes: &[u8]) -> Option<(u16, Atom)> {
    if bytes.len() != INITIATOR_INFO_SIZE {
        return None;
    }
    let order = bytes[0];
    let index = card16_to_host(u16::from_ne_bytes([bytes[2], bytes[3]]), order);
    let selection = card32_to_host(u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), order);
    Some((index, selection))
}

/// Encodes initiator info in the local byte order.
pub fn encode_initiator_info(targets_index: u16, selection: Atom) -> [u8; INITIATOR_INFO_SIZE] {
    let mut bytes = [0u8; INITIATOR_INFO_SIZE];
    bytes[0] = local_byte_order();
    bytes[1] = 0;
    bytes[2..4].copy_from_slice(&targets_index.to_ne_bytes());
    bytes[4..8].copy_from_slice(&selection.to_ne_bytes());
    bytes
}

/// Byte length of the target table header.
const TABLE_HEADER_SIZE: usize = 8;

/// Parses the shared target table: an 8-byte header (byte order, version,
/// list count, total size) followed by `{count:u16, atoms:u32[count]}`
/// records. Any size inconsistency discards the whole table.
pub fn parse_target_table(bytes: &[u8]) -> Option<Vec<Vec<Atom>>> {
    if bytes.len() < TABLE_HEADER_SIZE {
        return None;
    }
    let order = bytes[0];
    let n_lists = card16_to_host(u16::from_ne_bytes([bytes[2], bytes[3]]), order) as usize;
    let total_size =
        card32_to_host(u32::from_ne_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), order) as usize;
    if total_size != bytes.len() {
        return None;
    }

    let mut lists = Vec::with_capacity(n_lists);
    let mut p = TABLE_HEADER_SIZE;
    for _ in 0..n_lists {
        if p + 2 > bytes.len() {
            return None;
        }
        let count = card16_to_host(u16::from_ne_bytes([bytes[p], bytes[p + 1]]), order) as usize;
        p += 2;
        if p + 4 * count > bytes.len() {
            return None;
        }
        let mut targets = Vec::with_capacity(count);
        for i in 0..count {
            let off = p + 4 * i;
            targets.push(card32_to_host(
                u32::from_ne_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]]),
                order,
            ));
        }
        p += 4 * count;
        lists.push(targets);
    }

    Some(lists)
}

/// Encodes the target table in the local byte order.
pub fn encode_target_table(lists: &[Vec<Atom>]) -> Vec<u8> {
    let total_size = TABLE_HEADER_SIZE
        + lists.iter().map(|l| 2 + 4 * l.len()).sum::<usize>();

    let mut bytes = Vec::with_capacity(total_size);
    bytes.push(local_byte_order());
    bytes.push(0); // protocol version
    bytes.extend_from_slice(&(lists.len() as u16).to_ne_bytes());
    bytes.extend_from_slice(&(total_size as u32).to_ne_bytes());
    for list in lists {
        bytes.extend_from_slice(&(list.len() as u16).to_ne_bytes());
        for &atom in list {
            bytes.extend_from_slice(&atom.to_ne_bytes());
        }
    }
    bytes
}

/// Finds the (sorted) target list in the table, if present.
pub fn table_index(lists: &[Vec<Atom>], sorted: &[Atom]) -> Option<usize> {
    lists.iter().position(|list| list == sorted)
}

/// Sorts a target list into its canonical table form.
pub fn sort_targets(targets: &[Atom]) -> Vec<Atom> {
    let mut sorted = targets.to_vec();
    sorted.sort_unstable();
    sorted
}
