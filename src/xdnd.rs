//! Wire codec for the six XDND client messages.
//!
//! Every XDND message is a format-32 `ClientMessage` with five data words.
//! The helpers here only pack and unpack those words; protocol state lives
//! in [`crate::engine`].

use x11rb::protocol::xproto::{Atom, Window};

/// Highest protocol version this implementation speaks.
pub const XDND_VERSION: u32 = 5;
/// Sources older than version 3 used an incompatible handshake and are
/// treated as not speaking XDND at all.
pub const XDND_MIN_VERSION: u32 = 3;

/// Decoded `XdndEnter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enter {
    /// The drag source window.
    pub source: Window,
    /// Protocol version advertised by the source.
    pub version: u32,
    /// Whether the target list exceeds three entries and must be fetched
    /// from the source's `XdndTypeList` property.
    pub more_targets: bool,
    /// Up to three inline target atoms (zero entries are unused slots).
    pub targets: [Atom; 3],
}

impl Enter {
    /// Unpacks the five data words.
    pub fn decode(data: &[u32; 5]) -> Enter {
        Enter {
            source: data[0],
            version: (data[1] & 0xff00_0000) >> 24,
            more_targets: (data[1] & 1) != 0,
            targets: [data[2], data[3], data[4]],
        }
    }

    /// Packs the five data words.
    pub fn encode(&self) -> [u32; 5] {
        [
            self.source,
            (self.version << 24) | u32::from(self.more_targets),
            self.targets[0],
            self.targets[1],
            self.targets[2],
        ]
    }
}

/// Decoded `XdndPosition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// The drag source window.
    pub source: Window,
    /// Pointer x in root coordinates.
    pub x_root: i16,
    /// Pointer y in root coordinates.
    pub y_root: i16,
    /// Timestamp of the pointer motion.
    pub time: u32,
    /// The action the source suggests.
    pub action: Atom,
}

impl Position {
    /// Unpacks the five data words. The coordinates share one word, x in
    /// the high 16 bits.
    pub fn decode(data: &[u32; 5]) -> Position {
        Position {
            source: data[0],
            x_root: (data[2] >> 16) as i16,
            y_root: (data[2] & 0xffff) as i16,
            time: data[3],
            action: data[4],
        }
    }

    /// Packs the five data words.
    pub fn encode(&self) -> [u32; 5] {
        [
            self.source,
            0,
            (u32::from(self.x_root as u16) << 16) | u32::from(self.y_root as u16),
            self.time,
            self.action,
        ]
    }
}

/// Decoded `XdndStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    /// The destination window replying.
    pub dest: Window,
    /// Whether the destination will accept the drop.
    pub accept: bool,
    /// The action the destination chose (`0` when rejecting).
    pub action: Atom,
}

impl Status {
    /// Unpacks the five data words.
    pub fn decode(data: &[u32; 5]) -> Status {
        Status {
            dest: data[0],
            accept: (data[1] & 1) != 0,
            action: data[4],
        }
    }

    /// Packs the five data words. Bit 1 of the flags word asks the source
    /// to keep sending positions; we always want them.
    pub fn encode(&self) -> [u32; 5] {
        [
            self.dest,
            if self.accept { 2 | 1 } else { 0 },
            0,
            0,
            self.action,
        ]
    }
}

/// Packs `XdndLeave`.
pub fn encode_leave(source: Window) -> [u32; 5] {
    [source, 0, 0, 0, 0]
}

/// Packs `XdndDrop`.
pub fn encode_drop(source: Window, time: u32) -> [u32; 5] {
    [source, 0, time, 0, 0]
}

/// Decoded `XdndFinished`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finished {
    /// The destination window replying.
    pub dest: Window,
    /// Whether the destination successfully received the data. Only
    /// meaningful from protocol version 5 on.
    pub success: bool,
    /// The action the destination performed (version 5 and later).
    pub action: Atom,
}

impl Finished {
    /// Unpacks the five data words.
    pub fn decode(data: &[u32; 5]) -> Finished {
        Finished {
            dest: data[0],
            success: (data[1] & 1) != 0,
            action: data[2],
        }
    }

    /// Packs the five data words.
    pub fn encode(&self) -> [u32; 5] {
        [
            self.dest,
            u32::from(self.success),
            if self.success { self.action } else { 0 },
            0,
            0,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_round_trips_the_full_i16_range() {
        for x in i16::MIN..=i16::MAX {
            for y in [i16::MIN, -1, 0, 1, i16::MAX] {
                let msg = Position {
                    source: 0x40_0001,
                    x_root: x,
                    y_root: y,
                    time: 12345,
                    action: 42,
                };
                assert_eq!(Position::decode(&msg.encode()), msg);
            }
        }
        for y in i16::MIN..=i16::MAX {
            let msg = Position {
                source: 0x40_0001,
                x_root: -300,
                y_root: y,
                time: 0,
                action: 0,
            };
            assert_eq!(Position::decode(&msg.encode()), msg);
        }
    }

    #[test]
    fn enter_packs_version_and_flag() {
        let msg = Enter {
            source: 7,
            version: 5,
            more_targets: true,
            targets: [0, 0, 0],
        };
        let data = msg.encode();
        assert_eq!(data[1], (5 << 24) | 1);
        assert_eq!(Enter::decode(&data), msg);

        let inline = Enter {
            source: 7,
            version: 4,
            more_targets: false,
            targets: [11, 12, 13],
        };
        assert_eq!(Enter::decode(&inline.encode()), inline);
    }

    #[test]
    fn status_accept_bit() {
        let accept = Status { dest: 9, accept: true, action: 77 };
        let decoded = Status::decode(&accept.encode());
        assert!(decoded.accept);
        assert_eq!(decoded.action, 77);

        let reject = Status { dest: 9, accept: false, action: 0 };
        assert!(!Status::decode(&reject.encode()).accept);
    }

    #[test]
    fn finished_success_flag_gates_action() {
        let ok = Finished { dest: 3, success: true, action: 55 };
        assert_eq!(Finished::decode(&ok.encode()), ok);

        let failed = Finished { dest: 3, success: false, action: 55 };
        let decoded = Finished::decode(&failed.encode());
        assert!(!decoded.success);
        assert_eq!(decoded.action, 0);
    }
}
