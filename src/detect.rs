//! Destination protocol detection.
//!
//! When the pointer moves onto a new window during a drag, the source has
//! to find out which protocol the window (or a proxy acting for it)
//! speaks. The checks run in a fixed order and the first match wins;
//! anything our own process registered is short-circuited without a
//! server round-trip.

use tracing::trace;
use x11rb::protocol::xproto::{AtomEnum, Window};

use crate::motif;
use crate::windowing::{DndError, Windowing};
use crate::xdnd::{XDND_MIN_VERSION, XDND_VERSION};

/// The drag protocol spoken with a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    /// No protocol; the destination cannot accept drops.
    #[default]
    None,
    /// Drops on the desktop itself.
    Rootwin,
    /// The XDND protocol.
    Xdnd,
    /// The Motif drag-and-drop protocol.
    Motif,
}

/// Resolves `XdndProxy` on `window`.
///
/// A proxy is only honored when it names itself in its own `XdndProxy`
/// property; a stale pointer to a recycled window id must not divert the
/// drag.
fn get_proxy_window<W: Windowing>(w: &W, window: Window) -> Result<Option<Window>, DndError> {
    let atoms = w.atoms();
    let Some(prop) = w.get_property32(window, atoms.XdndProxy, AtomEnum::WINDOW.into())? else {
        return Ok(None);
    };
    let Some(&proxy) = prop.first() else {
        return Ok(None);
    };
    let check = w.get_property32(proxy, atoms.XdndProxy, AtomEnum::WINDOW.into())?;
    if check.as_deref().and_then(|v| v.first().copied()) == Some(proxy) {
        Ok(Some(proxy))
    } else {
        Ok(None)
    }
}

/// Checks `window` (or its verified proxy) for `XdndAware`, returning the
/// message destination and the negotiated version.
pub fn xdnd_check_dest<W: Windowing>(
    w: &W,
    window: Window,
) -> Result<Option<(Window, u32)>, DndError> {
    let atoms = w.atoms();
    let dest = get_proxy_window(w, window)?.unwrap_or(window);
    let Some(prop) = w.get_property32(dest, atoms.XdndAware, AtomEnum::ATOM.into())? else {
        return Ok(None);
    };
    match prop.first() {
        Some(&version) if version >= XDND_MIN_VERSION => {
            Ok(Some((dest, version.min(XDND_VERSION))))
        }
        _ => Ok(None),
    }
}

/// Checks `window` for a usable `_MOTIF_DRAG_RECEIVER_INFO`.
pub fn motif_check_dest<W: Windowing>(w: &W, window: Window) -> Result<bool, DndError> {
    let atoms = w.atoms();
    let Some(bytes) =
        w.get_property8(window, atoms._MOTIF_DRAG_RECEIVER_INFO, atoms._MOTIF_DRAG_RECEIVER_INFO)?
    else {
        return Ok(false);
    };
    let Some(info) = motif::parse_receiver_info(&bytes) else {
        return Ok(false);
    };
    Ok(info.version == 0
        && matches!(
            info.style,
            motif::STYLE_PREFER_PREREGISTER | motif::STYLE_PREFER_DYNAMIC | motif::STYLE_DYNAMIC
        ))
}

/// Determines which protocol to speak with `window`, returning the actual
/// message destination (after proxy resolution), the protocol and the
/// protocol version.
///
/// `is_local` answers whether a window belongs to this process; local drop
/// sites always speak current XDND and skip the property queries.
pub fn detect_protocol<W: Windowing>(
    w: &W,
    window: Window,
    root: Window,
    is_local: impl Fn(Window) -> bool,
) -> Result<(Window, Protocol, u32), DndError> {
    if is_local(window) {
        if window == root {
            return Ok((window, Protocol::Rootwin, 0));
        }
        trace!(window, "local drop site");
        return Ok((window, Protocol::Xdnd, XDND_VERSION));
    }

    if let Some((dest, version)) = xdnd_check_dest(w, window)? {
        trace!(window, dest, version, "XDND destination");
        return Ok((dest, Protocol::Xdnd, version));
    }

    if motif_check_dest(w, window)? {
        trace!(window, "Motif destination");
        return Ok((window, Protocol::Motif, 0));
    }

    let atoms = w.atoms();
    if window == root
        || w.get_property32(window, atoms.ENLIGHTENMENT_DESKTOP, AtomEnum::CARDINAL.into())?
            .is_some()
    {
        return Ok((window, Protocol::Rootwin, 0));
    }

    Ok((window, Protocol::None, 0))
}
