//! Per-screen cache of top-level windows for drag hit-testing.
//!
//! During a drag the pointer is grabbed, so the usual enter/leave events
//! never reach us and the destination under the pointer has to be found by
//! geometry. Round-tripping a `QueryTree` on every motion event would be
//! far too slow; instead the cache snapshots the root's children once and
//! keeps the snapshot current from `SubstructureNotify` events. Shapes are
//! fetched lazily the first time a shaped window is actually hit.

use std::collections::HashMap;

use tracing::trace;
use x11rb::protocol::xproto::Window;

use crate::windowing::{DndError, Rect, Region, Windowing};

#[derive(Debug)]
struct CacheChild {
    window: Window,
    rect: Rect,
    mapped: bool,
    shape_selected: bool,
    shape_valid: bool,
    /// `None` while valid means the window is unshaped.
    shape: Option<Region>,
}

impl CacheChild {
    fn new(window: Window, rect: Rect, mapped: bool) -> CacheChild {
        CacheChild {
            window,
            rect,
            mapped,
            shape_selected: false,
            shape_valid: false,
            shape: None,
        }
    }
}

/// Snapshot of one screen's top-level windows, in stacking order.
#[derive(Debug)]
pub struct WindowCache {
    root: Window,
    /// Bottom-to-top; hit-testing walks it in reverse.
    children: Vec<CacheChild>,
    index: HashMap<Window, usize>,
    subscribed: bool,
}

impl WindowCache {
    /// Builds the cache for a screen and subscribes to substructure events
    /// on its root.
    ///
    /// An untrusted client cannot enumerate foreign windows; it caches only
    /// the process's own top-levels and receives no updates.
    pub fn new<W: Windowing>(
        w: &W,
        screen: usize,
        local_toplevels: &[Window],
    ) -> Result<WindowCache, DndError> {
        let root = w.root_window(screen);
        let mut cache = WindowCache {
            root,
            children: Vec::new(),
            index: HashMap::new(),
            subscribed: false,
        };

        if !w.trusted() {
            for &window in local_toplevels {
                if let Some(rect) = w.geometry(window)? {
                    cache.add(window, rect, true);
                }
            }
            return Ok(cache);
        }

        w.select_substructure(root)?;
        cache.subscribed = true;

        if let Some(query) = w.child_info(root, false)? {
            for info in query.children {
                cache.add(
                    info.window,
                    Rect { x: info.x, y: info.y, width: info.width, height: info.height },
                    info.mapped,
                );
            }
        }

        Ok(cache)
    }

    /// The root window this cache belongs to.
    pub fn root(&self) -> Window {
        self.root
    }

    /// Undoes the substructure subscription. Called when the last drag on
    /// this screen ends.
    pub fn shutdown<W: Windowing>(&self, w: &W) -> Result<(), DndError> {
        if self.subscribed {
            w.unselect_substructure(self.root)?;
        }
        Ok(())
    }

    fn reindex(&mut self, from: usize) {
        for (i, child) in self.children.iter().enumerate().skip(from) {
            self.index.insert(child.window, i);
        }
    }

    fn add(&mut self, window: Window, rect: Rect, mapped: bool) {
        if self.index.contains_key(&window) {
            return;
        }
        self.index.insert(window, self.children.len());
        self.children.push(CacheChild::new(window, rect, mapped));
    }

    /// A window was created; it starts unmapped at the top of the stack.
    pub fn create(&mut self, window: Window, rect: Rect) {
        self.add(window, rect, false);
    }

    /// A window was destroyed.
    pub fn destroy(&mut self, window: Window) {
        if let Some(pos) = self.index.remove(&window) {
            self.children.remove(pos);
            self.reindex(pos);
        }
    }

    /// A window was mapped.
    pub fn map(&mut self, window: Window) {
        if let Some(&pos) = self.index.get(&window) {
            self.children[pos].mapped = true;
        }
    }

    /// A window was unmapped.
    pub fn unmap(&mut self, window: Window) {
        if let Some(&pos) = self.index.get(&window) {
            self.children[pos].mapped = false;
        }
    }

    /// A window moved, resized or restacked. `above` is the new sibling
    /// directly below it, or `None` when it dropped to the bottom.
    pub fn configure(&mut self, window: Window, rect: Rect, above: Option<Window>) {
        let Some(&pos) = self.index.get(&window) else {
            return;
        };
        self.children[pos].rect = rect;

        match above {
            None => {
                if pos != 0 {
                    let child = self.children.remove(pos);
                    self.children.insert(0, child);
                    self.reindex(0);
                }
            }
            Some(above) => {
                if let Some(&above_pos) = self.index.get(&above) {
                    if pos != above_pos + 1 {
                        let child = self.children.remove(pos);
                        let target = if pos < above_pos { above_pos } else { above_pos + 1 };
                        self.children.insert(target, child);
                        self.reindex(pos.min(target));
                    }
                }
            }
        }
    }

    /// A window's shape changed; its memoized region is stale.
    pub fn shape_changed(&mut self, window: Window) {
        if let Some(&pos) = self.index.get(&window) {
            let child = &mut self.children[pos];
            child.shape_valid = false;
            child.shape = None;
        }
    }

    fn within_shape<W: Windowing>(
        w: &W,
        child: &mut CacheChild,
        x: i32,
        y: i32,
    ) -> Result<bool, DndError> {
        if !child.shape_selected {
            w.select_shape_events(child.window)?;
            child.shape_selected = true;
        }
        if !child.shape_valid {
            child.shape = w.shape_region(child.window)?;
            child.shape_valid = true;
        }
        Ok(match &child.shape {
            None => true,
            Some(region) => region.contains(x, y),
        })
    }

    /// Finds the client window under the pointer: the deepest window
    /// carrying `WM_STATE`, the containing top-level if no managed client
    /// is found inside it, or the root when the point hits nothing.
    ///
    /// `ignore` excludes the drag icon window from the search.
    pub fn window_at<W: Windowing>(
        &mut self,
        w: &W,
        ignore: Window,
        x_root: i16,
        y_root: i16,
    ) -> Result<Window, DndError> {
        let x = i32::from(x_root);
        let y = i32::from(y_root);

        for child in self.children.iter_mut().rev() {
            if child.window == ignore || !child.mapped {
                continue;
            }
            if !child.rect.contains(x, y) {
                continue;
            }
            if !Self::within_shape(w, child, x - i32::from(child.rect.x), y - i32::from(child.rect.y))? {
                continue;
            }

            let found = client_window_recurse(
                w,
                child.window,
                true,
                x - i32::from(child.rect.x),
                y - i32::from(child.rect.y),
            )?
            .unwrap_or(child.window);
            trace!(x_root, y_root, window = found, "hit test");
            return Ok(found);
        }

        Ok(self.root)
    }
}

/// Descends from a top-level looking for the managed client window at the
/// given window-relative point.
fn client_window_recurse<W: Windowing>(
    w: &W,
    window: Window,
    is_toplevel: bool,
    mut x: i32,
    mut y: i32,
) -> Result<Option<Window>, DndError> {
    let Some(query) = w.child_info(window, is_toplevel)? else {
        return Ok(None);
    };
    if query.has_wm_state {
        return Ok(Some(window));
    }

    let hit = query.children.iter().rev().find(|child| {
        child.mapped
            && child.input_output
            && Rect { x: child.x, y: child.y, width: child.width, height: child.height }
                .contains(x, y)
    });

    match hit {
        Some(child) => {
            x -= i32::from(child.x);
            y -= i32::from(child.y);
            if child.has_wm_state {
                Ok(Some(child.window))
            } else {
                client_window_recurse(w, child.window, false, x, y)
            }
        }
        None => Ok(None),
    }
}
