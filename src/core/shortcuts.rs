//! Shortcut dispatch
//!
//! Key combinations arrive as `shortcut.<combo>` events on an [`EventBus`].
//! Each binding turns its event into a [`ShortcutAction`] pushed onto a
//! queue; the board drains that queue at the start of its next render pass,
//! so handlers never touch runtime state directly.

use crate::config::SortOrder;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;

const MODIFIER_ORDER: [&str; 3] = ["ctrl", "alt", "shift"];

/// Normalize a key combination: lower-case, no spaces, modifiers first in
/// ctrl/alt/shift order, then the remaining keys in their given order.
pub fn normalize_combo(combo: &str) -> String {
    let lowered: String = combo
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase();

    let parts: Vec<&str> = lowered
        .split('+')
        .filter(|p| !p.is_empty())
        .map(|p| if p == "control" { "ctrl" } else { p })
        .collect();

    let modifiers = MODIFIER_ORDER
        .iter()
        .copied()
        .filter(|m| parts.contains(m));
    let others = parts
        .iter()
        .copied()
        .filter(|p| !MODIFIER_ORDER.contains(p));

    modifiers.chain(others).collect::<Vec<_>>().join("+")
}

/// Event name a combo is delivered under
pub fn shortcut_event(combo: &str) -> String {
    format!("shortcut.{}", normalize_combo(combo))
}

/// Runtime mutations a shortcut can request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShortcutAction {
    ToggleFilter,
    /// Upper-cased sector code
    ToggleSector(String),
    /// Upper-cased shop code
    ToggleShop(String),
    SetSortOrder(SortOrder),
    CycleSortKey,
    AddSortKey,
    ClearSortKeys,
    ToggleDisplay(String),
    NextPage,
    PrevPage,
    PageSizeUp,
    PageSizeDown,
}

impl ShortcutAction {
    /// Parse a configured action name; unknown names yield None
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        let action = match name {
            "toggle_filter" => Self::ToggleFilter,
            "sort_order_asc" => Self::SetSortOrder(SortOrder::Asc),
            "sort_order_desc" => Self::SetSortOrder(SortOrder::Desc),
            "cycle_sort_key" => Self::CycleSortKey,
            "add_sort_key" => Self::AddSortKey,
            "clear_sort_keys" => Self::ClearSortKeys,
            "next_page" => Self::NextPage,
            "prev_page" => Self::PrevPage,
            "page_size_up" => Self::PageSizeUp,
            "page_size_down" => Self::PageSizeDown,
            _ => {
                if let Some(code) = name.strip_prefix("toggle_sector_") {
                    Self::ToggleSector(non_empty(code)?.to_uppercase())
                } else if let Some(code) = name.strip_prefix("toggle_shop_") {
                    Self::ToggleShop(non_empty(code)?.to_uppercase())
                } else if let Some(field) = name.strip_prefix("toggle_display_") {
                    Self::ToggleDisplay(non_empty(field)?.to_string())
                } else {
                    return None;
                }
            }
        };
        Some(action)
    }

    /// Paging actions clamp against the currently visible quest count
    pub fn is_paging(&self) -> bool {
        matches!(self, Self::NextPage | Self::PrevPage)
    }
}

fn non_empty(s: &str) -> Option<&str> {
    let s = s.trim();
    (!s.is_empty()).then_some(s)
}

/// Sending half of the action queue; cheap to clone into handlers
#[derive(Clone)]
pub struct ActionSender {
    tx: UnboundedSender<ShortcutAction>,
    notify: Arc<Notify>,
}

impl ActionSender {
    /// Queue an action and wake the render actor
    pub fn send(&self, action: ShortcutAction) {
        if self.tx.send(action).is_ok() {
            self.notify.notify_one();
        } else {
            tracing::debug!("Action queue closed, dropping shortcut");
        }
    }
}

pub struct ActionReceiver {
    rx: UnboundedReceiver<ShortcutAction>,
    notify: Arc<Notify>,
}

impl ActionReceiver {
    /// Take everything queued so far, in arrival order
    pub fn drain(&mut self) -> Vec<ShortcutAction> {
        let mut actions = Vec::new();
        while let Ok(action) = self.rx.try_recv() {
            actions.push(action);
        }
        actions
    }

    /// Signalled whenever an action arrives or a render is requested
    pub fn notifier(&self) -> Arc<Notify> {
        self.notify.clone()
    }
}

pub fn action_channel() -> (ActionSender, ActionReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    let notify = Arc::new(Notify::new());
    (
        ActionSender {
            tx,
            notify: notify.clone(),
        },
        ActionReceiver { rx, notify },
    )
}

pub type HandlerId = u64;
type Handler = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: HandlerId,
    handlers: HashMap<String, Vec<(HandlerId, Handler)>>,
}

/// Named-event bus; handlers may be invoked from any thread
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<BusInner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BusInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on(&self, event: &str, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner
            .handlers
            .entry(event.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove one handler; returns false when it was not registered
    pub fn off(&self, event: &str, id: HandlerId) -> bool {
        let mut inner = self.lock();
        let Some(list) = inner.handlers.get_mut(event) else {
            return false;
        };
        let before = list.len();
        list.retain(|(handler_id, _)| *handler_id != id);
        let removed = list.len() != before;
        if list.is_empty() {
            inner.handlers.remove(event);
        }
        removed
    }

    /// Invoke every handler bound to `event`; returns how many ran.
    /// Handlers run outside the lock so they may bind or unbind.
    pub fn emit(&self, event: &str) -> usize {
        let handlers: Vec<Handler> = self
            .lock()
            .handlers
            .get(event)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in &handlers {
            handler();
        }
        handlers.len()
    }

    #[cfg(test)]
    pub fn handler_count(&self, event: &str) -> usize {
        self.lock().handlers.get(event).map_or(0, Vec::len)
    }
}

/// The set of bus subscriptions created from the `shortcuts` config map
pub struct ShortcutBindings {
    bus: EventBus,
    registered: Vec<(String, HandlerId)>,
}

impl ShortcutBindings {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            registered: Vec::new(),
        }
    }

    /// Replace all bindings with the given `action -> combo` map.
    /// Previous bindings are removed first so nothing is delivered twice.
    pub fn register(&mut self, shortcuts: &BTreeMap<String, String>, sender: &ActionSender) -> usize {
        self.unregister_all();

        for (name, combo) in shortcuts {
            let Some(action) = ShortcutAction::parse(name) else {
                tracing::warn!("Ignoring unknown shortcut action '{}'", name);
                continue;
            };
            let normalized = normalize_combo(combo);
            if normalized.is_empty() {
                tracing::warn!("Shortcut '{}' has an empty key combination", name);
                continue;
            }

            let event = format!("shortcut.{}", normalized);
            let sender = sender.clone();
            let id = self.bus.on(&event, move || sender.send(action.clone()));
            tracing::debug!("Bound {} -> {}", event, name);
            self.registered.push((event, id));
        }

        self.registered.len()
    }

    pub fn unregister_all(&mut self) {
        for (event, id) in self.registered.drain(..) {
            self.bus.off(&event, id);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.registered.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty()
    }
}

impl Drop for ShortcutBindings {
    fn drop(&mut self) {
        self.unregister_all();
    }
}
