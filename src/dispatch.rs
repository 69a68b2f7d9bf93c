//! Inbound frame dispatching.

use std::{fmt, sync::Arc};

use crate::{
    envelope::{Envelope, Kind},
    registry::Registry,
};

/// Refresh callback invoked when a built-in message kind arrives.
///
/// Fire-and-forget from the dispatcher's point of view: a hook that needs to
/// do async work should spawn it and return.
pub type RefreshHook = Arc<dyn Fn() + Send + Sync>;

/// External refresh hooks injected at channel construction.
///
/// Each hook belongs to a data store owned elsewhere; an absent hook means
/// messages of that kind only reach generic subscribers.
#[derive(Default, Clone)]
pub struct Hooks {
    /// invoked on `user.refresh`
    pub user: Option<RefreshHook>,
    /// invoked on `plan.refresh`
    pub plan: Option<RefreshHook>,
    /// invoked on `subscription.refresh`
    pub subscription: Option<RefreshHook>,
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("user", &self.user.is_some())
            .field("plan", &self.plan.is_some())
            .field("subscription", &self.subscription.is_some())
            .finish()
    }
}

// Decodes each inbound frame payload and routes it: built-in kinds fire their
// refresh hook, every decoded envelope reaches the registry. Nothing here
// propagates to the connection layer, one bad frame must not break the stream.
pub(crate) struct Dispatcher {
    hooks: Hooks,
    registry: Arc<Registry>,
}

impl Dispatcher {
    pub fn new(hooks: Hooks, registry: Arc<Registry>) -> Self {
        Self { hooks, registry }
    }

    pub fn dispatch(&self, payload: &str) {
        let envelope = match Envelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                log::warn!("Dropped undecodable frame: {}", err);
                return;
            }
        };

        log::trace!("Received {} message", envelope.type_name);

        match envelope.kind() {
            Kind::UserRefresh => self.fire(&self.hooks.user, "user"),
            Kind::PlanRefresh => self.fire(&self.hooks.plan, "plan"),
            Kind::SubscriptionRefresh => self.fire(&self.hooks.subscription, "subscription"),
            Kind::Other(_) => {}
        }

        self.registry.emit(&envelope.type_name, &envelope.data);
    }

    fn fire(&self, hook: &Option<RefreshHook>, store: &str) {
        if let Some(hook) = hook {
            log::debug!("Refresh {} store", store);
            hook();
        } else {
            log::trace!("No {} refresh hook installed", store);
        }
    }
}
