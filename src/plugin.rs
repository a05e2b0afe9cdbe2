//! SPANK-style plugin stack: ordered hook providers invoked at step
//! transitions, plus the option cache that merges provider-contributed
//! CLI options.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::Result;
use crate::model::{JobId, StepId};

/// Shared context passed to every hook invocation.
#[derive(Debug, Clone, Copy)]
pub struct HookContext {
    pub job_id: JobId,
    pub step_id: Option<StepId>,
}

/// Subset of hooks a provider may implement; every method has a no-op
/// default so a provider only overrides what it needs.
pub trait HookProvider: std::fmt::Debug {
    fn name(&self) -> &str;

    fn init(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
    fn user_init(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
    fn task_init(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
    fn task_post_fork(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
    fn task_exit(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }
    fn exit(&self, _ctx: &HookContext) -> Result<()> {
        Ok(())
    }

    /// Command-line option names this provider contributes, merged into
    /// the stack's global option cache.
    fn options(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    Init,
    UserInit,
    TaskInit,
    TaskPostFork,
    TaskExit,
    Exit,
}

struct Entry {
    provider: Box<dyn HookProvider>,
    required: bool,
}

/// One option slot: the first provider to register a given name wins;
/// later duplicates are recorded but marked disabled so a remote replica
/// parsing the same provider list still accepts (but ignores) them.
#[derive(Debug, Clone)]
pub struct OptionSlot {
    pub value: String,
    pub disabled: bool,
}

/// The ordered provider stack plus its merged, append-only option
/// cache. Every registration for a given (case-folded) name is kept —
/// the first is active, every later one is recorded disabled so a
/// remote replica parsing the same provider list in a different order
/// still resolves a consistent set of names.
#[derive(Default)]
pub struct PluginStack {
    providers: Vec<Entry>,
    options: HashMap<String, Vec<OptionSlot>>,
}

impl std::fmt::Debug for PluginStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginStack")
            .field("providers", &self.providers.iter().map(|e| e.provider.name()).collect::<Vec<_>>())
            .field("options", &self.options)
            .finish()
    }
}

impl PluginStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a provider in declaration order, merging its options
    /// into the cache (first writer wins; later duplicates disabled).
    pub fn register(&mut self, provider: Box<dyn HookProvider>, required: bool) {
        for (name, value) in provider.options() {
            let key = name.to_lowercase();
            let slots = self.options.entry(key).or_default();
            let disabled = !slots.is_empty();
            if disabled {
                warn!(option = %name, "duplicate plugin option, keeping first registration active");
            }
            slots.push(OptionSlot { value, disabled });
        }
        debug!(provider = provider.name(), required, "plugin provider registered");
        self.providers.push(Entry { provider, required });
    }

    /// The active (first-registered) slot for `name`, or `None` if no
    /// provider contributed it.
    pub fn option(&self, name: &str) -> Option<&OptionSlot> {
        self.options.get(&name.to_lowercase()).and_then(|slots| slots.iter().find(|s| !s.disabled))
    }

    /// Fires every provider's hook of `kind` in declaration order. A
    /// required provider's failure aborts the sequence; an optional
    /// provider's failure is logged and ignored.
    pub fn fire(&self, kind: HookKind, ctx: &HookContext) -> Result<()> {
        for entry in &self.providers {
            let result = match kind {
                HookKind::Init => entry.provider.init(ctx),
                HookKind::UserInit => entry.provider.user_init(ctx),
                HookKind::TaskInit => entry.provider.task_init(ctx),
                HookKind::TaskPostFork => entry.provider.task_post_fork(ctx),
                HookKind::TaskExit => entry.provider.task_exit(ctx),
                HookKind::Exit => entry.provider.exit(ctx),
            };
            if let Err(e) = result {
                if entry.required {
                    return Err(e);
                }
                warn!(provider = entry.provider.name(), error = %e, "optional hook failed, ignoring");
            }
        }
        Ok(())
    }
}
