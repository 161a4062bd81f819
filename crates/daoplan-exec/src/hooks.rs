//! Before/after interception of DAO calls.
//!
//! Hooks are registered by name and attached to methods at compile time.
//! `before` runs in declaration order, `after` in reverse, and `after` sees
//! the outcome of the call, success or failure.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use daoplan_core::call::{Arg, Output};
use daoplan_core::error::{Error, Result};
use daoplan_core::id::MethodId;

/// Identity of the call a hook is observing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub method: MethodId,
    pub datasource_id: String,
}

pub trait Hook: Send + Sync {
    fn before(&self, _call: &CallContext, _args: &[Arg]) -> Result<()> {
        Ok(())
    }

    fn after(
        &self,
        _outcome: std::result::Result<&Output, &Error>,
        _call: &CallContext,
        _args: &[Arg],
    ) -> Result<()> {
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `hook` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, hook: Arc<dyn Hook>) {
        self.hooks.insert(name.into(), hook);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Hook>> {
        self.hooks.get(name).cloned()
    }

    /// Look up every name; an unregistered one is a configuration error.
    pub fn resolve(&self, method: &MethodId, names: &[String]) -> Result<Vec<(String, Arc<dyn Hook>)>> {
        names
            .iter()
            .map(|n| {
                self.get(n).map(|h| (n.clone(), h)).ok_or_else(|| {
                    Error::config(format!("method '{method}' uses hook '{n}', which is not registered"))
                })
            })
            .collect()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.hooks.keys()).finish()
    }
}

/// Run `call` between the hooks' before and after callbacks.
///
/// A failing `before` skips the call; the hooks that already ran still get
/// their `after` with that error. Errors raised by `after` while another
/// error is in flight are attached to it as suppressed.
pub(crate) fn around(
    hooks: &[(String, Arc<dyn Hook>)],
    ctx: &CallContext,
    args: &[Arg],
    call: impl FnOnce() -> Result<Output>,
) -> Result<Output> {
    let mut entered = 0;
    let mut failure = None;
    for (name, hook) in hooks {
        match hook.before(ctx, args) {
            Ok(()) => entered += 1,
            Err(e) => {
                tracing::debug!(hook = %name, method = %ctx.method, error = %e, "before hook failed");
                failure = Some(e);
                break;
            }
        }
    }

    let mut outcome = match failure {
        Some(e) => Err(e),
        None => call(),
    };

    for (name, hook) in hooks[..entered].iter().rev() {
        let res = hook.after(outcome.as_ref(), ctx, args);
        if let Err(e) = res {
            tracing::debug!(hook = %name, method = %ctx.method, error = %e, "after hook failed");
            outcome = match outcome {
                Ok(_) => Err(e),
                Err(primary) => Err(primary.with_suppressed(e)),
            };
        }
    }
    outcome
}
