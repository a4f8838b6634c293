//! Association preload advice

use crate::callsite::Callsite;
use crate::query::CallContext;
use frugal_types::Includes;

/// Decides the eager-load request a query should run with
#[derive(Debug, Clone, Copy, Default)]
pub struct PreloadAdvisor;

impl PreloadAdvisor {
    pub fn new() -> Self {
        PreloadAdvisor
    }

    /// Whether learned associations may be merged into this request.
    ///
    /// Not inside a preload scope, where the query is the advisor's own
    /// preload, and not for nested requests.
    pub fn applies(&self, ctx: &CallContext, requested: Option<&Includes>) -> bool {
        !ctx.is_preloading() && !requested.is_some_and(Includes::is_nested)
    }

    /// Includes to run the query with
    pub fn decide(
        &self,
        callsite: &Callsite,
        ctx: &CallContext,
        requested: Option<&Includes>,
    ) -> Option<Includes> {
        if !self.applies(ctx, requested) {
            return requested.cloned();
        }
        callsite.merge_includes(requested)
    }
}
