//! Per-run logging context.
//!
//! Every component takes a `&RunContext` and attaches its events to the run's span,
//! so two sweeps in the same process never share logger state.

use tracing::Span;

/// Named logging scope for one sweep or tool invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    name: String,
    span: Span,
}

impl RunContext {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let span = tracing::info_span!("run", name = %name);
        Self { name, span }
    }

    /// Context for a single sweep unit, nested under this run.
    pub fn unit(&self, index: usize) -> Self {
        let span = tracing::info_span!(parent: &self.span, "unit", it_id = index);
        Self { name: self.name.clone(), span }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new("canopy")
    }
}
