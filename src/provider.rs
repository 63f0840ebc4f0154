// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

/// The provider boundary for the `fn::open` builtin.
///
/// Providers are the only place evaluation leaves its sandbox. The interface
/// is a narrow synchronous capability: implementations may wrap asynchronous
/// work internally, but they return a value, an unknown placeholder, or an
/// error before evaluation continues, and they are expected to honor the
/// caller's cancellation token.
use crate::schema::Schema;
use crate::value::Value;

use core::fmt;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

/// A cooperative cancellation signal. The evaluator checks it before
/// descending into a child expression and before each provider call;
/// providers should check it during long-running work.
#[derive(Debug, Default, Clone)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// The result of opening a provider.
#[derive(Debug, Clone)]
pub enum ProviderOutput {
    /// A concrete value, with a hint that it should be treated as secret.
    Value {
        value: serde_json::Value,
        secret: bool,
    },
    /// The provider deferred its output; the result is unknown until some
    /// later evaluation.
    Unknown,
}

/// An external component that produces a value from validated inputs.
pub trait Provider {
    /// The provider's declared input and output schemas. Consulted during
    /// graph construction; the input schema validates the `inputs` argument
    /// of `fn::open` before `open` is called.
    fn schema(&self) -> (Rc<Schema>, Rc<Schema>);

    /// Produces the provider's value. `inputs` has already been validated
    /// against the declared input schema. Errors are recoverable: the
    /// evaluator reports them at the `fn::open` expression and substitutes an
    /// unknown value of the declared output schema.
    fn open(&self, inputs: &Value, cancel: &CancelToken) -> Result<ProviderOutput>;
}

/// The set of providers available to `fn::open`, keyed by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<Rc<str>, Rc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, provider: Rc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    pub fn get(&self, name: &str) -> Option<&Rc<dyn Provider>> {
        self.providers.get(name)
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.providers.keys()).finish()
    }
}
