//! The operator converter registry.
//!
//! Maps each [`OpKind`] to the converter that lowers nodes of that kind.
//! The process-wide registry is the only shared state in the pipeline: it
//! is populated exactly once, by [`global`]'s first call registering every
//! built-in converter, and is read-only from then on, so conversions on
//! multiple threads need no locking.
//!
//! [`Registry::register`] is idempotent for an identical (kind, converter)
//! pair and rejects a *different* converter for an already-registered kind,
//! so a misconfigured setup fails at startup instead of silently
//! overriding behavior.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::ConvertError;
use crate::ir::{OpKind, OperatorNode};
use crate::lower::{self, OpError};
use crate::options::{Device, ExtraConfig};
use crate::program::TensorModule;

/// A converter lowers one operator node into its tensor-equivalent module.
pub type Converter =
    fn(&OperatorNode, Device, &ExtraConfig) -> Result<Box<dyn TensorModule>, OpError>;

/// Immutable mapping from operator kind to converter.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<OpKind, Converter>,
}

impl Registry {
    /// An empty registry. Useful for tests; production code uses
    /// [`global`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in converter.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        let builtins: [(OpKind, Converter); 6] = [
            (OpKind::Scaler, lower::scaler::convert),
            (OpKind::LinearRegressor, lower::linear::convert_regressor),
            (OpKind::LinearClassifier, lower::linear::convert_classifier),
            (OpKind::TreeEnsembleRegressor, lower::trees::convert_regressor),
            (OpKind::TreeEnsembleClassifier, lower::trees::convert_classifier),
            (OpKind::Aggregator, lower::aggregate::convert),
        ];
        for (kind, converter) in builtins {
            registry
                .register(kind, converter)
                .expect("builtin kinds are distinct");
        }
        registry
    }

    /// Register a converter for `kind`.
    ///
    /// Re-registering the same pair is a no-op; a different converter for
    /// an existing kind is a configuration defect and fails.
    pub fn register(&mut self, kind: OpKind, converter: Converter) -> Result<(), ConvertError> {
        match self.entries.get(&kind) {
            None => {
                self.entries.insert(kind, converter);
                Ok(())
            }
            // Function pointers are compared by address.
            Some(&existing) if existing as usize == converter as usize => Ok(()),
            Some(_) => Err(ConvertError::DuplicateRegistration { kind }),
        }
    }

    /// Look up the converter for `kind`.
    pub fn resolve(&self, kind: OpKind) -> Result<Converter, ConvertError> {
        self.entries
            .get(&kind)
            .copied()
            .ok_or(ConvertError::UnknownOperator { kind })
    }

    /// Whether `kind` has a registered converter.
    pub fn contains(&self, kind: OpKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// The supported kinds, in stable order.
    pub fn kinds(&self) -> impl Iterator<Item = OpKind> + '_ {
        self.entries.keys().copied()
    }
}

/// The process-wide registry, populated with the built-in converters on
/// first use and frozen afterwards.
pub fn global() -> &'static Registry {
    static GLOBAL: OnceLock<Registry> = OnceLock::new();
    GLOBAL.get_or_init(Registry::with_builtins)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_kind() {
        let registry = Registry::with_builtins();
        for kind in [
            OpKind::Scaler,
            OpKind::LinearRegressor,
            OpKind::LinearClassifier,
            OpKind::TreeEnsembleRegressor,
            OpKind::TreeEnsembleClassifier,
            OpKind::Aggregator,
        ] {
            assert!(registry.contains(kind), "missing {kind}");
            assert!(registry.resolve(kind).is_ok());
        }
    }

    #[test]
    fn reregistering_same_pair_is_noop() {
        let mut registry = Registry::with_builtins();
        registry
            .register(OpKind::Scaler, lower::scaler::convert)
            .expect("identical registration must be accepted");
    }

    #[test]
    fn conflicting_registration_fails() {
        let mut registry = Registry::with_builtins();
        let err = registry
            .register(OpKind::Scaler, lower::aggregate::convert)
            .unwrap_err();
        assert!(matches!(
            err,
            ConvertError::DuplicateRegistration {
                kind: OpKind::Scaler
            }
        ));
        // The original entry survives.
        let resolved = registry.resolve(OpKind::Scaler).unwrap();
        assert_eq!(resolved as usize, lower::scaler::convert as usize);
    }

    #[test]
    fn unknown_kind_fails_resolution() {
        let registry = Registry::new();
        assert!(matches!(
            registry.resolve(OpKind::Aggregator),
            Err(ConvertError::UnknownOperator {
                kind: OpKind::Aggregator
            })
        ));
    }

    #[test]
    fn global_registry_is_frozen_and_shared() {
        let a = global() as *const Registry;
        let b = global() as *const Registry;
        assert_eq!(a, b);
        assert_eq!(global().kinds().count(), 6);
    }
}
