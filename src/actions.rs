//! Ordered accumulation of caller configuration steps.

use crate::error::AgentError;
use std::fmt;

/// One deferred mutation of a provider builder.
pub type ConfigurationStep<B> = Box<dyn FnOnce(&mut B) -> Result<(), AgentError> + Send>;

/// Append-only list of configuration steps for a builder of type `B`.
///
/// Steps run in insertion order when composed; there is no way to remove or
/// reorder a step once pushed.
pub struct ConfigurationActions<B> {
    steps: Vec<ConfigurationStep<B>>,
}

impl<B> ConfigurationActions<B> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    /// Appends a fallible step.
    pub fn push(&mut self, step: ConfigurationStep<B>) {
        self.steps.push(step);
    }

    /// Appends an infallible step.
    pub fn append<F>(&mut self, step: F)
    where
        F: FnOnce(&mut B) + Send + 'static,
    {
        self.steps.push(Box::new(move |builder| {
            step(builder);
            Ok(())
        }));
    }

    /// Number of recorded steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no step has been recorded.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Folds the steps into one callable that runs them in insertion order,
    /// stopping at the first error.
    pub fn compose(self) -> impl FnOnce(&mut B) -> Result<(), AgentError> {
        move |builder| {
            for step in self.steps {
                step(builder)?;
            }
            Ok(())
        }
    }
}

impl<B> Default for ConfigurationActions<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B> fmt::Debug for ConfigurationActions<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationActions")
            .field("steps", &self.steps.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_composition_is_a_no_op() {
        let actions = ConfigurationActions::<Vec<u8>>::new();
        assert!(actions.is_empty());

        let mut target = vec![1];
        actions.compose()(&mut target).unwrap();
        assert_eq!(target, vec![1]);
    }

    #[test]
    fn steps_run_in_insertion_order() {
        let mut actions = ConfigurationActions::<Vec<&'static str>>::new();
        actions.append(|v| v.push("a"));
        actions.append(|v| v.push("b"));
        actions.append(|v| v.push("c"));
        assert_eq!(actions.len(), 3);

        let mut target = Vec::new();
        actions.compose()(&mut target).unwrap();
        assert_eq!(target, vec!["a", "b", "c"]);
    }

    #[test]
    fn composition_stops_at_first_error() {
        let mut actions = ConfigurationActions::<Vec<&'static str>>::new();
        actions.append(|v| v.push("a"));
        actions.push(Box::new(|_: &mut Vec<&'static str>| -> Result<(), AgentError> {
            Err(AgentError::Registration("boom".to_string()))
        }));
        actions.append(|v| v.push("c"));

        let mut target = Vec::new();
        let result = actions.compose()(&mut target);

        assert!(matches!(result, Err(AgentError::Registration(_))));
        assert_eq!(target, vec!["a"]);
    }
}
