use message_store::MessageStore;

/// Registration gate - withholds outbound flushing until the session is
/// registered.
///
/// The flag is monotonic: it starts `false`, transitions to `true` at most
/// once per process lifetime, and never reverts. Once registered, every
/// future `requires_registration` check short-circuits to eligible.
#[derive(Debug, Default)]
pub struct RegistrationGate {
    registered: bool,
}

impl RegistrationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    /// Record a completed registration. Returns `true` only on the first
    /// transition; repeated completions are no-ops.
    pub fn complete(&mut self) -> bool {
        if self.registered {
            return false;
        }
        self.registered = true;
        true
    }

    /// How many stored entries were gated and have just become eligible.
    /// Only meaningful right after [`complete`](Self::complete).
    pub fn pending_eligible(&self, store: &MessageStore) -> usize {
        if self.registered {
            store.gated_count()
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_happens_exactly_once() {
        let mut gate = RegistrationGate::new();
        assert!(!gate.is_registered());
        assert!(gate.complete());
        assert!(gate.is_registered());
        assert!(!gate.complete());
        assert!(gate.is_registered());
    }
}
