// Tests module
// Validator invariants: availability bias, conflict safety, batch completeness
// Leader invariants: at most one lock holder across instances sharing a bus

pub mod support;
pub mod validator_invariants;
