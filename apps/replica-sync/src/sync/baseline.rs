use tracing::debug;

use crate::model::Snapshot;
use crate::protocol::Operation;

use super::reconcile::{self, ApplyError, ApplyOutcome};

/// Last snapshot known to be shared with the peer.
///
/// Outbound passes diff against it; inbound operations are folded into it as
/// they are applied so the next pass does not send them back.
#[derive(Debug, Default, Clone)]
pub struct Baseline {
    snapshot: Option<Snapshot>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    pub fn is_established(&self) -> bool {
        self.snapshot.is_some()
    }

    /// Records `current` as reconciled after a successful send.
    pub fn commit(&mut self, current: Snapshot) {
        self.snapshot = Some(current);
    }

    /// Forgets the baseline so the next pass sends a full replace.
    pub fn clear(&mut self) {
        self.snapshot = None;
    }

    /// Folds an operation that was just applied locally into the baseline.
    ///
    /// A full replace always establishes the baseline. Other operations are
    /// only absorbed once a baseline exists.
    pub fn absorb(&mut self, op: &Operation) -> Result<ApplyOutcome, ApplyError> {
        if let Operation::FullReplace(snapshot) = op {
            self.snapshot = Some(snapshot.as_ref().clone());
            return Ok(ApplyOutcome::Applied);
        }
        match self.snapshot.as_mut() {
            Some(snapshot) => reconcile::apply(snapshot, op),
            None => {
                debug!(
                    target = "replica_sync.baseline",
                    kind = op.wire_kind(),
                    "no baseline yet; operation not absorbed"
                );
                Ok(ApplyOutcome::NotReplicated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EntityKind, Token};
    use crate::sync::detect::detect;
    use serde_json::{Map, json};

    fn moved(x: f64) -> Operation {
        let mut changes = Map::new();
        changes.insert("x".into(), json!(x));
        Operation::update(EntityKind::Token, "t1", changes)
    }

    #[test]
    fn absorbed_remote_change_is_not_redetected() {
        let shared = Snapshot {
            tokens: vec![Token::new("t1", 0.0, 0.0, "a.png")],
            ..Default::default()
        };
        let mut baseline = Baseline::new();
        baseline.commit(shared.clone());

        let op = moved(12.0);
        let mut local = shared;
        reconcile::apply(&mut local, &op).unwrap();
        baseline.absorb(&op).unwrap();

        assert!(detect(baseline.get(), &local).is_empty());
    }

    #[test]
    fn full_replace_establishes_baseline() {
        let mut baseline = Baseline::new();
        assert_eq!(baseline.absorb(&moved(1.0)).unwrap(), ApplyOutcome::NotReplicated);
        assert!(!baseline.is_established());

        let snapshot = Snapshot {
            grid_size: 20,
            ..Default::default()
        };
        baseline.absorb(&Operation::full_replace(snapshot.clone())).unwrap();
        assert_eq!(baseline.get(), Some(&snapshot));

        baseline.clear();
        assert!(baseline.get().is_none());
    }
}
