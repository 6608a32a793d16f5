use crate::graph::{KindTable, Operator};

use std::collections::BTreeSet;

/// Names of operators that must run on data synchronized across all workers.
pub type SerialSet = BTreeSet<String>;

/// Decides which operators sit on the serial side of a parallel → serial boundary.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryClassifier<'a> {
    serial: &'a SerialSet,
    kinds: &'a KindTable,
}

impl<'a> BoundaryClassifier<'a> {
    pub fn new(serial: &'a SerialSet, kinds: &'a KindTable) -> Self {
        Self { serial, kinds }
    }

    pub fn is_serial(&self, op: &Operator) -> bool {
        self.serial.contains(&op.name)
    }

    /// True iff `op` is serial and its kind is not exempt.
    pub fn requires_synchronization(&self, op: &Operator) -> bool {
        self.is_serial(op) && !self.kinds.is_exempt(&op.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::OpKind;

    fn serial(names: &[&str]) -> SerialSet {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parallel_operators_never_need_sync() {
        let set = serial(&["fc8"]);
        let kinds = KindTable::standard();
        let c = BoundaryClassifier::new(&set, &kinds);
        assert!(!c.requires_synchronization(&Operator::new("conv1", OpKind::Convolution)));
        assert!(c.requires_synchronization(&Operator::new("fc8", OpKind::InnerProduct)));
    }

    #[test]
    fn exempt_kinds_in_serial_set_are_skipped() {
        let set = serial(&["loss", "acc", "g"]);
        let kinds = KindTable::standard();
        let c = BoundaryClassifier::new(&set, &kinds);
        assert!(c.is_serial(&Operator::new("loss", OpKind::SoftmaxWithLoss)));
        assert!(!c.requires_synchronization(&Operator::new("loss", OpKind::SoftmaxWithLoss)));
        assert!(!c.requires_synchronization(&Operator::new("acc", OpKind::Accuracy)));
        assert!(!c.requires_synchronization(&Operator::new("g", OpKind::Gather)));
    }
}
