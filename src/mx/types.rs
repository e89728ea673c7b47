use serde::{Deserialize, Serialize};

/// `{exchange, priority}` per spec.md §3. Collections are kept sorted
/// ascending by priority, ties broken by insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxRecord {
    pub exchange: String,
    pub priority: u16,
}

impl MxRecord {
    pub fn new(exchange: impl Into<String>, priority: u16) -> Self {
        Self {
            exchange: exchange.into(),
            priority,
        }
    }
}

/// Why an MX lookup produced no usable records (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MxFailureReason {
    NxDomain,
    ServFail,
    Timeout,
    NoMx,
}

impl MxFailureReason {
    pub fn tag(self) -> &'static str {
        match self {
            Self::NxDomain => "nxdomain",
            Self::ServFail => "servfail",
            Self::Timeout => "timeout",
            Self::NoMx => "no_mx",
        }
    }
}

/// Result of resolving a domain's mail exchangers. A domain with zero
/// records is representable and means "no mail service" (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MxLookupOutcome {
    pub records: Vec<MxRecord>,
    pub reason: Option<MxFailureReason>,
}

impl MxLookupOutcome {
    pub fn records(records: Vec<MxRecord>) -> Self {
        Self {
            records,
            reason: None,
        }
    }

    pub fn empty(reason: MxFailureReason) -> Self {
        Self {
            records: Vec::new(),
            reason: Some(reason),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Insertion sort, ascending by priority, stable on ties. spec.md's open
/// question notes the teacher uses a bubble sort and that the algorithm
/// doesn't matter, only the stable-ascending invariant; insertion sort gives
/// the same guarantee and is the natural choice for the small (≤ a few dozen)
/// record lists MX answers return.
pub fn sort_by_priority(records: &mut Vec<MxRecord>) {
    for i in 1..records.len() {
        let mut j = i;
        while j > 0 && records[j - 1].priority > records[j].priority {
            records.swap(j - 1, j);
            j -= 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorts_ascending_and_is_stable_on_ties() {
        let mut records = vec![
            MxRecord::new("c.example.com", 20),
            MxRecord::new("a.example.com", 10),
            MxRecord::new("b.example.com", 10),
        ];
        sort_by_priority(&mut records);
        assert_eq!(
            records,
            vec![
                MxRecord::new("a.example.com", 10),
                MxRecord::new("b.example.com", 10),
                MxRecord::new("c.example.com", 20),
            ]
        );
    }
}
