//! Guards - boolean predicates gating assertion evaluation
//!
//! Deliberately not a templating or expression language: a guard is a
//! small predicate tree over the fact map and the change records produced
//! earlier in the same run.

use crate::error::GuardError;
use crate::facts::{FactValue, Facts};
use crate::types::ChangeRecord;
use serde::{Deserialize, Serialize};

/// A guard expression
///
/// Evaluated against facts and previously-produced change records. A false
/// guard skips the assertion: no record, no error. Comparing or testing
/// truthiness of an undefined fact is a [`GuardError`]; use `FactDefined`
/// to test for existence explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Always true (the default guard)
    Always,
    /// True when the named fact has any value
    FactDefined { fact: String },
    /// True when the named fact is truthy (defined, fatal otherwise)
    FactTruthy { fact: String },
    /// True when the named fact equals the given value
    FactEquals { fact: String, value: FactValue },
    /// True when the named fact differs from the given value
    FactNotEquals { fact: String, value: FactValue },
    /// True when an earlier assertion in this run reported a change
    Changed { assertion: String },
    /// True when every sub-guard is true
    All { guards: Vec<Guard> },
    /// True when at least one sub-guard is true
    Any { guards: Vec<Guard> },
    /// Negation
    Not { guard: Box<Guard> },
}

impl Default for Guard {
    fn default() -> Self {
        Self::Always
    }
}

impl Guard {
    /// Evaluate this guard
    pub fn eval(&self, facts: &Facts, records: &[ChangeRecord]) -> Result<bool, GuardError> {
        match self {
            Self::Always => Ok(true),
            Self::FactDefined { fact } => Ok(facts.contains(fact)),
            Self::FactTruthy { fact } => Ok(lookup(facts, fact)?.is_truthy()),
            Self::FactEquals { fact, value } => Ok(lookup(facts, fact)? == value),
            Self::FactNotEquals { fact, value } => Ok(lookup(facts, fact)? != value),
            Self::Changed { assertion } => Ok(records
                .iter()
                .any(|r| r.assertion == *assertion && r.changed)),
            Self::All { guards } => {
                for g in guards {
                    if !g.eval(facts, records)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any { guards } => {
                for g in guards {
                    if g.eval(facts, records)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not { guard } => Ok(!guard.eval(facts, records)?),
        }
    }
}

fn lookup<'a>(facts: &'a Facts, name: &str) -> Result<&'a FactValue, GuardError> {
    facts
        .get(name)
        .ok_or_else(|| GuardError::UndefinedFact(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts() -> Facts {
        let mut f = Facts::new();
        f.set("mongodb_pip_index_url", "");
        f.set("os_family", "debian");
        f.set("is_primary", true);
        f
    }

    #[test]
    fn test_equals_on_empty_string() {
        let g = Guard::FactEquals {
            fact: "mongodb_pip_index_url".into(),
            value: FactValue::Str(String::new()),
        };
        assert!(g.eval(&facts(), &[]).unwrap());
    }

    #[test]
    fn test_equals_and_not_equals_are_exclusive() {
        let f = facts();
        let eq = Guard::FactEquals {
            fact: "mongodb_pip_index_url".into(),
            value: FactValue::Str(String::new()),
        };
        let ne = Guard::FactNotEquals {
            fact: "mongodb_pip_index_url".into(),
            value: FactValue::Str(String::new()),
        };
        // exactly one of the pair holds for any defined value
        assert_ne!(eq.eval(&f, &[]).unwrap(), ne.eval(&f, &[]).unwrap());
    }

    #[test]
    fn test_undefined_fact_is_fatal_for_comparison() {
        let g = Guard::FactEquals {
            fact: "missing".into(),
            value: FactValue::Str("x".into()),
        };
        assert_eq!(
            g.eval(&facts(), &[]),
            Err(GuardError::UndefinedFact("missing".into()))
        );
    }

    #[test]
    fn test_fact_defined_is_not_fatal() {
        let g = Guard::FactDefined {
            fact: "missing".into(),
        };
        assert_eq!(g.eval(&facts(), &[]), Ok(false));
    }

    #[test]
    fn test_changed_looks_at_prior_records() {
        let records = vec![ChangeRecord {
            assertion: "/data/db".into(),
            resource_type: "directory".into(),
            changed: true,
            detail: None,
        }];
        let g = Guard::Changed {
            assertion: "/data/db".into(),
        };
        assert!(g.eval(&facts(), &records).unwrap());
        assert!(!g.eval(&facts(), &[]).unwrap());
    }

    #[test]
    fn test_composite_guards() {
        let f = facts();
        let g = Guard::All {
            guards: vec![
                Guard::FactEquals {
                    fact: "os_family".into(),
                    value: FactValue::Str("debian".into()),
                },
                Guard::Not {
                    guard: Box::new(Guard::FactTruthy {
                        fact: "mongodb_pip_index_url".into(),
                    }),
                },
            ],
        };
        assert!(g.eval(&f, &[]).unwrap());
    }
}
